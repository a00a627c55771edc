//! Local agent orchestration service: runs Claude Code or Codex, normalizes
//! their output into [`AgentEvent`](woasobi_universal_agent_schema::AgentEvent)s
//! and streams them over SSE.

pub mod agent_run;
pub mod claude_sdk;
pub mod cli;
pub mod command_cache;
pub mod commands;
pub mod models;
pub mod router;
pub mod session_registry;
pub mod sse;
