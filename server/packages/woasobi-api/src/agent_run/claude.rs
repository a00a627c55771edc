use std::collections::HashMap;
use std::ffi::OsString;

use futures::StreamExt;
use woasobi_agent_management::locator::current_extended_path;
use woasobi_universal_agent_schema::{
    failure_event, normalize_commands, AgentEvent, ClaudeNormalizer, CLAUDE_CODE_NOT_FOUND,
};

use super::{format_conversation, inherited_environment, locate, AgentConfig, AgentRuntime, EventStream, RunRequest};
use crate::claude_sdk::QueryOptions;

/// Child environment for Claude Code. A caller-supplied key replaces any
/// ambient Anthropic credentials.
pub fn claude_environment(
    base: impl IntoIterator<Item = (OsString, OsString)>,
    path: OsString,
    config: &AgentConfig,
) -> HashMap<OsString, OsString> {
    let mut env = inherited_environment(base, path);
    if let Some(api_key) = &config.api_key {
        env.insert("ANTHROPIC_AUTH_TOKEN".into(), api_key.into());
        env.remove(&OsString::from("ANTHROPIC_API_KEY"));
        match &config.base_url {
            Some(base_url) => {
                env.insert("ANTHROPIC_BASE_URL".into(), base_url.into());
            }
            None => {
                env.remove(&OsString::from("ANTHROPIC_BASE_URL"));
            }
        }
    }
    if let Some(model) = &config.model {
        env.insert("ANTHROPIC_MODEL".into(), model.into());
    }
    env
}

pub(super) fn run(runtime: AgentRuntime, request: RunRequest) -> EventStream {
    Box::pin(async_stream::stream! {
        let session = runtime.sessions.open();
        let session_id = session.id().to_string();
        let token = session.token().clone();
        tracing::info!(session_id = %session_id, provider = "claude", "agent run started");
        yield Ok(AgentEvent::session(session_id.clone()));

        let executable = match locate(&runtime.claude_locator).await {
            Ok(Some(executable)) => executable,
            Ok(None) => {
                tracing::warn!(session_id = %session_id, "claude code executable not found");
                yield Ok(AgentEvent::error(CLAUDE_CODE_NOT_FOUND));
                drop(session);
                yield Ok(AgentEvent::done());
                return;
            }
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "claude code lookup failed");
                yield Ok(AgentEvent::error(err.to_string()));
                drop(session);
                yield Ok(AgentEvent::done());
                return;
            }
        };

        if token.is_cancelled() {
            tracing::info!(session_id = %session_id, "agent run cancelled before spawn");
            drop(session);
            yield Ok(AgentEvent::done());
            return;
        }

        let RunRequest {
            prompt,
            config,
            conversation,
            permission_mode,
            is_slash_command,
        } = request;
        let env = claude_environment(std::env::vars_os(), current_extended_path(), &config);
        let full_prompt = if is_slash_command {
            prompt
        } else {
            format!("{}{}", format_conversation(&conversation), prompt)
        };

        let options = QueryOptions::new(executable, env, token.clone())
            .with_permission_mode(permission_mode.as_deref())
            .with_model(config.model.clone())
            .with_cwd(config.cwd.clone());
        let mut records = runtime.claude.query(full_prompt, options);
        let mut normalizer = ClaudeNormalizer::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                record = records.next() => Some(record),
            };
            let Some(record) = next else {
                tracing::info!(session_id = %session_id, "agent run cancelled");
                break;
            };
            let Some(record) = record else {
                break;
            };
            match record {
                Ok(record) => match normalizer.convert(&record) {
                    Ok(events) => {
                        for event in events {
                            if let AgentEvent::Init {
                                slash_commands: Some(names),
                                ..
                            } = &event
                            {
                                runtime.commands.store(normalize_commands(names)).await;
                            }
                            yield Ok(event);
                        }
                    }
                    Err(reason) => {
                        tracing::debug!(session_id = %session_id, reason = %reason, "skipping claude record");
                    }
                },
                Err(err) => {
                    tracing::warn!(session_id = %session_id, error = %err, "claude code query failed");
                    yield Ok(failure_event(err.to_string()));
                    break;
                }
            }
        }

        drop(records);
        drop(session);
        tracing::info!(session_id = %session_id, "agent run finished");
        yield Ok(AgentEvent::done());
    })
}
