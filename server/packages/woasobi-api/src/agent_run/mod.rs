//! Agent runs: one backend invocation translated into a stream of
//! [`AgentEvent`]s that always opens with `session` and closes with `done`.

mod claude;
mod codex;

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::BoxStream;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use woasobi_agent_management::agents::AgentId;
use woasobi_agent_management::locator::{BinaryLocator, LocateBinary};
use woasobi_error::WoasobiError;
use woasobi_universal_agent_schema::{AgentEvent, SlashCommandInfo};

use crate::claude_sdk::{ClaudeCodeProcess, ClaudeQuery};
use crate::command_cache::{default_cache_path, ClaudeHelpProbe, CommandCache};
use crate::session_registry::SessionRegistry;

pub use claude::claude_environment;
pub use codex::{codex_arguments, codex_environment};

pub type EventStream = BoxStream<'static, Result<AgentEvent, WoasobiError>>;

const CONVERSATION_CHAR_BUDGET: usize = 8000;
const MIN_CONVERSATION_TURNS: usize = 3;

/// Per-run backend settings supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub provider: AgentId,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub cwd: Option<PathBuf>,
}

impl AgentConfig {
    pub fn new(provider: AgentId) -> Self {
        Self {
            provider,
            api_key: None,
            base_url: None,
            model: None,
            cwd: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ConversationMessage {
    pub role: ConversationRole,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub prompt: String,
    pub config: AgentConfig,
    pub conversation: Vec<ConversationMessage>,
    pub permission_mode: Option<String>,
    pub is_slash_command: bool,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>, config: AgentConfig) -> Self {
        Self {
            prompt: prompt.into(),
            config,
            conversation: Vec::new(),
            permission_mode: None,
            is_slash_command: false,
        }
    }
}

/// Whether a prompt is a backend command such as `/compact`.
pub fn looks_like_slash_command(prompt: &str) -> bool {
    let mut chars = prompt.trim().chars();
    chars.next() == Some('/') && chars.next().is_some_and(|next| !next.is_whitespace())
}

/// Prior turns rendered ahead of the current request, newest turns kept first.
///
/// Selection stops once another turn would exceed the character budget, but
/// never before three turns are included.
pub fn format_conversation(conversation: &[ConversationMessage]) -> String {
    if conversation.is_empty() {
        return String::new();
    }

    let mut selected = Vec::new();
    let mut total = 0usize;
    for message in conversation.iter().rev() {
        let speaker = match message.role {
            ConversationRole::User => "User",
            ConversationRole::Assistant => "Assistant",
        };
        let turn = format!("{speaker}: {}", message.content);
        let length = turn.chars().count();
        if total + length > CONVERSATION_CHAR_BUDGET && selected.len() >= MIN_CONVERSATION_TURNS {
            break;
        }
        total += length;
        selected.push(turn);
    }
    selected.reverse();

    format!(
        "## Previous Conversation\n{}\n\n---\n## Current Request\n",
        selected.join("\n\n")
    )
}

/// Extended PATH plus the caller's environment, as the child sees it.
fn inherited_environment(
    base: impl IntoIterator<Item = (OsString, OsString)>,
    path: OsString,
) -> HashMap<OsString, OsString> {
    let mut env: HashMap<OsString, OsString> = base.into_iter().collect();
    env.insert(OsString::from("PATH"), path);
    env
}

/// Shared collaborators for every run.
#[derive(Debug, Clone)]
pub struct AgentRuntime {
    sessions: Arc<SessionRegistry>,
    commands: Arc<CommandCache>,
    claude_locator: Arc<dyn LocateBinary>,
    codex_locator: Arc<dyn LocateBinary>,
    claude: Arc<dyn ClaudeQuery>,
}

impl AgentRuntime {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        commands: Arc<CommandCache>,
        claude_locator: Arc<dyn LocateBinary>,
        codex_locator: Arc<dyn LocateBinary>,
        claude: Arc<dyn ClaudeQuery>,
    ) -> Self {
        Self {
            sessions,
            commands,
            claude_locator,
            codex_locator,
            claude,
        }
    }

    /// Runtime wired to the real executables and the default cache file.
    pub fn from_environment() -> Self {
        let claude_locator: Arc<dyn LocateBinary> = Arc::new(BinaryLocator::for_agent(AgentId::Claude));
        let codex_locator: Arc<dyn LocateBinary> = Arc::new(BinaryLocator::for_agent(AgentId::Codex));
        let claude: Arc<dyn ClaudeQuery> = Arc::new(ClaudeCodeProcess);
        let probe = ClaudeHelpProbe::new(Arc::clone(&claude_locator), Arc::clone(&claude));
        let commands = Arc::new(CommandCache::new(default_cache_path(), Arc::new(probe)));
        Self::new(
            Arc::new(SessionRegistry::new()),
            commands,
            claude_locator,
            codex_locator,
            claude,
        )
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn commands(&self) -> &Arc<CommandCache> {
        &self.commands
    }

    pub fn locator(&self, agent: AgentId) -> &Arc<dyn LocateBinary> {
        match agent {
            AgentId::Claude => &self.claude_locator,
            AgentId::Codex => &self.codex_locator,
        }
    }

    pub fn run(&self, request: RunRequest) -> EventStream {
        match request.config.provider {
            AgentId::Claude => claude::run(self.clone(), request),
            AgentId::Codex => codex::run(self.clone(), request),
        }
    }

    pub async fn cached_commands(&self) -> Option<Vec<SlashCommandInfo>> {
        self.commands.lookup().await
    }
}

/// Resolves a backend executable off the async executor.
async fn locate(locator: &Arc<dyn LocateBinary>) -> Result<Option<PathBuf>, WoasobiError> {
    let locator = Arc::clone(locator);
    tokio::task::spawn_blocking(move || locator.locate())
        .await
        .map_err(|err| WoasobiError::StreamError {
            message: format!("binary lookup failed: {err}"),
        })
}
