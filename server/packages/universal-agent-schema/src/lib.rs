use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

pub mod agents;

pub use agents::claude::ClaudeNormalizer;
pub use agents::codex::{parse_exec_output, CodexOutput};

/// Error message emitted when the Claude Code executable cannot be found.
pub const CLAUDE_CODE_NOT_FOUND: &str = "__CLAUDE_CODE_NOT_FOUND__";
/// Error message emitted when the Codex executable cannot be found.
pub const CODEX_NOT_FOUND: &str = "__CODEX_NOT_FOUND__";
/// Error message emitted when a backend rejects its credentials.
pub const API_KEY_ERROR: &str = "__API_KEY_ERROR__";

const AUTH_ERROR_MARKERS: &[&str] = &[
    "invalid api key",
    "invalid_api_key",
    "authentication",
    "unauthorized",
    "forbidden",
    "401",
    "403",
    "please run /login",
    "login required",
];

/// Whether a backend failure message describes rejected or missing credentials.
pub fn is_auth_error(message: &str) -> bool {
    let lowered = message.to_lowercase();
    AUTH_ERROR_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Error event for a backend failure, folding credential problems into the
/// auth sentinel.
pub fn failure_event(message: impl Into<String>) -> AgentEvent {
    let message = message.into();
    if is_auth_error(&message) {
        AgentEvent::error(API_KEY_ERROR)
    } else {
        AgentEvent::error(message)
    }
}

/// One frame of the provider-independent run protocol.
///
/// Every run opens with exactly one `session` and closes with exactly one
/// `done`; everything else sits between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Session {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Init {
        #[serde(rename = "permissionMode", default, skip_serializing_if = "Option::is_none")]
        permission_mode: Option<String>,
        #[serde(rename = "slashCommands", default, skip_serializing_if = "Option::is_none")]
        slash_commands: Option<Vec<String>>,
    },
    Status {
        #[serde(rename = "permissionMode", default, skip_serializing_if = "Option::is_none")]
        permission_mode: Option<String>,
        #[serde(rename = "statusText")]
        status_text: String,
        #[serde(rename = "awaitingPermission")]
        awaiting_permission: bool,
    },
    Text {
        content: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        output: String,
        #[serde(rename = "isError")]
        is_error: bool,
    },
    Result {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
        #[serde(rename = "inputTokens", default, skip_serializing_if = "Option::is_none")]
        input_tokens: Option<u64>,
        #[serde(rename = "cachedInputTokens", default, skip_serializing_if = "Option::is_none")]
        cached_input_tokens: Option<u64>,
        #[serde(rename = "outputTokens", default, skip_serializing_if = "Option::is_none")]
        output_tokens: Option<u64>,
    },
    Error {
        message: String,
    },
    Done {},
}

impl AgentEvent {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self::Session {
            session_id: session_id.into(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn done() -> Self {
        Self::Done {}
    }

    /// Wire discriminator, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::Init { .. } => "init",
            Self::Status { .. } => "status",
            Self::Text { .. } => "text",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::Done {} => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SlashCommandInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub argument_hint: String,
}

impl SlashCommandInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>, argument_hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            argument_hint: argument_hint.into(),
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, "", "")
    }
}

/// Turns advertised command names into commands: strips one leading slash,
/// drops blanks and keeps the first occurrence of each name.
pub fn normalize_commands<I, S>(names: I) -> Vec<SlashCommandInfo>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut commands = Vec::new();
    for name in names {
        let name = name.as_ref().trim();
        let name = name.strip_prefix('/').unwrap_or(name);
        if name.is_empty() || !seen.insert(name.to_string()) {
            continue;
        }
        commands.push(SlashCommandInfo::bare(name));
    }
    commands
}
