use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequest,
    UnsupportedAgent,
    SessionNotFound,
    StreamError,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "urn:woasobi:error:invalid_request",
            Self::UnsupportedAgent => "urn:woasobi:error:unsupported_agent",
            Self::SessionNotFound => "urn:woasobi:error:session_not_found",
            Self::StreamError => "urn:woasobi:error:stream_error",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "Invalid Request",
            Self::UnsupportedAgent => "Unsupported Agent",
            Self::SessionNotFound => "Session Not Found",
            Self::StreamError => "Stream Error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::UnsupportedAgent => 400,
            Self::SessionNotFound => 404,
            Self::StreamError => 502,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ProblemDetails {
    pub fn new(error_type: ErrorType, detail: Option<String>) -> Self {
        Self {
            type_: error_type.as_urn().to_string(),
            title: error_type.title().to_string(),
            status: error_type.status_code(),
            detail,
            instance: None,
            extensions: Map::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WoasobiError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("unsupported agent: {agent}")]
    UnsupportedAgent { agent: String },
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },
    #[error("stream error: {message}")]
    StreamError { message: String },
}

impl WoasobiError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::UnsupportedAgent { .. } => ErrorType::UnsupportedAgent,
            Self::SessionNotFound { .. } => ErrorType::SessionNotFound,
            Self::StreamError { .. } => ErrorType::StreamError,
        }
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let mut problem = ProblemDetails::new(self.error_type(), Some(self.to_string()));
        let mut extensions = Map::new();
        match self {
            Self::UnsupportedAgent { agent } => {
                extensions.insert("agent".to_string(), Value::String(agent.clone()));
            }
            Self::SessionNotFound { session_id } => {
                extensions.insert("sessionId".to_string(), Value::String(session_id.clone()));
            }
            Self::StreamError { message } => {
                let mut details = Map::new();
                details.insert("message".to_string(), Value::String(message.clone()));
                extensions.insert("details".to_string(), Value::Object(details));
            }
            Self::InvalidRequest { .. } => {}
        }
        problem.extensions = extensions;
        problem
    }
}

impl From<WoasobiError> for ProblemDetails {
    fn from(value: WoasobiError) -> Self {
        value.to_problem_details()
    }
}

impl From<&WoasobiError> for ProblemDetails {
    fn from(value: &WoasobiError) -> Self {
        value.to_problem_details()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_carries_session_id_extension() {
        let problem = WoasobiError::SessionNotFound {
            session_id: "abc123".to_string(),
        }
        .to_problem_details();

        assert_eq!(problem.status, 404);
        assert_eq!(problem.type_, "urn:woasobi:error:session_not_found");
        assert_eq!(problem.extensions["sessionId"], "abc123");

        let json = serde_json::to_value(&problem).expect("serialize problem");
        assert_eq!(json["sessionId"], "abc123");
        assert_eq!(json["title"], "Session Not Found");
    }

    #[test]
    fn invalid_request_has_no_extensions() {
        let problem = ProblemDetails::from(WoasobiError::InvalidRequest {
            message: "prompt is required".to_string(),
        });
        assert_eq!(problem.status, 400);
        assert!(problem.extensions.is_empty());
        assert_eq!(
            problem.detail.as_deref(),
            Some("invalid request: prompt is required")
        );
    }
}
