use serde_json::Value;

use crate::AgentEvent;

/// What a finished `codex exec --json` run printed to stdout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodexOutput {
    pub pieces: Vec<String>,
    pub input_tokens: Option<u64>,
    pub cached_input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

impl CodexOutput {
    /// All accumulated agent text, one piece per line.
    pub fn text(&self) -> Option<String> {
        if self.pieces.is_empty() {
            return None;
        }
        Some(self.pieces.join("\n"))
    }

    pub fn has_usage(&self) -> bool {
        self.input_tokens.is_some() || self.cached_input_tokens.is_some() || self.output_tokens.is_some()
    }

    /// `text` (when anything was said) followed by `result` (when usage was reported).
    pub fn into_events(self) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        if let Some(text) = self.text() {
            events.push(AgentEvent::text(text));
        }
        if self.has_usage() {
            events.push(AgentEvent::Result {
                content: None,
                cost: None,
                duration: None,
                input_tokens: self.input_tokens,
                cached_input_tokens: self.cached_input_tokens,
                output_tokens: self.output_tokens,
            });
        }
        events
    }
}

pub fn parse_exec_output(stdout: &str) -> CodexOutput {
    let mut output = CodexOutput::default();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: Value = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(_) => {
                output.pieces.push(line.to_string());
                continue;
            }
        };
        match record.get("type").and_then(Value::as_str) {
            Some("item.completed") => {
                if let Some(text) = agent_message_text(&record) {
                    output.pieces.push(text.to_string());
                }
            }
            Some("turn.completed") => {
                if let Some(usage) = record.get("usage") {
                    let counter = |key: &str| usage.get(key).and_then(Value::as_u64);
                    output.input_tokens = counter("input_tokens").or(output.input_tokens);
                    output.cached_input_tokens =
                        counter("cached_input_tokens").or(output.cached_input_tokens);
                    output.output_tokens = counter("output_tokens").or(output.output_tokens);
                }
            }
            other => {
                tracing::trace!(record_type = ?other, "ignoring codex record");
            }
        }
    }
    output
}

fn agent_message_text(record: &Value) -> Option<&str> {
    let item = record.get("item")?;
    let item_type = item
        .get("type")
        .or_else(|| item.get("item_type"))
        .and_then(Value::as_str)?;
    if !matches!(item_type, "agent_message" | "assistant_message") {
        return None;
    }
    item.get("text").and_then(Value::as_str)
}
