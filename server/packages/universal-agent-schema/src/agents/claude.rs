use std::collections::HashSet;

use serde_json::Value;

use crate::AgentEvent;

const DEDUP_PREFIX_CHARS: usize = 100;
const STATUS_TEXT_KEYS: &[&str] = &["status", "message", "text", "detail", "subtype"];
const SYSTEM_TEXT_KEYS: &[&str] = &["message", "text", "detail", "status"];

/// Converts Claude Code `stream-json` records into [`AgentEvent`]s for one run.
///
/// The normalizer remembers which text blocks and tool calls it has already
/// emitted; Claude repeats them across partial and final assistant records.
#[derive(Debug, Default)]
pub struct ClaudeNormalizer {
    sent_text_keys: HashSet<String>,
    sent_tool_ids: HashSet<String>,
}

impl ClaudeNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Err` for record types this layer does not understand.
    pub fn convert(&mut self, record: &Value) -> Result<Vec<AgentEvent>, String> {
        let record_type = record.get("type").and_then(Value::as_str).unwrap_or("");
        let events = match record_type {
            "assistant" => self.assistant_events(record),
            "user" => tool_result_events(record),
            "system" => self.system_events(record),
            "result" => self.result_events(record),
            _ => return Err(format!("unsupported Claude record type: {record_type:?}")),
        };
        Ok(events)
    }

    fn assistant_events(&mut self, record: &Value) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        for block in message_content(record) {
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                events.extend(self.dedup_text(text));
                continue;
            }
            let name = block.get("name").and_then(Value::as_str);
            let id = block.get("id").and_then(Value::as_str);
            if let (Some(name), Some(id)) = (name, id) {
                if self.sent_tool_ids.insert(id.to_string()) {
                    events.push(AgentEvent::ToolUse {
                        id: id.to_string(),
                        name: name.to_string(),
                        input: block.get("input").cloned().unwrap_or(Value::Null),
                    });
                }
            }
        }
        events
    }

    fn system_events(&mut self, record: &Value) -> Vec<AgentEvent> {
        let permission_mode = record
            .get("permissionMode")
            .and_then(Value::as_str)
            .map(str::to_string);
        match record.get("subtype").and_then(Value::as_str) {
            Some("init") => {
                let slash_commands = record
                    .get("slash_commands")
                    .and_then(Value::as_array)
                    .map(|names| {
                        names
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    });
                vec![AgentEvent::Init {
                    permission_mode,
                    slash_commands,
                }]
            }
            Some("status") => vec![AgentEvent::Status {
                permission_mode,
                status_text: status_text(record),
                awaiting_permission: is_awaiting_permission(record),
            }],
            _ => match first_text(record, SYSTEM_TEXT_KEYS) {
                Some(text) => self.dedup_text(&text).into_iter().collect(),
                None => Vec::new(),
            },
        }
    }

    fn result_events(&mut self, record: &Value) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        if let Some(text) = record.get("result").and_then(Value::as_str) {
            events.extend(self.dedup_text(text));
        }
        let usage = record.get("usage");
        let counter = |key: &str| usage.and_then(|usage| usage.get(key)).and_then(Value::as_u64);
        events.push(AgentEvent::Result {
            content: record
                .get("subtype")
                .and_then(Value::as_str)
                .map(str::to_string),
            cost: record.get("total_cost_usd").and_then(Value::as_f64),
            duration: record.get("duration_ms").and_then(Value::as_f64),
            input_tokens: counter("input_tokens"),
            cached_input_tokens: counter("cache_read_input_tokens"),
            output_tokens: counter("output_tokens"),
        });
        events
    }

    fn dedup_text(&mut self, text: &str) -> Option<AgentEvent> {
        let key: String = text.chars().take(DEDUP_PREFIX_CHARS).collect();
        self.sent_text_keys
            .insert(key)
            .then(|| AgentEvent::text(text))
    }
}

fn message_content(record: &Value) -> &[Value] {
    record
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn tool_result_events(record: &Value) -> Vec<AgentEvent> {
    message_content(record)
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_result"))
        .map(|block| {
            let tool_use_id = block
                .get("tool_use_id")
                .or_else(|| block.get("toolUseId"))
                .map(|id| match id {
                    Value::String(id) => id.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            let output = match block.get("content") {
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            AgentEvent::ToolResult {
                tool_use_id,
                output,
                is_error: block
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }
        })
        .collect()
}

fn first_text(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| record.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// First non-blank of `status`, `message`, `text`, `detail`, `subtype`.
pub fn status_text(record: &Value) -> String {
    first_text(record, STATUS_TEXT_KEYS).unwrap_or_default()
}

/// Best-effort guess at whether the backend is blocked on a permission prompt.
pub fn is_awaiting_permission(record: &Value) -> bool {
    let flagged = |key: &str| record.get(key).and_then(Value::as_bool) == Some(true);
    if flagged("awaitingPermission") || flagged("requiresPermission") {
        return true;
    }
    let text = status_text(record).to_lowercase();
    if text.is_empty() {
        return false;
    }
    let mentions_permission = ["permission", "approval", "confirm"]
        .iter()
        .any(|word| text.contains(word));
    let mentions_pending = ["await", "wait", "required", "request", "pending"]
        .iter()
        .any(|word| text.contains(word));
    mentions_permission && mentions_pending
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn assistant(content: Value) -> Value {
        json!({"type": "assistant", "message": {"content": content}})
    }

    #[test]
    fn repeated_text_prefix_is_suppressed() {
        let mut normalizer = ClaudeNormalizer::new();
        let shared = "x".repeat(100);
        let first = normalizer
            .convert(&assistant(json!([{"type": "text", "text": format!("{shared} first")}])))
            .expect("convert");
        let second = normalizer
            .convert(&assistant(json!([{"type": "text", "text": format!("{shared} second")}])))
            .expect("convert");

        assert_eq!(first, vec![AgentEvent::text(format!("{shared} first"))]);
        assert!(second.is_empty());
    }

    #[test]
    fn tool_use_is_emitted_once_per_id() {
        let mut normalizer = ClaudeNormalizer::new();
        let record = assistant(json!([
            {"type": "tool_use", "id": "toolu_1", "name": "Read", "input": {"file_path": "a.rs"}}
        ]));
        let first = normalizer.convert(&record).expect("convert");
        let second = normalizer.convert(&record).expect("convert");

        assert_eq!(
            first,
            vec![AgentEvent::ToolUse {
                id: "toolu_1".to_string(),
                name: "Read".to_string(),
                input: json!({"file_path": "a.rs"}),
            }]
        );
        assert!(second.is_empty());
    }

    #[test]
    fn tool_result_serializes_structured_content() {
        let mut normalizer = ClaudeNormalizer::new();
        let record = json!({
            "type": "user",
            "message": {"content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "plain"},
                {"type": "tool_result", "toolUseId": "toolu_2", "content": [{"type": "text", "text": "hi"}], "is_error": true},
                {"type": "text", "text": "ignored"}
            ]}
        });
        let events = normalizer.convert(&record).expect("convert");
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            AgentEvent::ToolResult {
                tool_use_id: "toolu_1".to_string(),
                output: "plain".to_string(),
                is_error: false,
            }
        );
        let AgentEvent::ToolResult { tool_use_id, output, is_error } = &events[1] else {
            panic!("expected tool_result, got {:?}", events[1]);
        };
        assert_eq!(tool_use_id, "toolu_2");
        assert!(*is_error);
        let parsed: Value = serde_json::from_str(output).expect("structured output is JSON");
        assert_eq!(parsed, json!([{"type": "text", "text": "hi"}]));
    }

    #[test]
    fn init_carries_permission_mode_and_commands() {
        let mut normalizer = ClaudeNormalizer::new();
        let events = normalizer
            .convert(&json!({
                "type": "system",
                "subtype": "init",
                "permissionMode": "default",
                "slash_commands": ["help", "/compact"]
            }))
            .expect("convert");
        assert_eq!(
            events,
            vec![AgentEvent::Init {
                permission_mode: Some("default".to_string()),
                slash_commands: Some(vec!["help".to_string(), "/compact".to_string()]),
            }]
        );
    }

    #[test]
    fn status_infers_pending_permission_from_text() {
        let mut normalizer = ClaudeNormalizer::new();
        let events = normalizer
            .convert(&json!({
                "type": "system",
                "subtype": "status",
                "status": "  ",
                "message": "Waiting for permission to run Bash"
            }))
            .expect("convert");
        assert_eq!(
            events,
            vec![AgentEvent::Status {
                permission_mode: None,
                status_text: "Waiting for permission to run Bash".to_string(),
                awaiting_permission: true,
            }]
        );
    }

    #[test]
    fn permission_heuristic_needs_both_word_groups_unless_flagged() {
        assert!(!is_awaiting_permission(&json!({"status": "permission granted"})));
        assert!(!is_awaiting_permission(&json!({"status": "waiting for tokens"})));
        assert!(is_awaiting_permission(&json!({"status": "approval pending"})));
        assert!(is_awaiting_permission(&json!({"requiresPermission": true})));
        assert_eq!(status_text(&json!({"subtype": "compacting"})), "compacting");
    }

    #[test]
    fn other_system_subtypes_surface_their_text() {
        let mut normalizer = ClaudeNormalizer::new();
        let events = normalizer
            .convert(&json!({"type": "system", "subtype": "notice", "detail": "Context compacted"}))
            .expect("convert");
        assert_eq!(events, vec![AgentEvent::text("Context compacted")]);

        let silent = normalizer
            .convert(&json!({"type": "system", "subtype": "hook_response"}))
            .expect("convert");
        assert!(silent.is_empty());
    }

    #[test]
    fn result_emits_final_text_then_summary() {
        let mut normalizer = ClaudeNormalizer::new();
        normalizer
            .convert(&assistant(json!([{"type": "text", "text": "All done."}])))
            .expect("convert");
        let events = normalizer
            .convert(&json!({
                "type": "result",
                "subtype": "success",
                "result": "All done.",
                "total_cost_usd": 0.25,
                "duration_ms": 1200,
                "usage": {"input_tokens": 10, "cache_read_input_tokens": 4, "output_tokens": 7}
            }))
            .expect("convert");
        assert_eq!(
            events,
            vec![AgentEvent::Result {
                content: Some("success".to_string()),
                cost: Some(0.25),
                duration: Some(1200.0),
                input_tokens: Some(10),
                cached_input_tokens: Some(4),
                output_tokens: Some(7),
            }]
        );
    }

    #[test]
    fn unknown_record_type_is_rejected() {
        let mut normalizer = ClaudeNormalizer::new();
        assert!(normalizer.convert(&json!({"type": "stream_event"})).is_err());
        assert!(normalizer.convert(&json!({"no_type": true})).is_err());
    }
}
