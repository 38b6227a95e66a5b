use chrono::Duration;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::message::{parse_timestamp, Message, MessageKind};

/// Persisted conversation row as returned by the history fetch.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredRow {
    pub id: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<String>,
    pub timestamp: String,
}

/// Tool call embedded in a legacy combined assistant row. Supports both the
/// flat `{name, arguments}` shape and the nested `{function: {...}}` shape.
#[derive(Debug, Deserialize)]
struct EmbeddedToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "tool_name")]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
    #[serde(default)]
    function: Option<EmbeddedFunction>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedFunction {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

impl EmbeddedToolCall {
    fn tool_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.function.as_ref().map(|f| f.name.clone()))
            .unwrap_or_default()
    }

    fn tool_arguments(&self) -> Value {
        let raw = self
            .arguments
            .clone()
            .or_else(|| self.function.as_ref().and_then(|f| f.arguments.clone()))
            .unwrap_or(Value::Null);
        normalize_arguments(raw)
    }
}

/// Tool arguments are sometimes double-encoded as a JSON string. Decode one
/// level when possible, otherwise keep the raw string as-is.
pub(crate) fn normalize_arguments(raw: Value) -> Value {
    match raw {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

/// Parse a metadata JSON column, degrading to a `{"raw": <string>}` map when
/// the column holds something that is not valid JSON.
fn parse_metadata(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            let mut map = Map::new();
            map.insert("raw".to_string(), other);
            map
        }
        Err(e) => {
            debug!("metadata is not valid JSON, keeping raw string: {}", e);
            let mut map = Map::new();
            map.insert("raw".to_string(), Value::String(raw.to_string()));
            map
        }
    }
}

/// Convert persisted rows into timeline messages.
///
/// Tool rows map directly; legacy combined assistant rows expand into one
/// assistant message plus one synthesized tool-call message per embedded call.
/// Synthesized entries get id `toolcall:<row>:<index>` and a timestamp offset
/// of `index + 1` milliseconds past the parent so the expansion never collides
/// with the parent's own ordering slot.
pub fn rows_to_messages(rows: &[StoredRow]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(rows.len());

    for row in rows {
        let timestamp = parse_timestamp(&row.timestamp);
        let metadata = row.metadata.as_deref().map(parse_metadata).unwrap_or_default();

        match row.role.as_str() {
            "tool" => {
                // Explicit tool rows carry their direction in metadata: a
                // stored result means the call already ran.
                let kind = if metadata.contains_key("result") {
                    MessageKind::ToolResult
                } else {
                    MessageKind::ToolCall
                };
                let mut msg = Message::new(row.id.clone(), kind, row.content.clone(), timestamp);
                msg.metadata = metadata;
                messages.push(msg);
            }
            role => {
                let mut msg = Message::new(
                    row.id.clone(),
                    MessageKind::from_role(role),
                    row.content.clone(),
                    timestamp,
                );
                msg.metadata = metadata;
                messages.push(msg);

                if let Some(raw_calls) = row.tool_calls.as_deref() {
                    expand_tool_calls(&mut messages, row, raw_calls, timestamp);
                }
            }
        }
    }

    messages
}

fn expand_tool_calls(
    messages: &mut Vec<Message>,
    row: &StoredRow,
    raw_calls: &str,
    parent_ts: chrono::DateTime<chrono::Utc>,
) {
    match serde_json::from_str::<Value>(raw_calls)
        .map_err(|e| e.to_string())
        .and_then(|v| tool_call_messages(&row.id, v, parent_ts).map_err(|e| e.to_string()))
    {
        Ok(expanded) => messages.extend(expanded),
        Err(e) => {
            debug!("tool_calls column is not valid JSON for row {}: {}", row.id, e);
            // Keep the raw payload visible instead of losing it.
            if let Some(parent) = messages.last_mut() {
                parent
                    .metadata
                    .insert("tool_calls_raw".to_string(), Value::String(raw_calls.to_string()));
            }
        }
    }
}

/// Expand an embedded tool-call array (persisted column or live message
/// field) into synthesized tool-call messages.
pub(crate) fn tool_call_messages(
    parent_id: &str,
    calls: Value,
    parent_ts: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<Message>, serde_json::Error> {
    let calls: Vec<EmbeddedToolCall> = serde_json::from_value(calls)?;
    Ok(calls
        .iter()
        .enumerate()
        .map(|(index, call)| {
            let id = call
                .id
                .clone()
                .unwrap_or_else(|| format!("toolcall:{}:{}", parent_id, index));
            let timestamp = parent_ts + Duration::milliseconds(index as i64 + 1);
            Message::new(id, MessageKind::ToolCall, "", timestamp)
                .with_metadata("tool_name", Value::String(call.tool_name()))
                .with_metadata("arguments", call.tool_arguments())
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, role: &str, content: &str, ts: &str) -> StoredRow {
        StoredRow {
            id: id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            metadata: None,
            tool_calls: None,
            timestamp: ts.to_string(),
        }
    }

    #[test]
    fn test_plain_rows_map_by_role() {
        let rows = vec![
            row("a", "user", "hi", "2025-03-01T12:00:00Z"),
            row("b", "assistant", "hello", "2025-03-01T12:00:01Z"),
        ];
        let messages = rows_to_messages(&rows);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind, MessageKind::User);
        assert_eq!(messages[1].kind, MessageKind::AssistantFinal);
    }

    #[test]
    fn test_tool_row_direction_from_metadata() {
        let mut call_row = row("c", "tool", "running scan", "2025-03-01T12:00:00Z");
        call_row.metadata = Some(r#"{"tool_name":"port_scan"}"#.to_string());
        let mut result_row = row("d", "tool", "scan done", "2025-03-01T12:00:01Z");
        result_row.metadata = Some(r#"{"result":{"open_ports":[80,443]}}"#.to_string());

        let messages = rows_to_messages(&[call_row, result_row]);
        assert_eq!(messages[0].kind, MessageKind::ToolCall);
        assert_eq!(messages[1].kind, MessageKind::ToolResult);
    }

    #[test]
    fn test_legacy_row_expands_tool_calls() {
        let mut legacy = row("e", "assistant", "I'll scan the target", "2025-03-01T12:00:00Z");
        legacy.tool_calls = Some(
            r#"[{"name":"port_scan","arguments":{"host":"example.com"}},
                {"function":{"name":"dir_brute","arguments":"{\"depth\":2}"}}]"#
                .to_string(),
        );

        let messages = rows_to_messages(&[legacy]);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].kind, MessageKind::AssistantFinal);

        assert_eq!(messages[1].id, "toolcall:e:0");
        assert_eq!(messages[1].metadata_str("tool_name"), Some("port_scan"));
        assert_eq!(
            messages[1].timestamp - messages[0].timestamp,
            Duration::milliseconds(1)
        );

        // Nested function shape, with string-encoded arguments decoded.
        assert_eq!(messages[2].id, "toolcall:e:1");
        assert_eq!(messages[2].metadata_str("tool_name"), Some("dir_brute"));
        assert_eq!(messages[2].metadata["arguments"]["depth"], 2);
        assert_eq!(
            messages[2].timestamp - messages[0].timestamp,
            Duration::milliseconds(2)
        );
    }

    #[test]
    fn test_malformed_tool_calls_degrade_to_raw() {
        let mut legacy = row("f", "assistant", "answer", "2025-03-01T12:00:00Z");
        legacy.tool_calls = Some("{broken".to_string());

        let messages = rows_to_messages(&[legacy]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].metadata_str("tool_calls_raw"), Some("{broken"));
    }

    #[test]
    fn test_malformed_metadata_degrades_to_raw() {
        let mut r = row("g", "user", "hi", "2025-03-01T12:00:00Z");
        r.metadata = Some("not json".to_string());
        let messages = rows_to_messages(&[r]);
        assert_eq!(messages[0].metadata_str("raw"), Some("not json"));
    }
}
