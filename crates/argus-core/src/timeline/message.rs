use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// What a timeline entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    User,
    AssistantFinal,
    Thinking,
    Planning,
    ToolCall,
    ToolResult,
    Progress,
    Error,
    SystemNote,
}

impl MessageKind {
    /// Map a persisted row role to a kind. Unknown roles become system notes
    /// rather than being dropped.
    pub fn from_role(role: &str) -> Self {
        match role {
            "user" => MessageKind::User,
            "assistant" => MessageKind::AssistantFinal,
            _ => MessageKind::SystemNote,
        }
    }
}

/// One timeline entry.
///
/// `seq` is assigned at insertion time by the owning [`Timeline`](super::Timeline)
/// and is the sole tie-breaker when timestamps collide (millisecond clocks on
/// bursty tool events collide routinely).
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
    pub metadata: Map<String, Value>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        kind: MessageKind,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            timestamp,
            seq: 0,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Parse a persisted or wire timestamp, falling back to "now" if unparsable.
/// Accepts RFC 3339 and the bare `YYYY-MM-DD HH:MM:SS` form sqlite emits.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return naive.and_utc();
    }
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_role() {
        assert_eq!(MessageKind::from_role("user"), MessageKind::User);
        assert_eq!(MessageKind::from_role("assistant"), MessageKind::AssistantFinal);
        assert_eq!(MessageKind::from_role("whatever"), MessageKind::SystemNote);
    }

    #[test]
    fn test_parse_rfc3339_timestamp() {
        let ts = parse_timestamp("2025-03-01T12:00:00Z");
        assert_eq!(ts.timestamp(), 1740830400);
    }

    #[test]
    fn test_parse_sqlite_timestamp() {
        let ts = parse_timestamp("2025-03-01 12:00:00");
        assert_eq!(ts.timestamp(), 1740830400);
    }

    #[test]
    fn test_unparsable_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let ts = parse_timestamp("not a date");
        assert!(ts >= before);
    }

    #[test]
    fn test_metadata_accessor() {
        let msg = Message::new("m1", MessageKind::ToolCall, "", Utc::now())
            .with_metadata("tool_name", "port_scan".into());
        assert_eq!(msg.metadata_str("tool_name"), Some("port_scan"));
        assert_eq!(msg.metadata_str("missing"), None);
    }
}
