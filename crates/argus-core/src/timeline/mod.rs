//! Chronologically consistent, append-only conversation timeline.
//!
//! Merges a one-shot persisted history fetch with a live, possibly
//! out-of-order, possibly duplicated event stream. Ordering is
//! `(timestamp, seq)` ascending where `seq` is assigned at insertion and is
//! the sole tie-breaker; duplicate event ids are absorbed rather than
//! reported, so delivery is safe under at-least-once transports.

mod history;
mod message;

pub use history::StoredRow;
pub use message::{parse_timestamp, Message, MessageKind};

use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::events::{ChatEvent, ChunkKind};

/// Ordered sequence of messages owned by one conversation. Replaced
/// wholesale on conversation switch, never shared across sessions.
#[derive(Debug, Default)]
pub struct Timeline {
    entries: Vec<Message>,
    seen: HashSet<String>,
    next_seq: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.entries.get(index)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    fn push(&mut self, mut msg: Message) {
        msg.seq = self.next_seq;
        self.next_seq += 1;
        self.seen.insert(msg.id.clone());
        self.entries.push(msg);
    }

    fn last_mut(&mut self) -> Option<&mut Message> {
        self.entries.last_mut()
    }

    /// Sort for the initial merge. Appends after this never reorder.
    fn sort_initial(&mut self) {
        self.entries.sort_by(|a, b| (a.timestamp, a.seq).cmp(&(b.timestamp, b.seq)));
    }
}

/// Builds and owns the timeline for one conversation.
///
/// Live events arriving before the history fetch resolves are buffered and
/// replayed in arrival order once `load_history` runs, so nothing is lost in
/// the subscribe/fetch gap.
pub struct TimelineBuilder {
    timeline: Timeline,
    history_loaded: bool,
    buffered: Vec<ChatEvent>,
    /// Kind of the still-open streaming entry, valid only while that entry
    /// is the last one in the timeline.
    open: Option<MessageKind>,
    saw_reasoning_stream: bool,
}

impl TimelineBuilder {
    pub fn new() -> Self {
        Self {
            timeline: Timeline::new(),
            history_loaded: false,
            buffered: Vec::new(),
            open: None,
            saw_reasoning_stream: false,
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn history_loaded(&self) -> bool {
        self.history_loaded
    }

    /// Merge the persisted history, then replay any live events that raced
    /// the fetch.
    pub fn load_history(&mut self, rows: &[StoredRow]) -> Result<(), CoreError> {
        if self.history_loaded {
            return Err(CoreError::HistoryAlreadyLoaded);
        }

        for msg in history::rows_to_messages(rows) {
            // History rows can themselves be duplicated across reconnects.
            if !self.timeline.contains(&msg.id) {
                self.timeline.push(msg);
            }
        }
        self.timeline.sort_initial();
        self.history_loaded = true;

        let buffered = std::mem::take(&mut self.buffered);
        info!(
            "loaded {} history rows, replaying {} buffered events",
            rows.len(),
            buffered.len()
        );
        for event in buffered {
            self.apply_event(event);
        }
        Ok(())
    }

    /// Apply one live event. Before the history resolves this only buffers.
    pub fn apply_live(&mut self, event: ChatEvent) {
        if !self.history_loaded {
            self.buffered.push(event);
            return;
        }
        self.apply_event(event);
    }

    fn apply_event(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::Chunk { chunk_type, content } => self.apply_chunk(chunk_type, &content),
            ChatEvent::Message {
                id,
                role,
                content,
                reasoning_content,
                tool_calls,
                timestamp,
            } => self.apply_message(id, &role, content, reasoning_content, tool_calls, timestamp),
            ChatEvent::ToolCallStart { id, tool_name, arguments } => {
                self.apply_tool_call_start(id, tool_name, arguments)
            }
            ChatEvent::ToolResult { id, result } => self.apply_tool_result(id, result),
            ChatEvent::Done { success, output } => self.apply_done(success, output),
        }
    }

    fn apply_chunk(&mut self, chunk_type: ChunkKind, content: &str) {
        let kind = match chunk_type {
            ChunkKind::Text => MessageKind::AssistantFinal,
            ChunkKind::Reasoning => {
                self.saw_reasoning_stream = true;
                MessageKind::Thinking
            }
        };

        // Streaming deltas extend the last entry when it is the same kind
        // and still open; anything else starts a fresh entry.
        if self.open == Some(kind) {
            if let Some(last) = self.timeline.last_mut() {
                if last.kind == kind {
                    last.content.push_str(content);
                    return;
                }
            }
        }

        let id = format!("stream:{}", self.timeline.next_seq);
        self.timeline.push(Message::new(id, kind, content, Utc::now()));
        self.open = Some(kind);
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_message(
        &mut self,
        id: Option<String>,
        role: &str,
        content: String,
        reasoning_content: Option<String>,
        tool_calls: Option<serde_json::Value>,
        timestamp: Option<String>,
    ) {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if self.timeline.contains(&id) {
            debug!("duplicate message {} ignored", id);
            return;
        }

        let ts = timestamp
            .as_deref()
            .map(parse_timestamp)
            .unwrap_or_else(Utc::now);
        let kind = MessageKind::from_role(role);

        // A terminal message for an open stream of the same kind finalizes
        // that entry in place with the authoritative content.
        let finalizes_stream = self.open == Some(kind)
            && self.timeline.entries.last().map(|m| m.kind) == Some(kind);

        // Reasoning that never streamed gets its own entry just ahead of the
        // final message. When the final message closes an open stream the
        // reasoning rides along as metadata instead, since inserting before
        // the open entry would mean reordering.
        let unstreamed_reasoning = reasoning_content
            .filter(|r| !self.saw_reasoning_stream && !r.is_empty());
        if let Some(reasoning) = unstreamed_reasoning.clone() {
            if !finalizes_stream {
                self.timeline.push(Message::new(
                    format!("{}:reasoning", id),
                    MessageKind::Thinking,
                    reasoning,
                    ts,
                ));
            }
        }

        if finalizes_stream {
            if let Some(last) = self.timeline.entries.last_mut() {
                last.content = content;
                last.id = id.clone();
                if let Some(reasoning) = unstreamed_reasoning {
                    last.metadata
                        .insert("reasoning".to_string(), reasoning.into());
                }
            }
            self.timeline.seen.insert(id.clone());
        } else {
            self.timeline.push(Message::new(id.clone(), kind, content, ts));
        }
        self.open = None;
        self.saw_reasoning_stream = false;
        self.expand_live_tool_calls(&id, tool_calls, ts);
    }

    fn expand_live_tool_calls(
        &mut self,
        parent_id: &str,
        tool_calls: Option<serde_json::Value>,
        ts: chrono::DateTime<Utc>,
    ) {
        let Some(calls) = tool_calls else { return };
        match history::tool_call_messages(parent_id, calls, ts) {
            Ok(expanded) => {
                for msg in expanded {
                    if !self.timeline.contains(&msg.id) {
                        self.timeline.push(msg);
                    }
                }
            }
            Err(e) => debug!("tool_calls on live message {} unparseable: {}", parent_id, e),
        }
    }

    fn apply_tool_call_start(
        &mut self,
        id: Option<String>,
        tool_name: String,
        arguments: serde_json::Value,
    ) {
        let id = id.unwrap_or_else(|| format!("tool:{}", uuid::Uuid::new_v4()));
        if self.timeline.contains(&id) {
            debug!("duplicate tool call {} ignored", id);
            return;
        }
        let msg = Message::new(id, MessageKind::ToolCall, "", Utc::now())
            .with_metadata("tool_name", tool_name.into())
            .with_metadata("arguments", history::normalize_arguments(arguments))
            .with_metadata("status", "running".into());
        self.timeline.push(msg);
        self.open = None;
    }

    fn apply_tool_result(&mut self, id: Option<String>, result: serde_json::Value) {
        let id = id.unwrap_or_else(|| format!("result:{}", uuid::Uuid::new_v4()));
        if self.timeline.contains(&id) {
            debug!("duplicate tool result {} ignored", id);
            return;
        }

        // Mark the most recent in-flight tool call as finished.
        for entry in self.timeline.entries.iter_mut().rev() {
            if entry.kind == MessageKind::ToolCall && entry.metadata_str("status") == Some("running")
            {
                entry.metadata.insert("status".to_string(), "completed".into());
                break;
            }
        }

        let content = result.as_str().map(str::to_string).unwrap_or_default();
        let msg = Message::new(id, MessageKind::ToolResult, content, Utc::now())
            .with_metadata("result", result);
        self.timeline.push(msg);
        self.open = None;
    }

    fn apply_done(&mut self, success: bool, output: Option<String>) {
        self.open = None;
        self.saw_reasoning_stream = false;
        if success {
            return;
        }

        let content = output.unwrap_or_else(|| "execution failed".to_string());
        // done carries no id, so guard against redelivery by content.
        if let Some(last) = self.timeline.entries.last() {
            if last.kind == MessageKind::Error && last.content == content {
                return;
            }
        }
        let id = format!("error:{}", self.timeline.next_seq);
        self.timeline.push(Message::new(id, MessageKind::Error, content, Utc::now()));
    }
}

impl Default for TimelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
