use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::constants::topics;

/// Stream an inbound event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Chat,
    Exploration,
    MultiAgent,
}

impl Topic {
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            topics::CHAT => Some(Topic::Chat),
            topics::EXPLORATION => Some(Topic::Exploration),
            topics::MULTI_AGENT => Some(Topic::MultiAgent),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Topic::Chat => topics::CHAT,
            Topic::Exploration => topics::EXPLORATION,
            Topic::MultiAgent => topics::MULTI_AGENT,
        }
    }
}

/// Raw event as delivered by the transport - passthrough payload plus the
/// correlation id (conversation id or execution id) that scopes it.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub topic: Topic,
    pub correlation_id: String,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(topic: Topic, correlation_id: impl Into<String>, payload: Value) -> Self {
        Self {
            topic,
            correlation_id: correlation_id.into(),
            payload,
        }
    }

    /// Parse the payload as a conversation-stream event.
    /// Unknown or malformed payloads are logged and dropped, never fatal.
    pub fn chat_event(&self) -> Option<ChatEvent> {
        match serde_json::from_value(self.payload.clone()) {
            Ok(ev) => Some(ev),
            Err(e) => {
                debug!("unparseable chat event: {}", e);
                None
            }
        }
    }

    pub fn exploration_event(&self) -> Option<ExplorationEvent> {
        match serde_json::from_value(self.payload.clone()) {
            Ok(ev) => Some(ev),
            Err(e) => {
                debug!("unparseable exploration event: {}", e);
                None
            }
        }
    }

    pub fn multi_agent_event(&self) -> Option<MultiAgentEvent> {
        match serde_json::from_value(self.payload.clone()) {
            Ok(ev) => Some(ev),
            Err(e) => {
                debug!("unparseable multi-agent event: {}", e);
                None
            }
        }
    }
}

/// Incremental token kind carried by a streaming chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Text,
    Reasoning,
}

/// Conversation stream events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Incremental token for the in-flight assistant response.
    Chunk {
        chunk_type: ChunkKind,
        content: String,
    },
    /// A complete message, terminal for any open stream of its kind.
    Message {
        #[serde(default)]
        id: Option<String>,
        role: String,
        content: String,
        #[serde(default)]
        reasoning_content: Option<String>,
        #[serde(default)]
        tool_calls: Option<Value>,
        #[serde(default)]
        timestamp: Option<String>,
    },
    ToolCallStart {
        #[serde(default)]
        id: Option<String>,
        tool_name: String,
        #[serde(default)]
        arguments: Value,
    },
    ToolResult {
        #[serde(default)]
        id: Option<String>,
        result: Value,
    },
    Done {
        success: bool,
        #[serde(default)]
        output: Option<String>,
    },
}

/// Field descriptor inside a login-takeover request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TakeoverField {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

/// Action executed against the page during one exploration iteration.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionInfo {
    pub action_type: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub reason: String,
    pub success: bool,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Final counters reported when an exploration run finishes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExplorationStats {
    #[serde(default)]
    pub total_iterations: u32,
    #[serde(default)]
    pub pages_visited: u32,
    #[serde(default)]
    pub apis_discovered: u32,
    #[serde(default)]
    pub elements_interacted: u32,
    #[serde(default)]
    pub total_duration_ms: u64,
    #[serde(default)]
    pub status: String,
}

/// Exploration stream events for one execution id.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExplorationEvent {
    Start {
        target_url: String,
    },
    Screenshot {
        iteration: u32,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        screenshot: Option<String>,
    },
    Analysis {
        iteration: u32,
        analysis: Value,
    },
    Action {
        iteration: u32,
        action: ActionInfo,
    },
    CoverageUpdate {
        #[serde(default)]
        route_coverage: f32,
        #[serde(default)]
        element_coverage: f32,
        #[serde(default)]
        component_coverage: f32,
        #[serde(default)]
        pending_routes: Vec<String>,
        #[serde(default)]
        stable_rounds: u32,
        #[serde(default)]
        api_count: u32,
    },
    TakeoverRequest {
        message: String,
        #[serde(default)]
        fields: Vec<TakeoverField>,
        #[serde(default)]
        timeout_seconds: Option<u32>,
    },
    CredentialsReceived {
        #[serde(default)]
        username: Option<String>,
    },
    Complete {
        stats: ExplorationStats,
    },
    Error {
        #[serde(default)]
        iteration: Option<u32>,
        error: String,
    },
}

/// One unit of parallel exploration work in multi-agent mode.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerTask {
    #[serde(alias = "id")]
    pub task_id: String,
    #[serde(default)]
    pub scope_name: String,
}

/// Live counters for a worker, upserted by task id.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerProgressUpdate {
    pub task_id: String,
    #[serde(default)]
    pub scope_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub pages_visited: u64,
    #[serde(default)]
    pub apis_discovered: u64,
    #[serde(default)]
    pub elements_interacted: u64,
    #[serde(default)]
    pub iterations_used: u32,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub completion_reason: Option<String>,
}

/// Aggregate counters across all workers, overwritten wholesale.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalStats {
    #[serde(default)]
    pub total_urls_visited: u64,
    #[serde(default)]
    pub total_apis_discovered: u64,
    #[serde(default)]
    pub total_elements_interacted: u64,
}

/// Multi-agent stream events for one execution id.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MultiAgentEvent {
    MultiAgentStart {
        #[serde(default)]
        mode: String,
        total_workers: u32,
    },
    WorkerTasks {
        tasks: Vec<WorkerTask>,
    },
    WorkerProgress {
        worker: WorkerProgressUpdate,
    },
    WorkerComplete {
        task_id: String,
        #[serde(default)]
        scope_name: String,
        #[serde(default)]
        stats: Value,
    },
    MultiAgentStats {
        global_stats: GlobalStats,
        #[serde(default)]
        mode_info: Value,
    },
}
