//! Application-wide constants
//!
//! Centralized location for magic values shared across modules.

/// Maximum number of timeline entries handed to the renderer at once.
pub const DEFAULT_MAX_RENDERED: usize = 200;

/// How many entries a single page-backward/page-forward request moves.
pub const DEFAULT_PAGE_STEP: usize = 50;

/// Distance from the bottom (in entries) within which a user scroll
/// re-engages follow mode.
pub const DEFAULT_BOTTOM_THRESHOLD: usize = 3;

/// Upper bound on retained activity-feed lines per exploration session.
pub const MAX_ACTIVITY_LINES: usize = 200;

/// Wire names for the event streams consumed by the core.
pub mod topics {
    /// Conversation stream: chunks, messages, tool calls, done.
    pub const CHAT: &str = "chat";
    /// Exploration stream: start, screenshot, analysis, action, coverage,
    /// takeover, complete, error.
    pub const EXPLORATION: &str = "exploration";
    /// Multi-agent stream: worker fan-out progress and aggregate stats.
    pub const MULTI_AGENT: &str = "multi_agent";
}
