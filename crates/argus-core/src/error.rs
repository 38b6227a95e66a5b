/// Errors that can occur inside the aggregator core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// `load_history` was called twice for the same timeline.
    #[error("history already loaded")]
    HistoryAlreadyLoaded,

    /// The outward command channel has no receiver anymore.
    #[error("command channel closed")]
    CommandChannelClosed,
}
