use crate::constants::{DEFAULT_BOTTOM_THRESHOLD, DEFAULT_MAX_RENDERED, DEFAULT_PAGE_STEP};

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Cap on the rendered window size.
    pub max_rendered: usize,
    /// Entries moved per paging request.
    pub page_step: usize,
    /// Scroll distance from the bottom that still counts as "at the bottom".
    pub bottom_threshold: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_rendered: DEFAULT_MAX_RENDERED,
            page_step: DEFAULT_PAGE_STEP,
            bottom_threshold: DEFAULT_BOTTOM_THRESHOLD,
        }
    }
}
