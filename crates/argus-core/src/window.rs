use tracing::debug;

use crate::config::CoreConfig;

/// Bounded sliding window over a growing timeline.
///
/// The timeline can accumulate thousands of entries; only a bounded
/// neighborhood is ever rendered, but history stays randomly reachable via
/// paging, which is why this is an index range over the full backing array
/// and not a ring buffer. While `follow` is set the window stays pinned to
/// the newest entries; a manual scroll away freezes it until the user pages
/// or jumps back to the bottom.
#[derive(Debug)]
pub struct TimelineWindow {
    start: usize,
    end: usize,
    follow: bool,
    max_rendered: usize,
    bottom_threshold: usize,
    /// Set around programmatic scroll corrections so the window's own
    /// writes cannot flip follow mode back off.
    self_scroll: bool,
}

impl TimelineWindow {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            start: 0,
            end: 0,
            follow: true,
            max_rendered: config.max_rendered.max(1),
            bottom_threshold: config.bottom_threshold,
            self_scroll: false,
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    pub fn follow(&self) -> bool {
        self.follow
    }

    /// Entries newer than the window's end, surfaced as the "jump to
    /// latest" affordance while follow is off.
    pub fn entries_below(&self, timeline_len: usize) -> usize {
        timeline_len.saturating_sub(self.end)
    }

    /// Page older entries into view. Disables follow mode. Returns how many
    /// entries were prepended, which is the index delta the host needs for
    /// its scroll-anchor correction (pixel math stays host-side, from height
    /// samples taken around this call).
    ///
    /// At capacity `end` cannot stay put and also keep the window bounded;
    /// the newest edge slides back by the same amount the start moved.
    pub fn page_backward(&mut self, step: usize) -> usize {
        let old_start = self.start;
        self.start = self.start.saturating_sub(step);
        // Keep the window bounded; the far end gives way.
        self.end = self.end.min(self.start + self.max_rendered);
        self.follow = false;
        debug!("paged backward to {}..{}", self.start, self.end);
        old_start - self.start
    }

    /// Page newer entries into view. Reaching the newest entry re-enables
    /// follow mode. Returns how many entries the end advanced.
    pub fn page_forward(&mut self, step: usize, timeline_len: usize) -> usize {
        let old_end = self.end;
        self.end = (self.end + step).min(timeline_len);
        self.start = self
            .start
            .min(self.end)
            .max(self.end.saturating_sub(self.max_rendered));
        if self.end == timeline_len {
            self.follow = true;
        }
        debug!("paged forward to {}..{}", self.start, self.end);
        self.end.saturating_sub(old_end)
    }

    /// React to timeline growth. In follow mode the window slides to keep
    /// the newest entry visible; otherwise new entries accumulate below the
    /// fold untouched.
    pub fn on_timeline_grow(&mut self, timeline_len: usize) {
        if self.follow {
            self.end = timeline_len;
            self.start = self.end.saturating_sub(self.max_rendered);
        } else {
            // Conversation switch can also shrink the backing array.
            self.end = self.end.min(timeline_len);
            self.start = self.start.min(self.end);
        }
    }

    /// Single authority for whether future growth auto-scrolls: a scroll
    /// position within the bottom threshold re-engages follow mode, anything
    /// further away disengages it. Ignored while a programmatic correction
    /// is in flight.
    pub fn on_user_scroll(&mut self, distance_from_bottom: usize, timeline_len: usize) {
        if self.self_scroll {
            return;
        }
        let was_following = self.follow;
        self.follow = distance_from_bottom <= self.bottom_threshold;
        if self.follow && !was_following {
            self.on_timeline_grow(timeline_len);
        }
    }

    /// Mark the start of a programmatic scroll write.
    pub fn begin_self_scroll(&mut self) {
        self.self_scroll = true;
    }

    /// Idempotent counterpart of [`begin_self_scroll`](Self::begin_self_scroll).
    pub fn end_self_scroll(&mut self) {
        self.self_scroll = false;
    }

    /// Jump straight to the newest entries and resume following.
    pub fn jump_to_latest(&mut self, timeline_len: usize) {
        self.follow = true;
        self.on_timeline_grow(timeline_len);
    }

    #[cfg(test)]
    fn assert_invariants(&self, timeline_len: usize) {
        assert!(self.start <= self.end, "start {} > end {}", self.start, self.end);
        assert!(self.end <= timeline_len, "end {} > len {}", self.end, timeline_len);
        assert!(
            self.end - self.start <= self.max_rendered,
            "window {}..{} exceeds max {}",
            self.start,
            self.end,
            self.max_rendered
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(max_rendered: usize) -> TimelineWindow {
        TimelineWindow::new(&CoreConfig {
            max_rendered,
            page_step: 50,
            bottom_threshold: 3,
        })
    }

    #[test]
    fn test_follow_tracks_growth() {
        let mut w = window(200);
        w.on_timeline_grow(2);
        assert_eq!(w.range(), 0..2);
        assert!(w.follow());

        w.on_timeline_grow(500);
        assert_eq!(w.range(), 300..500);
        w.assert_invariants(500);
    }

    #[test]
    fn test_growth_leaves_frozen_window_untouched() {
        let mut w = window(100);
        w.on_timeline_grow(300);
        w.page_backward(50);
        let frozen = w.range();

        w.on_timeline_grow(400);
        assert_eq!(w.range(), frozen);
        assert_eq!(w.entries_below(400), 400 - frozen.end);
    }

    #[test]
    fn test_page_backward_disables_follow_and_reports_delta() {
        let mut w = window(100);
        w.on_timeline_grow(300);
        assert_eq!(w.range(), 200..300);

        let delta = w.page_backward(50);
        assert_eq!(delta, 50);
        assert!(!w.follow());
        assert_eq!(w.range(), 150..250);
        w.assert_invariants(300);
    }

    #[test]
    fn test_page_backward_clamps_at_zero() {
        let mut w = window(100);
        w.on_timeline_grow(120);
        let delta = w.page_backward(50);
        assert_eq!(delta, 20);
        assert_eq!(w.start(), 0);
        w.assert_invariants(120);
    }

    #[test]
    fn test_page_forward_to_end_reenables_follow() {
        let mut w = window(100);
        w.on_timeline_grow(300);
        w.page_backward(250);
        assert_eq!(w.range(), 0..100);

        w.page_forward(150, 300);
        assert!(!w.follow());
        w.page_forward(150, 300);
        assert!(w.follow());
        assert_eq!(w.range(), 200..300);
        w.assert_invariants(300);
    }

    #[test]
    fn test_user_scroll_near_bottom_follows() {
        let mut w = window(100);
        w.on_timeline_grow(300);
        w.on_user_scroll(50, 300);
        assert!(!w.follow());

        w.on_user_scroll(2, 300);
        assert!(w.follow());
        assert_eq!(w.range(), 200..300);
    }

    #[test]
    fn test_self_scroll_guard_suppresses_handler() {
        let mut w = window(100);
        w.on_timeline_grow(300);

        w.begin_self_scroll();
        w.on_user_scroll(250, 300);
        w.end_self_scroll();
        assert!(w.follow(), "programmatic correction must not break follow");

        w.on_user_scroll(250, 300);
        assert!(!w.follow());
    }

    #[test]
    fn test_jump_to_latest() {
        let mut w = window(100);
        w.on_timeline_grow(300);
        w.page_backward(300);
        assert!(!w.follow());

        w.jump_to_latest(300);
        assert!(w.follow());
        assert_eq!(w.range(), 200..300);
    }

    #[test]
    fn test_shrunk_timeline_clamps_window() {
        let mut w = window(100);
        w.on_timeline_grow(300);
        w.page_backward(10);
        w.on_timeline_grow(50);
        w.assert_invariants(50);
    }

    #[test]
    fn test_invariants_across_random_operations() {
        let mut w = window(37);
        let mut len = 0usize;
        // Deterministic pseudo-random walk over the operation space.
        let mut state = 0x9e3779b97f4a7c15u64;
        for _ in 0..2000 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            match state % 5 {
                0 => {
                    len += (state >> 8) as usize % 17;
                    w.on_timeline_grow(len);
                }
                1 => {
                    w.page_backward((state >> 8) as usize % 50);
                }
                2 => {
                    w.page_forward((state >> 8) as usize % 50, len);
                }
                3 => {
                    w.on_user_scroll((state >> 8) as usize % 10, len);
                }
                _ => {
                    w.jump_to_latest(len);
                }
            }
            w.assert_invariants(len);
        }
    }
}
