//! # Scroll Anchor
//!
//! Keeps the content the user is looking at visually fixed while data lands.
//! The arithmetic lives in [`compute_anchor`], a pure function with no view
//! framework attached; [`ScrollAnchor`] tracks the metrics it needs across a
//! merge and the layout that follows it.

/// Geometry of the scroll container, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    #[must_use]
    pub const fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    /// Distance between the bottom of the viewport and the end of content.
    #[must_use]
    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.client_height - self.scroll_top).max(0.0)
    }

    #[must_use]
    pub fn is_near_bottom(&self, threshold: f64) -> bool {
        self.distance_from_bottom() <= threshold
    }

    /// `scroll_top` that shows the end of content.
    #[must_use]
    pub fn bottom(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }
}

/// Kind of data change the anchor must compensate for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// First content of a freshly opened channel
    InitialLoad,
    /// New messages appended at the bottom, including own sends
    TailGrowth,
    /// An older page inserted above the current content
    HistoryPrepend,
}

/// Computes the `scroll_top` to apply once the new content is laid out, or
/// `None` to leave the viewport where it is.
#[must_use]
pub fn compute_anchor(
    old: ScrollMetrics,
    new: ScrollMetrics,
    kind: MergeKind,
    bottom_threshold: f64,
) -> Option<f64> {
    match kind {
        MergeKind::InitialLoad => Some(new.bottom()),
        MergeKind::TailGrowth => old.is_near_bottom(bottom_threshold).then(|| new.bottom()),
        MergeKind::HistoryPrepend => {
            Some((old.scroll_top + (new.scroll_height - old.scroll_height)).max(0.0))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingAnchor {
    before: ScrollMetrics,
    kind: MergeKind,
}

/// Anchor state for one channel session.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollAnchor {
    bottom_threshold: f64,
    last_observed: Option<ScrollMetrics>,
    pending: Option<PendingAnchor>,
    initial_done: bool,
}

impl ScrollAnchor {
    #[must_use]
    pub const fn new(bottom_threshold: f64) -> Self {
        Self {
            bottom_threshold,
            last_observed: None,
            pending: None,
            initial_done: false,
        }
    }

    /// Records the container geometry reported by the view on scroll/resize.
    pub fn observe(&mut self, metrics: ScrollMetrics) {
        self.last_observed = Some(metrics);
    }

    /// Captures pre-update geometry for a merge that is about to be rendered.
    ///
    /// Several merges may land before one layout; the strongest intent wins:
    /// initial load, then following the bottom, then prepend compensation.
    pub fn before_merge(&mut self, kind: MergeKind) {
        let kind = if self.initial_done {
            kind
        } else {
            MergeKind::InitialLoad
        };
        let before = self.last_observed.unwrap_or_default();

        self.pending = Some(match self.pending {
            None => PendingAnchor { before, kind },
            Some(existing) => PendingAnchor {
                before: existing.before,
                kind: stronger(existing.kind, kind, existing.before, self.bottom_threshold),
            },
        });
    }

    #[must_use]
    pub fn pending_kind(&self) -> Option<MergeKind> {
        self.pending.map(|pending| pending.kind)
    }

    /// Called after the view has committed layout for the merged content.
    /// Returns the `scroll_top` to apply, if any.
    pub fn after_layout(&mut self, metrics: ScrollMetrics) -> Option<f64> {
        let pending = self.pending.take()?;
        let target = compute_anchor(pending.before, metrics, pending.kind, self.bottom_threshold);
        if pending.kind == MergeKind::InitialLoad {
            self.initial_done = true;
        }
        self.last_observed = Some(ScrollMetrics {
            scroll_top: target.unwrap_or(metrics.scroll_top),
            ..metrics
        });
        target
    }

    /// Forgets everything; the next merge behaves like an initial load.
    pub fn reset(&mut self) {
        self.last_observed = None;
        self.pending = None;
        self.initial_done = false;
    }
}

fn stronger(current: MergeKind, incoming: MergeKind, before: ScrollMetrics, threshold: f64) -> MergeKind {
    let follows_bottom =
        |kind: MergeKind| kind == MergeKind::TailGrowth && before.is_near_bottom(threshold);
    match (current, incoming) {
        (MergeKind::InitialLoad, _) | (_, MergeKind::InitialLoad) => MergeKind::InitialLoad,
        (a, b) if follows_bottom(a) || follows_bottom(b) => MergeKind::TailGrowth,
        (MergeKind::HistoryPrepend, _) | (_, MergeKind::HistoryPrepend) => MergeKind::HistoryPrepend,
        _ => MergeKind::TailGrowth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const THRESHOLD: f64 = 64.0;

    fn approx(actual: Option<f64>, expected: Option<f64>) {
        match (actual, expected) {
            (Some(a), Some(e)) => assert!((a - e).abs() < 0.5, "expected {e}, got {a}"),
            (None, None) => {}
            other => panic!("mismatch: {other:?}"),
        }
    }

    #[test_case(1000.0, 1600.0, 300.0 ; "typical prepend")]
    #[test_case(0.0, 2400.5, 1200.25 ; "fractional heights at the top")]
    #[test_case(250.0, 250.0, 250.0 ; "empty page adds no height")]
    fn test_prepend_keeps_visible_content_fixed(old_height: f64, new_height: f64, old_top: f64) {
        let old = ScrollMetrics::new(old_top, old_height, 500.0);
        let new = ScrollMetrics::new(old_top, new_height, 500.0);
        approx(
            compute_anchor(old, new, MergeKind::HistoryPrepend, THRESHOLD),
            Some(old_top + (new_height - old_height)),
        );
    }

    #[test]
    fn test_tail_growth_follows_bottom_only_when_near_it() {
        let near = ScrollMetrics::new(480.0, 1000.0, 500.0);
        let reading = ScrollMetrics::new(100.0, 1000.0, 500.0);
        let grown = ScrollMetrics::new(480.0, 1200.0, 500.0);

        approx(compute_anchor(near, grown, MergeKind::TailGrowth, THRESHOLD), Some(700.0));
        approx(compute_anchor(reading, grown, MergeKind::TailGrowth, THRESHOLD), None);
    }

    #[test]
    fn test_initial_load_scrolls_to_bottom() {
        let new = ScrollMetrics::new(0.0, 900.0, 500.0);
        approx(
            compute_anchor(ScrollMetrics::default(), new, MergeKind::InitialLoad, THRESHOLD),
            Some(400.0),
        );
    }

    #[test]
    fn test_short_content_bottom_is_zero() {
        assert!(ScrollMetrics::new(0.0, 200.0, 500.0).bottom().abs() < f64::EPSILON);
    }

    #[test]
    fn test_first_merge_of_a_session_is_initial() {
        let mut anchor = ScrollAnchor::new(THRESHOLD);
        anchor.before_merge(MergeKind::TailGrowth);
        assert_eq!(anchor.pending_kind(), Some(MergeKind::InitialLoad));

        approx(anchor.after_layout(ScrollMetrics::new(0.0, 800.0, 500.0)), Some(300.0));

        anchor.observe(ScrollMetrics::new(0.0, 800.0, 500.0));
        anchor.before_merge(MergeKind::TailGrowth);
        assert_eq!(anchor.pending_kind(), Some(MergeKind::TailGrowth));
        approx(anchor.after_layout(ScrollMetrics::new(0.0, 900.0, 500.0)), None);
    }

    #[test]
    fn test_prepend_uses_metrics_captured_before_the_merge() {
        let mut anchor = ScrollAnchor::new(THRESHOLD);
        anchor.before_merge(MergeKind::TailGrowth);
        anchor.after_layout(ScrollMetrics::new(0.0, 800.0, 500.0));

        anchor.observe(ScrollMetrics::new(10.0, 800.0, 500.0));
        anchor.before_merge(MergeKind::HistoryPrepend);
        approx(anchor.after_layout(ScrollMetrics::new(10.0, 1300.0, 500.0)), Some(510.0));
    }

    #[test]
    fn test_layout_without_pending_merge_is_noop() {
        let mut anchor = ScrollAnchor::new(THRESHOLD);
        assert_eq!(anchor.after_layout(ScrollMetrics::new(0.0, 100.0, 50.0)), None);
    }

    #[test]
    fn test_following_bottom_beats_prepend_when_coalesced() {
        let mut anchor = ScrollAnchor::new(THRESHOLD);
        anchor.before_merge(MergeKind::TailGrowth);
        anchor.after_layout(ScrollMetrics::new(0.0, 800.0, 500.0));

        anchor.observe(ScrollMetrics::new(300.0, 800.0, 500.0));
        anchor.before_merge(MergeKind::HistoryPrepend);
        anchor.before_merge(MergeKind::TailGrowth);
        assert_eq!(anchor.pending_kind(), Some(MergeKind::TailGrowth));
    }

    #[test]
    fn test_reset_makes_next_merge_initial() {
        let mut anchor = ScrollAnchor::new(THRESHOLD);
        anchor.before_merge(MergeKind::TailGrowth);
        anchor.after_layout(ScrollMetrics::new(0.0, 800.0, 500.0));
        anchor.reset();

        anchor.before_merge(MergeKind::HistoryPrepend);
        assert_eq!(anchor.pending_kind(), Some(MergeKind::InitialLoad));
    }
}
