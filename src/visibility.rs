//! Visibility tracking for feed items.
//!
//! The feed is a vertical strip of item cards measured in terminal rows.
//! [`VisibilityTracker`] compares each card against the viewport (grown by
//! an optional root margin) and reports threshold crossings:
//!
//! * `Entered` when the visible fraction rises to the threshold or above
//!   (an item exactly at the threshold counts as entered);
//! * `Exited` when it falls back below.
//!
//! Only crossings are reported, so feeding the same geometry every frame
//! is cheap and emits nothing.

use tracing::trace;

/// A vertical span in rows: `top..top + height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub top: i64,
    pub height: u32,
}

impl Extent {
    pub fn new(top: i64, height: u32) -> Self {
        Self { top, height }
    }

    pub fn bottom(&self) -> i64 {
        self.top + i64::from(self.height)
    }

    /// Grow by `margin` rows on both ends.
    pub fn expand(&self, margin: u32) -> Self {
        Self {
            top: self.top - i64::from(margin),
            height: self.height.saturating_add(margin.saturating_mul(2)),
        }
    }
}

/// Lay out `count` full-height cards one after another.
pub fn feed_layout(count: usize, item_height: u32) -> Vec<Extent> {
    (0..count)
        .map(|i| Extent::new(i as i64 * i64::from(item_height), item_height))
        .collect()
}

/// Fraction of `container` inside `root`, in `0.0..=1.0`.
pub fn intersection_ratio(container: Extent, root: Extent) -> f64 {
    if container.height == 0 {
        return 0.0;
    }
    let overlap = container.bottom().min(root.bottom()) - container.top.max(root.top);
    if overlap <= 0 {
        0.0
    } else {
        overlap as f64 / f64::from(container.height)
    }
}

/// Per-item visibility as last observed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VisibilityState {
    pub is_intersecting: bool,
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityEvent {
    Entered(usize),
    Exited(usize),
}

#[derive(Debug, Clone)]
pub struct VisibilityTracker {
    threshold: f64,
    root_margin: u32,
    states: Vec<VisibilityState>,
}

impl VisibilityTracker {
    /// `threshold` is clamped to `0.0..=1.0`; `root_margin` is in rows.
    pub fn new(threshold: f64, root_margin: u32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            root_margin,
            states: Vec::new(),
        }
    }

    pub fn set_root_margin(&mut self, root_margin: u32) {
        self.root_margin = root_margin;
    }

    /// Recompute every container against `viewport` and return the
    /// crossings, in container order.
    pub fn observe(&mut self, viewport: Extent, containers: &[Extent]) -> Vec<VisibilityEvent> {
        let root = viewport.expand(self.root_margin);

        // Items that disappeared from the list exit if they were visible.
        let mut events: Vec<VisibilityEvent> = (containers.len()..self.states.len())
            .filter(|&i| self.states[i].is_intersecting)
            .map(VisibilityEvent::Exited)
            .collect();
        self.states.resize(containers.len(), VisibilityState::default());

        for (index, container) in containers.iter().enumerate() {
            let ratio = intersection_ratio(*container, root);
            events.extend(self.record(index, ratio));
        }
        events
    }

    /// Record a new ratio for one item and return the crossing, if any.
    pub fn record(&mut self, index: usize, ratio: f64) -> Option<VisibilityEvent> {
        if index >= self.states.len() {
            self.states.resize(index + 1, VisibilityState::default());
        }
        let entered = ratio > 0.0 && ratio >= self.threshold;
        let state = &mut self.states[index];
        let was = state.is_intersecting;
        *state = VisibilityState {
            is_intersecting: entered,
            ratio,
        };

        match (was, entered) {
            (false, true) => {
                trace!(index, ratio, "item entered");
                Some(VisibilityEvent::Entered(index))
            }
            (true, false) => {
                trace!(index, ratio, "item exited");
                Some(VisibilityEvent::Exited(index))
            }
            _ => None,
        }
    }

    pub fn state(&self, index: usize) -> Option<VisibilityState> {
        self.states.get(index).copied()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
