//! Change-notification signals emitted by the synchronization engine.

use arbor_view_core::Signal;

use crate::tree::node::VisualKey;

/// Bundle of signals describing how the forest changed.
///
/// Granular signals fire for incremental patches; the coarse
/// [`forest_rebuilt`](Self::forest_rebuilt) fires for full rebuilds and for
/// structural fallbacks too broad to describe row by row. A presentation
/// layer connects to whichever granularity it can use.
#[derive(Default)]
pub struct TreeSignals {
    /// `(parent, first, count)`: rows were inserted under `parent` starting
    /// at child index `first`.
    pub nodes_inserted: Signal<(VisualKey, usize, usize)>,
    /// `(parent, first, count)`: rows were removed from under `parent`. The
    /// keys of the removed rows are already invalid when this fires.
    pub nodes_removed: Signal<(VisualKey, usize, usize)>,
    /// One node's displayed data (caption, info, selection, flash) changed
    /// in place.
    pub node_updated: Signal<VisualKey>,
    /// A node's whole child list was rebuilt; the node itself survived.
    pub subtree_rebuilt: Signal<VisualKey>,
    /// The whole forest was rebuilt; every previously held key is invalid.
    pub forest_rebuilt: Signal<()>,
}

impl TreeSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block or unblock all signals at once. Returns the previous state of
    /// the first signal, which is representative since they are only ever
    /// blocked together.
    pub fn set_blocked(&self, blocked: bool) -> bool {
        let was = self.nodes_inserted.set_blocked(blocked);
        self.nodes_removed.set_blocked(blocked);
        self.node_updated.set_blocked(blocked);
        self.subtree_rebuilt.set_blocked(blocked);
        self.forest_rebuilt.set_blocked(blocked);
        was
    }
}
