//! The synchronization engine facade.
//!
//! [`TreeSync`] owns the derived forest, the expand-state cache, the build
//! options and the signal bundle, and exposes the whole lifecycle: full
//! rebuilds, incremental event application, deferred-subtree realization
//! and expand/select state changes. The engine is single-threaded by
//! design; the only shared resource is the event queue, which any thread
//! may post to and the owning thread drains in submission order.

use tracing::{debug, info};

use arbor_view_core::EventQueue;
use arbor_view_core::logging::targets;

use crate::domain::{DomainKey, DomainStore};
use crate::error::{Result, TreeError};
use crate::tree::builder::{BuildOptions, TreeBuilder};
use crate::tree::events::{self, ChangeEvent};
use crate::tree::expand::ExpandCache;
use crate::tree::lazy;
use crate::tree::node::{NodeKind, VisualForest, VisualKey};
use crate::tree::signals::TreeSignals;

/// Owner of one derived visual tree and everything needed to keep it in
/// sync with its domain store.
pub struct TreeSync {
    forest: VisualForest,
    cache: ExpandCache,
    options: BuildOptions,
    signals: TreeSignals,
    env: Option<DomainKey>,
}

impl Default for TreeSync {
    fn default() -> Self {
        Self::new(BuildOptions::default())
    }
}

impl TreeSync {
    pub fn new(options: BuildOptions) -> Self {
        Self {
            forest: VisualForest::new(),
            cache: ExpandCache::new(),
            options,
            signals: TreeSignals::new(),
            env: None,
        }
    }

    pub fn forest(&self) -> &VisualForest {
        &self.forest
    }

    pub fn signals(&self) -> &TreeSignals {
        &self.signals
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Replace the build options. Takes effect on the next rebuild.
    pub fn set_options(&mut self, options: BuildOptions) {
        self.options = options;
    }

    pub fn expand_cache(&self) -> &ExpandCache {
        &self.cache
    }

    /// Drop all remembered expand states.
    pub fn clear_expand_cache(&mut self) {
        self.cache.clear();
    }

    /// The environment the forest was last built from.
    pub fn environment(&self) -> Option<DomainKey> {
        self.env
    }

    /// Throw the forest away and rebuild it from the store.
    ///
    /// Every previously held [`VisualKey`] becomes invalid. Expand states
    /// survive through the cache.
    pub fn rebuild(&mut self, store: &DomainStore, env: DomainKey) -> Result<()> {
        if !store.contains(env) {
            return Err(TreeError::MissingObject(env));
        }
        if store.environment(env).is_none() {
            return Err(TreeError::NotAnEnvironment(env));
        }
        let mut builder = TreeBuilder::new(store, &self.cache, &self.options);
        self.forest = builder.build_forest(env);
        self.env = Some(env);
        info!(
            target: targets::FOREST,
            nodes = self.forest.len(),
            "forest rebuilt"
        );
        self.signals.forest_rebuilt.emit(());
        Ok(())
    }

    /// Apply one already-performed domain mutation to the forest.
    ///
    /// Returns whether the forest changed. Events that match nothing are
    /// skipped without touching the tree.
    pub fn apply(&mut self, store: &DomainStore, event: &ChangeEvent) -> bool {
        events::apply_event(
            store,
            &self.cache,
            &self.options,
            &mut self.forest,
            &self.signals,
            event,
        )
    }

    /// Drain the queue and apply every event in submission order.
    ///
    /// Returns the number of events that changed the forest.
    pub fn drain(&mut self, store: &DomainStore, queue: &EventQueue<ChangeEvent>) -> usize {
        let events = queue.drain();
        let total = events.len();
        let mut applied = 0;
        for event in &events {
            if self.apply(store, event) {
                applied += 1;
            }
        }
        debug!(target: targets::EVENTS, total, applied, "queue drained");
        applied
    }

    /// Realize a deferred subtree. Returns whether anything was pending.
    pub fn execute_lazy_loading(
        &mut self,
        store: &DomainStore,
        key: VisualKey,
        force_expanded: bool,
    ) -> bool {
        let realized = lazy::execute_lazy_loading(
            store,
            &self.cache,
            &self.options,
            &mut self.forest,
            key,
            force_expanded,
        );
        if realized {
            if force_expanded {
                if let Some(node) = self.forest.node(key) {
                    self.cache.record(node.identity(), true);
                }
            }
            self.signals.subtree_rebuilt.emit(key);
        }
        realized
    }

    /// Whether a node's subtree is still deferred.
    pub fn is_lazy_pending(&self, key: VisualKey) -> bool {
        lazy::is_lazy_pending(&self.forest, key)
    }

    /// Defer a node's subtree behind a placeholder again. The children are
    /// rebuilt from the store on the next realization. Only subtrees that
    /// can be realized on their own may be deferred.
    pub fn mark_lazy(&mut self, key: VisualKey) -> bool {
        let Some(node) = self.forest.node(key) else {
            return false;
        };
        if !matches!(
            node.kind(),
            NodeKind::Submodel | NodeKind::SubmodelRef | NodeKind::CdGroup | NodeKind::FileGroup
        ) {
            return false;
        }
        lazy::install_placeholder(&mut self.forest, key);
        if let Some(node) = self.forest.node_mut(key) {
            node.expanded = false;
        }
        self.signals.subtree_rebuilt.emit(key);
        true
    }

    /// Record an explicit expand/collapse. The state is written to the node
    /// and to the cache, so it survives any number of rebuilds.
    pub fn set_expanded(&mut self, key: VisualKey, expanded: bool) -> bool {
        let Some(node) = self.forest.node_mut(key) else {
            return false;
        };
        node.expanded = expanded;
        node.touched = true;
        let identity = node.identity().clone();
        self.cache.record(&identity, expanded);
        self.signals.node_updated.emit(key);
        true
    }

    /// Change a node's selection flag. Selection is per-forest state and
    /// does not survive rebuilds.
    pub fn set_selected(&mut self, key: VisualKey, selected: bool) -> bool {
        let Some(node) = self.forest.node_mut(key) else {
            return false;
        };
        if node.selected != selected {
            node.selected = selected;
            self.signals.node_updated.emit(key);
        }
        true
    }

    /// Clear the selection flag on every node.
    pub fn clear_selection(&mut self) {
        let selected: Vec<VisualKey> = self.forest.find_all(|n| n.is_selected()).collect();
        for key in selected {
            self.set_selected(key, false);
        }
    }
}
