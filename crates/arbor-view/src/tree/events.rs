//! Change events and the incremental patcher.
//!
//! Events describe a domain mutation *after* it has been applied to the
//! store; the patcher edits the existing forest in place so it converges to
//! what a full rebuild would produce, without invalidating unrelated node
//! keys. Events referring to objects with no projection in the forest (or
//! no longer in the store) are silently skipped with a debug log line; a
//! stale event must never corrupt the tree.

use serde::{Deserialize, Serialize};
use tracing::debug;

use arbor_view_core::logging::targets;

use crate::domain::{DomainKey, DomainObject, DomainStore, ElementBody, OperationDirection};
use crate::tree::builder::{self, BuildOptions, CdSortOrder, TreeBuilder};
use crate::tree::expand::ExpandCache;
use crate::tree::lazy;
use crate::tree::node::{NodeKind, VisualForest, VisualKey};
use crate::tree::signals::TreeSignals;

/// What kind of domain mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeReason {
    /// `this_elem` was created under `parent_elem`.
    Create,
    /// `this_elem` was removed (it is no longer in the store).
    Delete,
    /// `this_elem` moved to `new_index` within its parent container.
    MoveToIndex,
    /// A single displayed value of `this_elem` changed in place.
    ValueUpdateSingle,
    /// The child structure under `this_elem` (or under the listing named by
    /// `location_tag`) changed in a way not worth describing row by row.
    StructuralUpdate,
}

/// One domain mutation, posted after the store was already updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub reason: ChangeReason,
    pub parent_elem: Option<DomainKey>,
    pub this_elem: Option<DomainKey>,
    pub new_index: Option<usize>,
    /// Descriptive string of a virtual listing row, for structural updates
    /// targeting a synthetic group.
    pub location_tag: Option<String>,
}

impl ChangeEvent {
    pub fn created(parent: DomainKey, this: DomainKey) -> Self {
        Self {
            reason: ChangeReason::Create,
            parent_elem: Some(parent),
            this_elem: Some(this),
            new_index: None,
            location_tag: None,
        }
    }

    pub fn deleted(this: DomainKey) -> Self {
        Self {
            reason: ChangeReason::Delete,
            parent_elem: None,
            this_elem: Some(this),
            new_index: None,
            location_tag: None,
        }
    }

    pub fn moved(this: DomainKey, new_index: usize) -> Self {
        Self {
            reason: ChangeReason::MoveToIndex,
            parent_elem: None,
            this_elem: Some(this),
            new_index: Some(new_index),
            location_tag: None,
        }
    }

    pub fn value_updated(this: DomainKey) -> Self {
        Self {
            reason: ChangeReason::ValueUpdateSingle,
            parent_elem: None,
            this_elem: Some(this),
            new_index: None,
            location_tag: None,
        }
    }

    pub fn structural(this: DomainKey) -> Self {
        Self {
            reason: ChangeReason::StructuralUpdate,
            parent_elem: None,
            this_elem: Some(this),
            new_index: None,
            location_tag: None,
        }
    }

    pub fn structural_listing(tag: impl Into<String>) -> Self {
        Self {
            reason: ChangeReason::StructuralUpdate,
            parent_elem: None,
            this_elem: None,
            new_index: None,
            location_tag: Some(tag.into()),
        }
    }
}

/// Apply one event to the forest. Returns whether anything changed.
pub(crate) fn apply_event(
    store: &DomainStore,
    cache: &ExpandCache,
    options: &BuildOptions,
    forest: &mut VisualForest,
    signals: &TreeSignals,
    event: &ChangeEvent,
) -> bool {
    match event.reason {
        ChangeReason::Create => handle_create(store, cache, options, forest, signals, event),
        ChangeReason::Delete => handle_delete(store, cache, options, forest, signals, event),
        ChangeReason::MoveToIndex => handle_move(store, forest, signals, event),
        ChangeReason::ValueUpdateSingle => handle_value_update(store, forest, signals, event),
        ChangeReason::StructuralUpdate => {
            handle_structural(store, cache, options, forest, signals, event)
        }
    }
}

fn miss(event: &ChangeEvent, detail: &str) -> bool {
    debug!(target: targets::EVENTS, ?event, detail, "event skipped");
    false
}

// -----------------------------------------------------------------------------
// Create
// -----------------------------------------------------------------------------

fn handle_create(
    store: &DomainStore,
    cache: &ExpandCache,
    options: &BuildOptions,
    forest: &mut VisualForest,
    signals: &TreeSignals,
    event: &ChangeEvent,
) -> bool {
    let Some(this) = event.this_elem else {
        return miss(event, "create without subject");
    };
    let Some(object) = store.get(this) else {
        return miss(event, "created object already gone");
    };
    let parent_dom = event.parent_elem.or_else(|| object.parent());

    match object {
        DomainObject::Shell(_) => {
            let pos = env_list_position(store, parent_dom, this, |env| env.shells());
            let parents = group_parents(forest, NodeKind::ShellGroup);
            if parents.is_empty() && !options.edit_mode {
                // View mode: shells are roots, slotted at their list index.
                let mut b = TreeBuilder::new(store, cache, options);
                let key = b.build_shell(forest, None, this, 0);
                if let Some(pos) = pos {
                    forest.reposition_root(key, pos);
                }
                signals.forest_rebuilt.emit(());
                return true;
            }
            insert_under(store, cache, options, forest, signals, &parents, pos, |b, f, p, d| {
                b.build_shell(f, Some(p), this, d)
            })
        }
        DomainObject::Submodel(_) => {
            let pos = env_list_position(store, parent_dom, this, |env| env.submodels());
            let parents = group_parents(forest, NodeKind::AllSubmodelsGroup);
            insert_under(store, cache, options, forest, signals, &parents, pos, |b, f, p, d| {
                b.build_submodel_plain(f, Some(p), this, d)
            })
        }
        DomainObject::SubmodelRef(r) => {
            let shell = parent_dom.unwrap_or_default();
            let pos = store
                .shell(shell)
                .and_then(|s| s.submodel_refs().iter().position(|&k| k == this));
            let Some(pos) = pos else {
                return miss(event, "reference not under its shell");
            };
            let parents = forest.find_all_on_main(shell, true);
            let mut changed = insert_under(
                store,
                cache,
                options,
                forest,
                signals,
                &parents,
                Some(pos),
                |b, f, p, d| b.build_submodel_ref(f, Some(p), this, d),
            );
            // A newly referenced submodel may also be new to the plain listing.
            let target = r.target();
            if store.submodel(target).is_some() && forest.find_all_on_main(target, false).is_empty()
            {
                let pos = env_list_position(store, lazy::environment_key(store, forest), target, |env| {
                    env.submodels()
                });
                let parents = group_parents(forest, NodeKind::AllSubmodelsGroup);
                changed |= insert_under(
                    store,
                    cache,
                    options,
                    forest,
                    signals,
                    &parents,
                    pos,
                    |b, f, p, d| b.build_submodel_plain(f, Some(p), target, d),
                );
            }
            changed
        }
        DomainObject::ConceptDescription(_) => match options.cd_order {
            CdSortOrder::ByListIndex => {
                let pos = env_list_position(store, parent_dom, this, |env| {
                    env.concept_descriptions()
                });
                let parents = group_parents(forest, NodeKind::CdGroup);
                insert_under(store, cache, options, forest, signals, &parents, pos, |b, f, p, d| {
                    b.build_cd_node(f, Some(p), this, d)
                })
            }
            // Sorted and usage-based listings are rebuilt wholesale; the
            // insertion point depends on every other entry.
            _ => {
                let nested = rebuild_owned_cd_rows(store, cache, options, forest, signals);
                rebuild_groups(store, cache, options, forest, signals, NodeKind::CdGroup) | nested
            }
        },
        DomainObject::SupplementaryFile(_) => {
            let pos = env_list_position(store, parent_dom, this, |env| env.supplementary_files());
            let parents = group_parents(forest, NodeKind::FileGroup);
            insert_under(store, cache, options, forest, signals, &parents, pos, |b, f, p, d| {
                b.build_file_node(f, Some(p), this, d)
            })
        }
        DomainObject::Element(_) => {
            let Some(parent_dom) = parent_dom else {
                return miss(event, "element create without parent");
            };
            let Some(pos) = store.children_of(parent_dom).iter().position(|&k| k == this)
            else {
                return miss(event, "element not under its parent");
            };
            let direction = variable_direction(store, parent_dom, this);
            let semantic = subtree_has_semantic_id(store, this);
            let parents = forest.find_all_on_main(parent_dom, true);
            let changed = insert_under(
                store,
                cache,
                options,
                forest,
                signals,
                &parents,
                Some(pos),
                |b, f, p, d| {
                    let owning = b.owning_submodel_of(this);
                    match direction {
                        Some(dir) => b.build_operation_variable(f, Some(p), this, dir, d, owning),
                        None => b.build_element(f, Some(p), this, d, owning),
                    }
                },
            );
            // Under usage-based ordering, the first reference to a concept
            // description must also take it off the top-level listing and,
            // for the owning-submodel policy, nest it under the submodel.
            if changed
                && semantic
                && matches!(
                    options.cd_order,
                    CdSortOrder::ByOwningSubmodel | CdSortOrder::ByReferencingElement
                )
            {
                rebuild_owned_cd_rows(store, cache, options, forest, signals);
                rebuild_groups(store, cache, options, forest, signals, NodeKind::CdGroup);
            }
            changed
        }
        DomainObject::Environment(_) => miss(event, "environments are not created by events"),
    }
}

/// Synthesize a subtree under every projection of the parent, then slot it
/// in after the parent's leading synthetic rows.
fn insert_under<'a, F>(
    store: &'a DomainStore,
    cache: &'a ExpandCache,
    options: &'a BuildOptions,
    forest: &mut VisualForest,
    signals: &TreeSignals,
    parents: &[VisualKey],
    pos: Option<usize>,
    mut build: F,
) -> bool
where
    F: FnMut(&mut TreeBuilder<'a>, &mut VisualForest, VisualKey, usize) -> VisualKey,
{
    let mut b = TreeBuilder::new(store, cache, options);
    let mut changed = false;
    for &parent in parents {
        if lazy::is_lazy_pending(forest, parent) {
            // Deferred subtrees pick the change up on realization.
            continue;
        }
        let Some(parent_node) = forest.node(parent) else {
            continue;
        };
        let vcc = parent_node.virtual_child_count();
        let depth = forest.depth_of(parent) + 1;
        let new_key = build(&mut b, forest, parent, depth);
        if let Some(pos) = pos {
            forest.reposition_child(parent, new_key, vcc + pos);
        }
        let at = forest
            .node(parent)
            .and_then(|p| p.children().iter().position(|&k| k == new_key))
            .unwrap_or(0);
        signals.nodes_inserted.emit((parent, at, 1));
        refresh_parent_text(store, forest, signals, parent);
        changed = true;
    }
    changed
}

/// Container rows display derived child counts; re-derive a parent's text
/// after a structural patch and announce it only when it changed.
fn refresh_parent_text(
    store: &DomainStore,
    forest: &mut VisualForest,
    signals: &TreeSignals,
    parent: VisualKey,
) {
    let before = forest
        .node(parent)
        .map(|n| (n.caption().to_string(), n.info().to_string()));
    builder::refresh_node_text(store, forest, parent);
    let after = forest
        .node(parent)
        .map(|n| (n.caption().to_string(), n.info().to_string()));
    if after != before {
        signals.node_updated.emit(parent);
    }
}

// -----------------------------------------------------------------------------
// Delete
// -----------------------------------------------------------------------------

fn handle_delete(
    store: &DomainStore,
    cache: &ExpandCache,
    options: &BuildOptions,
    forest: &mut VisualForest,
    signals: &TreeSignals,
    event: &ChangeEvent,
) -> bool {
    let Some(this) = event.this_elem else {
        return miss(event, "delete without subject");
    };
    // Collect first, then detach: every projection goes, proxies included.
    let mut doomed = forest.find_all_on_main(this, false);
    for key in forest.find_all_on_main(this, true) {
        if !doomed.contains(&key) {
            doomed.push(key);
        }
    }
    if doomed.is_empty() {
        return miss(event, "no projection of deleted object");
    }

    let mut changed = false;
    let mut element_kind_seen = false;
    let mut patched_parents: Vec<VisualKey> = Vec::new();
    for key in doomed {
        let Some(node) = forest.node(key) else {
            // Already gone as part of an ancestor's subtree.
            continue;
        };
        element_kind_seen |= is_element_kind(node.kind());
        let parent = node.parent();
        let index = parent
            .and_then(|p| forest.node(p))
            .and_then(|p| p.children().iter().position(|&k| k == key));
        if forest.detach(key) {
            changed = true;
            match (parent, index) {
                (Some(p), Some(i)) => {
                    signals.nodes_removed.emit((p, i, 1));
                    if !patched_parents.contains(&p) {
                        patched_parents.push(p);
                    }
                }
                _ => signals.forest_rebuilt.emit(()),
            }
        }
    }
    for parent in patched_parents {
        refresh_parent_text(store, forest, signals, parent);
    }

    // Under usage-based ordering a concept description may have lost its
    // last reference and must reappear in the top-level listing; nested
    // copies under its owning submodels go away with it.
    if changed
        && element_kind_seen
        && matches!(
            options.cd_order,
            CdSortOrder::ByOwningSubmodel | CdSortOrder::ByReferencingElement
        )
    {
        rebuild_owned_cd_rows(store, cache, options, forest, signals);
        rebuild_groups(store, cache, options, forest, signals, NodeKind::CdGroup);
    }
    changed
}

// -----------------------------------------------------------------------------
// Move
// -----------------------------------------------------------------------------

fn handle_move(
    store: &DomainStore,
    forest: &mut VisualForest,
    signals: &TreeSignals,
    event: &ChangeEvent,
) -> bool {
    let Some(this) = event.this_elem else {
        return miss(event, "move without subject");
    };
    let Some(new_index) = event.new_index else {
        return miss(event, "move without target index");
    };
    let Some(parent_dom) = store.get(this).and_then(|o| o.parent()) else {
        return miss(event, "moved object has no parent");
    };

    let mut changed = false;
    for parent in forest.find_all_on_main(parent_dom, true) {
        if lazy::is_lazy_pending(forest, parent) {
            continue;
        }
        let Some(parent_node) = forest.node(parent) else {
            continue;
        };
        let vcc = parent_node.virtual_child_count();
        let real = parent_node.children().len().saturating_sub(vcc);
        if new_index >= real {
            debug!(
                target: targets::EVENTS,
                new_index, real, "move target beyond real children, skipped"
            );
            continue;
        }
        let Some(old) = parent_node
            .children()
            .iter()
            .position(|&k| forest.node(k).is_some_and(|n| n.main_data_object() == Some(this)))
        else {
            continue;
        };
        let child = parent_node.children()[old];
        let at = vcc + new_index;
        forest.reposition_child(parent, child, at);
        signals.nodes_removed.emit((parent, old, 1));
        signals.nodes_inserted.emit((parent, at, 1));
        changed = true;
    }
    if !changed {
        return miss(event, "no projection affected by move");
    }
    true
}

// -----------------------------------------------------------------------------
// Value update
// -----------------------------------------------------------------------------

fn handle_value_update(
    store: &DomainStore,
    forest: &mut VisualForest,
    signals: &TreeSignals,
    event: &ChangeEvent,
) -> bool {
    let Some(this) = event.this_elem else {
        return miss(event, "value update without subject");
    };
    let nodes = forest.find_all_on_main(this, true);
    if nodes.is_empty() {
        return miss(event, "no projection of updated object");
    }
    for key in nodes {
        builder::refresh_node_text(store, forest, key);
        // Off-then-on so the presentation layer restarts a running flash.
        if let Some(node) = forest.node_mut(key) {
            node.animate = false;
        }
        signals.node_updated.emit(key);
        if let Some(node) = forest.node_mut(key) {
            node.animate = true;
        }
        signals.node_updated.emit(key);
    }
    true
}

// -----------------------------------------------------------------------------
// Structural update
// -----------------------------------------------------------------------------

fn handle_structural(
    store: &DomainStore,
    cache: &ExpandCache,
    options: &BuildOptions,
    forest: &mut VisualForest,
    signals: &TreeSignals,
    event: &ChangeEvent,
) -> bool {
    let mut changed = false;

    if let Some(tag) = &event.location_tag {
        for group in forest.find_all_virtual(tag) {
            changed |= rebuild_group(store, cache, options, forest, signals, group);
        }
    }

    if let Some(this) = event.this_elem {
        for key in forest.find_all_on_main(this, true) {
            if lazy::is_lazy_pending(forest, key) {
                continue;
            }
            let Some(node) = forest.node(key) else {
                continue;
            };
            let kind = node.kind();
            let subject = node.dereferenced_main_data_object();
            match kind {
                NodeKind::Environment => {
                    // The environment's children are the group rows; refresh
                    // each listing rather than the scaffolding itself.
                    for group in node.children().to_vec() {
                        changed |=
                            rebuild_group(store, cache, options, forest, signals, group);
                    }
                    continue;
                }
                NodeKind::Shell => {
                    forest.clear_children(key);
                    let mut b = TreeBuilder::new(store, cache, options);
                    b.populate_shell_children(forest, key, this);
                }
                NodeKind::Submodel | NodeKind::SubmodelRef => {
                    let Some(sm) = subject else {
                        continue;
                    };
                    forest.clear_children(key);
                    let mut b = TreeBuilder::new(store, cache, options);
                    b.populate_submodel_children(forest, key, sm);
                }
                k if is_element_kind(k) => {
                    forest.clear_children(key);
                    let mut b = TreeBuilder::new(store, cache, options);
                    b.populate_element_children(forest, key, this);
                }
                _ => {
                    builder::refresh_node_text(store, forest, key);
                    signals.node_updated.emit(key);
                    changed = true;
                    continue;
                }
            }
            builder::refresh_node_text(store, forest, key);
            signals.subtree_rebuilt.emit(key);
            changed = true;
        }
    }

    if !changed {
        return miss(event, "structural update matched nothing");
    }
    true
}

/// Rebuild every group node of one kind.
fn rebuild_groups(
    store: &DomainStore,
    cache: &ExpandCache,
    options: &BuildOptions,
    forest: &mut VisualForest,
    signals: &TreeSignals,
    kind: NodeKind,
) -> bool {
    let mut changed = false;
    for group in group_parents(forest, kind) {
        changed |= rebuild_group(store, cache, options, forest, signals, group);
    }
    changed
}

/// Rebuild the listing under one synthetic group row.
fn rebuild_group(
    store: &DomainStore,
    cache: &ExpandCache,
    options: &BuildOptions,
    forest: &mut VisualForest,
    signals: &TreeSignals,
    group: VisualKey,
) -> bool {
    if lazy::is_lazy_pending(forest, group) {
        // Deferred listings pick the change up on realization.
        return false;
    }
    let Some(kind) = forest.node(group).map(|n| n.kind()) else {
        return false;
    };
    let Some(env) = lazy::environment_key(store, forest) else {
        return false;
    };
    let Some(env_obj) = store.environment(env) else {
        return false;
    };
    let shells = env_obj.shells().to_vec();
    let submodels = env_obj.submodels().to_vec();

    forest.clear_children(group);
    let depth = forest.depth_of(group) + 1;
    let mut b = TreeBuilder::new(store, cache, options);
    match kind {
        NodeKind::ShellGroup => {
            for shell in shells {
                b.build_shell(forest, Some(group), shell, depth);
            }
        }
        NodeKind::AllSubmodelsGroup => {
            for sm in submodels {
                b.build_submodel_plain(forest, Some(group), sm, depth);
            }
        }
        NodeKind::CdGroup => b.populate_cd_listing(forest, group, env),
        NodeKind::FileGroup => b.populate_file_listing(forest, group, env),
        _ => return false,
    }
    signals.subtree_rebuilt.emit(group);
    true
}

/// Under the owning-submodel policy, re-derive the concept-description
/// rows nested at the tail of every submodel projection. A no-op for every
/// other ordering policy and for still-deferred projections.
fn rebuild_owned_cd_rows(
    store: &DomainStore,
    cache: &ExpandCache,
    options: &BuildOptions,
    forest: &mut VisualForest,
    signals: &TreeSignals,
) -> bool {
    if options.cd_order != CdSortOrder::ByOwningSubmodel {
        return false;
    }
    let Some(env) = lazy::environment_key(store, forest) else {
        return false;
    };
    let Some(env_obj) = store.environment(env) else {
        return false;
    };
    let submodels = env_obj.submodels().to_vec();

    let mut changed = false;
    for sm in submodels {
        for key in forest.find_all_on_main(sm, true) {
            if lazy::is_lazy_pending(forest, key) {
                continue;
            }
            let mut b = TreeBuilder::new(store, cache, options);
            if b.refresh_owned_cd_rows(forest, key, sm) {
                signals.subtree_rebuilt.emit(key);
                changed = true;
            }
        }
    }
    changed
}

/// Whether any element in the subtree rooted at `root` carries a semantic
/// id. A created container may bring referencing descendants with it.
fn subtree_has_semantic_id(store: &DomainStore, root: DomainKey) -> bool {
    let mut stack = vec![root];
    while let Some(key) = stack.pop() {
        if store
            .element(key)
            .and_then(|el| el.semantic_id())
            .is_some()
        {
            return true;
        }
        stack.extend(store.children_of(key));
    }
    false
}

fn group_parents(forest: &VisualForest, kind: NodeKind) -> Vec<VisualKey> {
    forest.find_all(|n| n.kind() == kind).collect()
}

fn env_list_position(
    store: &DomainStore,
    env: Option<DomainKey>,
    this: DomainKey,
    list: fn(&crate::domain::Environment) -> &[DomainKey],
) -> Option<usize> {
    store
        .environment(env?)
        .and_then(|env| list(env).iter().position(|&k| k == this))
}

/// Direction group holding `var`, if `op` is an operation.
fn variable_direction(
    store: &DomainStore,
    op: DomainKey,
    var: DomainKey,
) -> Option<OperationDirection> {
    match store.element(op)?.body() {
        ElementBody::Operation {
            inputs,
            outputs,
            inouts,
        } => {
            if inputs.contains(&var) {
                Some(OperationDirection::Input)
            } else if outputs.contains(&var) {
                Some(OperationDirection::Output)
            } else if inouts.contains(&var) {
                Some(OperationDirection::InOut)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn is_element_kind(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Property
            | NodeKind::Collection
            | NodeKind::ElementList
            | NodeKind::Entity
            | NodeKind::Operation
            | NodeKind::OperationVariable(_)
            | NodeKind::Relationship
    )
}
