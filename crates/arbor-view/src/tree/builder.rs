//! Tree builder: projects the domain model into the visual forest.
//!
//! The builder walks the domain hierarchy recursively (shells, submodel
//! references, submodel elements, with nested collections, lists, entities,
//! operation variable groups by direction and relationship annotations)
//! plus the parallel branches for concept descriptions and supplementary
//! files. The same per-kind synthesis routines are reused by the lazy
//! loader and the change-event processor, so an incrementally patched
//! forest can never drift from what a full rebuild would produce.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::warn;

use arbor_view_core::logging::targets;

use crate::domain::{
    DomainKey, DomainObject, DomainStore, ElementBody, OperationDirection,
};
use crate::tree::expand::ExpandCache;
use crate::tree::lazy;
use crate::tree::node::{NodeIdentity, NodeKind, VisualForest, VisualKey, VisualNode};

/// Descriptive strings identifying the synthetic group rows.
///
/// These double as expand-cache keys and as `location_tag` values for
/// structural-update events targeting a listing.
pub mod virtual_ids {
    pub const PACKAGE: &str = "Package";
    pub const CONCEPT_DESCRIPTIONS: &str = "ConceptDescriptions";
    pub const SHELLS: &str = "Shells";
    pub const ALL_SUBMODELS: &str = "AllSubmodels";
    pub const SUPPLEMENTARY_FILES: &str = "SupplementaryFiles";
}

/// Ordering policy for concept descriptions.
///
/// The usage-based policies change tree *shape*, not just sort order: a
/// referenced concept description is nested under the submodel or element
/// that references it and disappears from the top-level listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CdSortOrder {
    /// Environment list order.
    #[default]
    ByListIndex,
    /// Case-insensitive by short id; absent short ids sort smallest.
    ByIdShort,
    /// Case-insensitive by full id.
    ById,
    /// Nested under every submodel owning a referencing element.
    ByOwningSubmodel,
    /// Nested under every element referencing it.
    ByReferencingElement,
}

/// Configuration threaded explicitly through every build and realize call.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Show the editable scaffolding (package, environment and group rows).
    pub edit_mode: bool,
    /// Depth below which nodes without a cache entry default to expanded.
    pub expand_depth: usize,
    /// Defer submodel subtrees and the two listings behind placeholders.
    pub lazy_first: bool,
    /// Concept-description placement policy.
    pub cd_order: CdSortOrder,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            edit_mode: true,
            expand_depth: 2,
            lazy_first: false,
            cd_order: CdSortOrder::ByListIndex,
        }
    }
}

/// Recursive projection of the domain store into visual nodes.
///
/// A builder is cheap to construct and is created fresh for every build,
/// realization or event application; the two semantic-usage multi-maps it
/// carries are traversal side effects valid for that pass only.
pub struct TreeBuilder<'a> {
    store: &'a DomainStore,
    cache: &'a ExpandCache,
    options: &'a BuildOptions,
    /// Concept description key by its full id, for semantic-id matching.
    cd_by_id: HashMap<String, DomainKey>,
    /// Referenced concept description -> nodes of referencing elements.
    referencing: HashMap<DomainKey, Vec<VisualKey>>,
    /// Referenced concept description -> submodels owning a referencing element.
    owning: HashMap<DomainKey, Vec<DomainKey>>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(store: &'a DomainStore, cache: &'a ExpandCache, options: &'a BuildOptions) -> Self {
        let mut cd_by_id = HashMap::new();
        for (key, object) in store.iter() {
            if let DomainObject::ConceptDescription(cd) = object {
                cd_by_id.insert(cd.id().to_owned(), key);
            }
        }
        Self {
            store,
            cache,
            options,
            cd_by_id,
            referencing: HashMap::new(),
            owning: HashMap::new(),
        }
    }

    /// Build the whole forest for one environment.
    pub fn build_forest(&mut self, env_key: DomainKey) -> VisualForest {
        let mut forest = VisualForest::new();
        let Some(env) = self.store.environment(env_key) else {
            warn!(target: targets::BUILDER, ?env_key, "build root is not an environment");
            return forest;
        };
        let shells = env.shells().to_vec();
        let submodels = env.submodels().to_vec();

        if !self.options.edit_mode {
            // View mode: shells only, directly at top level.
            for shell in shells {
                self.build_shell(&mut forest, None, shell, 0);
            }
            return forest;
        }

        let package = self.attach_virtual(
            &mut forest,
            None,
            NodeKind::Package,
            virtual_ids::PACKAGE,
            "Package",
            "Pkg",
            0,
        );
        let env_node = self.attach_node(&mut forest, Some(package), {
            let mut node = VisualNode::new(NodeKind::Environment, NodeIdentity::Real(env_key));
            node.caption = "Environment".to_string();
            node.tag = "Env".to_string();
            node
        }, 1);

        let cd_group = self.attach_virtual(
            &mut forest,
            Some(env_node),
            NodeKind::CdGroup,
            virtual_ids::CONCEPT_DESCRIPTIONS,
            "ConceptDescriptions",
            "Group",
            2,
        );
        let shell_group = self.attach_virtual(
            &mut forest,
            Some(env_node),
            NodeKind::ShellGroup,
            virtual_ids::SHELLS,
            "Shells",
            "Group",
            2,
        );
        let all_sm_group = self.attach_virtual(
            &mut forest,
            Some(env_node),
            NodeKind::AllSubmodelsGroup,
            virtual_ids::ALL_SUBMODELS,
            "AllSubmodels",
            "Group",
            2,
        );
        let file_group = self.attach_virtual(
            &mut forest,
            Some(package),
            NodeKind::FileGroup,
            virtual_ids::SUPPLEMENTARY_FILES,
            "SupplementaryFiles",
            "Group",
            1,
        );

        // The environment's direct visual children are all synthetic group
        // rows; inserts of real rows under it must land after them.
        if let Some(env_row) = forest.node_mut(env_node) {
            env_row.virtual_child_count = 3;
        }

        // Shells first: element traversal records the semantic-usage maps
        // the concept-description listing depends on.
        for shell in shells {
            self.build_shell(&mut forest, Some(shell_group), shell, 3);
        }
        for sm in submodels {
            self.build_submodel_plain(&mut forest, Some(all_sm_group), sm, 3);
        }

        if self.options.lazy_first {
            lazy::install_placeholder(&mut forest, cd_group);
            lazy::install_placeholder(&mut forest, file_group);
        } else {
            self.populate_cd_listing(&mut forest, cd_group, env_key);
            self.populate_file_listing(&mut forest, file_group, env_key);
        }

        forest
    }

    // -------------------------------------------------------------------------
    // Per-kind construction (shared with the lazy loader and event processor)
    // -------------------------------------------------------------------------

    /// Project a shell and its submodel-reference children.
    pub fn build_shell(
        &mut self,
        forest: &mut VisualForest,
        parent: Option<VisualKey>,
        shell_key: DomainKey,
        depth: usize,
    ) -> VisualKey {
        let Some(shell) = self.store.shell(shell_key) else {
            return self.unknown_node(forest, parent, Some(shell_key), depth);
        };
        let refs = shell.submodel_refs().to_vec();

        let mut node = VisualNode::new(NodeKind::Shell, NodeIdentity::Real(shell_key));
        node.caption = shell.id_short().to_string();
        node.info = shell.id().to_string();
        node.tag = "Shell".to_string();
        let key = self.attach_node(forest, parent, node, depth);

        for r in refs {
            self.build_submodel_ref(forest, Some(key), r, depth + 1);
        }
        key
    }

    /// Project a submodel reference as a proxy node dereferencing to its
    /// target submodel.
    pub fn build_submodel_ref(
        &mut self,
        forest: &mut VisualForest,
        parent: Option<VisualKey>,
        ref_key: DomainKey,
        depth: usize,
    ) -> VisualKey {
        let Some(r) = self.store.submodel_ref(ref_key) else {
            return self.unknown_node(forest, parent, Some(ref_key), depth);
        };
        let target = r.target();
        let Some(sm) = self.store.submodel(target) else {
            return self.unknown_node(forest, parent, Some(ref_key), depth);
        };

        let mut node = VisualNode::new(NodeKind::SubmodelRef, NodeIdentity::Real(ref_key));
        node.dereferenced = Some(target);
        node.caption = sm.id_short().unwrap_or(sm.id()).to_string();
        node.info = sm.id().to_string();
        node.tag = "SMRef".to_string();
        let key = self.attach_node(forest, parent, node, depth);

        if self.options.lazy_first {
            lazy::install_placeholder(forest, key);
        } else {
            self.populate_submodel_children(forest, key, target);
        }
        key
    }

    /// Project a submodel as a plain node (the "AllSubmodels" listing).
    pub fn build_submodel_plain(
        &mut self,
        forest: &mut VisualForest,
        parent: Option<VisualKey>,
        sm_key: DomainKey,
        depth: usize,
    ) -> VisualKey {
        let Some(sm) = self.store.submodel(sm_key) else {
            return self.unknown_node(forest, parent, Some(sm_key), depth);
        };

        let mut node = VisualNode::new(NodeKind::Submodel, NodeIdentity::Real(sm_key));
        node.caption = sm.id_short().unwrap_or(sm.id()).to_string();
        node.info = sm.id().to_string();
        node.tag = "SM".to_string();
        let key = self.attach_node(forest, parent, node, depth);

        if self.options.lazy_first {
            lazy::install_placeholder(forest, key);
        } else {
            self.populate_submodel_children(forest, key, sm_key);
        }
        key
    }

    /// (Re)build the element subtree of a submodel node.
    ///
    /// Used eagerly during construction, by the lazy loader on realization,
    /// and by the event processor for structural updates.
    pub fn populate_submodel_children(
        &mut self,
        forest: &mut VisualForest,
        node_key: VisualKey,
        sm_key: DomainKey,
    ) {
        let Some(sm) = self.store.submodel(sm_key) else {
            return;
        };
        let elements = sm.elements().to_vec();
        let depth = forest.depth_of(node_key) + 1;

        for el in elements {
            self.build_element(forest, Some(node_key), el, depth, Some(sm_key));
        }

        if self.options.cd_order == CdSortOrder::ByOwningSubmodel {
            // Nest every concept description referenced from this submodel's
            // subtree, in first-reference order.
            for cd in self.referenced_cds_in_submodel(sm_key) {
                self.build_cd_node(forest, Some(node_key), cd, depth);
            }
        }
    }

    /// Remove and re-append the concept-description rows nested under one
    /// submodel projection, re-derived from the domain. Returns whether the
    /// row set actually changed.
    pub(crate) fn refresh_owned_cd_rows(
        &mut self,
        forest: &mut VisualForest,
        node_key: VisualKey,
        sm_key: DomainKey,
    ) -> bool {
        if self.options.cd_order != CdSortOrder::ByOwningSubmodel {
            return false;
        }
        let stale: Vec<VisualKey> = match forest.node(node_key) {
            Some(node) => node
                .children()
                .iter()
                .copied()
                .filter(|&c| {
                    forest
                        .node(c)
                        .is_some_and(|n| n.kind() == NodeKind::ConceptDescription)
                })
                .collect(),
            None => return false,
        };
        let current: Vec<DomainKey> = stale
            .iter()
            .filter_map(|&k| forest.node(k).and_then(|n| n.main_data_object()))
            .collect();
        let cds = self.referenced_cds_in_submodel(sm_key);
        if current == cds {
            return false;
        }
        for key in stale {
            forest.detach(key);
        }
        let depth = forest.depth_of(node_key) + 1;
        for cd in cds {
            self.build_cd_node(forest, Some(node_key), cd, depth);
        }
        true
    }

    /// Project one typed element, recursing into its children.
    pub fn build_element(
        &mut self,
        forest: &mut VisualForest,
        parent: Option<VisualKey>,
        el_key: DomainKey,
        depth: usize,
        owning_submodel: Option<DomainKey>,
    ) -> VisualKey {
        let Some(el) = self.store.element(el_key) else {
            return self.unknown_node(forest, parent, Some(el_key), depth);
        };
        let caption = el.id_short().unwrap_or("<no idShort!>").to_string();
        let semantic_id = el.semantic_id().map(str::to_owned);
        let body = el.body().clone();

        let mut node = VisualNode::new(NodeKind::Unknown, NodeIdentity::Real(el_key));
        node.caption = caption;
        match &body {
            ElementBody::Property { value } => {
                node.kind = NodeKind::Property;
                node.info = format!("= {value}");
                node.tag = "Prop".to_string();
            }
            ElementBody::Collection { children } => {
                node.kind = NodeKind::Collection;
                node.info = format!("({} elements)", children.len());
                node.tag = "Coll".to_string();
            }
            ElementBody::ElementList { items } => {
                node.kind = NodeKind::ElementList;
                node.info = format!("({} items)", items.len());
                node.tag = "List".to_string();
            }
            ElementBody::Entity { statements } => {
                node.kind = NodeKind::Entity;
                node.info = format!("({} statements)", statements.len());
                node.tag = "Ent".to_string();
            }
            ElementBody::Operation {
                inputs,
                outputs,
                inouts,
            } => {
                node.kind = NodeKind::Operation;
                node.info = format!(
                    "({} in, {} out, {} inout)",
                    inputs.len(),
                    outputs.len(),
                    inouts.len()
                );
                node.tag = "Op".to_string();
            }
            ElementBody::Relationship { annotations } => {
                node.kind = NodeKind::Relationship;
                node.info = format!("({} annotations)", annotations.len());
                node.tag = "Rel".to_string();
            }
        }
        let key = self.attach_node(forest, parent, node, depth);

        match &body {
            ElementBody::Property { .. } => {}
            ElementBody::Collection { children } => {
                for &child in children {
                    self.build_element(forest, Some(key), child, depth + 1, owning_submodel);
                }
            }
            ElementBody::ElementList { items } => {
                for &item in items {
                    self.build_element(forest, Some(key), item, depth + 1, owning_submodel);
                }
            }
            ElementBody::Entity { statements } => {
                for &st in statements {
                    self.build_element(forest, Some(key), st, depth + 1, owning_submodel);
                }
            }
            ElementBody::Operation {
                inputs,
                outputs,
                inouts,
            } => {
                let groups = [
                    (OperationDirection::Input, inputs),
                    (OperationDirection::Output, outputs),
                    (OperationDirection::InOut, inouts),
                ];
                for (direction, vars) in groups {
                    for &var in vars {
                        self.build_operation_variable(
                            forest,
                            Some(key),
                            var,
                            direction,
                            depth + 1,
                            owning_submodel,
                        );
                    }
                }
            }
            ElementBody::Relationship { annotations } => {
                for &ann in annotations {
                    self.build_element(forest, Some(key), ann, depth + 1, owning_submodel);
                }
            }
        }

        self.record_semantic_usage(forest, key, semantic_id.as_deref(), owning_submodel, depth);
        key
    }

    /// Project an operation variable: an element node reclassified with its
    /// direction group.
    pub fn build_operation_variable(
        &mut self,
        forest: &mut VisualForest,
        parent: Option<VisualKey>,
        var_key: DomainKey,
        direction: OperationDirection,
        depth: usize,
        owning_submodel: Option<DomainKey>,
    ) -> VisualKey {
        let key = self.build_element(forest, parent, var_key, depth, owning_submodel);
        if let Some(node) = forest.node_mut(key) {
            if node.kind != NodeKind::Unknown {
                node.kind = NodeKind::OperationVariable(direction);
                node.tag = direction.label().to_string();
            }
        }
        key
    }

    /// Project one concept description.
    pub fn build_cd_node(
        &mut self,
        forest: &mut VisualForest,
        parent: Option<VisualKey>,
        cd_key: DomainKey,
        depth: usize,
    ) -> VisualKey {
        let Some(cd) = self.store.concept_description(cd_key) else {
            return self.unknown_node(forest, parent, Some(cd_key), depth);
        };
        let mut node = VisualNode::new(NodeKind::ConceptDescription, NodeIdentity::Real(cd_key));
        node.caption = cd.id_short().unwrap_or(cd.id()).to_string();
        node.info = cd.id().to_string();
        node.tag = "CD".to_string();
        self.attach_node(forest, parent, node, depth)
    }

    /// Project one supplementary file.
    pub fn build_file_node(
        &mut self,
        forest: &mut VisualForest,
        parent: Option<VisualKey>,
        file_key: DomainKey,
        depth: usize,
    ) -> VisualKey {
        let Some(file) = self.store.supplementary_file(file_key) else {
            return self.unknown_node(forest, parent, Some(file_key), depth);
        };
        let mut node = VisualNode::new(NodeKind::SupplementaryFile, NodeIdentity::Real(file_key));
        node.caption = file
            .path()
            .rsplit('/')
            .next()
            .unwrap_or(file.path())
            .to_string();
        node.info = file.path().to_string();
        node.tag = "File".to_string();
        self.attach_node(forest, parent, node, depth)
    }

    /// (Re)build the top-level concept-description listing under its group
    /// node, honoring the ordering policy.
    pub fn populate_cd_listing(
        &mut self,
        forest: &mut VisualForest,
        group_key: VisualKey,
        env_key: DomainKey,
    ) {
        let Some(env) = self.store.environment(env_key) else {
            return;
        };
        let mut cds = env.concept_descriptions().to_vec();
        let depth = forest.depth_of(group_key) + 1;

        match self.options.cd_order {
            CdSortOrder::ByListIndex => {}
            CdSortOrder::ByIdShort => {
                cds.sort_by(|&a, &b| {
                    cmp_optional_ci(
                        self.store.concept_description(a).and_then(|c| c.id_short()),
                        self.store.concept_description(b).and_then(|c| c.id_short()),
                    )
                });
            }
            CdSortOrder::ById => {
                cds.sort_by(|&a, &b| {
                    cmp_optional_ci(
                        self.store.concept_description(a).map(|c| c.id()),
                        self.store.concept_description(b).map(|c| c.id()),
                    )
                });
            }
            CdSortOrder::ByOwningSubmodel | CdSortOrder::ByReferencingElement => {
                // Once nested near its usage, a concept description must not
                // appear in the top-level listing as well.
                self.scan_semantic_usage(env_key);
                cds.retain(|cd| {
                    !self.referencing.contains_key(cd) && !self.owning.contains_key(cd)
                });
            }
        }

        for cd in cds {
            self.build_cd_node(forest, Some(group_key), cd, depth);
        }
    }

    /// (Re)build the supplementary-file listing under its group node.
    pub fn populate_file_listing(
        &mut self,
        forest: &mut VisualForest,
        group_key: VisualKey,
        env_key: DomainKey,
    ) {
        let Some(env) = self.store.environment(env_key) else {
            return;
        };
        let files = env.supplementary_files().to_vec();
        let depth = forest.depth_of(group_key) + 1;
        for file in files {
            self.build_file_node(forest, Some(group_key), file, depth);
        }
    }

    /// (Re)build the children of a shell node.
    pub fn populate_shell_children(
        &mut self,
        forest: &mut VisualForest,
        node_key: VisualKey,
        shell_key: DomainKey,
    ) {
        let Some(shell) = self.store.shell(shell_key) else {
            return;
        };
        let refs = shell.submodel_refs().to_vec();
        let depth = forest.depth_of(node_key) + 1;
        for r in refs {
            self.build_submodel_ref(forest, Some(node_key), r, depth);
        }
    }

    /// (Re)build the children of a container element node.
    pub fn populate_element_children(
        &mut self,
        forest: &mut VisualForest,
        node_key: VisualKey,
        el_key: DomainKey,
    ) {
        let Some(el) = self.store.element(el_key) else {
            return;
        };
        let body = el.body().clone();
        let owning = self.owning_submodel_of(el_key);
        let depth = forest.depth_of(node_key) + 1;

        match body {
            ElementBody::Property { .. } => {}
            ElementBody::Collection { children } => {
                for child in children {
                    self.build_element(forest, Some(node_key), child, depth, owning);
                }
            }
            ElementBody::ElementList { items } => {
                for item in items {
                    self.build_element(forest, Some(node_key), item, depth, owning);
                }
            }
            ElementBody::Entity { statements } => {
                for st in statements {
                    self.build_element(forest, Some(node_key), st, depth, owning);
                }
            }
            ElementBody::Operation {
                inputs,
                outputs,
                inouts,
            } => {
                let groups = [
                    (OperationDirection::Input, inputs),
                    (OperationDirection::Output, outputs),
                    (OperationDirection::InOut, inouts),
                ];
                for (direction, vars) in groups {
                    for var in vars {
                        self.build_operation_variable(
                            forest,
                            Some(node_key),
                            var,
                            direction,
                            depth,
                            owning,
                        );
                    }
                }
            }
            ElementBody::Relationship { annotations } => {
                for ann in annotations {
                    self.build_element(forest, Some(node_key), ann, depth, owning);
                }
            }
        }
    }

    /// Walk domain parents up to the owning submodel, if any.
    pub fn owning_submodel_of(&self, el_key: DomainKey) -> Option<DomainKey> {
        let mut current = el_key;
        loop {
            let object = self.store.get(current)?;
            if matches!(object, DomainObject::Submodel(_)) {
                return Some(current);
            }
            current = object.parent()?;
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn attach_virtual(
        &mut self,
        forest: &mut VisualForest,
        parent: Option<VisualKey>,
        kind: NodeKind,
        id: &str,
        caption: &str,
        tag: &str,
        depth: usize,
    ) -> VisualKey {
        let mut node = VisualNode::new(kind, NodeIdentity::Virtual(id.to_string()));
        node.caption = caption.to_string();
        node.tag = tag.to_string();
        self.attach_node(forest, parent, node, depth)
    }

    /// Seed expanded state and attach. Cache hits win over depth defaults
    /// and mark the node as touched; defaulting never overrides a touched
    /// value later.
    fn attach_node(
        &mut self,
        forest: &mut VisualForest,
        parent: Option<VisualKey>,
        mut node: VisualNode,
        depth: usize,
    ) -> VisualKey {
        match self.cache.lookup(&node.identity) {
            Some(expanded) => {
                node.expanded = expanded;
                node.touched = true;
            }
            None => {
                node.expanded = depth < self.options.expand_depth;
            }
        }
        forest.attach(parent, None, node)
    }

    /// Diagnostic row for an object of an unrecognized kind. The rest of
    /// the tree stays usable.
    fn unknown_node(
        &mut self,
        forest: &mut VisualForest,
        parent: Option<VisualKey>,
        key: Option<DomainKey>,
        depth: usize,
    ) -> VisualKey {
        warn!(
            target: targets::BUILDER,
            ?key,
            "unrecognized domain object during node synthesis"
        );
        let identity = match key {
            Some(k) => NodeIdentity::Real(k),
            None => NodeIdentity::Virtual("Unknown".to_string()),
        };
        let mut node = VisualNode::new(NodeKind::Unknown, identity);
        node.caption = "<unknown element>".to_string();
        node.tag = "?".to_string();
        self.attach_node(forest, parent, node, depth)
    }

    /// Record that the element node `el_node` references a concept
    /// description via its semantic id, and nest the projection when the
    /// policy asks for it.
    fn record_semantic_usage(
        &mut self,
        forest: &mut VisualForest,
        el_node: VisualKey,
        semantic_id: Option<&str>,
        owning_submodel: Option<DomainKey>,
        depth: usize,
    ) {
        let Some(cd) = semantic_id.and_then(|sid| self.cd_by_id.get(sid).copied()) else {
            return;
        };
        self.referencing.entry(cd).or_default().push(el_node);
        if let Some(sm) = owning_submodel {
            let owners = self.owning.entry(cd).or_default();
            if !owners.contains(&sm) {
                owners.push(sm);
            }
        }
        if self.options.cd_order == CdSortOrder::ByReferencingElement {
            self.build_cd_node(forest, Some(el_node), cd, depth + 1);
        }
    }

    /// Concept descriptions referenced anywhere in one submodel's element
    /// subtree, in first-reference order.
    fn referenced_cds_in_submodel(&self, sm_key: DomainKey) -> Vec<DomainKey> {
        let mut found = Vec::new();
        let mut stack: Vec<DomainKey> = match self.store.submodel(sm_key) {
            Some(sm) => sm.elements().iter().rev().copied().collect(),
            None => Vec::new(),
        };
        while let Some(key) = stack.pop() {
            if let Some(el) = self.store.element(key) {
                if let Some(cd) = el
                    .semantic_id()
                    .and_then(|sid| self.cd_by_id.get(sid).copied())
                {
                    if !found.contains(&cd) {
                        found.push(cd);
                    }
                }
            }
            for child in self.store.children_of(key).into_iter().rev() {
                stack.push(child);
            }
        }
        found
    }

    /// Fill the usage multi-maps from the domain alone. Needed when the
    /// concept-description listing is (re)built without a preceding full
    /// element traversal, e.g. on lazy realization.
    fn scan_semantic_usage(&mut self, env_key: DomainKey) {
        let Some(env) = self.store.environment(env_key) else {
            return;
        };
        for &sm in env.submodels() {
            for cd in self.referenced_cds_in_submodel(sm) {
                let owners = self.owning.entry(cd).or_default();
                if !owners.contains(&sm) {
                    owners.push(sm);
                }
            }
        }
    }
}

/// Re-derive caption and info of an existing node from the (already
/// mutated) domain object it projects. Structure and children untouched.
pub(crate) fn refresh_node_text(store: &DomainStore, forest: &mut VisualForest, key: VisualKey) {
    let Some(node) = forest.node(key) else {
        return;
    };
    let subject = match node.kind {
        // Proxy nodes re-derive from their dereferenced target.
        NodeKind::SubmodelRef => node.dereferenced_main_data_object(),
        _ => node.main_data_object(),
    };
    let Some(subject) = subject else {
        return;
    };
    let derived: Option<(String, String)> = match store.get(subject) {
        Some(DomainObject::Shell(shell)) => {
            Some((shell.id_short().to_string(), shell.id().to_string()))
        }
        Some(DomainObject::Submodel(sm)) => Some((
            sm.id_short().unwrap_or(sm.id()).to_string(),
            sm.id().to_string(),
        )),
        Some(DomainObject::ConceptDescription(cd)) => Some((
            cd.id_short().unwrap_or(cd.id()).to_string(),
            cd.id().to_string(),
        )),
        Some(DomainObject::SupplementaryFile(file)) => Some((
            file.path()
                .rsplit('/')
                .next()
                .unwrap_or(file.path())
                .to_string(),
            file.path().to_string(),
        )),
        Some(DomainObject::Element(el)) => {
            let caption = el.id_short().unwrap_or("<no idShort!>").to_string();
            let info = match el.body() {
                ElementBody::Property { value } => format!("= {value}"),
                ElementBody::Collection { children } => format!("({} elements)", children.len()),
                ElementBody::ElementList { items } => format!("({} items)", items.len()),
                ElementBody::Entity { statements } => format!("({} statements)", statements.len()),
                ElementBody::Operation {
                    inputs,
                    outputs,
                    inouts,
                } => format!(
                    "({} in, {} out, {} inout)",
                    inputs.len(),
                    outputs.len(),
                    inouts.len()
                ),
                ElementBody::Relationship { annotations } => {
                    format!("({} annotations)", annotations.len())
                }
            };
            Some((caption, info))
        }
        _ => None,
    };
    if let Some((caption, info)) = derived {
        if let Some(node) = forest.node_mut(key) {
            node.caption = caption;
            node.info = info;
        }
    }
}

/// Culture-invariant, case-insensitive comparison; absent values smallest.
fn cmp_optional_ci(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Element;

    fn snapshot(forest: &VisualForest) -> Vec<(usize, String, String, String)> {
        forest
            .iter()
            .map(|key| {
                let node = forest.node(key).unwrap();
                (
                    forest.depth_of(key),
                    node.caption().to_string(),
                    node.info().to_string(),
                    node.tag().to_string(),
                )
            })
            .collect()
    }

    fn env_with_sensors() -> (DomainStore, DomainKey) {
        let mut store = DomainStore::new();
        let env = store.create_environment();
        let shell = store.add_shell(env, "Machine", "urn:shell:1").unwrap();
        let (sm, _) = store
            .add_submodel_with_ref(env, shell, "Sensors", "urn:sm:1")
            .unwrap();
        store
            .add_element(sm, Element::property("Temperature", "21"))
            .unwrap();
        store
            .add_element(sm, Element::property("Pressure", "5"))
            .unwrap();
        (store, env)
    }

    #[test]
    fn test_edit_mode_scaffolding_shape() {
        let (store, env) = env_with_sensors();
        let cache = ExpandCache::new();
        let options = BuildOptions::default();
        let forest = TreeBuilder::new(&store, &cache, &options).build_forest(env);

        let captions: Vec<String> = forest
            .iter()
            .map(|k| forest.node(k).unwrap().caption().to_string())
            .collect();
        assert_eq!(
            captions,
            vec![
                "Package",
                "Environment",
                "ConceptDescriptions",
                "Shells",
                "Machine",
                "Sensors",
                "Temperature",
                "Pressure",
                "AllSubmodels",
                "Sensors",
                "Temperature",
                "Pressure",
                "SupplementaryFiles",
            ]
        );
        assert!(forest.validate());
    }

    #[test]
    fn test_view_mode_lists_shells_only() {
        let (store, env) = env_with_sensors();
        let cache = ExpandCache::new();
        let options = BuildOptions {
            edit_mode: false,
            ..BuildOptions::default()
        };
        let forest = TreeBuilder::new(&store, &cache, &options).build_forest(env);

        assert_eq!(forest.roots().len(), 1);
        let root = forest.node(forest.roots()[0]).unwrap();
        assert_eq!(root.caption(), "Machine");
        assert!(root.is_top_level());
        assert!(forest.find_all_virtual(virtual_ids::PACKAGE).is_empty());
    }

    #[test]
    fn test_build_is_deterministic() {
        let (store, env) = env_with_sensors();
        let cache = ExpandCache::new();
        let options = BuildOptions::default();

        let first = TreeBuilder::new(&store, &cache, &options).build_forest(env);
        let second = TreeBuilder::new(&store, &cache, &options).build_forest(env);
        assert_eq!(snapshot(&first), snapshot(&second));
    }

    #[test]
    fn test_submodel_ref_is_a_proxy() {
        let (store, env) = env_with_sensors();
        let cache = ExpandCache::new();
        let options = BuildOptions::default();
        let forest = TreeBuilder::new(&store, &cache, &options).build_forest(env);

        let shell_key = store.environment(env).unwrap().shells()[0];
        let ref_key = store.shell(shell_key).unwrap().submodel_refs()[0];
        let sm_key = store.submodel_ref(ref_key).unwrap().target();

        let proxy = forest.find_all_on_main(ref_key, false);
        assert_eq!(proxy.len(), 1);
        let proxy_node = forest.node(proxy[0]).unwrap();
        assert_eq!(proxy_node.main_data_object(), Some(ref_key));
        assert_eq!(proxy_node.dereferenced_main_data_object(), Some(sm_key));

        // Dereferenced lookup finds both the proxy and the plain listing node.
        assert_eq!(forest.find_all_on_main(sm_key, true).len(), 2);
    }

    #[test]
    fn test_expand_depth_default_and_cache_override() {
        let (store, env) = env_with_sensors();
        let mut cache = ExpandCache::new();
        let options = BuildOptions::default();

        let forest = TreeBuilder::new(&store, &cache, &options).build_forest(env);
        let package = forest.find_all_virtual(virtual_ids::PACKAGE)[0];
        let shells = forest.find_all_virtual(virtual_ids::SHELLS)[0];
        // Depth 0 and 1 expanded by default (expand_depth = 2), depth 2 not.
        assert!(forest.node(package).unwrap().is_expanded());
        assert!(!forest.node(shells).unwrap().is_expanded());

        // A cache entry wins over the depth default.
        cache.record(&NodeIdentity::Virtual(virtual_ids::SHELLS.into()), true);
        cache.record(&NodeIdentity::Virtual(virtual_ids::PACKAGE.into()), false);
        let forest = TreeBuilder::new(&store, &cache, &options).build_forest(env);
        let package = forest.find_all_virtual(virtual_ids::PACKAGE)[0];
        let shells = forest.find_all_virtual(virtual_ids::SHELLS)[0];
        assert!(!forest.node(package).unwrap().is_expanded());
        assert!(forest.node(shells).unwrap().is_expanded());
        assert!(forest.node(shells).unwrap().touched);
    }

    #[test]
    fn test_cd_order_by_id_short_sorts_case_insensitively() {
        let (mut store, env) = env_with_sensors();
        store.add_concept_description(env, Some("zeta"), "urn:cd:z").unwrap();
        store.add_concept_description(env, Some("Alpha"), "urn:cd:a").unwrap();
        store.add_concept_description(env, None, "urn:cd:n").unwrap();

        let cache = ExpandCache::new();
        let options = BuildOptions {
            cd_order: CdSortOrder::ByIdShort,
            ..BuildOptions::default()
        };
        let forest = TreeBuilder::new(&store, &cache, &options).build_forest(env);

        let group = forest.find_all_virtual(virtual_ids::CONCEPT_DESCRIPTIONS)[0];
        let captions: Vec<&str> = forest
            .node(group)
            .unwrap()
            .children()
            .iter()
            .map(|&k| forest.node(k).unwrap().caption())
            .collect();
        // Absent idShort sorts smallest; falls back to the id for display.
        assert_eq!(captions, vec!["urn:cd:n", "Alpha", "zeta"]);
    }

    #[test]
    fn test_by_referencing_element_nests_and_unlists() {
        let (mut store, env) = env_with_sensors();
        let cd = store
            .add_concept_description(env, Some("TempDef"), "urn:cd:temp")
            .unwrap();
        let unused = store
            .add_concept_description(env, Some("Orphan"), "urn:cd:orphan")
            .unwrap();
        let sm = store.environment(env).unwrap().submodels()[0];
        store
            .add_element(
                sm,
                Element::property("Temperature2", "22").with_semantic_id("urn:cd:temp"),
            )
            .unwrap();

        let cache = ExpandCache::new();
        let options = BuildOptions {
            cd_order: CdSortOrder::ByReferencingElement,
            ..BuildOptions::default()
        };
        let forest = TreeBuilder::new(&store, &cache, &options).build_forest(env);

        // Nested under both projections of the referencing element (shell
        // branch and AllSubmodels branch), absent from the top listing.
        let projections = forest.find_all_on_main(cd, false);
        assert_eq!(projections.len(), 2);
        for key in &projections {
            let parent = forest.node(*key).unwrap().parent().unwrap();
            assert_eq!(forest.node(parent).unwrap().caption(), "Temperature2");
        }

        let group = forest.find_all_virtual(virtual_ids::CONCEPT_DESCRIPTIONS)[0];
        let listed: Vec<&str> = forest
            .node(group)
            .unwrap()
            .children()
            .iter()
            .map(|&k| forest.node(k).unwrap().caption())
            .collect();
        assert_eq!(listed, vec!["Orphan"]);
        assert_eq!(forest.find_all_on_main(unused, false).len(), 1);
    }

    #[test]
    fn test_by_owning_submodel_nests_under_submodel() {
        let (mut store, env) = env_with_sensors();
        let cd = store
            .add_concept_description(env, Some("TempDef"), "urn:cd:temp")
            .unwrap();
        let sm = store.environment(env).unwrap().submodels()[0];
        store
            .add_element(
                sm,
                Element::property("Temperature2", "22").with_semantic_id("urn:cd:temp"),
            )
            .unwrap();

        let cache = ExpandCache::new();
        let options = BuildOptions {
            cd_order: CdSortOrder::ByOwningSubmodel,
            ..BuildOptions::default()
        };
        let forest = TreeBuilder::new(&store, &cache, &options).build_forest(env);

        let projections = forest.find_all_on_main(cd, false);
        assert_eq!(projections.len(), 2);
        for key in &projections {
            let parent = forest.node(*key).unwrap().parent().unwrap();
            let parent_node = forest.node(parent).unwrap();
            assert_eq!(parent_node.dereferenced_main_data_object(), Some(sm));
        }

        let group = forest.find_all_virtual(virtual_ids::CONCEPT_DESCRIPTIONS)[0];
        assert!(forest.node(group).unwrap().children().is_empty());
    }

    #[test]
    fn test_operation_variables_grouped_by_direction() {
        let (mut store, env) = env_with_sensors();
        let sm = store.environment(env).unwrap().submodels()[0];
        let op = store.add_element(sm, Element::operation("Calibrate")).unwrap();
        store
            .add_operation_variable(op, OperationDirection::Output, Element::property("Ok", ""))
            .unwrap();
        store
            .add_operation_variable(op, OperationDirection::Input, Element::property("Target", ""))
            .unwrap();

        let cache = ExpandCache::new();
        let options = BuildOptions::default();
        let forest = TreeBuilder::new(&store, &cache, &options).build_forest(env);

        let op_node = forest.find_first_on_main(op).unwrap();
        let tags: Vec<&str> = forest
            .node(op_node)
            .unwrap()
            .children()
            .iter()
            .map(|&k| forest.node(k).unwrap().tag())
            .collect();
        // Inputs before outputs regardless of insertion order.
        assert_eq!(tags, vec!["In", "Out"]);
    }

    #[test]
    fn test_dangling_reference_renders_unknown_node() {
        let (mut store, env) = env_with_sensors();
        let shell = store.environment(env).unwrap().shells()[0];
        let sm2 = store.add_submodel(env, "Doomed", "urn:sm:2").unwrap();
        let r2 = store.add_submodel_ref(shell, sm2).unwrap();
        // Remove the submodel out from under the reference. The clone keeps
        // the ref in place, simulating a half-applied edit.
        let mut broken = store.clone();
        broken.remove_submodel(sm2);

        let cache = ExpandCache::new();
        let options = BuildOptions::default();
        let forest = TreeBuilder::new(&broken, &cache, &options).build_forest(env);

        let nodes = forest.find_all_on_main(r2, false);
        assert_eq!(nodes.len(), 1);
        let node = forest.node(nodes[0]).unwrap();
        assert_eq!(node.kind(), NodeKind::Unknown);
        assert_eq!(node.caption(), "<unknown element>");
        assert!(forest.validate());
    }

    #[test]
    fn test_lazy_first_defers_submodels_and_listings() {
        let (store, env) = env_with_sensors();
        let cache = ExpandCache::new();
        let options = BuildOptions {
            lazy_first: true,
            ..BuildOptions::default()
        };
        let forest = TreeBuilder::new(&store, &cache, &options).build_forest(env);

        let sm = store.environment(env).unwrap().submodels()[0];
        for key in forest.find_all_on_main(sm, true) {
            let node = forest.node(key).unwrap();
            assert_eq!(node.children().len(), 1);
            let only = forest.node(node.children()[0]).unwrap();
            assert_eq!(only.kind(), NodeKind::Placeholder);
            assert!(!node.is_expanded());
        }
    }
}
