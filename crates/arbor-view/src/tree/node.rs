//! Visual nodes and the forest that holds them.
//!
//! A visual node is a pure projection of one domain object (or of a
//! reference to one) for presentation purposes. The forest stores nodes in
//! an arena, keeps the ordered root list, and maintains an identity index:
//! a multi-map from domain key to every node currently projecting that
//! object. The multi-map is the explicit representation of the "one domain
//! object, many projections" case; nodes are never aliased.

use std::collections::HashMap;

use slotmap::{SlotMap, new_key_type};

use crate::domain::{DomainKey, OperationDirection};

new_key_type! {
    /// Identity of one visual node within its forest.
    pub struct VisualKey;
}

/// What a visual node projects. Closed dispatch with an explicit fallback;
/// node synthesis never fails, it renders [`NodeKind::Unknown`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// The outermost package row.
    Package,
    /// The environment row under the package.
    Environment,
    /// The "Shells" group row.
    ShellGroup,
    /// The "ConceptDescriptions" group row.
    CdGroup,
    /// The "AllSubmodels" group row.
    AllSubmodelsGroup,
    /// The "SupplementaryFiles" group row.
    FileGroup,
    Shell,
    /// Proxy row for a submodel reference; dereferences to the submodel.
    SubmodelRef,
    /// Plain submodel row (under the "AllSubmodels" listing).
    Submodel,
    Property,
    Collection,
    ElementList,
    Entity,
    Operation,
    /// Operation variable, grouped by direction.
    OperationVariable(OperationDirection),
    Relationship,
    ConceptDescription,
    SupplementaryFile,
    /// Marker child of a node whose subtree is deferred.
    Placeholder,
    /// Diagnostic row for a domain object of an unrecognized kind.
    Unknown,
}

/// What identifies a visual node for lookup and expand-state caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeIdentity {
    /// Backed by a real domain object.
    Real(DomainKey),
    /// Purely synthetic row, keyed by a deterministically-constructed
    /// descriptive string and compared by value.
    Virtual(String),
    /// Lazy placeholder; carries no identity at all.
    Placeholder,
}

/// One node of the derived visual tree.
#[derive(Debug, Clone)]
pub struct VisualNode {
    pub(crate) kind: NodeKind,
    pub(crate) identity: NodeIdentity,
    /// Set on proxy nodes whose displayed subject differs from the object
    /// they are keyed on (a submodel reference dereferencing to its target).
    pub(crate) dereferenced: Option<DomainKey>,
    pub(crate) caption: String,
    pub(crate) info: String,
    pub(crate) tag: String,
    pub(crate) expanded: bool,
    /// Whether `expanded` has ever been set explicitly. Depth-based
    /// defaulting must not override a touched value.
    pub(crate) touched: bool,
    pub(crate) selected: bool,
    /// Toggled off-then-on to signal a value flash to the presentation layer.
    pub(crate) animate: bool,
    /// Count of leading synthetic children not backed by a domain child.
    pub(crate) virtual_child_count: usize,
    pub(crate) is_top_level: bool,
    pub(crate) parent: Option<VisualKey>,
    pub(crate) children: Vec<VisualKey>,
}

impl VisualNode {
    pub(crate) fn new(kind: NodeKind, identity: NodeIdentity) -> Self {
        Self {
            kind,
            identity,
            dereferenced: None,
            caption: String::new(),
            info: String::new(),
            tag: String::new(),
            expanded: false,
            touched: false,
            selected: false,
            animate: false,
            virtual_child_count: 0,
            is_top_level: false,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// The domain object this node projects, if any.
    pub fn main_data_object(&self) -> Option<DomainKey> {
        match self.identity {
            NodeIdentity::Real(key) => Some(key),
            _ => None,
        }
    }

    /// The dereferenced main data object. Defaults to the main data object
    /// unless a reference-like node overrides it with its target.
    pub fn dereferenced_main_data_object(&self) -> Option<DomainKey> {
        self.dereferenced.or_else(|| self.main_data_object())
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Value-flash flag for the presentation layer.
    pub fn animate(&self) -> bool {
        self.animate
    }

    pub fn virtual_child_count(&self) -> usize {
        self.virtual_child_count
    }

    pub fn is_top_level(&self) -> bool {
        self.is_top_level
    }

    pub fn parent(&self) -> Option<VisualKey> {
        self.parent
    }

    pub fn children(&self) -> &[VisualKey] {
        &self.children
    }
}

/// The derived visual tree: node arena, ordered roots, identity index.
#[derive(Debug, Default, Clone)]
pub struct VisualForest {
    nodes: SlotMap<VisualKey, VisualNode>,
    roots: Vec<VisualKey>,
    /// Nodes whose main data object is the given key.
    by_main: HashMap<DomainKey, Vec<VisualKey>>,
    /// Nodes whose dereferenced main data object is the given key.
    by_deref: HashMap<DomainKey, Vec<VisualKey>>,
    /// Virtual nodes by their descriptive string, compared by value.
    by_virtual: HashMap<String, Vec<VisualKey>>,
}

impl VisualForest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, key: VisualKey) -> Option<&VisualNode> {
        self.nodes.get(key)
    }

    pub(crate) fn node_mut(&mut self, key: VisualKey) -> Option<&mut VisualNode> {
        self.nodes.get_mut(key)
    }

    pub fn roots(&self) -> &[VisualKey] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert `node` under `parent` (or as a root), at `index` within the
    /// child list if given, appended otherwise.
    pub(crate) fn attach(
        &mut self,
        parent: Option<VisualKey>,
        index: Option<usize>,
        mut node: VisualNode,
    ) -> VisualKey {
        // A dangling parent key degrades to a root attachment.
        let parent = parent.filter(|&p| self.nodes.contains_key(p));
        node.parent = parent;
        if parent.is_none() {
            node.is_top_level = true;
        }
        let identity = node.identity.clone();
        let deref = node.dereferenced_main_data_object();
        let key = self.nodes.insert(node);

        match identity {
            NodeIdentity::Real(main) => {
                self.by_main.entry(main).or_default().push(key);
                if let Some(deref) = deref {
                    self.by_deref.entry(deref).or_default().push(key);
                }
            }
            NodeIdentity::Virtual(name) => {
                self.by_virtual.entry(name).or_default().push(key);
            }
            NodeIdentity::Placeholder => {}
        }

        let list = match parent.and_then(|p| self.nodes.get_mut(p)) {
            Some(parent_node) => &mut parent_node.children,
            None => &mut self.roots,
        };
        let at = index.unwrap_or(list.len()).min(list.len());
        list.insert(at, key);
        key
    }

    /// Remove a node and its whole subtree from the forest.
    ///
    /// Returns `false` if the key is no longer present (e.g. already removed
    /// as part of another subtree during a collect-then-remove pass).
    pub(crate) fn detach(&mut self, key: VisualKey) -> bool {
        let Some(node) = self.nodes.get(key) else {
            return false;
        };
        match node.parent {
            Some(p) => {
                if let Some(parent_node) = self.nodes.get_mut(p) {
                    parent_node.children.retain(|&k| k != key);
                }
            }
            None => self.roots.retain(|&k| k != key),
        }
        self.remove_subtree(key);
        true
    }

    /// Move an existing child of `parent` to a new index in the child list.
    /// Clamped to the list length; other children keep their relative order.
    pub(crate) fn reposition_child(&mut self, parent: VisualKey, child: VisualKey, index: usize) {
        let Some(parent_node) = self.nodes.get_mut(parent) else {
            return;
        };
        let Some(pos) = parent_node.children.iter().position(|&k| k == child) else {
            return;
        };
        parent_node.children.remove(pos);
        let at = index.min(parent_node.children.len());
        parent_node.children.insert(at, child);
    }

    /// Move an existing root to a new index in the root list. Clamped to
    /// the list length; other roots keep their relative order.
    pub(crate) fn reposition_root(&mut self, child: VisualKey, index: usize) {
        let Some(pos) = self.roots.iter().position(|&k| k == child) else {
            return;
        };
        self.roots.remove(pos);
        let at = index.min(self.roots.len());
        self.roots.insert(at, child);
    }

    /// Remove all children subtrees of a node, keeping the node itself.
    pub(crate) fn clear_children(&mut self, key: VisualKey) {
        let children = match self.nodes.get_mut(key) {
            Some(node) => std::mem::take(&mut node.children),
            None => return,
        };
        for child in children {
            self.remove_subtree(child);
        }
    }

    fn remove_subtree(&mut self, key: VisualKey) {
        let Some(node) = self.nodes.remove(key) else {
            return;
        };
        self.unindex(key, &node);
        for child in node.children {
            self.remove_subtree(child);
        }
    }

    fn unindex(&mut self, key: VisualKey, node: &VisualNode) {
        match &node.identity {
            NodeIdentity::Real(main) => {
                if let Some(list) = self.by_main.get_mut(main) {
                    list.retain(|&k| k != key);
                }
                if let Some(deref) = node.dereferenced_main_data_object() {
                    if let Some(list) = self.by_deref.get_mut(&deref) {
                        list.retain(|&k| k != key);
                    }
                }
            }
            NodeIdentity::Virtual(name) => {
                if let Some(list) = self.by_virtual.get_mut(name) {
                    list.retain(|&k| k != key);
                }
            }
            NodeIdentity::Placeholder => {}
        }
    }

    // -------------------------------------------------------------------------
    // Identity lookup
    // -------------------------------------------------------------------------

    /// All nodes projecting `key`.
    ///
    /// With `also_dereference`, the comparison uses each node's dereferenced
    /// main data object (which defaults to the main one), so proxy nodes for
    /// references to `key` are found as well.
    pub fn find_all_on_main(&self, key: DomainKey, also_dereference: bool) -> Vec<VisualKey> {
        let map = if also_dereference {
            &self.by_deref
        } else {
            &self.by_main
        };
        map.get(&key).cloned().unwrap_or_default()
    }

    /// First node (in creation order) projecting `key`: nodes keyed on the
    /// object directly win over proxies that merely dereference to it.
    pub fn find_first_on_main(&self, key: DomainKey) -> Option<VisualKey> {
        self.by_main
            .get(&key)
            .and_then(|list| list.first().copied())
            .or_else(|| self.by_deref.get(&key).and_then(|list| list.first().copied()))
    }

    /// All virtual nodes with the given descriptive string.
    pub fn find_all_virtual(&self, name: &str) -> Vec<VisualKey> {
        self.by_virtual.get(name).cloned().unwrap_or_default()
    }

    /// Lazy, finite, restartable pre-order depth-first traversal of the
    /// whole forest. Each call returns an independent iterator, so
    /// concurrent traversals never share state.
    pub fn iter(&self) -> PreOrder<'_> {
        let mut stack: Vec<VisualKey> = self.roots.clone();
        stack.reverse();
        PreOrder {
            forest: self,
            stack,
        }
    }

    /// Pre-order traversal of one subtree.
    pub fn iter_from(&self, key: VisualKey) -> PreOrder<'_> {
        let stack = if self.nodes.contains_key(key) {
            vec![key]
        } else {
            Vec::new()
        };
        PreOrder {
            forest: self,
            stack,
        }
    }

    /// All nodes satisfying a predicate, in pre-order.
    pub fn find_all<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = VisualKey> + 'a
    where
        P: Fn(&VisualNode) -> bool + 'a,
    {
        self.iter()
            .filter(move |&key| self.nodes.get(key).is_some_and(|node| predicate(node)))
    }

    /// Number of edges between a node and its root.
    pub fn depth_of(&self, key: VisualKey) -> usize {
        let mut depth = 0;
        let mut current = key;
        while let Some(parent) = self.nodes.get(current).and_then(|n| n.parent) {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Whether `ancestor` lies on the parent chain of `key`.
    pub fn is_ancestor(&self, ancestor: VisualKey, key: VisualKey) -> bool {
        let mut current = key;
        while let Some(parent) = self.nodes.get(current).and_then(|n| n.parent) {
            if parent == ancestor {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Check the structural invariants. Test support.
    #[doc(hidden)]
    pub fn validate(&self) -> bool {
        for (key, node) in &self.nodes {
            for &child in &node.children {
                match self.nodes.get(child) {
                    Some(child_node) if child_node.parent == Some(key) => {}
                    _ => return false,
                }
            }
            if let Some(parent) = node.parent {
                match self.nodes.get(parent) {
                    Some(parent_node) if parent_node.children.contains(&key) => {}
                    _ => return false,
                }
            } else if !self.roots.contains(&key) {
                return false;
            }
        }
        true
    }
}

/// Pre-order depth-first iterator over forest node keys.
pub struct PreOrder<'a> {
    forest: &'a VisualForest,
    stack: Vec<VisualKey>,
}

impl Iterator for PreOrder<'_> {
    type Item = VisualKey;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.stack.pop()?;
        if let Some(node) = self.forest.nodes.get(key) {
            for &child in node.children.iter().rev() {
                self.stack.push(child);
            }
        }
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainStore;

    fn node(kind: NodeKind, identity: NodeIdentity, caption: &str) -> VisualNode {
        let mut n = VisualNode::new(kind, identity);
        n.caption = caption.to_string();
        n
    }

    #[test]
    fn test_attach_maintains_parent_invariant() {
        let mut forest = VisualForest::new();
        let root = forest.attach(
            None,
            None,
            node(NodeKind::Package, NodeIdentity::Virtual("Package".into()), "Package"),
        );
        let child = forest.attach(
            Some(root),
            None,
            node(NodeKind::ShellGroup, NodeIdentity::Virtual("Shells".into()), "Shells"),
        );

        assert_eq!(forest.node(child).unwrap().parent(), Some(root));
        assert_eq!(forest.node(root).unwrap().children(), &[child]);
        assert!(forest.node(root).unwrap().is_top_level());
        assert!(forest.validate());
    }

    #[test]
    fn test_attach_at_index() {
        let mut forest = VisualForest::new();
        let root = forest.attach(
            None,
            None,
            node(NodeKind::Package, NodeIdentity::Virtual("P".into()), "P"),
        );
        let a = forest.attach(
            Some(root),
            None,
            node(NodeKind::Unknown, NodeIdentity::Virtual("a".into()), "a"),
        );
        let b = forest.attach(
            Some(root),
            Some(0),
            node(NodeKind::Unknown, NodeIdentity::Virtual("b".into()), "b"),
        );
        assert_eq!(forest.node(root).unwrap().children(), &[b, a]);
    }

    #[test]
    fn test_identity_multimap_tracks_projections() {
        let mut store = DomainStore::new();
        let env = store.create_environment();
        let sm = store.add_submodel(env, "S", "urn:sm").unwrap();

        let mut forest = VisualForest::new();
        let plain = forest.attach(None, None, node(NodeKind::Submodel, NodeIdentity::Real(sm), "S"));
        // Proxy with a distinct main object would differ; here, same main with
        // an explicit dereference target.
        let mut proxy = node(NodeKind::SubmodelRef, NodeIdentity::Real(env), "ref S");
        proxy.dereferenced = Some(sm);
        let proxy = forest.attach(None, None, proxy);

        assert_eq!(forest.find_all_on_main(sm, false), vec![plain]);
        // Dereferenced lookup also reaches the proxy node.
        assert_eq!(forest.find_all_on_main(sm, true), vec![plain, proxy]);
        assert_eq!(forest.find_first_on_main(sm), Some(plain));

        assert!(forest.detach(plain));
        assert_eq!(forest.find_all_on_main(sm, true), vec![proxy]);
    }

    #[test]
    fn test_detach_removes_whole_subtree_from_index() {
        let mut store = DomainStore::new();
        let env = store.create_environment();
        let sm = store.add_submodel(env, "S", "urn:sm").unwrap();

        let mut forest = VisualForest::new();
        let root = forest.attach(None, None, node(NodeKind::Environment, NodeIdentity::Real(env), "Env"));
        let mid = forest.attach(Some(root), None, node(NodeKind::Submodel, NodeIdentity::Real(sm), "S"));
        let leaf = forest.attach(
            Some(mid),
            None,
            node(NodeKind::Placeholder, NodeIdentity::Placeholder, "..."),
        );

        assert!(forest.detach(mid));
        assert!(forest.node(mid).is_none());
        assert!(forest.node(leaf).is_none());
        assert!(forest.find_all_on_main(sm, false).is_empty());
        assert_eq!(forest.len(), 1);
        // Detaching again is a clean no-op.
        assert!(!forest.detach(mid));
        assert!(forest.validate());
    }

    #[test]
    fn test_preorder_iteration_is_deterministic_and_restartable() {
        let mut forest = VisualForest::new();
        let r = forest.attach(None, None, node(NodeKind::Package, NodeIdentity::Virtual("r".into()), "r"));
        let a = forest.attach(Some(r), None, node(NodeKind::Unknown, NodeIdentity::Virtual("a".into()), "a"));
        let b = forest.attach(Some(r), None, node(NodeKind::Unknown, NodeIdentity::Virtual("b".into()), "b"));
        let a1 = forest.attach(Some(a), None, node(NodeKind::Unknown, NodeIdentity::Virtual("a1".into()), "a1"));

        let first: Vec<_> = forest.iter().collect();
        assert_eq!(first, vec![r, a, a1, b]);

        // Independent iterators do not share state.
        let mut it1 = forest.iter();
        let it2 = forest.iter();
        it1.next();
        assert_eq!(it2.collect::<Vec<_>>(), first);
    }

    #[test]
    fn test_find_all_with_predicate() {
        let mut forest = VisualForest::new();
        let r = forest.attach(None, None, node(NodeKind::Package, NodeIdentity::Virtual("r".into()), "r"));
        forest.attach(Some(r), None, node(NodeKind::Shell, NodeIdentity::Virtual("s1".into()), "s1"));
        forest.attach(Some(r), None, node(NodeKind::Shell, NodeIdentity::Virtual("s2".into()), "s2"));

        let shells: Vec<_> = forest.find_all(|n| n.kind() == NodeKind::Shell).collect();
        assert_eq!(shells.len(), 2);
    }

    #[test]
    fn test_depth_and_ancestry() {
        let mut forest = VisualForest::new();
        let r = forest.attach(None, None, node(NodeKind::Package, NodeIdentity::Virtual("r".into()), "r"));
        let a = forest.attach(Some(r), None, node(NodeKind::Unknown, NodeIdentity::Virtual("a".into()), "a"));
        let b = forest.attach(Some(a), None, node(NodeKind::Unknown, NodeIdentity::Virtual("b".into()), "b"));

        assert_eq!(forest.depth_of(r), 0);
        assert_eq!(forest.depth_of(b), 2);
        assert!(forest.is_ancestor(r, b));
        assert!(!forest.is_ancestor(b, r));
    }
}
