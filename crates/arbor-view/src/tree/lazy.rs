//! Deferred subtree materialization.
//!
//! A deferred node carries a single placeholder child so the presentation
//! layer still shows an expander. Realization swaps the placeholder for the
//! real children, synthesized by the same builder routines a full rebuild
//! uses. Realizing twice is a no-op; the placeholder is gone after the
//! first pass.

use tracing::debug;

use arbor_view_core::logging::targets;

use crate::domain::{DomainKey, DomainObject, DomainStore};
use crate::tree::builder::{BuildOptions, TreeBuilder};
use crate::tree::expand::ExpandCache;
use crate::tree::node::{NodeIdentity, NodeKind, VisualForest, VisualKey};

/// Replace a node's children with a single placeholder row.
pub(crate) fn install_placeholder(forest: &mut VisualForest, key: VisualKey) {
    forest.clear_children(key);
    let mut node = crate::tree::node::VisualNode::new(NodeKind::Placeholder, NodeIdentity::Placeholder);
    node.caption = "...".to_string();
    forest.attach(Some(key), None, node);
}

/// Whether a node's subtree is still deferred behind a placeholder.
pub(crate) fn is_lazy_pending(forest: &VisualForest, key: VisualKey) -> bool {
    forest
        .node(key)
        .and_then(|node| node.children().first())
        .and_then(|&child| forest.node(child))
        .is_some_and(|child| child.kind() == NodeKind::Placeholder)
}

/// Realize a deferred subtree in place.
///
/// Returns `true` if the node was pending and has been materialized,
/// `false` if there was nothing to do.
pub(crate) fn execute_lazy_loading(
    store: &DomainStore,
    cache: &ExpandCache,
    options: &BuildOptions,
    forest: &mut VisualForest,
    key: VisualKey,
    force_expanded: bool,
) -> bool {
    if !is_lazy_pending(forest, key) {
        return false;
    }
    let Some(node) = forest.node(key) else {
        return false;
    };
    let kind = node.kind();
    let subject = node.dereferenced_main_data_object();
    forest.clear_children(key);

    // Children of a realized node are always built eagerly; only their own
    // nested submodel nodes would defer again, and those cannot occur here.
    let eager = BuildOptions {
        lazy_first: false,
        ..options.clone()
    };
    let mut builder = TreeBuilder::new(store, cache, &eager);
    match kind {
        NodeKind::SubmodelRef | NodeKind::Submodel => {
            if let Some(sm) = subject {
                builder.populate_submodel_children(forest, key, sm);
            }
        }
        NodeKind::CdGroup => {
            if let Some(env) = environment_key(store, forest) {
                builder.populate_cd_listing(forest, key, env);
            }
        }
        NodeKind::FileGroup => {
            if let Some(env) = environment_key(store, forest) {
                builder.populate_file_listing(forest, key, env);
            }
        }
        _ => {}
    }

    if force_expanded {
        if let Some(node) = forest.node_mut(key) {
            node.expanded = true;
            node.touched = true;
        }
    }
    debug!(target: targets::LAZY, ?kind, force_expanded, "realized deferred subtree");
    true
}

/// The environment backing this forest: taken from the environment row if
/// present, otherwise from the store itself.
pub(crate) fn environment_key(store: &DomainStore, forest: &VisualForest) -> Option<DomainKey> {
    forest
        .find_all(|node| node.kind() == NodeKind::Environment)
        .next()
        .and_then(|key| forest.node(key))
        .and_then(|node| node.main_data_object())
        .or_else(|| {
            store
                .iter()
                .find(|(_, object)| matches!(object, DomainObject::Environment(_)))
                .map(|(key, _)| key)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Element;

    fn lazy_setup() -> (DomainStore, DomainKey, ExpandCache, BuildOptions, VisualForest) {
        let mut store = DomainStore::new();
        let env = store.create_environment();
        let shell = store.add_shell(env, "Machine", "urn:shell:1").unwrap();
        let (sm, _) = store
            .add_submodel_with_ref(env, shell, "Sensors", "urn:sm:1")
            .unwrap();
        store
            .add_element(sm, Element::property("Temperature", "21"))
            .unwrap();
        store.add_concept_description(env, Some("TempDef"), "urn:cd:1").unwrap();
        store.add_supplementary_file(env, "/docs/manual.pdf").unwrap();

        let cache = ExpandCache::new();
        let options = BuildOptions {
            lazy_first: true,
            ..BuildOptions::default()
        };
        let forest = TreeBuilder::new(&store, &cache, &options).build_forest(env);
        (store, env, cache, options, forest)
    }

    fn subtree_snapshot(forest: &VisualForest, root: VisualKey) -> Vec<(usize, String, String)> {
        let base = forest.depth_of(root);
        forest
            .iter_from(root)
            .skip(1)
            .map(|key| {
                let node = forest.node(key).unwrap();
                (
                    forest.depth_of(key) - base,
                    node.caption().to_string(),
                    node.info().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn test_realize_submodel_subtree() {
        let (store, env, cache, options, mut forest) = lazy_setup();
        let sm = store.environment(env).unwrap().submodels()[0];
        let node = forest.find_first_on_main(sm).unwrap();

        assert!(is_lazy_pending(&forest, node));
        assert!(execute_lazy_loading(&store, &cache, &options, &mut forest, node, true));
        assert!(!is_lazy_pending(&forest, node));
        assert!(forest.node(node).unwrap().is_expanded());

        // The realized subtree is what eager construction produces for the
        // same store.
        let eager_options = BuildOptions {
            lazy_first: false,
            ..options.clone()
        };
        let eager = TreeBuilder::new(&store, &cache, &eager_options).build_forest(env);
        let eager_node = eager.find_first_on_main(sm).unwrap();
        let realized = subtree_snapshot(&forest, node);
        assert!(!realized.is_empty());
        assert_eq!(realized, subtree_snapshot(&eager, eager_node));
        assert!(forest.validate());
    }

    #[test]
    fn test_realize_is_idempotent() {
        let (store, env, cache, options, mut forest) = lazy_setup();
        let sm = store.environment(env).unwrap().submodels()[0];
        let node = forest.find_first_on_main(sm).unwrap();

        assert!(execute_lazy_loading(&store, &cache, &options, &mut forest, node, false));
        let after_first = forest.node(node).unwrap().children().to_vec();

        assert!(!execute_lazy_loading(&store, &cache, &options, &mut forest, node, false));
        assert_eq!(forest.node(node).unwrap().children(), &after_first);
    }

    #[test]
    fn test_realize_listings() {
        let (store, _env, cache, options, mut forest) = lazy_setup();
        let cd_group = forest.find_all_virtual("ConceptDescriptions")[0];
        let file_group = forest.find_all_virtual("SupplementaryFiles")[0];

        assert!(execute_lazy_loading(&store, &cache, &options, &mut forest, cd_group, false));
        assert!(execute_lazy_loading(&store, &cache, &options, &mut forest, file_group, false));

        let cd_captions: Vec<&str> = forest
            .node(cd_group)
            .unwrap()
            .children()
            .iter()
            .map(|&k| forest.node(k).unwrap().caption())
            .collect();
        assert_eq!(cd_captions, vec!["TempDef"]);

        let file_captions: Vec<&str> = forest
            .node(file_group)
            .unwrap()
            .children()
            .iter()
            .map(|&k| forest.node(k).unwrap().caption())
            .collect();
        assert_eq!(file_captions, vec!["manual.pdf"]);
    }

    #[test]
    fn test_eager_nodes_are_never_pending() {
        let (store, env, cache, _lazy_options, _) = lazy_setup();
        let options = BuildOptions::default();
        let mut forest = TreeBuilder::new(&store, &cache, &options).build_forest(env);

        let sm = store.environment(env).unwrap().submodels()[0];
        let node = forest.find_first_on_main(sm).unwrap();
        assert!(!is_lazy_pending(&forest, node));
        assert!(!execute_lazy_loading(&store, &cache, &options, &mut forest, node, true));
    }
}
