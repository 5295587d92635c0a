//! Arbor View: a derived visual-tree synchronization engine.
//!
//! The crate keeps a navigable tree of visual nodes in sync with a mutable
//! hierarchical domain model (environments holding shells, submodels, typed
//! elements, concept descriptions and supplementary files). The tree is a
//! pure derivation: nodes project domain objects and hold presentation
//! state only. It supports full rebuilds, lazy subtree materialization and
//! incremental patching from change events, with an expand-state cache
//! that survives rebuilds.
//!
//! # Example
//!
//! ```
//! use arbor_view::domain::{DomainStore, Element};
//! use arbor_view::{BuildOptions, ChangeEvent, TreeSync};
//!
//! let mut store = DomainStore::new();
//! let env = store.create_environment();
//! let shell = store.add_shell(env, "Machine", "urn:shell:1").unwrap();
//! let (sm, _) = store
//!     .add_submodel_with_ref(env, shell, "Sensors", "urn:sm:1")
//!     .unwrap();
//!
//! let mut sync = TreeSync::new(BuildOptions::default());
//! sync.rebuild(&store, env).unwrap();
//!
//! // Mutate the domain, then patch the tree instead of rebuilding it.
//! let prop = store.add_element(sm, Element::property("Temperature", "21")).unwrap();
//! assert!(sync.apply(&store, &ChangeEvent::created(sm, prop)));
//! ```

pub mod domain;
pub mod error;
pub mod tree;

pub use arbor_view_core::{ConnectionId, EventQueue, Signal};
pub use error::{Result, TreeError};
pub use tree::builder::{BuildOptions, CdSortOrder, virtual_ids};
pub use tree::engine::TreeSync;
pub use tree::events::{ChangeEvent, ChangeReason};
pub use tree::expand::ExpandCache;
pub use tree::node::{NodeIdentity, NodeKind, VisualForest, VisualKey, VisualNode};
pub use tree::signals::TreeSignals;
