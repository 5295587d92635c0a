//! Expand-state cache.
//!
//! User expand/collapse choices are keyed purely by domain-object identity
//! (or by a virtual node's descriptive string), not by visual node, so they
//! survive full and partial rebuilds of the forest. Entries live for the
//! whole session and are never pruned on domain-object deletion; a stale
//! entry for an identity no longer present is simply never consulted again.
//! Domain keys are versioned, so a reused slot cannot collide with a stale
//! entry.

use std::collections::HashMap;

use crate::domain::DomainKey;
use crate::tree::node::NodeIdentity;

/// Cache key: a real identity or a virtual descriptive string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Real(DomainKey),
    Virtual(String),
}

impl CacheKey {
    fn from_identity(identity: &NodeIdentity) -> Option<Self> {
        match identity {
            NodeIdentity::Real(key) => Some(Self::Real(*key)),
            NodeIdentity::Virtual(name) => Some(Self::Virtual(name.clone())),
            // Placeholders carry no identity and are never cached.
            NodeIdentity::Placeholder => None,
        }
    }
}

/// Session-lifetime map from node identity to last-known expanded flag.
#[derive(Debug, Default, Clone)]
pub struct ExpandCache {
    entries: HashMap<CacheKey, bool>,
}

impl ExpandCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-known expanded state for an identity, if one was ever recorded.
    pub fn lookup(&self, identity: &NodeIdentity) -> Option<bool> {
        let key = CacheKey::from_identity(identity)?;
        self.entries.get(&key).copied()
    }

    /// Record an explicit expanded change.
    pub fn record(&mut self, identity: &NodeIdentity, expanded: bool) {
        if let Some(key) = CacheKey::from_identity(identity) {
            self.entries.insert(key, expanded);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything. The escape hatch for a truly fresh view.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainStore;

    #[test]
    fn test_record_and_lookup_real_identity() {
        let mut store = DomainStore::new();
        let env = store.create_environment();
        let sm = store.add_submodel(env, "S", "urn:sm").unwrap();

        let mut cache = ExpandCache::new();
        let identity = NodeIdentity::Real(sm);

        assert_eq!(cache.lookup(&identity), None);
        cache.record(&identity, true);
        assert_eq!(cache.lookup(&identity), Some(true));
        cache.record(&identity, false);
        assert_eq!(cache.lookup(&identity), Some(false));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_virtual_identities_compare_by_value() {
        let mut cache = ExpandCache::new();
        cache.record(&NodeIdentity::Virtual("AllSubmodels".into()), true);

        // A freshly constructed identity with the same string finds the entry.
        assert_eq!(
            cache.lookup(&NodeIdentity::Virtual("AllSubmodels".into())),
            Some(true)
        );
        assert_eq!(cache.lookup(&NodeIdentity::Virtual("Shells".into())), None);
    }

    #[test]
    fn test_placeholders_are_never_cached() {
        let mut cache = ExpandCache::new();
        cache.record(&NodeIdentity::Placeholder, true);
        assert!(cache.is_empty());
        assert_eq!(cache.lookup(&NodeIdentity::Placeholder), None);
    }

    #[test]
    fn test_entries_survive_domain_deletion() {
        let mut store = DomainStore::new();
        let env = store.create_environment();
        let cd = store.add_concept_description(env, None, "urn:cd").unwrap();

        let mut cache = ExpandCache::new();
        cache.record(&NodeIdentity::Real(cd), true);
        store.remove_concept_description(cd);

        // Stale but harmless; the identity can simply never be rebuilt.
        assert_eq!(cache.lookup(&NodeIdentity::Real(cd)), Some(true));
    }
}
