//! Natural-key index of a remote collection.
//!
//! The index is a shared immutable snapshot plus an explicit delta of
//! entities created during the current sync. Phases receive an index by
//! value and hand a new one on.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::types::{DuplicateKeyPolicy, RemoteEntity, RemoteRef};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteIndex {
    snapshot: Arc<BTreeMap<String, RemoteRef>>,
    created: BTreeMap<String, RemoteRef>,
}

impl RemoteIndex {
    /// Index a fetched snapshot by natural key.
    pub fn from_snapshot<R: RemoteEntity>(
        collection: &str,
        nodes: &[R],
        policy: DuplicateKeyPolicy,
    ) -> Result<Self> {
        let mut snapshot = BTreeMap::new();
        for node in nodes {
            let remote = RemoteRef::of(node);
            if let Some(previous) = snapshot.insert(remote.key.clone(), remote) {
                match policy {
                    DuplicateKeyPolicy::Reject => {
                        return Err(SyncError::DuplicateRemoteKey {
                            collection: collection.to_string(),
                            key: previous.key,
                        });
                    }
                    DuplicateKeyPolicy::LastWins => {
                        tracing::warn!(
                            collection,
                            key = %previous.key,
                            replaced = %previous.id,
                            "Duplicate remote key, keeping the last one"
                        );
                    }
                }
            }
        }

        Ok(Self {
            snapshot: Arc::new(snapshot),
            created: BTreeMap::new(),
        })
    }

    /// Return a new index that also knows about `refs`.
    #[must_use]
    pub fn with_created(mut self, refs: impl IntoIterator<Item = RemoteRef>) -> Self {
        for remote in refs {
            self.created.insert(remote.key.clone(), remote);
        }
        self
    }

    /// Look up a key, preferring entities created during this sync.
    pub fn get(&self, key: &str) -> Option<&RemoteRef> {
        self.created.get(key).or_else(|| self.snapshot.get(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Entities created during this sync, ordered by key.
    pub fn created(&self) -> impl Iterator<Item = &RemoteRef> {
        self.created.values()
    }

    /// Number of distinct keys known.
    pub fn len(&self) -> usize {
        self.snapshot.len()
            + self
                .created
                .keys()
                .filter(|k| !self.snapshot.contains_key(*k))
                .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::NaturalKey;

    struct Node(&'static str, &'static str);

    impl NaturalKey for Node {
        fn natural_key(&self) -> &str {
            self.1
        }
    }

    impl RemoteEntity for Node {
        fn remote_id(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn duplicate_keys_are_rejected_by_default() {
        let nodes = [Node("1", "A"), Node("2", "A")];
        let err = RemoteIndex::from_snapshot("dataSilos", &nodes, DuplicateKeyPolicy::Reject)
            .expect_err("should reject");
        assert!(matches!(err, SyncError::DuplicateRemoteKey { ref key, .. } if key == "A"));
    }

    #[test]
    fn last_wins_keeps_later_entity() {
        let nodes = [Node("1", "A"), Node("2", "A")];
        let index = RemoteIndex::from_snapshot("dataSilos", &nodes, DuplicateKeyPolicy::LastWins)
            .expect("index");
        assert_eq!(index.get("A").map(|r| r.id.as_str()), Some("2"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn with_created_leaves_original_snapshot_untouched() {
        let nodes = [Node("1", "A")];
        let before =
            RemoteIndex::from_snapshot("x", &nodes, DuplicateKeyPolicy::Reject).expect("index");
        let after = before.clone().with_created([RemoteRef::new("9", "B")]);

        assert!(!before.contains("B"));
        assert!(after.contains("A"));
        assert_eq!(after.get("B").map(|r| r.id.as_str()), Some("9"));
        assert_eq!(after.len(), 2);
        assert_eq!(after.created().count(), 1);
    }
}
