//! In-memory index of which namespaces share a cluster-wide quota.
//!
//! Each key is an enforcement root: the topmost namespace of a hierarchy that
//! enforces through a ClusterResourceQuota. Its value lists every descendant
//! aggregated by that quota. The index is rebuilt from the store at start and
//! is never persisted.

mod rebuild;

pub use rebuild::rebuild;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForestError {
    #[error("enforcement root '{0}' is not in the namespace index")]
    UnknownKey(String),
}

#[derive(Default)]
struct ForestInner {
    /// enforcement root → descendants sharing its quota
    trees: HashMap<String, Vec<String>>,
    /// member → the namespace it was added under
    parents: HashMap<String, String>,
}

impl ForestInner {
    fn key_of(&self, ns: &str) -> Option<&str> {
        if self.trees.contains_key(ns) {
            return self.trees.get_key_value(ns).map(|(k, _)| k.as_str());
        }
        self.trees
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == ns))
            .map(|(k, _)| k.as_str())
    }

    fn insert(&mut self, ns: &str, parent: &str) {
        let key = if parent.is_empty() {
            ns.to_string()
        } else {
            self.key_of(parent).unwrap_or(parent).to_string()
        };
        if !parent.is_empty() && key == ns {
            return;
        }
        // a namespace lives under one key only
        for (k, members) in self.trees.iter_mut() {
            if *k != key {
                members.retain(|m| m != ns);
            }
        }
        if key == ns {
            self.parents.remove(ns);
            self.trees.entry(key).or_default();
            return;
        }
        // a former key folds its members into the new one
        let absorbed = self.trees.remove(ns).unwrap_or_default();
        let members = self.trees.entry(key).or_default();
        for m in std::iter::once(ns.to_string()).chain(absorbed) {
            if !members.contains(&m) {
                members.push(m);
            }
        }
        self.parents.insert(ns.to_string(), parent.to_string());
    }

    /// `ns` plus every member recorded below it.
    fn subtree(&self, ns: &str) -> Vec<String> {
        let mut out = vec![ns.to_string()];
        let mut seen: HashSet<String> = HashSet::from([ns.to_string()]);
        let mut work = VecDeque::from([ns.to_string()]);
        while let Some(current) = work.pop_front() {
            for (child, parent) in &self.parents {
                if *parent == current && seen.insert(child.clone()) {
                    out.push(child.clone());
                    work.push_back(child.clone());
                }
            }
        }
        out
    }
}

/// Lock-guarded forest of enforcement roots. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct NamespaceForest {
    inner: RwLock<ForestInner>,
}

impl NamespaceForest {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ForestInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ForestInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Enforcement root of `ns`, or an empty string when it is not indexed.
    pub fn key(&self, ns: &str) -> String {
        self.read().key_of(ns).unwrap_or_default().to_string()
    }

    /// Number of namespaces sharing `key`'s quota, the key excluded.
    pub fn key_count(&self, key: &str) -> usize {
        self.read().trees.get(key).map(Vec::len).unwrap_or(0)
    }

    /// Index `ns` below `parent`.
    ///
    /// With an empty `parent`, `ns` becomes an enforcement root of its own.
    /// When `parent` is not indexed yet it becomes the key.
    pub fn add_ns(&self, ns: &str, parent: &str) {
        debug!("forest: add {} under {:?}", ns, parent);
        self.write().insert(ns, parent);
    }

    /// Drop `ns` from `key`. Removing the key itself drops the whole entry.
    pub fn remove_ns(&self, ns: &str, key: &str) -> Result<(), ForestError> {
        let mut inner = self.write();
        if !inner.trees.contains_key(key) {
            return Err(ForestError::UnknownKey(key.to_string()));
        }
        if ns == key {
            if let Some(members) = inner.trees.remove(key) {
                for m in members {
                    inner.parents.remove(&m);
                }
            }
            return Ok(());
        }
        if let Some(members) = inner.trees.get_mut(key) {
            members.retain(|m| m != ns);
        }
        inner.parents.remove(ns);
        Ok(())
    }

    /// Forget `key` and all of its members.
    pub fn delete_key(&self, key: &str) {
        let mut inner = self.write();
        if let Some(members) = inner.trees.remove(key) {
            for m in members {
                inner.parents.remove(&m);
            }
        }
    }

    /// Move `ns` and its descendants under the key implied by `new_parent`.
    ///
    /// An empty `new_parent` re-roots the subtree: `ns` becomes a key whose
    /// members are its own descendants.
    pub fn migrate_hierarchy(&self, ns: &str, new_parent: &str) {
        let mut inner = self.write();
        let subtree = inner.subtree(ns);
        // (member, parent) pairs below ns, in discovery order
        let below: Vec<(String, String)> = subtree
            .iter()
            .skip(1)
            .filter_map(|m| inner.parents.get(m).map(|p| (m.clone(), p.clone())))
            .collect();

        let own_members = inner.trees.remove(ns).unwrap_or_default();
        for members in inner.trees.values_mut() {
            members.retain(|m| !subtree.contains(m));
        }
        for m in subtree.iter().chain(own_members.iter()) {
            inner.parents.remove(m);
        }

        inner.insert(ns, new_parent);
        for (member, parent) in below {
            inner.insert(&member, &parent);
        }
        // members recorded under the old key without a parent link stay with ns
        for m in own_members {
            if !inner.parents.contains_key(&m) {
                inner.insert(&m, ns);
            }
        }
        debug!("forest: migrated {} under {:?}", ns, new_parent);
    }

    /// Replace the whole index with `(ns, parent)` pairs, parents first.
    pub fn load(&self, entries: &[(String, String)]) {
        let mut inner = self.write();
        *inner = ForestInner::default();
        for (ns, parent) in entries {
            inner.insert(ns, parent);
        }
    }

    /// Snapshot of every key and its members, sorted. Used for logging and tests.
    pub fn snapshot(&self) -> Vec<(String, Vec<String>)> {
        let inner = self.read();
        let mut out: Vec<(String, Vec<String>)> = inner
            .trees
            .iter()
            .map(|(k, v)| {
                let mut v = v.clone();
                v.sort();
                (k.clone(), v)
            })
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// root(a) ── b ── c
    ///          └─ d
    fn sample() -> NamespaceForest {
        let f = NamespaceForest::new();
        f.add_ns("a", "");
        f.add_ns("b", "a");
        f.add_ns("c", "b");
        f.add_ns("d", "a");
        f
    }

    #[test]
    fn key_resolves_members_and_the_key_itself() {
        let f = sample();
        assert_eq!(f.key("a"), "a");
        assert_eq!(f.key("c"), "a");
        assert_eq!(f.key("zzz"), "");
        assert_eq!(f.key_count("a"), 3);
        assert_eq!(f.key_count("zzz"), 0);
    }

    #[test]
    fn add_under_unindexed_parent_makes_it_a_key() {
        let f = NamespaceForest::new();
        f.add_ns("x", "p");
        assert_eq!(f.key("x"), "p");
        assert_eq!(f.key("p"), "p");
        f.add_ns("x", "p");
        assert_eq!(f.key_count("p"), 1);
    }

    #[test]
    fn late_parent_absorbs_its_provisional_key() {
        let f = NamespaceForest::new();
        f.add_ns("a", "");
        // grandchild reconciled before its parent was indexed
        f.add_ns("c", "b");
        assert_eq!(f.key("c"), "b");
        f.add_ns("b", "a");
        assert_eq!(f.key("b"), "a");
        assert_eq!(f.key("c"), "a");
        assert_eq!(f.snapshot().len(), 1);
    }

    #[test]
    fn key_is_never_its_own_member() {
        let f = NamespaceForest::new();
        f.add_ns("a", "");
        f.add_ns("a", "a");
        assert_eq!(f.key_count("a"), 0);
    }

    #[test]
    fn remove_from_unknown_key_is_an_error() {
        let f = sample();
        assert_eq!(
            f.remove_ns("c", "nope"),
            Err(ForestError::UnknownKey("nope".to_string()))
        );
        f.remove_ns("c", "a").unwrap();
        assert_eq!(f.key("c"), "");
        assert_eq!(f.key_count("a"), 2);
    }

    #[test]
    fn removing_the_key_drops_the_entry() {
        let f = sample();
        f.remove_ns("a", "a").unwrap();
        assert_eq!(f.key("b"), "");
        assert!(f.snapshot().is_empty());
    }

    #[test]
    fn delete_key_forgets_members() {
        let f = sample();
        f.delete_key("a");
        assert_eq!(f.key("d"), "");
        f.delete_key("a");
    }

    #[test]
    fn migrate_moves_subtree_to_new_key() {
        let f = sample();
        f.add_ns("e", "");
        f.migrate_hierarchy("b", "e");

        assert_eq!(f.key("b"), f.key("e"));
        assert_eq!(f.key("c"), "e");
        let snap = f.snapshot();
        assert_eq!(
            snap,
            vec![
                ("a".to_string(), vec!["d".to_string()]),
                ("e".to_string(), vec!["b".to_string(), "c".to_string()]),
            ]
        );
    }

    #[test]
    fn migrate_with_empty_parent_reroots_subtree() {
        let f = sample();
        f.migrate_hierarchy("b", "");
        assert_eq!(f.key("b"), "b");
        assert_eq!(f.key("c"), "b");
        assert_eq!(f.key_count("a"), 1);
    }

    #[test]
    fn migrate_a_key_keeps_its_members_together() {
        let f = sample();
        f.add_ns("e", "");
        f.add_ns("g", "e");
        f.migrate_hierarchy("a", "g");
        assert_eq!(f.key("a"), "e");
        assert_eq!(f.key("c"), "e");
        assert_eq!(f.key("d"), "e");
        assert_eq!(f.key_count("e"), 5);
    }

    #[test]
    fn every_member_resolves_to_a_key_it_belongs_to() {
        let f = sample();
        f.add_ns("e", "");
        f.migrate_hierarchy("b", "e");
        for (key, members) in f.snapshot() {
            assert_eq!(f.key(&key), key);
            for m in members {
                assert_eq!(f.key(&m), key);
                assert_ne!(m, key);
            }
        }
    }
}
