//! The concurrent tree.
//!
//! Every operation runs as a sequence of attempts. An attempt pins an epoch, takes an optimistic
//! read of the tree-level lock, and walks down with lock coupling. Any failed validation or upgrade
//! abandons the attempt and a fresh one starts from the root.

use std::ops::{Bound, RangeBounds};
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use parking_lot_core::SpinWait;

use crate::iter::Iter;
use crate::node::{Node, NodeKind, Parent, split_leaf, split_point, take_leaf};
use crate::tracing_helpers::{debug_log, trace_log};
use crate::utils::optimistic_lock::{LockError, OptimisticLock};
use crate::utils::sync::{AtomicI64, yield_now};

/// A concurrent ordered map from byte strings to values.
///
/// Readers never take locks: they read node versions, read the node, and validate. Writers lock
/// only the one or two nodes they modify. Memory unlinked from the tree is handed to
/// `crossbeam-epoch` and freed once no thread can still be reading it.
///
/// Values are returned by clone, so `V` is typically small or cheaply clonable (`Arc`, integers).
///
/// Keys are read with a trailing-zero sentinel: two keys that differ only by trailing `0x00`
/// bytes cannot both be stored, and inserting the second one panics.
///
/// ```rust
/// use olcart::Tree;
///
/// let tree = Tree::new();
/// assert!(!tree.insert("apple", 1));
/// assert!(!tree.insert("application", 2));
/// assert!(tree.insert("apple", 3));
///
/// assert_eq!(tree.search("apple"), Some(3));
/// assert_eq!(tree.search("app"), None);
///
/// let keys: Vec<_> = tree.iter().map(|(k, _)| k).collect();
/// assert_eq!(keys, vec![b"apple".to_vec(), b"application".to_vec()]);
///
/// assert_eq!(tree.remove("apple"), Some(3));
/// assert_eq!(tree.len(), 1);
/// ```
pub struct Tree<V> {
    // Guards `root`, which has no inner node above it.
    lock: OptimisticLock,
    root: Atomic<Node<V>>,
    // Advisory; concurrent operations may make it momentarily stale.
    size: AtomicI64,
}

impl<V> Default for Tree<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pause between restarts of an operation.
#[inline]
pub(crate) fn backoff(spin: &mut SpinWait) {
    if cfg!(feature = "shuttle") || !spin.spin() {
        yield_now();
    }
}

impl<V> Tree<V> {
    pub fn new() -> Self {
        debug_log!("new tree");
        Self {
            lock: OptimisticLock::new(),
            root: Atomic::null(),
            size: AtomicI64::new(0),
        }
    }

    /// Number of keys, as tracked by completed inserts and removes.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        self.root.load(Ordering::Acquire, guard).is_null()
    }

    /// The kind of the root node, `None` for an empty tree.
    pub fn root_kind(&self) -> Option<NodeKind> {
        let guard = &epoch::pin();
        let root = self.root.load(Ordering::Acquire, guard);
        unsafe { root.as_ref() }.map(|node| node.kind(guard))
    }

    pub(crate) fn lock(&self) -> &OptimisticLock {
        &self.lock
    }

    pub(crate) fn root<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<V>> {
        self.root.load(Ordering::Acquire, guard)
    }
}

impl<V> Tree<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Insert or update `key`. Returns `true` if the key was already present and its value was
    /// replaced.
    ///
    /// # Panics
    /// If `key` and a stored key differ only by trailing zero bytes.
    pub fn insert<K: AsRef<[u8]>>(&self, key: K, value: V) -> bool {
        let key = key.as_ref();
        let mut leaf = Some(Owned::new(Node::new_leaf(key, value)));
        let mut spin = SpinWait::new();
        loop {
            let guard = &epoch::pin();
            match self.insert_attempt(key, &mut leaf, guard) {
                Ok(updated) => {
                    if !updated {
                        self.size.fetch_add(1, Ordering::Relaxed);
                    }
                    return updated;
                }
                Err(_e) => {
                    trace_log!(error = %_e, "insert restart");
                    backoff(&mut spin);
                }
            }
        }
    }

    fn insert_attempt<'g>(
        &'g self,
        key: &[u8],
        leaf: &mut Option<Owned<Node<V>>>,
        guard: &'g Guard,
    ) -> Result<bool, LockError> {
        let version = self.lock.read()?;
        let root = self.root.load(Ordering::Acquire, guard);
        let Some(node) = (unsafe { root.as_ref() }) else {
            let _tree_lock = self.lock.write_with(version)?;
            self.root.store(take_leaf(leaf, guard), Ordering::Release);
            return Ok(false);
        };

        match node {
            Node::Leaf(existing) if existing.matches(key) => {
                let _tree_lock = self.lock.write_with(version)?;
                let old = self
                    .root
                    .swap(take_leaf(leaf, guard), Ordering::AcqRel, guard);
                unsafe { guard.defer_destroy(old) };
                Ok(true)
            }
            Node::Leaf(existing) => {
                let common = split_point(&existing.key, key, 0);
                let _tree_lock = self.lock.write_with(version)?;
                let split = split_leaf(
                    root,
                    &existing.key,
                    take_leaf(leaf, guard),
                    key,
                    0,
                    common,
                    guard,
                );
                self.root.store(split, Ordering::Release);
                Ok(false)
            }
            Node::Inner(inner) => inner.insert(
                root,
                Parent {
                    lock: &self.lock,
                    version,
                    slot: &self.root,
                },
                key,
                leaf,
                0,
                guard,
            ),
        }
    }

    /// A copy of the value stored under `key`.
    pub fn search<K: AsRef<[u8]>>(&self, key: K) -> Option<V> {
        let key = key.as_ref();
        let mut spin = SpinWait::new();
        loop {
            let guard = &epoch::pin();
            match self.search_attempt(key, guard) {
                Ok(found) => return found,
                Err(_e) => {
                    trace_log!(error = %_e, "search restart");
                    backoff(&mut spin);
                }
            }
        }
    }

    fn search_attempt(&self, key: &[u8], guard: &Guard) -> Result<Option<V>, LockError> {
        let version = self.lock.read()?;
        let root = self.root.load(Ordering::Acquire, guard);
        match unsafe { root.as_ref() } {
            None => {
                self.lock.check_version(version)?;
                Ok(None)
            }
            Some(node) => Node::search(node, &self.lock, version, key, guard),
        }
    }

    /// Remove `key`, returning its value if it was present.
    pub fn remove<K: AsRef<[u8]>>(&self, key: K) -> Option<V> {
        let key = key.as_ref();
        let mut spin = SpinWait::new();
        loop {
            let guard = &epoch::pin();
            match self.remove_attempt(key, guard) {
                Ok(removed) => {
                    if removed.is_some() {
                        self.size.fetch_sub(1, Ordering::Relaxed);
                    }
                    return removed;
                }
                Err(_e) => {
                    trace_log!(error = %_e, "remove restart");
                    backoff(&mut spin);
                }
            }
        }
    }

    fn remove_attempt<'g>(&'g self, key: &[u8], guard: &'g Guard) -> Result<Option<V>, LockError> {
        let version = self.lock.read()?;
        let root = self.root.load(Ordering::Acquire, guard);
        let Some(node) = (unsafe { root.as_ref() }) else {
            self.lock.check_version(version)?;
            return Ok(None);
        };

        match node {
            Node::Leaf(leaf) => {
                if !leaf.matches(key) {
                    self.lock.check_version(version)?;
                    return Ok(None);
                }
                let _tree_lock = self.lock.write_with(version)?;
                self.root.store(Shared::null(), Ordering::Release);
                let value = leaf.value.clone();
                unsafe { guard.defer_destroy(root) };
                Ok(Some(value))
            }
            Node::Inner(inner) => inner.remove(
                root,
                Parent {
                    lock: &self.lock,
                    version,
                    slot: &self.root,
                },
                key,
                0,
                guard,
            ),
        }
    }

    /// All entries in ascending key order.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter::new(self, Bound::Unbounded, Bound::Unbounded)
    }

    /// Entries with keys in `(start, end]`, ascending.
    pub fn iterator<S: AsRef<[u8]>, E: AsRef<[u8]>>(&self, start: S, end: E) -> Iter<'_, V> {
        Iter::new(
            self,
            Bound::Excluded(start.as_ref().to_vec()),
            Bound::Included(end.as_ref().to_vec()),
        )
    }

    /// Entries with keys in `range`, ascending.
    pub fn range<K, R>(&self, range: R) -> Iter<'_, V>
    where
        K: AsRef<[u8]>,
        R: RangeBounds<K>,
    {
        Iter::new(
            self,
            range.start_bound().map(|k| k.as_ref().to_vec()),
            range.end_bound().map(|k| k.as_ref().to_vec()),
        )
    }

    /// The entry with the smallest key.
    pub fn first(&self) -> Option<(Vec<u8>, V)> {
        self.iter().next()
    }

    /// The entry with the largest key.
    pub fn last(&self) -> Option<(Vec<u8>, V)> {
        self.iter().next_back()
    }
}

impl<V> Drop for Tree<V> {
    fn drop(&mut self) {
        // We have `&mut self`, so no other thread is inside the tree. Anything already retired
        // was unlinked first and is owned by the collector, not reachable from here.
        let guard = unsafe { epoch::unprotected() };
        let root = self.root.swap(Shared::null(), Ordering::Relaxed, guard);
        if !root.is_null() {
            unsafe { Node::destroy(root, guard) };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rand::Rng;

    use crate::node::NodeKind;
    use crate::tree::Tree;

    #[test]
    fn test_root_transitions() {
        let tree = Tree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.root_kind(), None);

        assert!(!tree.insert("only", 1));
        assert_eq!(tree.root_kind(), Some(NodeKind::Leaf));
        assert!(tree.insert("only", 2));
        assert_eq!(tree.search("only"), Some(2));
        assert_eq!(tree.len(), 1);

        assert!(!tree.insert("other", 3));
        assert_eq!(tree.root_kind(), Some(NodeKind::Node4));

        assert_eq!(tree.remove("only"), Some(2));
        // The Node4 collapsed back into the remaining leaf.
        assert_eq!(tree.root_kind(), Some(NodeKind::Leaf));
        assert_eq!(tree.remove("other"), Some(3));
        assert_eq!(tree.root_kind(), None);
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.remove("other"), None);
    }

    #[test]
    fn test_prefix_keys() {
        let tree = Tree::new();
        tree.insert([1u8], 1);
        tree.insert([1u8, 1], 2);
        tree.insert([1u8, 1, 1], 3);
        assert_eq!(tree.search([1u8]), Some(1));
        assert_eq!(tree.search([1u8, 1]), Some(2));
        assert_eq!(tree.search([1u8, 1, 1]), Some(3));
        assert_eq!(tree.search([1u8, 1, 1, 1]), None);
        assert_eq!(tree.search(b""), None);

        assert_eq!(tree.remove([1u8, 1]), Some(2));
        assert_eq!(tree.search([1u8]), Some(1));
        assert_eq!(tree.search([1u8, 1, 1]), Some(3));
    }

    #[test]
    fn test_split_compressed_path() {
        let tree = Tree::new();
        tree.insert("romane", 1);
        tree.insert("romanus", 2);
        tree.insert("romulus", 3);
        tree.insert("rubens", 4);
        tree.insert("ruber", 5);
        tree.insert("rubicon", 6);
        tree.insert("rubicundus", 7);
        for (i, k) in [
            "romane",
            "romanus",
            "romulus",
            "rubens",
            "ruber",
            "rubicon",
            "rubicundus",
        ]
        .iter()
        .enumerate()
        {
            assert_eq!(tree.search(k), Some(i + 1), "{k}");
        }
        assert_eq!(tree.search("rom"), None);
        assert_eq!(tree.search("rubic"), None);
        assert_eq!(tree.search("romanesque"), None);
    }

    #[test]
    fn test_long_shared_prefix() {
        let tree = Tree::new();
        let shared = "this a very long sharedKey::";
        let keys: Vec<String> = (0..300).map(|i| format!("{shared}{i}")).collect();
        for (i, k) in keys.iter().enumerate() {
            assert!(!tree.insert(k, i));
        }
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(tree.search(k), Some(i));
        }
        // Diverges from the shared path past the inline bytes.
        assert_eq!(tree.search("this a very long sharedKey;;0"), None);
        assert_eq!(tree.search("this a very long sharedKez::0"), None);

        // Splitting the long path beyond the inline bytes.
        assert!(!tree.insert("this a very long sharedKez", 1000));
        assert!(!tree.insert("this a very long", 1001));
        assert_eq!(tree.search("this a very long sharedKez"), Some(1000));
        assert_eq!(tree.search("this a very long"), Some(1001));
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(tree.search(k), Some(i));
        }

        for (i, k) in keys.iter().enumerate() {
            assert_eq!(tree.remove(k), Some(i));
        }
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.search("this a very long sharedKez"), Some(1000));
        assert_eq!(tree.search("this a very long"), Some(1001));
    }

    #[test]
    fn test_random_against_btree() {
        let tree = Tree::new();
        let mut model = BTreeMap::new();
        let mut rng = rand::rng();
        for _ in 0..20_000 {
            let len = rng.random_range(1..6);
            let key: Vec<u8> = (0..len).map(|_| rng.random_range(1..8u8)).collect();
            let value: u32 = rng.random();
            if rng.random_bool(0.7) {
                assert_eq!(
                    tree.insert(&key, value),
                    model.insert(key.clone(), value).is_some()
                );
            } else {
                assert_eq!(tree.remove(&key), model.remove(&key));
            }
        }
        assert_eq!(tree.len(), model.len());
        for (k, v) in &model {
            assert_eq!(tree.search(k), Some(*v));
        }
        let all: Vec<(Vec<u8>, u32)> = tree.iter().collect();
        let expected: Vec<(Vec<u8>, u32)> = model.into_iter().collect();
        assert_eq!(all, expected);
    }

    #[test]
    #[should_panic(expected = "trailing zero")]
    fn test_trailing_zero_keys_rejected() {
        let tree = Tree::new();
        tree.insert([5u8, 0], 1);
        tree.insert([5u8, 0, 0], 2);
    }
}
