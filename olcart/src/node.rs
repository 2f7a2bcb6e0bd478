use std::fmt::{Display, Formatter};
use std::sync::atomic::Ordering;

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};

use crate::keys::KeyTrait;
use crate::mapping::Inode;
use crate::prefix::{MAX_PREFIX_LEN, Prefix};
use crate::tracing_helpers::{debug_log, trace_log};
use crate::utils::optimistic_lock::{LockError, OptimisticLock};

/// The shape of a node, as reported by `Tree::root_kind` and the stats walk.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Leaf,
    Node4,
    Node16,
    Node48,
    Node256,
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Leaf => write!(f, "Leaf"),
            NodeKind::Node4 => write!(f, "Node4"),
            NodeKind::Node16 => write!(f, "Node16"),
            NodeKind::Node48 => write!(f, "Node48"),
            NodeKind::Node256 => write!(f, "Node256"),
        }
    }
}

pub(crate) enum Node<V> {
    Leaf(Leaf<V>),
    Inner(Inner<V>),
}

/// A stored key and its value. Never modified once published; an update publishes a new leaf.
pub(crate) struct Leaf<V> {
    pub(crate) key: Box<[u8]>,
    pub(crate) value: V,
}

/// An inner node: a compressed path followed by a fan-out on the next key byte.
/// `lock` versions both the path and the `inode` pointer. Growing or shrinking swaps `inode` for a
/// new layout, so a reader must always load it through the version it validates.
pub(crate) struct Inner<V> {
    pub(crate) lock: OptimisticLock,
    pub(crate) prefix: Prefix,
    inode: Atomic<Inode<Node<V>>>,
}

/// Where a node hangs: the lock and version of the node owning the slot, and the slot itself.
/// The slot is only written while holding that lock, upgraded from `version`.
pub(crate) struct Parent<'g, V> {
    pub(crate) lock: &'g OptimisticLock,
    pub(crate) version: u64,
    pub(crate) slot: &'g Atomic<Node<V>>,
}

impl<V> Parent<'_, V> {
    #[inline]
    fn check(&self) -> Result<(), LockError> {
        self.lock.check_version(self.version)
    }
}

impl<V> Leaf<V> {
    #[inline]
    pub(crate) fn matches(&self, key: &[u8]) -> bool {
        &*self.key == key
    }
}

impl<V> Node<V> {
    pub(crate) fn new_leaf(key: &[u8], value: V) -> Self {
        Node::Leaf(Leaf {
            key: key.into(),
            value,
        })
    }

    pub(crate) fn kind(&self, guard: &Guard) -> NodeKind {
        match self {
            Node::Leaf(_) => NodeKind::Leaf,
            Node::Inner(inner) => inner.inode(guard).kind(),
        }
    }

    /// The smallest leaf below this node. Not validated: the caller checks the version of
    /// whatever node it reached this one through.
    pub(crate) fn leftmost<'g>(&'g self, guard: &'g Guard) -> Result<&'g Leaf<V>, LockError> {
        let mut node = self;
        loop {
            match node {
                Node::Leaf(leaf) => return Ok(leaf),
                Node::Inner(inner) => {
                    let (_, child) = inner
                        .inode(guard)
                        .next_child(None, guard)
                        .ok_or(LockError::Retry)?;
                    node = unsafe { child.deref() };
                }
            }
        }
    }

    /// The largest leaf below this node. Not validated, like `leftmost`.
    pub(crate) fn rightmost<'g>(&'g self, guard: &'g Guard) -> Result<&'g Leaf<V>, LockError> {
        let mut node = self;
        loop {
            match node {
                Node::Leaf(leaf) => return Ok(leaf),
                Node::Inner(inner) => {
                    let (_, child) = inner
                        .inode(guard)
                        .prev_child(None, guard)
                        .ok_or(LockError::Retry)?;
                    node = unsafe { child.deref() };
                }
            }
        }
    }

    /// Optimistic point lookup starting at `node`, reached through `parent_lock` at
    /// `parent_version`. Lock coupling walks down: each node's version is taken before the parent's
    /// is validated.
    pub(crate) fn search<'g>(
        mut node: &'g Node<V>,
        mut parent_lock: &'g OptimisticLock,
        mut parent_version: u64,
        key: &[u8],
        guard: &'g Guard,
    ) -> Result<Option<V>, LockError>
    where
        V: Clone,
    {
        let mut depth = 0;
        loop {
            match node {
                Node::Leaf(leaf) => {
                    let found = leaf.matches(key).then(|| leaf.value.clone());
                    parent_lock.check_version(parent_version)?;
                    return Ok(found);
                }
                Node::Inner(inner) => {
                    let version = inner.lock.read()?;
                    parent_lock.check_version(parent_version)?;

                    // Only the inline bytes are compared; the leaf compare catches the rest.
                    if inner.prefix.stored_mismatch(key, depth).is_some() {
                        inner.lock.check_version(version)?;
                        return Ok(None);
                    }
                    depth += inner.prefix.len();
                    let next = inner.inode(guard).seek_child(key.at(depth), guard);
                    inner.lock.check_version(version)?;

                    let Some((_, child)) = next else {
                        return Ok(None);
                    };
                    depth += 1;
                    parent_lock = &inner.lock;
                    parent_version = version;
                    node = unsafe { child.deref() };
                }
            }
        }
    }

    /// Free `node` and everything below it, immediately.
    ///
    /// # Safety
    /// No other thread may reach `node` any more, and nothing below it may have been retired.
    pub(crate) unsafe fn destroy(node: Shared<'_, Node<V>>, guard: &Guard) {
        let owned = unsafe { node.into_owned() };
        if let Node::Inner(inner) = &*owned {
            let inode = inner.inode.load(Ordering::Relaxed, guard);
            let mut after = None;
            while let Some((edge, child)) = unsafe { inode.deref() }.next_child(after, guard) {
                unsafe { Self::destroy(child, guard) };
                after = Some(edge);
            }
            drop(unsafe { inode.into_owned() });
        }
    }
}

impl<V> Inner<V> {
    pub(crate) fn new(prefix: &[u8], inode: Inode<Node<V>>) -> Self {
        Self {
            lock: OptimisticLock::new(),
            prefix: Prefix::new(prefix),
            inode: Atomic::new(inode),
        }
    }

    #[inline]
    pub(crate) fn inode<'g>(&self, guard: &'g Guard) -> &'g Inode<Node<V>> {
        // Never null: every inner node is created with a layout and only ever swaps it.
        unsafe { self.inode.load(Ordering::Acquire, guard).deref() }
    }

    fn leftmost_leaf<'g>(&self, guard: &'g Guard) -> Result<&'g Leaf<V>, LockError> {
        let (_, child) = self
            .inode(guard)
            .next_child(None, guard)
            .ok_or(LockError::Retry)?;
        unsafe { child.deref() }.leftmost(guard)
    }

    /// The whole compressed path of a node at `depth`. Paths longer than the inline bytes are
    /// read back from a leaf below; every leaf under the node shares them.
    pub(crate) fn full_prefix(&self, depth: usize, guard: &Guard) -> Result<Vec<u8>, LockError> {
        let len = self.prefix.len();
        if len <= MAX_PREFIX_LEN {
            return Ok(self.prefix.stored());
        }
        let leaf = self.leftmost_leaf(guard)?;
        Ok((depth..depth + len).map(|i| leaf.key.at(i)).collect())
    }

    /// Where `key` leaves this node's path, along with the full path, or `None` if it follows
    /// the path to its end.
    fn prefix_mismatch(
        &self,
        key: &[u8],
        depth: usize,
        guard: &Guard,
    ) -> Result<Option<(usize, Vec<u8>)>, LockError> {
        let mismatch = match self.prefix.stored_mismatch(key, depth) {
            Some(at) => Some(at),
            None if self.prefix.len() <= MAX_PREFIX_LEN => return Ok(None),
            None => None,
        };
        let prefix = self.full_prefix(depth, guard)?;
        let at = match mismatch {
            Some(at) => at,
            None => match (MAX_PREFIX_LEN..prefix.len()).find(|&i| prefix[i] != key.at(depth + i)) {
                Some(at) => at,
                None => return Ok(None),
            },
        };
        // A torn read can disagree with itself; the caller revalidates before using it.
        if at >= prefix.len() {
            return Err(LockError::Retry);
        }
        Ok(Some((at, prefix)))
    }

    /// Insert the leaf in `leaf` below this node, which sits at `depth` and was reached
    /// through `parent`. The leaf is only taken once every needed lock is held, so it survives
    /// a restart. Returns whether an existing key was updated.
    pub(crate) fn insert<'g>(
        &'g self,
        this: Shared<'g, Node<V>>,
        parent: Parent<'g, V>,
        key: &[u8],
        leaf: &mut Option<Owned<Node<V>>>,
        depth: usize,
        guard: &'g Guard,
    ) -> Result<bool, LockError> {
        let version = self.lock.read()?;
        parent.check()?;

        let prefix_len = self.prefix.len();
        if let Some((at, prefix)) = self.prefix_mismatch(key, depth, guard)? {
            self.lock.check_version(version)?;
            let _parent_lock = parent.lock.write_with(parent.version)?;
            let _node_lock = self.lock.write_with(version)?;

            // A new Node4 takes over the shared part of the path, with this node and the new
            // leaf below it. This node keeps what follows the diverging byte.
            let inode = Inode::new_node4();
            inode.add_child(prefix[at], this, guard);
            inode.add_child(key.at(depth + at), take_leaf(leaf, guard), guard);
            let split = Owned::new(Node::Inner(Inner::new(&prefix[..at], inode)));
            self.prefix.set(&prefix[at + 1..]);
            parent.slot.store(split, Ordering::Release);
            trace_log!(depth, at, "split compressed path");
            return Ok(false);
        }

        let depth = depth + prefix_len;
        let edge = key.at(depth);
        let inode = self.inode(guard);
        let next = inode.seek_child(edge, guard);
        let is_full = inode.is_full();
        self.lock.check_version(version)?;

        let Some((pos, child)) = next else {
            let _node_lock = self.lock.write_with(version)?;
            if is_full {
                let grown = inode.grow(guard).ok_or(LockError::Retry)?;
                grown.add_child(edge, take_leaf(leaf, guard), guard);
                trace_log!(from = %inode.kind(), to = %grown.kind(), "grow");
                let old = self.inode.swap(Owned::new(grown), Ordering::AcqRel, guard);
                unsafe { guard.defer_destroy(old) };
            } else {
                inode.add_child(edge, take_leaf(leaf, guard), guard);
            }
            return Ok(false);
        };

        match unsafe { child.deref() } {
            Node::Leaf(existing) if existing.matches(key) => {
                let _node_lock = self.lock.write_with(version)?;
                let old = inode.replace(pos, take_leaf(leaf, guard), guard);
                unsafe { guard.defer_destroy(old) };
                Ok(true)
            }
            Node::Leaf(existing) => {
                let common = split_point(&existing.key, key, depth + 1);
                let _node_lock = self.lock.write_with(version)?;
                let split = split_leaf(
                    child,
                    &existing.key,
                    take_leaf(leaf, guard),
                    key,
                    depth + 1,
                    common,
                    guard,
                );
                inode.slot(pos).store(split, Ordering::Release);
                Ok(false)
            }
            Node::Inner(inner) => inner.insert(
                child,
                Parent {
                    lock: &self.lock,
                    version,
                    slot: inode.slot(pos),
                },
                key,
                leaf,
                depth + 1,
                guard,
            ),
        }
    }

    /// Remove `key` from below this node, which sits at `depth` and was reached through
    /// `parent`. Returns the removed value.
    pub(crate) fn remove<'g>(
        &'g self,
        this: Shared<'g, Node<V>>,
        parent: Parent<'g, V>,
        key: &[u8],
        depth: usize,
        guard: &'g Guard,
    ) -> Result<Option<V>, LockError>
    where
        V: Clone,
    {
        let version = self.lock.read()?;
        parent.check()?;

        if self.prefix.stored_mismatch(key, depth).is_some() {
            self.lock.check_version(version)?;
            return Ok(None);
        }
        let depth = depth + self.prefix.len();
        let inode = self.inode(guard);
        let next = inode.seek_child(key.at(depth), guard);
        let at_min = inode.is_min();
        let collapse = at_min && inode.kind() == NodeKind::Node4;
        self.lock.check_version(version)?;

        let Some((pos, child)) = next else {
            return Ok(None);
        };
        let leaf = match unsafe { child.deref() } {
            Node::Inner(inner) => {
                return inner.remove(
                    child,
                    Parent {
                        lock: &self.lock,
                        version,
                        slot: inode.slot(pos),
                    },
                    key,
                    depth + 1,
                    guard,
                );
            }
            Node::Leaf(leaf) => leaf,
        };
        if !leaf.matches(key) {
            return Ok(None);
        }

        if collapse {
            let _parent_lock = parent.lock.write_with(parent.version)?;
            let _node_lock = self.lock.write_with(version)?;
            self.collapse(this, child, parent.slot, guard)?;
        } else {
            let _node_lock = self.lock.write_with(version)?;
            inode.replace(pos, Shared::null(), guard);
            if at_min {
                if let Some(smaller) = inode.shrink(guard) {
                    trace_log!(from = %inode.kind(), to = %smaller.kind(), "shrink");
                    let old = self.inode.swap(Owned::new(smaller), Ordering::AcqRel, guard);
                    unsafe { guard.defer_destroy(old) };
                }
            }
        }

        let value = leaf.value.clone();
        unsafe { guard.defer_destroy(child) };
        Ok(Some(value))
    }

    /// Splice this Node4 out of the tree, hanging its child other than `removed` from `slot`
    /// directly. Caller holds this node's lock and the lock guarding `slot`. Nothing is modified
    /// if the sibling's lock can't be taken.
    fn collapse<'g>(
        &self,
        this: Shared<'g, Node<V>>,
        removed: Shared<'g, Node<V>>,
        slot: &Atomic<Node<V>>,
        guard: &'g Guard,
    ) -> Result<(), LockError> {
        let inode_ptr = self.inode.load(Ordering::Acquire, guard);
        let inode = unsafe { inode_ptr.deref() };
        let mut after = None;
        let mut sibling = None;
        while let Some((edge, child)) = inode.next_child(after, guard) {
            if child != removed {
                sibling = Some((edge, child));
                break;
            }
            after = Some(edge);
        }
        let Some((edge, sibling)) = sibling else {
            unreachable!("Node4 at its floor without a second child");
        };

        match unsafe { sibling.deref() } {
            Node::Inner(inner) => {
                // The sibling's path absorbs ours plus the edge byte it hung from.
                let _sibling_lock = inner.lock.write()?;
                inner.add_prefix_before(self, edge);
                slot.store(sibling, Ordering::Release);
            }
            Node::Leaf(_) => slot.store(sibling, Ordering::Release),
        }
        debug_log!(edge, "collapse");

        unsafe {
            guard.defer_destroy(inode_ptr);
            guard.defer_destroy(this);
        }
        Ok(())
    }

    /// Make this node's path `parent.path + edge + self.path`. Caller holds this node's lock.
    fn add_prefix_before(&self, parent: &Inner<V>, edge: u8) {
        let len = parent.prefix.len() + 1 + self.prefix.len();
        let mut leading = parent.prefix.stored();
        leading.push(edge);
        leading.extend(self.prefix.stored());
        leading.truncate(MAX_PREFIX_LEN);
        self.prefix.store(&leading, len);
    }
}

/// Length of the common run of two distinct keys from `depth`.
///
/// # Panics
/// If the keys differ only by trailing zero bytes; such keys share every edge and cannot both be
/// stored.
pub(crate) fn split_point(existing: &[u8], key: &[u8], depth: usize) -> usize {
    let common = existing.common_prefix_len(key, depth);
    assert!(
        depth + common < existing.len().max(key.len()),
        "keys {existing:?} and {key:?} differ only by trailing zero bytes"
    );
    common
}

/// A Node4 holding `existing` and `new_leaf`, whose keys agree for `common` bytes from `depth`.
pub(crate) fn split_leaf<'g, V>(
    existing: Shared<'g, Node<V>>,
    existing_key: &[u8],
    new_leaf: Shared<'g, Node<V>>,
    key: &[u8],
    depth: usize,
    common: usize,
    guard: &'g Guard,
) -> Owned<Node<V>> {
    let prefix: Vec<u8> = (depth..depth + common).map(|i| key.at(i)).collect();
    let inode = Inode::new_node4();
    inode.add_child(existing_key.at(depth + common), existing, guard);
    inode.add_child(key.at(depth + common), new_leaf, guard);
    trace_log!(depth, common, "split leaf");
    Owned::new(Node::Inner(Inner::new(&prefix, inode)))
}

/// Publish the pending leaf. Callers only get here holding every lock the write needs.
pub(crate) fn take_leaf<'g, V>(
    leaf: &mut Option<Owned<Node<V>>>,
    guard: &'g Guard,
) -> Shared<'g, Node<V>> {
    match leaf.take() {
        Some(owned) => owned.into_shared(guard),
        None => unreachable!("pending leaf published twice"),
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_epoch::{self as epoch, Owned};

    use crate::mapping::Inode;
    use crate::node::{Inner, Node, NodeKind, split_leaf, split_point};
    use crate::prefix::MAX_PREFIX_LEN;

    #[test]
    fn test_node_kind_display() {
        assert_eq!(NodeKind::Leaf.to_string(), "Leaf");
        assert_eq!(NodeKind::Node48.to_string(), "Node48");
        assert_eq!(format!("{}", NodeKind::Node256), "Node256");
    }

    #[test]
    fn test_split_point() {
        assert_eq!(split_point(b"abcd", b"abxy", 0), 2);
        assert_eq!(split_point(b"abcd", b"abxy", 1), 1);
        assert_eq!(split_point(b"ab", b"abc", 0), 2);
    }

    #[test]
    #[should_panic(expected = "trailing zero")]
    fn test_split_point_trailing_zero_keys() {
        split_point(&[1, 2], &[1, 2, 0], 0);
    }

    #[test]
    fn test_split_leaf_and_leftmost() {
        let guard = &epoch::pin();
        let a = Owned::new(Node::new_leaf(b"hello world", 1)).into_shared(guard);
        let b = Owned::new(Node::new_leaf(b"hello there", 2)).into_shared(guard);
        let common = split_point(b"hello world", b"hello there", 0);
        let split = split_leaf(a, b"hello world", b, b"hello there", 0, common, guard)
            .into_shared(guard);
        let node = unsafe { split.deref() };
        assert_eq!(node.kind(guard), NodeKind::Node4);
        let Node::Inner(inner) = node else {
            panic!("expected an inner node")
        };
        assert_eq!(inner.prefix.stored(), b"hello ");
        assert_eq!(&*node.leftmost(guard).unwrap().key, b"hello there");
        assert_eq!(&*node.rightmost(guard).unwrap().key, b"hello world");
        unsafe { Node::destroy(split, guard) };
    }

    #[test]
    fn test_full_prefix_from_leaf() {
        let guard = &epoch::pin();
        let key: Vec<u8> = (0..40).collect();
        let mut other = key.clone();
        other[30] = 0xff;
        let a = Owned::new(Node::new_leaf(&key, ())).into_shared(guard);
        let b = Owned::new(Node::new_leaf(&other, ())).into_shared(guard);
        let inode = Inode::new_node4();
        inode.add_child(key[30], a, guard);
        inode.add_child(other[30], b, guard);
        // Node at depth 2 with a path covering key[2..30].
        let inner = Inner::new(&key[2..30], inode);
        assert_eq!(inner.prefix.len(), 28);
        assert_eq!(inner.prefix.stored().len(), MAX_PREFIX_LEN);
        assert_eq!(inner.full_prefix(2, guard).unwrap(), &key[2..30]);
        let node = Owned::new(Node::Inner(inner)).into_shared(guard);
        unsafe { Node::destroy(node, guard) };
    }

    #[test]
    fn test_add_prefix_before() {
        let guard = &epoch::pin();
        let parent = Inner::<()>::new(b"ab", Inode::new_node4());
        let child = Inner::<()>::new(b"xyz", Inode::new_node4());
        child.add_prefix_before(&parent, b'-');
        assert_eq!(child.prefix.len(), 6);
        assert_eq!(child.prefix.stored(), b"ab-xyz");

        let long_parent = Inner::<()>::new(b"0123456789abcdef", Inode::new_node4());
        child.add_prefix_before(&long_parent, b'-');
        assert_eq!(child.prefix.len(), 16 + 1 + 6);
        assert_eq!(child.prefix.stored(), b"0123456789");

        for inner in [parent, child, long_parent] {
            let node = Owned::new(Node::Inner(inner)).into_shared(guard);
            unsafe { Node::destroy(node, guard) };
        }
    }
}
