//! Range cursors over a live tree.
//!
//! An iterator holds no pointers into the tree between steps, only the last key it returned. Each
//! step pins an epoch and seeks from the root for the next key past that cursor, validating node
//! versions like a point lookup does. Concurrent writes are therefore never blocked, and a scan
//! sees some subset of what was inserted or removed while it ran. It never yields a key outside
//! its bounds, and never the same key twice.

use std::cmp::Ordering;
use std::ops::Bound;

use crossbeam_epoch::{self as epoch, Guard};
use parking_lot_core::SpinWait;

use crate::keys::KeyTrait;
use crate::node::{Leaf, Node};
use crate::tracing_helpers::trace_log;
use crate::tree::{Tree, backoff};
use crate::utils::optimistic_lock::LockError;

pub struct Iter<'a, V> {
    tree: &'a Tree<V>,
    front: Bound<Vec<u8>>,
    back: Bound<Vec<u8>>,
    done: bool,
}

fn above_start(key: &[u8], start: &Bound<Vec<u8>>) -> bool {
    match start {
        Bound::Unbounded => true,
        Bound::Included(s) => key >= s.as_slice(),
        Bound::Excluded(s) => key > s.as_slice(),
    }
}

fn below_end(key: &[u8], end: &Bound<Vec<u8>>) -> bool {
    match end {
        Bound::Unbounded => true,
        Bound::Included(e) => key <= e.as_slice(),
        Bound::Excluded(e) => key < e.as_slice(),
    }
}

// How a node's path at `depth` orders against `cursor`. Keys below the node all share the path,
// so anything but `Equal` settles the whole subtree.
fn compare_path(path: &[u8], cursor: &[u8], depth: usize) -> Ordering {
    path.iter()
        .enumerate()
        .map(|(i, b)| b.cmp(&cursor.at(depth + i)))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// The smallest leaf below `node` that is above `start`.
fn seek_first<'g, V>(
    node: &'g Node<V>,
    depth: usize,
    start: &Bound<Vec<u8>>,
    guard: &'g Guard,
) -> Result<Option<&'g Leaf<V>>, LockError> {
    let inner = match node {
        Node::Leaf(leaf) => return Ok(above_start(&leaf.key, start).then_some(leaf)),
        Node::Inner(inner) => inner,
    };
    let version = inner.lock.read()?;
    let cursor = match start {
        Bound::Unbounded => {
            let leaf = node.leftmost(guard)?;
            inner.lock.check_version(version)?;
            return Ok(Some(leaf));
        }
        Bound::Included(c) | Bound::Excluded(c) => c.as_slice(),
    };

    let path = inner.full_prefix(depth, guard)?;
    let found = match compare_path(&path, cursor, depth) {
        Ordering::Greater => Some(node.leftmost(guard)?),
        Ordering::Less => None,
        Ordering::Equal => {
            let depth = depth + path.len();
            let edge = cursor.at(depth);
            let inode = inner.inode(guard);
            let mut found = None;
            if let Some((_, child)) = inode.seek_child(edge, guard) {
                found = seek_first(unsafe { child.deref() }, depth + 1, start, guard)?;
            }
            if found.is_none() {
                if let Some((_, child)) = inode.next_child(Some(edge), guard) {
                    found = Some(unsafe { child.deref() }.leftmost(guard)?);
                }
            }
            found
        }
    };
    inner.lock.check_version(version)?;
    Ok(found)
}

/// The largest leaf below `node` that is below `end`.
fn seek_last<'g, V>(
    node: &'g Node<V>,
    depth: usize,
    end: &Bound<Vec<u8>>,
    guard: &'g Guard,
) -> Result<Option<&'g Leaf<V>>, LockError> {
    let inner = match node {
        Node::Leaf(leaf) => return Ok(below_end(&leaf.key, end).then_some(leaf)),
        Node::Inner(inner) => inner,
    };
    let version = inner.lock.read()?;
    let cursor = match end {
        Bound::Unbounded => {
            let leaf = node.rightmost(guard)?;
            inner.lock.check_version(version)?;
            return Ok(Some(leaf));
        }
        Bound::Included(c) | Bound::Excluded(c) => c.as_slice(),
    };

    let path = inner.full_prefix(depth, guard)?;
    let found = match compare_path(&path, cursor, depth) {
        Ordering::Less => Some(node.rightmost(guard)?),
        Ordering::Greater => None,
        Ordering::Equal => {
            let depth = depth + path.len();
            let edge = cursor.at(depth);
            let inode = inner.inode(guard);
            let mut found = None;
            if let Some((_, child)) = inode.seek_child(edge, guard) {
                found = seek_last(unsafe { child.deref() }, depth + 1, end, guard)?;
            }
            if found.is_none() {
                if let Some((_, child)) = inode.prev_child(Some(edge), guard) {
                    found = Some(unsafe { child.deref() }.rightmost(guard)?);
                }
            }
            found
        }
    };
    inner.lock.check_version(version)?;
    Ok(found)
}

impl<'a, V> Iter<'a, V>
where
    V: Clone,
{
    pub(crate) fn new(tree: &'a Tree<V>, front: Bound<Vec<u8>>, back: Bound<Vec<u8>>) -> Self {
        Self {
            tree,
            front,
            back,
            done: false,
        }
    }

    fn step(
        &self,
        seek: for<'g> fn(
            &'g Node<V>,
            usize,
            &Bound<Vec<u8>>,
            &'g Guard,
        ) -> Result<Option<&'g Leaf<V>>, LockError>,
        bound: &Bound<Vec<u8>>,
        in_bound: fn(&[u8], &Bound<Vec<u8>>) -> bool,
    ) -> Option<(Vec<u8>, V)> {
        let mut spin = SpinWait::new();
        loop {
            let guard = &epoch::pin();
            match self.step_attempt(seek, bound, in_bound, guard) {
                Ok(found) => return found,
                Err(_e) => {
                    trace_log!(error = %_e, "iterator restart");
                    backoff(&mut spin);
                }
            }
        }
    }

    fn step_attempt<'g>(
        &self,
        seek: fn(
            &'g Node<V>,
            usize,
            &Bound<Vec<u8>>,
            &'g Guard,
        ) -> Result<Option<&'g Leaf<V>>, LockError>,
        bound: &Bound<Vec<u8>>,
        in_bound: fn(&[u8], &Bound<Vec<u8>>) -> bool,
        guard: &'g Guard,
    ) -> Result<Option<(Vec<u8>, V)>, LockError> {
        let lock = self.tree.lock();
        let version = lock.read()?;
        let root = self.tree.root(guard);
        let found = match unsafe { root.as_ref() } {
            None => None,
            Some(node) => seek(node, 0, bound, guard)?,
        };
        lock.check_version(version)?;
        match found {
            None => Ok(None),
            Some(leaf) if in_bound(&leaf.key, bound) => {
                Ok(Some((leaf.key.to_vec(), leaf.value.clone())))
            }
            // A leaf outside the bound means the walk read a torn node.
            Some(_) => Err(LockError::Retry),
        }
    }
}

impl<V> Iterator for Iter<'_, V>
where
    V: Clone,
{
    type Item = (Vec<u8>, V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step(seek_first, &self.front, above_start) {
            Some((key, value)) if below_end(&key, &self.back) => {
                self.front = Bound::Excluded(key.clone());
                Some((key, value))
            }
            _ => {
                self.done = true;
                None
            }
        }
    }
}

impl<V> DoubleEndedIterator for Iter<'_, V>
where
    V: Clone,
{
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step(seek_last, &self.back, below_end) {
            Some((key, value)) if above_start(&key, &self.front) => {
                self.back = Bound::Excluded(key.clone());
                Some((key, value))
            }
            _ => {
                self.done = true;
                None
            }
        }
    }
}
