use std::sync::atomic::Ordering;

use crossbeam_epoch::{Atomic, Guard, Shared};

use crate::mapping::direct_mapping::DirectMapping;
use crate::mapping::indexed_mapping::IndexedMapping;
use crate::mapping::keyed_mapping::KeyedMapping;
use crate::node::NodeKind;

pub mod direct_mapping;
pub mod indexed_mapping;
pub mod keyed_mapping;

/// Edge-byte to child-pointer storage for one inner-node layout.
///
/// Lookups may run concurrently with a writer and can then return garbage; callers validate the
/// owning node's version before trusting anything read here. Mutations assume the owning node's
/// write lock is held.
pub trait NodeMapping<N> {
    /// Child on edge `key`, with a position usable with `slot` and `remove_child`.
    fn seek_child<'g>(&self, key: u8, guard: &'g Guard) -> Option<(usize, Shared<'g, N>)>;
    /// The smallest occupied edge greater than `after`, or the smallest overall.
    fn next_child<'g>(&self, after: Option<u8>, guard: &'g Guard) -> Option<(u8, Shared<'g, N>)>;
    /// The largest occupied edge smaller than `before`, or the largest overall.
    fn prev_child<'g>(&self, before: Option<u8>, guard: &'g Guard) -> Option<(u8, Shared<'g, N>)>;
    /// The pointer slot at a position returned by `seek_child`.
    fn slot(&self, pos: usize) -> &Atomic<N>;
    fn add_child(&self, key: u8, node: Shared<'_, N>, guard: &Guard);
    fn remove_child(&self, pos: usize, guard: &Guard);
    fn num_children(&self) -> usize;
    fn width(&self) -> usize;
}

/// The four inner-node layouts.
pub(crate) enum Inode<N> {
    Node4(KeyedMapping<N, 4>),
    Node16(KeyedMapping<N, 16>),
    Node48(IndexedMapping<N, 48>),
    Node256(DirectMapping<N>),
}

macro_rules! on_mapping {
    ($inode:expr, $m:ident => $body:expr) => {
        match $inode {
            Inode::Node4($m) => $body,
            Inode::Node16($m) => $body,
            Inode::Node48($m) => $body,
            Inode::Node256($m) => $body,
        }
    };
}

impl<N> Inode<N> {
    pub(crate) fn new_node4() -> Self {
        Inode::Node4(KeyedMapping::new())
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Inode::Node4(_) => NodeKind::Node4,
            Inode::Node16(_) => NodeKind::Node16,
            Inode::Node48(_) => NodeKind::Node48,
            Inode::Node256(_) => NodeKind::Node256,
        }
    }

    #[inline]
    pub(crate) fn seek_child<'g>(&self, key: u8, guard: &'g Guard) -> Option<(usize, Shared<'g, N>)> {
        on_mapping!(self, m => m.seek_child(key, guard))
    }

    #[inline]
    pub(crate) fn next_child<'g>(
        &self,
        after: Option<u8>,
        guard: &'g Guard,
    ) -> Option<(u8, Shared<'g, N>)> {
        on_mapping!(self, m => m.next_child(after, guard))
    }

    #[inline]
    pub(crate) fn prev_child<'g>(
        &self,
        before: Option<u8>,
        guard: &'g Guard,
    ) -> Option<(u8, Shared<'g, N>)> {
        on_mapping!(self, m => m.prev_child(before, guard))
    }

    #[inline]
    pub(crate) fn slot(&self, pos: usize) -> &Atomic<N> {
        on_mapping!(self, m => m.slot(pos))
    }

    pub(crate) fn add_child(&self, key: u8, node: Shared<'_, N>, guard: &Guard) {
        on_mapping!(self, m => m.add_child(key, node, guard))
    }

    /// Swap the child at `pos` for `node` and return the previous one. A null `node` removes the
    /// edge altogether.
    pub(crate) fn replace<'g>(&self, pos: usize, node: Shared<'_, N>, guard: &'g Guard) -> Shared<'g, N> {
        let slot = self.slot(pos);
        if node.is_null() {
            let old = slot.load(Ordering::Relaxed, guard);
            on_mapping!(self, m => m.remove_child(pos, guard));
            old
        } else {
            slot.swap(node, Ordering::AcqRel, guard)
        }
    }

    #[inline]
    pub(crate) fn num_children(&self) -> usize {
        on_mapping!(self, m => m.num_children())
    }

    pub(crate) fn is_full(&self) -> bool {
        on_mapping!(self, m => m.num_children() >= m.width())
    }

    /// Whether removing one more child takes this layout below its occupancy floor. Checked
    /// before the removal. For a Node4 the floor means collapsing into the last remaining child.
    pub(crate) fn is_min(&self) -> bool {
        let n = self.num_children();
        match self {
            Inode::Node4(_) => n <= 2,
            Inode::Node16(_) => n <= 5,
            Inode::Node48(_) => n <= 17,
            Inode::Node256(_) => n <= 49,
        }
    }

    /// The next larger layout holding the same children. `None` for a Node256.
    pub(crate) fn grow(&self, guard: &Guard) -> Option<Self> {
        Some(match self {
            Inode::Node4(km) => Inode::Node16(KeyedMapping::from_resized_grow(km, guard)),
            Inode::Node16(km) => Inode::Node48(IndexedMapping::from_keyed(km, guard)),
            Inode::Node48(im) => Inode::Node256(DirectMapping::from_indexed(im, guard)),
            Inode::Node256(_) => return None,
        })
    }

    /// The next smaller layout holding the same children. `None` for a Node4, which collapses
    /// instead.
    pub(crate) fn shrink(&self, guard: &Guard) -> Option<Self> {
        Some(match self {
            Inode::Node4(_) => return None,
            Inode::Node16(km) => Inode::Node4(KeyedMapping::from_resized_shrink(km, guard)),
            Inode::Node48(im) => Inode::Node16(KeyedMapping::from_indexed(im, guard)),
            Inode::Node256(dm) => Inode::Node48(IndexedMapping::from_direct(dm, guard)),
        })
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_epoch::{self as epoch, Owned, Shared};

    use crate::mapping::Inode;
    use crate::node::NodeKind;

    #[test]
    fn test_grow_and_shrink_through_all_layouts() {
        let guard = &epoch::pin();
        let mut inode = Inode::<u32>::new_node4();
        let mut values: Vec<Shared<u32>> = vec![];
        let mut kinds = vec![inode.kind()];
        for i in 0..=255u32 {
            if inode.is_full() {
                inode = inode.grow(guard).unwrap();
                kinds.push(inode.kind());
            }
            let v = Owned::new(i).into_shared(guard);
            inode.add_child(i as u8, v, guard);
            values.push(v);
        }
        assert_eq!(
            kinds,
            vec![NodeKind::Node4, NodeKind::Node16, NodeKind::Node48, NodeKind::Node256]
        );
        assert!(inode.is_full());
        assert!(inode.grow(guard).is_none());

        let mut shrunk_at = vec![];
        for key in (1..=255u8).rev() {
            let shrink = inode.is_min();
            let (pos, _) = inode.seek_child(key, guard).unwrap();
            let old = inode.replace(pos, Shared::null(), guard);
            assert_eq!(unsafe { *old.deref() }, key as u32);
            if shrink {
                match inode.shrink(guard) {
                    Some(smaller) => {
                        inode = smaller;
                        shrunk_at.push((inode.num_children(), inode.kind()));
                    }
                    None => break,
                }
            }
        }
        assert_eq!(
            shrunk_at,
            vec![(48, NodeKind::Node48), (16, NodeKind::Node16), (4, NodeKind::Node4)]
        );
        assert_eq!(inode.kind(), NodeKind::Node4);
        assert_eq!(inode.num_children(), 1);
        assert_eq!(inode.next_child(None, guard).map(|(k, _)| k), Some(0));

        for v in values {
            unsafe { drop(v.into_owned()) };
        }
    }

    #[test]
    fn test_replace_swaps_pointer() {
        let guard = &epoch::pin();
        let inode = Inode::<u32>::new_node4();
        let a = Owned::new(1).into_shared(guard);
        let b = Owned::new(2).into_shared(guard);
        inode.add_child(b'x', a, guard);
        let (pos, _) = inode.seek_child(b'x', guard).unwrap();
        let old = inode.replace(pos, b, guard);
        assert_eq!(old, a);
        assert_eq!(inode.seek_child(b'x', guard).unwrap().1, b);
        assert_eq!(inode.num_children(), 1);
        unsafe {
            drop(a.into_owned());
            drop(b.into_owned());
        }
    }
}
