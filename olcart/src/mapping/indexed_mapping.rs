use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_epoch::{Atomic, Guard, Shared};

use crate::mapping::NodeMapping;
use crate::mapping::direct_mapping::DirectMapping;
use crate::mapping::keyed_mapping::KeyedMapping;

/// A mapping from keys to separate child pointers. 256 keys, usually 48 children.
/// `child_ptr_indexes` holds, per key byte, a 1-based position in `children`; 0 means absent.
/// Positions are the key bytes themselves.
pub struct IndexedMapping<N, const WIDTH: usize> {
    pub(crate) child_ptr_indexes: [AtomicU8; 256],
    pub(crate) children: [Atomic<N>; WIDTH],
    pub(crate) num_children: AtomicU8,
}

impl<N, const WIDTH: usize> Default for IndexedMapping<N, WIDTH> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N, const WIDTH: usize> IndexedMapping<N, WIDTH> {
    pub fn new() -> Self {
        Self {
            child_ptr_indexes: std::array::from_fn(|_| AtomicU8::new(0)),
            children: std::array::from_fn(|_| Atomic::null()),
            num_children: AtomicU8::new(0),
        }
    }

    pub(crate) fn from_direct(dm: &DirectMapping<N>, guard: &Guard) -> Self {
        let new = IndexedMapping::new();
        for (key, child) in dm.iter(guard) {
            new.add_child(key, child, guard);
        }
        new
    }

    pub fn from_keyed<const KM_WIDTH: usize>(km: &KeyedMapping<N, KM_WIDTH>, guard: &Guard) -> Self {
        let new = IndexedMapping::new();
        for (key, child) in km.iter(guard) {
            new.add_child(key, child, guard);
        }
        new
    }

    /// Live entries in key order.
    pub(crate) fn iter<'g>(&self, guard: &'g Guard) -> impl Iterator<Item = (u8, Shared<'g, N>)> where N: 'g {
        (0..=255u8).filter_map(move |key| self.load(key, guard).map(|child| (key, child)))
    }

    #[inline]
    fn load<'g>(&self, key: u8, guard: &'g Guard) -> Option<Shared<'g, N>> {
        let idx = self.child_ptr_indexes[key as usize].load(Ordering::Acquire) as usize;
        if idx == 0 || idx > WIDTH {
            return None;
        }
        let child = self.children[idx - 1].load(Ordering::Acquire, guard);
        (!child.is_null()).then_some(child)
    }
}

impl<N, const WIDTH: usize> NodeMapping<N> for IndexedMapping<N, WIDTH> {
    #[inline]
    fn seek_child<'g>(&self, key: u8, guard: &'g Guard) -> Option<(usize, Shared<'g, N>)> {
        self.load(key, guard).map(|child| (key as usize, child))
    }

    fn next_child<'g>(&self, after: Option<u8>, guard: &'g Guard) -> Option<(u8, Shared<'g, N>)> {
        let start = match after {
            None => 0,
            Some(255) => return None,
            Some(a) => a + 1,
        };
        (start..=255u8).find_map(|key| self.load(key, guard).map(|child| (key, child)))
    }

    fn prev_child<'g>(&self, before: Option<u8>, guard: &'g Guard) -> Option<(u8, Shared<'g, N>)> {
        let end = match before {
            None => 255,
            Some(0) => return None,
            Some(b) => b - 1,
        };
        (0..=end)
            .rev()
            .find_map(|key| self.load(key, guard).map(|child| (key, child)))
    }

    fn slot(&self, pos: usize) -> &Atomic<N> {
        let idx = self.child_ptr_indexes[pos & 0xff].load(Ordering::Relaxed) as usize;
        &self.children[idx.saturating_sub(1).min(WIDTH - 1)]
    }

    fn add_child(&self, key: u8, node: Shared<'_, N>, guard: &Guard) {
        // Free positions are usually at the end; after removals they can be anywhere.
        let hint = self.num_children.load(Ordering::Relaxed) as usize;
        let pos = (hint..WIDTH)
            .chain(0..hint)
            .find(|&i| self.children[i].load(Ordering::Relaxed, guard).is_null())
            .expect("add_child: no space left");
        self.children[pos].store(node, Ordering::Release);
        self.child_ptr_indexes[key as usize].store(pos as u8 + 1, Ordering::Release);
        self.num_children.fetch_add(1, Ordering::Release);
    }

    fn remove_child(&self, pos: usize, _guard: &Guard) {
        let key = pos & 0xff;
        let idx = self.child_ptr_indexes[key].load(Ordering::Relaxed) as usize;
        if idx == 0 {
            return;
        }
        self.child_ptr_indexes[key].store(0, Ordering::Release);
        self.children[idx - 1].store(Shared::null(), Ordering::Release);
        self.num_children.fetch_sub(1, Ordering::Release);
    }

    #[inline]
    fn num_children(&self) -> usize {
        self.num_children.load(Ordering::Acquire) as usize
    }

    #[inline]
    fn width(&self) -> usize {
        WIDTH
    }
}
