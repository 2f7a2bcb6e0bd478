use std::sync::atomic::{AtomicU16, Ordering};

use crossbeam_epoch::{Atomic, Guard, Shared};

use crate::mapping::NodeMapping;
use crate::mapping::indexed_mapping::IndexedMapping;

/// One child slot per possible key byte. Positions are the key bytes.
pub struct DirectMapping<N> {
    pub(crate) children: [Atomic<N>; 256],
    num_children: AtomicU16,
}

impl<N> Default for DirectMapping<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> DirectMapping<N> {
    pub fn new() -> Self {
        Self {
            children: std::array::from_fn(|_| Atomic::null()),
            num_children: AtomicU16::new(0),
        }
    }

    pub fn from_indexed<const WIDTH: usize>(im: &IndexedMapping<N, WIDTH>, guard: &Guard) -> Self {
        let new = DirectMapping::new();
        for (key, child) in im.iter(guard) {
            new.add_child(key, child, guard);
        }
        new
    }

    #[inline]
    fn load<'g>(&self, key: u8, guard: &'g Guard) -> Option<Shared<'g, N>> {
        let child = self.children[key as usize].load(Ordering::Acquire, guard);
        (!child.is_null()).then_some(child)
    }

    /// Live entries in key order.
    pub fn iter<'g>(&self, guard: &'g Guard) -> impl Iterator<Item = (u8, Shared<'g, N>)> where N: 'g {
        (0..=255u8).filter_map(move |key| self.load(key, guard).map(|child| (key, child)))
    }
}

impl<N> NodeMapping<N> for DirectMapping<N> {
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

    #[inline]
    fn slot(&self, pos: usize) -> &Atomic<N> {
        &self.children[pos & 0xff]
    }

    fn add_child(&self, key: u8, node: Shared<'_, N>, _guard: &Guard) {
        self.children[key as usize].store(node, Ordering::Release);
        self.num_children.fetch_add(1, Ordering::Release);
    }

    fn remove_child(&self, pos: usize, guard: &Guard) {
        let slot = &self.children[pos & 0xff];
        if slot.load(Ordering::Relaxed, guard).is_null() {
            return;
        }
        slot.store(Shared::null(), Ordering::Release);
        self.num_children.fetch_sub(1, Ordering::Release);
    }

    #[inline]
    fn num_children(&self) -> usize {
        self.num_children.load(Ordering::Acquire) as usize
    }

    #[inline]
    fn width(&self) -> usize {
        256
    }
}
