use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_epoch::{Atomic, Guard, Shared};

use crate::mapping::NodeMapping;
use crate::mapping::indexed_mapping::IndexedMapping;
use crate::utils::u8_keys::u8_keys_find_key_position;

/// Maps a key to a node, using an unsorted array of keys and a corresponding array of nodes.
/// The first `num_children` positions are live. New edges are appended at the end, and removal
/// moves the last entry into the hole, so live entries stay packed.
/// The keys are kept unsorted, so a linear search is used to find the key, but SIMD operations
/// are used to speed up the search on platforms that have it.
pub struct KeyedMapping<N, const WIDTH: usize> {
    pub(crate) keys: [AtomicU8; WIDTH],
    pub(crate) children: [Atomic<N>; WIDTH],
    pub(crate) num_children: AtomicU8,
}

impl<N, const WIDTH: usize> Default for KeyedMapping<N, WIDTH> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N, const WIDTH: usize> KeyedMapping<N, WIDTH> {
    #[inline]
    pub fn new() -> Self {
        Self {
            keys: std::array::from_fn(|_| AtomicU8::new(0)),
            children: std::array::from_fn(|_| Atomic::null()),
            num_children: AtomicU8::new(0),
        }
    }

    pub fn from_resized_grow<const OLD_WIDTH: usize>(
        km: &KeyedMapping<N, OLD_WIDTH>,
        guard: &Guard,
    ) -> Self {
        assert!(WIDTH > OLD_WIDTH);
        let new = KeyedMapping::new();
        for (key, child) in km.iter(guard) {
            new.add_child(key, child, guard);
        }
        new
    }

    pub fn from_resized_shrink<const OLD_WIDTH: usize>(
        km: &KeyedMapping<N, OLD_WIDTH>,
        guard: &Guard,
    ) -> Self {
        assert!(WIDTH < OLD_WIDTH);
        let new = KeyedMapping::new();
        for (key, child) in km.iter(guard) {
            new.add_child(key, child, guard);
        }
        new
    }

    pub(crate) fn from_indexed<const IDX_WIDTH: usize>(
        im: &IndexedMapping<N, IDX_WIDTH>,
        guard: &Guard,
    ) -> Self {
        let new = KeyedMapping::new();
        for (key, child) in im.iter(guard) {
            new.add_child(key, child, guard);
        }
        new
    }

    #[inline]
    fn live(&self) -> usize {
        (self.num_children.load(Ordering::Acquire) as usize).min(WIDTH)
    }

    /// Live entries in storage order, which is not key order.
    pub(crate) fn iter<'g>(&self, guard: &'g Guard) -> impl Iterator<Item = (u8, Shared<'g, N>)> where N: 'g {
        (0..self.live()).filter_map(move |i| {
            let child = self.children[i].load(Ordering::Acquire, guard);
            (!child.is_null()).then(|| (self.keys[i].load(Ordering::Relaxed), child))
        })
    }

    // Position of the best live key accepted by `better`, compared against the best so far.
    fn select<'g>(
        &self,
        accept: impl Fn(u8) -> bool,
        better: impl Fn(u8, u8) -> bool,
        guard: &'g Guard,
    ) -> Option<(u8, Shared<'g, N>)> {
        let mut best: Option<(u8, usize)> = None;
        for i in 0..self.live() {
            let k = self.keys[i].load(Ordering::Relaxed);
            if accept(k) && best.is_none_or(|(b, _)| better(k, b)) {
                best = Some((k, i));
            }
        }
        let (key, pos) = best?;
        let child = self.children[pos].load(Ordering::Acquire, guard);
        (!child.is_null()).then_some((key, child))
    }
}

impl<N, const WIDTH: usize> NodeMapping<N> for KeyedMapping<N, WIDTH> {
    fn seek_child<'g>(&self, key: u8, guard: &'g Guard) -> Option<(usize, Shared<'g, N>)> {
        let num_children = self.live();
        let keys: [u8; WIDTH] = std::array::from_fn(|i| self.keys[i].load(Ordering::Relaxed));
        let pos = u8_keys_find_key_position::<WIDTH>(key, &keys, num_children)?;
        let child = self.children[pos].load(Ordering::Acquire, guard);
        (!child.is_null()).then_some((pos, child))
    }

    fn next_child<'g>(&self, after: Option<u8>, guard: &'g Guard) -> Option<(u8, Shared<'g, N>)> {
        self.select(|k| after.is_none_or(|a| k > a), |k, b| k < b, guard)
    }

    fn prev_child<'g>(&self, before: Option<u8>, guard: &'g Guard) -> Option<(u8, Shared<'g, N>)> {
        self.select(|k| before.is_none_or(|b| k < b), |k, b| k > b, guard)
    }

    #[inline]
    fn slot(&self, pos: usize) -> &Atomic<N> {
        &self.children[pos.min(WIDTH - 1)]
    }

    fn add_child(&self, key: u8, node: Shared<'_, N>, _guard: &Guard) {
        let idx = self.num_children.load(Ordering::Relaxed) as usize;
        assert!(idx < WIDTH, "add_child: no space left");
        self.keys[idx].store(key, Ordering::Relaxed);
        self.children[idx].store(node, Ordering::Release);
        self.num_children.store(idx as u8 + 1, Ordering::Release);
    }

    fn remove_child(&self, pos: usize, guard: &Guard) {
        let num_children = self.num_children.load(Ordering::Relaxed) as usize;
        if pos >= num_children {
            return;
        }
        let last = num_children - 1;
        if pos != last {
            let moved = self.children[last].load(Ordering::Relaxed, guard);
            self.keys[pos].store(self.keys[last].load(Ordering::Relaxed), Ordering::Relaxed);
            self.children[pos].store(moved, Ordering::Release);
        }
        self.children[last].store(Shared::null(), Ordering::Release);
        self.num_children.store(last as u8, Ordering::Release);
    }

    #[inline(always)]
    fn num_children(&self) -> usize {
        self.live()
    }

    #[inline(always)]
    fn width(&self) -> usize {
        WIDTH
    }
}
