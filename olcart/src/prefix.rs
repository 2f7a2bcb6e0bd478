use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::keys::KeyTrait;

/// Number of compressed-path bytes an inner node stores inline. Longer paths keep their true
/// length but only these leading bytes; the rest are recovered from a leaf below the node.
pub const MAX_PREFIX_LEN: usize = 10;

/// The compressed path of an inner node.
///
/// Every byte is an atomic so optimistic readers can load it while a writer that holds the node
/// lock rewrites it. What a reader sees is only meaningful once the node version validates.
pub(crate) struct Prefix {
    bytes: [AtomicU8; MAX_PREFIX_LEN],
    len: AtomicUsize,
}

impl Prefix {
    pub(crate) fn new(src: &[u8]) -> Self {
        let prefix = Self {
            bytes: std::array::from_fn(|_| AtomicU8::new(0)),
            len: AtomicUsize::new(0),
        };
        prefix.set(src);
        prefix
    }

    /// True length of the compressed path, which may exceed `MAX_PREFIX_LEN`.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// How many bytes are actually held inline.
    #[inline]
    pub(crate) fn stored_len(&self) -> usize {
        self.len().min(MAX_PREFIX_LEN)
    }

    #[inline]
    pub(crate) fn at(&self, pos: usize) -> u8 {
        self.bytes[pos].load(Ordering::Relaxed)
    }

    /// Copy of the inline bytes.
    pub(crate) fn stored(&self) -> Vec<u8> {
        (0..self.stored_len()).map(|i| self.at(i)).collect()
    }

    /// Replace the whole path. Caller holds the node's write lock.
    pub(crate) fn set(&self, src: &[u8]) {
        self.store(src, src.len());
    }

    /// Replace the path with one of length `len` whose leading bytes are `leading`. `leading` must
    /// hold at least `min(len, MAX_PREFIX_LEN)` bytes. Caller holds the node's write lock.
    pub(crate) fn store(&self, leading: &[u8], len: usize) {
        let stored = len.min(MAX_PREFIX_LEN);
        for (slot, byte) in self.bytes.iter().zip(&leading[..stored]) {
            slot.store(*byte, Ordering::Relaxed);
        }
        self.len.store(len, Ordering::Relaxed);
    }

    /// Index of the first inline byte that differs from `key` at `depth`, if any. Bytes beyond
    /// `MAX_PREFIX_LEN` are not checked.
    pub(crate) fn stored_mismatch(&self, key: &[u8], depth: usize) -> Option<usize> {
        (0..self.stored_len()).find(|&i| self.at(i) != key.at(depth + i))
    }
}
