//! Byte-string keys as the tree sees them.
//!
//! A key is read one byte per level. Reading past the end yields `0`, so a key that ends at an
//! inner node is routed along the `0` edge there. Two stored keys that differ only by trailing
//! zero bytes therefore cannot be told apart, and inserting both is a caller error.

pub trait KeyTrait {
    /// The byte at `pos`, or `0` past the end.
    fn at(&self, pos: usize) -> u8;

    /// Length of the run starting at `depth` on which both keys agree, reading both with `at`.
    /// Stops at the end of the longer key.
    fn common_prefix_len(&self, other: &Self, depth: usize) -> usize;
}

impl KeyTrait for [u8] {
    #[inline]
    fn at(&self, pos: usize) -> u8 {
        self.get(pos).copied().unwrap_or(0)
    }

    fn common_prefix_len(&self, other: &Self, depth: usize) -> usize {
        let end = self.len().max(other.len());
        let mut i = depth;
        while i < end && self.at(i) == other.at(i) {
            i += 1;
        }
        i.saturating_sub(depth)
    }
}
