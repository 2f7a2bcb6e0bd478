//! Key generators shared by the integration tests.

#![allow(dead_code)]

use rand::Rng;

/// `v` as an unsigned LEB128 varint, zero-padded to eight bytes.
pub fn uvarint_key(v: u64) -> [u8; 8] {
    let mut buf = [0u8; 8];
    let mut v = v;
    let mut i = 0;
    while v >= 0x80 {
        buf[i] = (v as u8) | 0x80;
        v >>= 7;
        i += 1;
    }
    buf[i] = v as u8;
    buf
}

/// `prefix` followed by `uvarint_key(v)`.
pub fn prefixed_key(prefix: &[u8], v: u64) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(&uvarint_key(v));
    key
}

/// Eight random bytes. Fixed-length keys never collide on the trailing-zero sentinel.
pub fn random_key<R: Rng>(rng: &mut R) -> [u8; 8] {
    let mut key = [0u8; 8];
    rng.fill(&mut key);
    key
}

/// Route the tree's trace events to the test output. Set `RUST_LOG=olcart=trace` and build with
/// `--features tracing` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
