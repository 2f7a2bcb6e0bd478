#![no_main]

use std::collections::BTreeMap;
use std::sync::{Arc, Barrier};
use std::thread;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use olcart::Tree;

#[derive(Arbitrary, Debug, Clone)]
enum ThreadOp {
    Insert { key: u16, val: u32 },
    Remove { key: u16 },
    Search { key: u16 },
    Scan { start: u16, end: u16 },
}

#[derive(Arbitrary, Debug)]
struct MultithreadedFuzzInput {
    setup: Vec<(u16, u32)>,
    num_threads: u8,
    thread_ops: Vec<Vec<ThreadOp>>,
}

// Each thread owns the keys congruent to its id modulo the thread count, so its own view of
// those keys is exact while it races against everyone else.
fn owned_key(thread_id: usize, num_threads: usize, key: u16) -> u32 {
    (key as u32) * num_threads as u32 + thread_id as u32
}

fn encode(key: u32) -> [u8; 4] {
    key.to_be_bytes()
}

fuzz_target!(|input: MultithreadedFuzzInput| {
    let num_threads = ((input.num_threads % 8) + 1) as usize;
    let tree = Arc::new(Tree::<u32>::new());
    let mut expected = BTreeMap::<u32, u32>::new();

    for (key, val) in input.setup.into_iter().take(256) {
        let thread_id = key as usize % num_threads;
        let k = owned_key(thread_id, num_threads, key);
        tree.insert(encode(k), val);
        expected.insert(k, val);
    }

    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let tree = tree.clone();
            let barrier = barrier.clone();
            let ops: Vec<ThreadOp> = input
                .thread_ops
                .get(thread_id)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .take(500)
                .collect();
            let mut mine: BTreeMap<u32, u32> = expected
                .iter()
                .filter(|(k, _)| **k as usize % num_threads == thread_id)
                .map(|(k, v)| (*k, *v))
                .collect();
            thread::spawn(move || {
                barrier.wait();
                for op in ops {
                    match op {
                        ThreadOp::Insert { key, val } => {
                            let k = owned_key(thread_id, num_threads, key);
                            let updated = tree.insert(encode(k), val);
                            assert_eq!(updated, mine.insert(k, val).is_some());
                        }
                        ThreadOp::Remove { key } => {
                            let k = owned_key(thread_id, num_threads, key);
                            assert_eq!(tree.remove(encode(k)), mine.remove(&k));
                        }
                        ThreadOp::Search { key } => {
                            let k = owned_key(thread_id, num_threads, key);
                            assert_eq!(tree.search(encode(k)), mine.get(&k).copied());
                        }
                        ThreadOp::Scan { start, end } => {
                            let (start, end) = (start.min(end) as u32, start.max(end) as u32);
                            let seen: Vec<(Vec<u8>, u32)> =
                                tree.range(encode(start)..=encode(end)).collect();
                            assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
                            // Other threads' keys may come and go, ours must match exactly.
                            let ours: Vec<(u32, u32)> = seen
                                .into_iter()
                                .map(|(k, v)| {
                                    let k = u32::from_be_bytes(k.try_into().unwrap());
                                    (k, v)
                                })
                                .filter(|(k, _)| *k as usize % num_threads == thread_id)
                                .collect();
                            let want: Vec<(u32, u32)> =
                                mine.range(start..=end).map(|(k, v)| (*k, *v)).collect();
                            assert_eq!(ours, want);
                        }
                    }
                }
                mine
            })
        })
        .collect();

    let mut merged = BTreeMap::new();
    for h in handles {
        merged.extend(h.join().unwrap());
    }
    assert_eq!(tree.len(), merged.len());
    let all: Vec<(Vec<u8>, u32)> = tree.iter().collect();
    let want: Vec<(Vec<u8>, u32)> = merged
        .iter()
        .map(|(k, v)| (encode(*k).to_vec(), *v))
        .collect();
    assert_eq!(all, want);
});
