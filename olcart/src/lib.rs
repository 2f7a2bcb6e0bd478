//! A concurrent Adaptive Radix Tree synchronized with optimistic lock coupling.
//!
//! [`Tree`] is an ordered map from byte strings to values that any number of threads can read
//! and write through a shared reference. Inner nodes adapt between four layouts (4, 16, 48 and
//! 256 children) as they fill and drain, and common key runs are compressed into node paths.
//!
//! Each inner node carries a version word. Readers record versions on the way down and
//! re-check them instead of locking; writers upgrade the one or two versions they need to
//! exclusive locks. A failed check restarts the operation from the root. Unlinked nodes are
//! reclaimed through `crossbeam-epoch`.
//!
//! ```rust
//! use std::sync::Arc;
//! use olcart::Tree;
//!
//! let tree = Arc::new(Tree::new());
//! let handles: Vec<_> = (0..4u32)
//!     .map(|t| {
//!         let tree = tree.clone();
//!         std::thread::spawn(move || {
//!             for i in 0..1000u32 {
//!                 tree.insert(format!("{t}:{i}"), i);
//!             }
//!         })
//!     })
//!     .collect();
//! for h in handles {
//!     h.join().unwrap();
//! }
//! assert_eq!(tree.len(), 4000);
//! assert_eq!(tree.search("2:999"), Some(999));
//! assert_eq!(tree.range("1:".."2:").count(), 1000);
//! ```
//!
//! Features:
//! - `simd_keys` (default): SSE2/NEON edge-byte search in 16-way nodes.
//! - `tracing`: emit restart and structural-change events through `tracing`.
//! - `shuttle`: route the tree's own atomics through shuttle for schedule exploration.

mod tracing_helpers;

pub mod iter;
pub mod keys;
mod mapping;
mod node;
mod prefix;
pub mod stats;
pub mod tree;
pub mod utils;


pub use iter::Iter;
pub use node::NodeKind;
pub use prefix::MAX_PREFIX_LEN;
pub use stats::{NodeStats, TreeStats, TreeStatsTrait};
pub use tree::Tree;
