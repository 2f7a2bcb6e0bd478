//! Statistics and introspection.
//!
//! Gathered by a depth-first walk over the live tree. The walk validates each inner node after
//! visiting its children and starts over if any of them changed underneath it, so the numbers
//! describe one consistent shape of the tree.

use std::collections::HashMap;

use crossbeam_epoch::{self as epoch, Guard};
use parking_lot_core::SpinWait;

use crate::node::{Node, NodeKind};
use crate::tracing_helpers::trace_log;
use crate::tree::{Tree, backoff};
use crate::utils::optimistic_lock::LockError;

pub trait TreeStatsTrait {
    fn get_tree_stats(&self) -> TreeStats;
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeStats {
    pub width: usize,
    pub node_kind: NodeKind,
    pub total_nodes: usize,
    pub total_children: usize,
    pub density: f64,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TreeStats {
    pub node_stats: HashMap<NodeKind, NodeStats>,
    pub num_leaves: usize,
    pub num_inner_nodes: usize,
    pub total_density: f64,
    pub max_height: usize,
}

fn width_of(kind: NodeKind) -> usize {
    match kind {
        NodeKind::Leaf => 0,
        NodeKind::Node4 => 4,
        NodeKind::Node16 => 16,
        NodeKind::Node48 => 48,
        NodeKind::Node256 => 256,
    }
}

/// Visit `node` and everything below it, parents before children, with each node's height
/// (the root is 1).
pub(crate) fn walk<'g, V>(
    node: &'g Node<V>,
    height: usize,
    guard: &'g Guard,
    visit: &mut dyn FnMut(&'g Node<V>, usize, &'g Guard),
) -> Result<(), LockError> {
    let inner = match node {
        Node::Leaf(_) => {
            visit(node, height, guard);
            return Ok(());
        }
        Node::Inner(inner) => inner,
    };
    let version = inner.lock.read()?;
    visit(node, height, guard);
    let inode = inner.inode(guard);
    let mut after = None;
    while let Some((edge, child)) = inode.next_child(after, guard) {
        walk(unsafe { child.deref() }, height + 1, guard, visit)?;
        after = Some(edge);
    }
    inner.lock.check_version(version)
}

fn collect_stats<V>(tree: &Tree<V>, guard: &Guard) -> Result<TreeStats, LockError> {
    let mut stats = TreeStats::default();
    let version = tree.lock().read()?;
    if let Some(root) = unsafe { tree.root(guard).as_ref() } {
        walk(root, 1, guard, &mut |node, height, guard| {
            stats.max_height = stats.max_height.max(height);
            let Node::Inner(inner) = node else {
                stats.num_leaves += 1;
                return;
            };
            let inode = inner.inode(guard);
            let kind = inode.kind();
            let ns = stats.node_stats.entry(kind).or_insert(NodeStats {
                width: width_of(kind),
                node_kind: kind,
                total_nodes: 0,
                total_children: 0,
                density: 0.0,
            });
            ns.total_nodes += 1;
            ns.total_children += inode.num_children();
        })?;
    }
    tree.lock().check_version(version)?;

    let mut total_children = 0;
    let mut total_width = 0;
    for ns in stats.node_stats.values_mut() {
        total_children += ns.total_children;
        total_width += ns.width * ns.total_nodes;
        ns.density = ns.total_children as f64 / (ns.width * ns.total_nodes) as f64;
    }
    stats.num_inner_nodes = stats.node_stats.values().map(|ns| ns.total_nodes).sum();
    if total_width > 0 {
        stats.total_density = total_children as f64 / total_width as f64;
    }
    Ok(stats)
}

impl<V> TreeStatsTrait for Tree<V> {
    fn get_tree_stats(&self) -> TreeStats {
        let mut spin = SpinWait::new();
        loop {
            let guard = &epoch::pin();
            match collect_stats(self, guard) {
                Ok(stats) => return stats,
                Err(_e) => {
                    trace_log!(error = %_e, "stats restart");
                    backoff(&mut spin);
                }
            }
        }
    }
}
