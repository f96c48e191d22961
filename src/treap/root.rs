use std::sync::Arc;

use crate::{
    treap::{node::Node, stats::FreeStats, NodeLoc},
    util::Spinlock,
};

/// Reference counted holder of one published tree root.
///
/// Every reader of the tree takes a reference on the current RootRef for
/// the duration of its operation, every mutation retires the previous
/// RootRef and installs a new one. A retired RootRef that still has
/// readers chains itself to its successor, owning one reference on it,
/// so nodes the successor retired are not reclaimed while this root's
/// readers may still reach them.
pub struct RootRef {
    pub(crate) root: NodeLoc,
    // Mutated only while the collection's root-lock is held.
    pub(crate) inner: Spinlock<RootInner>,
}

pub(crate) struct RootInner {
    pub refs: u64,
    // Nodes retired by the mutation that installed this root, whose
    // immediate reclamation is unsafe. They may still be reachable, so
    // reclamation scans for duplicates and skips shared nodes.
    pub reclaim_later: [Option<Arc<Node>>; 2],
    // Forward link to the successor root, at most single-linked.
    pub chain: Option<Arc<RootRef>>,
}

impl RootRef {
    pub(crate) fn new(root: NodeLoc) -> Arc<RootRef> {
        let inner = RootInner {
            refs: 1,
            reclaim_later: [None, None],
            chain: None,
        };
        Arc::new(RootRef {
            root,
            inner: Spinlock::new(inner),
        })
    }

    /// Return the root edge of this snapshot.
    pub fn as_root(&self) -> &NodeLoc {
        &self.root
    }

    /// Return the current reference count on this snapshot.
    pub fn to_refs(&self) -> u64 {
        self.inner.read().refs
    }

    /// Return whether this retired snapshot holds a reference on its
    /// successor.
    pub fn is_chained(&self) -> bool {
        self.inner.read().chain.is_some()
    }

    pub(crate) fn stash_reclaim(&self, slot: usize, node: Arc<Node>) {
        self.inner.write().reclaim_later[slot] = Some(node);
    }
}

// Decrement `r`'s reference count, reclaiming its retired tree when the
// count drops to zero. Caller must hold the collection root-lock and the
// store's free-lock, whose guard is the `pool` argument.
pub(crate) fn dec_ref_unlocked(pool: &mut FreeStats, r: &Arc<RootRef>) {
    let (chain, mut later) = {
        let mut inner = r.inner.write();
        inner.refs -= 1;
        if inner.refs > 0 {
            return;
        }
        let later = std::mem::replace(&mut inner.reclaim_later, [None, None]);
        (inner.chain.take(), later)
    };

    // release our reference on the chained successor first, cascading
    // down the chain.
    if let Some(next) = chain {
        dec_ref_unlocked(pool, &next);
    }

    if let Some(node) = r.root.take_node() {
        reclaim_tree(pool, node, &mut later);
    }
    for slot in later.iter_mut() {
        if let Some(node) = slot.take() {
            reclaim_tree(pool, node, &mut [None, None]);
        }
    }

    pool.free_node_locs += 1; // the root edge itself
    pool.free_root_refs += 1;
}

// Walk a retired tree handing nodes back to the pool. A node is released
// only when nothing else references it; `Arc::try_unwrap` failing means
// the node is still shared with the live root, a reclaim-later slot, or
// a slow reader, and the walk stops there. Slots naming a node being
// released are cleared so it is not released twice.
pub(crate) fn reclaim_tree(
    pool: &mut FreeStats,
    node: Arc<Node>,
    later: &mut [Option<Arc<Node>>; 2],
) -> u64 {
    for slot in later.iter_mut() {
        let dup = match slot {
            Some(s) => Arc::ptr_eq(s, &node),
            None => false,
        };
        if dup {
            *slot = None;
        }
    }

    match Arc::try_unwrap(node) {
        Ok(node) => {
            pool.free_nodes += 1;
            pool.free_node_locs += 2; // left and right edges
            let mut freed = 1;
            if let Some(left) = node.as_left().take_node() {
                freed += reclaim_tree(pool, left, later);
            }
            if let Some(right) = node.as_right().take_node() {
                freed += reclaim_tree(pool, right, later);
            }
            freed
        }
        Err(_shared) => 0,
    }
}

#[cfg(test)]
#[path = "root_test.rs"]
mod root_test;
