use cbordata::Cborize;

use std::{fmt, sync::Arc};

use crate::{
    store::Store,
    treap::{ItemRef, Loc},
    util::Spinlock,
    Result,
};

const NODE_REC_VER: u32 = 0x00060001;

/// Immutable treap node: one item cell, two lazy edges, and the
/// aggregates for the subtree hanging off this node.
///
/// Nodes are never mutated after construction; a mutation builds fresh
/// nodes along the changed spine. The only observable change on a live
/// node is the cached pointer inside its item cell and child edges,
/// published for lazy-load and eviction.
pub struct Node {
    item: ItemRef,
    left: NodeLoc,
    right: NodeLoc,
    num_nodes: u64,
    num_bytes: u64,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("num_nodes", &self.num_nodes)
            .field("num_bytes", &self.num_bytes)
            .finish()
    }
}

impl Node {
    pub(crate) fn new(
        item: ItemRef,
        left: NodeLoc,
        right: NodeLoc,
        num_nodes: u64,
        num_bytes: u64,
    ) -> Node {
        Node {
            item,
            left,
            right,
            num_nodes,
            num_bytes,
        }
    }

    #[inline]
    pub fn as_item(&self) -> &ItemRef {
        &self.item
    }

    #[inline]
    pub fn as_left(&self) -> &NodeLoc {
        &self.left
    }

    #[inline]
    pub fn as_right(&self) -> &NodeLoc {
        &self.right
    }

    /// Count of nodes in the subtree rooted here, including this node.
    #[inline]
    pub fn to_num_nodes(&self) -> u64 {
        self.num_nodes
    }

    /// Sum of key-bytes plus value-bytes over the subtree rooted here.
    #[inline]
    pub fn to_num_bytes(&self) -> u64 {
        self.num_bytes
    }
}

// A lazily materialized edge, one of:
//
// * Empty, the empty subtree.
// * Mem, in-memory only, not yet persisted.
// * Disk, persisted at `loc`, optionally with the node cached.
#[derive(Clone)]
enum NEdge {
    Empty,
    Mem { node: Arc<Node> },
    Disk { loc: Loc, node: Option<Arc<Node>> },
}

/// Lazily materialized tree edge, either empty, an in-memory node, a
/// persisted node, or both.
pub struct NodeLoc {
    cell: Spinlock<NEdge>,
}

impl Clone for NodeLoc {
    fn clone(&self) -> NodeLoc {
        let edge = self.cell.read().clone();
        NodeLoc {
            cell: Spinlock::new(edge),
        }
    }
}

impl NodeLoc {
    pub fn empty() -> NodeLoc {
        NodeLoc {
            cell: Spinlock::new(NEdge::Empty),
        }
    }

    pub(crate) fn in_mem(node: Arc<Node>) -> NodeLoc {
        NodeLoc {
            cell: Spinlock::new(NEdge::Mem { node }),
        }
    }

    pub(crate) fn on_disk(loc: Loc, node: Option<Arc<Node>>) -> NodeLoc {
        NodeLoc {
            cell: Spinlock::new(NEdge::Disk { loc, node }),
        }
    }

    /// Return whether this edge is the empty subtree.
    pub fn is_empty(&self) -> bool {
        matches!(&*self.cell.read(), NEdge::Empty)
    }

    /// Return the persisted location, `None` for empty or in-memory
    /// only edges.
    pub fn to_loc(&self) -> Option<Loc> {
        match &*self.cell.read() {
            NEdge::Disk { loc, .. } => Some(*loc),
            NEdge::Empty | NEdge::Mem { .. } => None,
        }
    }

    // Cached node, never does I/O.
    pub(crate) fn node(&self) -> Option<Arc<Node>> {
        match &*self.cell.read() {
            NEdge::Empty => None,
            NEdge::Mem { node } => Some(Arc::clone(node)),
            NEdge::Disk { node, .. } => node.clone(),
        }
    }

    /// Materialize the node behind this edge, reading it from the store
    /// when only a location is held. Concurrent callers all observe one
    /// materialized node. `Ok(None)` is the empty subtree.
    pub fn read(&self, store: &Store) -> Result<Option<Arc<Node>>> {
        let loc = {
            match &*self.cell.read() {
                NEdge::Empty => return Ok(None),
                NEdge::Mem { node } => return Ok(Some(Arc::clone(node))),
                NEdge::Disk {
                    node: Some(node), ..
                } => return Ok(Some(Arc::clone(node))),
                NEdge::Disk { loc, node: None } => *loc,
            }
        };

        let node = store.read_node(&loc)?;

        let mut cell = self.cell.write();
        match &mut *cell {
            NEdge::Disk { node: slot, .. } => match slot {
                Some(exist) => Ok(Some(Arc::clone(exist))),
                None => {
                    *slot = Some(Arc::clone(&node));
                    Ok(Some(node))
                }
            },
            NEdge::Mem { node } => Ok(Some(Arc::clone(node))),
            NEdge::Empty => Ok(Some(node)),
        }
    }

    /// Drop the in-memory node provided this edge is persisted. Return
    /// whether evicted.
    pub fn evict(&self) -> bool {
        let mut cell = self.cell.write();
        match &mut *cell {
            NEdge::Disk {
                node: node @ Some(_),
                ..
            } => {
                *node = None;
                true
            }
            _ => false,
        }
    }

    // Record the location of a freshly persisted in-memory node, keeping
    // the node cached.
    pub(crate) fn persist(&self, loc: Loc) {
        let mut cell = self.cell.write();
        if let NEdge::Mem { node } = &*cell {
            let node = Some(Arc::clone(node));
            *cell = NEdge::Disk { loc, node };
        }
    }

    // Take the cached node out of the edge, used while reclaiming a
    // uniquely owned subtree.
    pub(crate) fn take_node(&self) -> Option<Arc<Node>> {
        let mut cell = self.cell.write();
        match &mut *cell {
            NEdge::Empty => None,
            NEdge::Mem { node } => {
                let node = Arc::clone(node);
                *cell = NEdge::Empty;
                Some(node)
            }
            NEdge::Disk { node, .. } => node.take(),
        }
    }
}

// Serialized form of a node. Child edges and the item cell are stored
// as locations, which is why nodes are flushed children-first and items
// before nodes.
#[derive(Clone, Debug, Cborize)]
pub(crate) struct NodeRec {
    pub item: Loc,
    pub left: Loc,
    pub right: Loc,
    pub num_nodes: u64,
    pub num_bytes: u64,
}

impl NodeRec {
    const ID: u32 = NODE_REC_VER;
}

#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;
