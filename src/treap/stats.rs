use std::{fmt, result};

use crate::treap::Depth;

/// Counters for the store's free pools and reclamation bookkeeping.
/// All arithmetic on these counters happens under the store's free-lock.
#[derive(Clone, Default, Debug)]
pub struct FreeStats {
    pub mk_nodes: u64,
    pub free_nodes: u64,
    pub mk_node_locs: u64,
    pub free_node_locs: u64,
    pub mk_root_refs: u64,
    pub free_root_refs: u64,
    pub mk_items: u64,
    pub marked_reclaimable: u64,
}

impl fmt::Display for FreeStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            concat!(
                "{{ nodes = {}/{}, node_locs = {}/{}, root_refs = {}/{}, ",
                "items = {}, marked_reclaimable = {} }}",
            ),
            self.mk_nodes,
            self.free_nodes,
            self.mk_node_locs,
            self.free_node_locs,
            self.mk_root_refs,
            self.free_root_refs,
            self.mk_items,
            self.marked_reclaimable,
        )
    }
}

/// Statistic type, for [Collection][crate::Collection].
pub struct Stats {
    pub name: String,
    pub num_nodes: u64,
    pub num_bytes: u64,
    pub free: FreeStats,
    /// Depth histogram, available only from a validate() call.
    pub depths: Option<Depth>,
}

impl Stats {
    pub(crate) fn new(name: &str) -> Stats {
        Stats {
            name: name.to_string(),
            num_nodes: Default::default(),
            num_bytes: Default::default(),
            free: Default::default(),
            depths: None,
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        let none = "none".to_string();
        let d = self.depths.as_ref().map_or(none, |x| x.to_string());
        writeln!(f, "treap.name = {:?}", self.name)?;
        writeln!(
            f,
            "treap = {{ num_nodes={}, num_bytes={} }}",
            self.num_nodes, self.num_bytes
        )?;
        writeln!(f, "treap.free = {}", self.free)?;
        writeln!(f, "treap.depths = {}", d)
    }
}
