//! Module implement the append-only backing store for collections.
//!
//! A [Store] hands out item and node records by their [Loc], appends
//! fresh records at the file's end, and owns the free pools that nodes,
//! node-locs and root-refs are drawn from and reclaimed into. Pool
//! arithmetic is serialized by a single free-lock so recycled handles
//! can never race their readers. A memory-only store supports every
//! operation except persistence.

use log::info;

use std::{
    convert::TryFrom,
    ffi, fs, io,
    io::{Read, Seek},
    path,
    sync::{Arc, Mutex},
};

use crate::{
    err_at, read_file,
    treap::{FreeStats, Item, ItemRef, Loc, Node, NodeLoc, NodeRec, RootRef, ITEM_HDR_LEN},
    util,
    util::{spinlock, Spinlock},
    write_file, Result,
};

struct StoreFile {
    fd: fs::File,
    fpos: u64, // append offset
    location: ffi::OsString,
}

/// Backing store for one or more collections.
pub struct Store {
    file: Option<Mutex<StoreFile>>,
    // the free-node-lock: serializes pool draws and returns.
    pool: Spinlock<FreeStats>,
}

impl Store {
    /// Create a memory-only store. Collections over it support every
    /// operation except `write()`.
    pub fn memory() -> Store {
        Store {
            file: None,
            pool: Spinlock::new(FreeStats::default()),
        }
    }

    /// Create a fresh store file, truncating any existing file at `path`.
    pub fn create(path: &ffi::OsStr) -> Result<Store> {
        let os_path = path::Path::new(path);
        if let Some(parent) = os_path.parent() {
            err_at!(IOError, fs::create_dir_all(parent))?;
        }
        let fd = {
            let mut opts = fs::OpenOptions::new();
            err_at!(IOError, opts.create(true).truncate(true).read(true).write(true).open(os_path))?
        };
        info!(target: "treapkv", "created store file {:?}", path);

        let file = StoreFile {
            fd,
            fpos: 0,
            location: path.to_os_string(),
        };
        Ok(Store {
            file: Some(Mutex::new(file)),
            pool: Spinlock::new(FreeStats::default()),
        })
    }

    /// Open an existing store file, appends go past its current end.
    pub fn open(path: &ffi::OsStr) -> Result<Store> {
        let fd = {
            let mut opts = fs::OpenOptions::new();
            err_at!(IOError, opts.read(true).write(true).open(path::Path::new(path)))?
        };
        let fpos = err_at!(IOError, fd.metadata())?.len();
        info!(target: "treapkv", "opened store file {:?} at {}", path, fpos);

        let file = StoreFile {
            fd,
            fpos,
            location: path.to_os_string(),
        };
        Ok(Store {
            file: Some(Mutex::new(file)),
            pool: Spinlock::new(FreeStats::default()),
        })
    }

    fn to_file(&self) -> Result<&Mutex<StoreFile>> {
        match &self.file {
            Some(file) => Ok(file),
            None => err_at!(InvalidFile, msg: "memory-only store has no file"),
        }
    }
}

// Record I/O.
impl Store {
    /// Read the item record at `loc`. With `with_value: false` only the
    /// header and key bytes are fetched.
    pub fn read_item(&self, loc: &Loc, with_value: bool) -> Result<Item> {
        let file = self.to_file()?;

        let (priority, key, val, vlen) = {
            let mut sf = err_at!(Fatal, file.lock())?;
            let fd = &mut sf.fd;
            let seek = io::SeekFrom::Start(loc.fpos);
            let hdr = read_file!(fd, seek, ITEM_HDR_LEN as u64, "item header")?;
            let (klen, vlen, priority) = Item::decode_header(&hdr)?;
            if klen == 0 {
                return err_at!(Corruption, msg: "item at {} without key", loc.fpos);
            }
            let length = (ITEM_HDR_LEN + klen + vlen) as u64;
            if length != loc.length {
                return err_at!(
                    Corruption,
                    msg: "item at {} length {} != {}", loc.fpos, length, loc.length
                );
            }
            let seek = io::SeekFrom::Start(loc.fpos + ITEM_HDR_LEN as u64);
            let key = read_file!(fd, seek, klen as u64, "item key")?;
            let val = match with_value {
                true => {
                    let seek =
                        io::SeekFrom::Start(loc.fpos + (ITEM_HDR_LEN + klen) as u64);
                    Some(read_file!(fd, seek, vlen as u64, "item value")?)
                }
                false => None,
            };
            (priority, key, val, vlen)
        };

        self.pool.write().mk_items += 1;

        let item = match val {
            Some(val) => Item::new(key, val, priority),
            None => Item::new_header(key, priority, vlen as u64),
        };
        Ok(item)
    }

    /// Read the node record at `loc` and rebuild the node with lazy
    /// edges pointing at its children's locations.
    pub fn read_node(&self, loc: &Loc) -> Result<Arc<Node>> {
        let block = {
            let file = self.to_file()?;
            let mut sf = err_at!(Fatal, file.lock())?;
            let fd = &mut sf.fd;
            read_file!(fd, io::SeekFrom::Start(loc.fpos), loc.length, "node record")?
        };
        let (rec, _) = util::from_cbor_bytes::<NodeRec>(&block)?;

        if rec.item.is_empty() {
            return err_at!(Corruption, msg: "node at {} without item", loc.fpos);
        }
        let item = ItemRef::on_disk(rec.item, None);
        let left = match rec.left.is_empty() {
            true => NodeLoc::empty(),
            false => NodeLoc::on_disk(rec.left, None),
        };
        let right = match rec.right.is_empty() {
            true => NodeLoc::empty(),
            false => NodeLoc::on_disk(rec.right, None),
        };
        Ok(self.mk_node(item, left, right, rec.num_nodes, rec.num_bytes))
    }

    /// Append an item record, returning its location.
    pub(crate) fn write_item(&self, item: &Item) -> Result<Loc> {
        let mut buf = vec![];
        let n = item.encode(&mut buf)?;

        let file = self.to_file()?;
        let mut sf = err_at!(Fatal, file.lock())?;
        let fpos = sf.fpos;
        write_file!(sf.fd, &buf, &sf.location, "item record")?;
        sf.fpos += n as u64;
        Ok(Loc::new(fpos, n as u64))
    }

    // Append a node record, returning its location.
    pub(crate) fn write_node(&self, rec: NodeRec) -> Result<Loc> {
        let buf = util::into_cbor_bytes(rec)?;
        let n = err_at!(FailConvert, u64::try_from(buf.len()))?;

        let file = self.to_file()?;
        let mut sf = err_at!(Fatal, file.lock())?;
        let fpos = sf.fpos;
        write_file!(sf.fd, &buf, &sf.location, "node record")?;
        sf.fpos += n;
        Ok(Loc::new(fpos, n))
    }

    // Persist every unpersisted node under `nloc`, children before
    // parents so each record can embed its children's locations. Items
    // must have been written already. Return the subtree's location,
    // the empty sentinel for an empty edge.
    pub(crate) fn flush_nodes(&self, nloc: &NodeLoc) -> Result<Loc> {
        if let Some(loc) = nloc.to_loc() {
            return Ok(loc);
        }
        let node = match nloc.node() {
            Some(node) => node,
            None => return Ok(Loc::EMPTY),
        };

        let left = self.flush_nodes(node.as_left())?;
        let right = self.flush_nodes(node.as_right())?;
        let item = match node.as_item().to_loc() {
            Some(loc) => loc,
            None => return err_at!(Fatal, msg: "flush_nodes before items are written"),
        };

        let rec = NodeRec {
            item,
            left,
            right,
            num_nodes: node.to_num_nodes(),
            num_bytes: node.to_num_bytes(),
        };
        let loc = self.write_node(rec)?;
        nloc.persist(loc);
        Ok(loc)
    }
}

// Free pools. In this implementation handles are shared-ownership
// allocations, so "freeing" returns the handle's accounting to the pool
// while the allocation is released once the last reader lets go. Draws
// and returns stay serialized under the free-lock.
impl Store {
    pub(crate) fn mk_node(
        &self,
        item: ItemRef,
        left: NodeLoc,
        right: NodeLoc,
        num_nodes: u64,
        num_bytes: u64,
    ) -> Arc<Node> {
        self.pool.write().mk_nodes += 1;
        Arc::new(Node::new(item, left, right, num_nodes, num_bytes))
    }

    pub(crate) fn mk_node_loc(&self, node: Option<Arc<Node>>) -> NodeLoc {
        self.pool.write().mk_node_locs += 1;
        match node {
            Some(node) => NodeLoc::in_mem(node),
            None => NodeLoc::empty(),
        }
    }

    pub(crate) fn mk_node_loc_at(&self, loc: Loc) -> NodeLoc {
        self.pool.write().mk_node_locs += 1;
        NodeLoc::on_disk(loc, None)
    }

    pub(crate) fn mk_root_node_loc(&self, root: NodeLoc) -> Arc<RootRef> {
        self.pool.write().mk_root_refs += 1;
        RootRef::new(root)
    }

    pub(crate) fn free_node_loc(&self, nloc: NodeLoc) {
        self.pool.write().free_node_locs += 1;
        drop(nloc);
    }

    pub(crate) fn mark_reclaimable(&self, _node: &Arc<Node>) {
        self.pool.write().marked_reclaimable += 1;
    }

    pub(crate) fn pool_write(&self) -> spinlock::WriteGuard<FreeStats> {
        self.pool.write()
    }

    /// Return a snapshot of the free-pool counters.
    pub fn to_free_stats(&self) -> FreeStats {
        self.pool.read().clone()
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
