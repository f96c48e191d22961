use std::{convert::TryFrom, sync::Arc};

use crate::{err_at, store::Store, treap::Loc, util::Spinlock, Result};

/// Maximum key length, in bytes, accepted by a collection.
pub const MAX_KEY_LEN: usize = 0xffff;

// On-disk item record:
//
// *----------*----------*--------------*-----------*-----------*
// | klen u16 | vlen u32 | priority u32 | key bytes | val bytes |
// *----------*----------*--------------*-----------*-----------*
//
// All header fields are big-endian. A with_value=false read fetches
// the header and key bytes only.
pub(crate) const ITEM_HDR_LEN: usize = 10;

/// Single key/value entry of a [Collection][crate::Collection].
///
/// Treated as immutable once handed over to the collection. `priority`
/// dictates the treap's heap order; a uniformly random priority keeps the
/// expected depth logarithmic, pathological priorities degrade lookups
/// but never correctness.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Item {
    key: Vec<u8>,
    val: Option<Vec<u8>>,
    priority: u32,
    num_val_bytes: u64,
}

impl Item {
    pub fn new(key: Vec<u8>, val: Vec<u8>, priority: u32) -> Item {
        let num_val_bytes = val.len() as u64;
        Item {
            key,
            val: Some(val),
            priority,
            num_val_bytes,
        }
    }

    // Item materialized without its value payload, `with_value: false`.
    pub(crate) fn new_header(key: Vec<u8>, priority: u32, num_val_bytes: u64) -> Item {
        Item {
            key,
            val: None,
            priority,
            num_val_bytes,
        }
    }

    #[inline]
    pub fn as_key(&self) -> &[u8] {
        &self.key
    }

    /// Return the value payload, `None` when the item was materialized
    /// without it.
    #[inline]
    pub fn as_value(&self) -> Option<&[u8]> {
        self.val.as_deref()
    }

    pub fn to_value(&self) -> Option<Vec<u8>> {
        self.val.clone()
    }

    #[inline]
    pub fn to_priority(&self) -> u32 {
        self.priority
    }

    /// Serialized size of the value payload, available even when the
    /// payload itself was skipped.
    #[inline]
    pub fn num_val_bytes(&self) -> u64 {
        self.num_val_bytes
    }

    /// Key bytes plus value bytes, the item's contribution to the
    /// subtree aggregates.
    #[inline]
    pub fn num_bytes(&self) -> u64 {
        self.key.len() as u64 + self.num_val_bytes
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.key.is_empty() || self.key.len() > MAX_KEY_LEN {
            err_at!(
                InvalidInput,
                msg: "key length {} not in (0, {}]", self.key.len(), MAX_KEY_LEN
            )
        } else if self.val.is_none() {
            err_at!(InvalidInput, msg: "item value missing")
        } else {
            Ok(())
        }
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> Result<usize> {
        let val = match &self.val {
            Some(val) => val,
            None => return err_at!(Fatal, msg: "can't persist partial item"),
        };
        let klen = err_at!(FailConvert, u16::try_from(self.key.len()))?;
        let vlen = err_at!(FailConvert, u32::try_from(val.len()))?;

        buf.extend_from_slice(&klen.to_be_bytes());
        buf.extend_from_slice(&vlen.to_be_bytes());
        buf.extend_from_slice(&self.priority.to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(val);

        Ok(ITEM_HDR_LEN + self.key.len() + val.len())
    }

    // Return (klen, vlen, priority) out of a header block.
    pub(crate) fn decode_header(buf: &[u8]) -> Result<(usize, usize, u32)> {
        if buf.len() < ITEM_HDR_LEN {
            return err_at!(Corruption, msg: "item header {} bytes", buf.len());
        }
        let klen = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        let vlen = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as usize;
        let priority = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);
        Ok((klen, vlen, priority))
    }
}

// Lazily materialized item cell under a node. Either in-memory only,
// or persisted at a location with an optional cached copy. Once a
// location is present the cached copy always equals what a read would
// reconstruct, so eviction never loses data.
#[derive(Clone)]
enum IRef {
    Mem {
        item: Arc<Item>,
    },
    Disk {
        loc: Loc,
        item: Option<Arc<Item>>,
    },
}

/// Lazily materialized item cell, the `item` edge of a tree node.
pub struct ItemRef {
    cell: Spinlock<IRef>,
}

impl Clone for ItemRef {
    fn clone(&self) -> ItemRef {
        let iref = self.cell.read().clone();
        ItemRef {
            cell: Spinlock::new(iref),
        }
    }
}

impl ItemRef {
    pub(crate) fn in_mem(item: Arc<Item>) -> ItemRef {
        ItemRef {
            cell: Spinlock::new(IRef::Mem { item }),
        }
    }

    pub(crate) fn on_disk(loc: Loc, item: Option<Arc<Item>>) -> ItemRef {
        ItemRef {
            cell: Spinlock::new(IRef::Disk { loc, item }),
        }
    }

    /// Return the persisted location, `None` for in-memory only items.
    pub fn to_loc(&self) -> Option<Loc> {
        match &*self.cell.read() {
            IRef::Mem { .. } => None,
            IRef::Disk { loc, .. } => Some(*loc),
        }
    }

    // Cached copy, never does I/O.
    pub(crate) fn cached(&self) -> Option<Arc<Item>> {
        match &*self.cell.read() {
            IRef::Mem { item } => Some(Arc::clone(item)),
            IRef::Disk { item, .. } => item.clone(),
        }
    }

    /// Materialize the item, reading it from the store when required.
    /// `with_value: false` saves the value I/O for items that are
    /// persisted; the returned item then answers key, priority and
    /// [Item::num_val_bytes] but not the payload.
    pub fn read(&self, store: &Store, with_value: bool) -> Result<Arc<Item>> {
        let loc = {
            match &*self.cell.read() {
                IRef::Mem { item } => return Ok(Arc::clone(item)),
                IRef::Disk { loc, item } => match item {
                    Some(item) if !with_value || item.as_value().is_some() => {
                        return Ok(Arc::clone(item))
                    }
                    _ => *loc,
                },
            }
        };

        let item = Arc::new(store.read_item(&loc, with_value)?);

        // publish, adopting a concurrent publisher's copy when it is at
        // least as complete as ours.
        let mut cell = self.cell.write();
        match &mut *cell {
            IRef::Mem { item } => Ok(Arc::clone(item)),
            IRef::Disk { item: slot, .. } => match slot {
                Some(exist) if !with_value || exist.as_value().is_some() => {
                    Ok(Arc::clone(exist))
                }
                _ => {
                    *slot = Some(Arc::clone(&item));
                    Ok(item)
                }
            },
        }
    }

    /// Drop the in-memory copy provided the item is persisted, in which
    /// case a later read can reconstruct it. Return whether evicted.
    pub fn evict(&self) -> bool {
        let mut cell = self.cell.write();
        match &mut *cell {
            IRef::Disk {
                item: item @ Some(_),
                ..
            } => {
                *item = None;
                true
            }
            _ => false,
        }
    }

    // Persist an in-memory item, no-op when a location already exists.
    pub(crate) fn write(&self, store: &Store) -> Result<()> {
        let item = match &*self.cell.read() {
            IRef::Disk { .. } => return Ok(()),
            IRef::Mem { item } => Arc::clone(item),
        };
        let loc = store.write_item(&item)?;

        let mut cell = self.cell.write();
        if let IRef::Mem { item } = &*cell {
            let item = Some(Arc::clone(item));
            *cell = IRef::Disk { loc, item };
        }
        Ok(())
    }

    pub(crate) fn num_bytes(&self, store: &Store) -> Result<u64> {
        Ok(self.read(store, false /*with_value*/)?.num_bytes())
    }
}

#[cfg(test)]
#[path = "item_test.rs"]
mod item_test;
