use log::debug;

use std::{cmp::Ordering, sync::Arc};

use crate::{
    err_at,
    store::Store,
    treap::{
        algebra,
        root::{self, RootRef},
        Depth, Item, ItemRef, Node, NodeLoc, Stats,
    },
    util::Spinlock,
    Result,
};

/// User-supplied total order over keys. The default comparator is
/// lexicographic byte order.
pub type KeyCompare = fn(&[u8], &[u8]) -> Ordering;

fn bytes_compare(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

// Choice function for ordered traversal: given compare(target, key) and
// the node, return whether to visit this node, and the first/second
// edges to descend, in visit order.
type ChoiceFn = for<'a> fn(Ordering, &'a Node) -> (bool, &'a NodeLoc, &'a NodeLoc);

fn ascend_choice(cmp: Ordering, n: &Node) -> (bool, &NodeLoc, &NodeLoc) {
    (cmp != Ordering::Greater, n.as_left(), n.as_right())
}

fn descend_choice(cmp: Ordering, n: &Node) -> (bool, &NodeLoc, &NodeLoc) {
    (cmp == Ordering::Greater, n.as_right(), n.as_left())
}

// Direction taken by a directed walk at each node.
#[derive(Clone, Copy)]
enum Dir {
    Left,
    Right,
}

/// A persistable collection of ordered key/value [Item]s.
///
/// Any number of threads can read concurrently; mutations serialize at
/// the root compare-and-swap, one winner per root generation. A loser
/// gets `ConcurrentMutation` and may retry on the fresh root.
pub struct Collection {
    name: String, // may be "" for a private collection
    store: Arc<Store>,
    compare: KeyCompare,
    // the root-lock: serializes root swap, reference count arithmetic
    // and reclamation against each other.
    root: Spinlock<Option<Arc<RootRef>>>,
}

impl Collection {
    /// Create a collection over `store` ordering keys in lexicographic
    /// byte order.
    pub fn new(name: &str, store: Arc<Store>) -> Collection {
        Collection::new_with_compare(name, store, bytes_compare)
    }

    /// Create a collection with a caller supplied key comparator.
    pub fn new_with_compare(
        name: &str,
        store: Arc<Store>,
        compare: KeyCompare,
    ) -> Collection {
        let root = {
            let root = store.mk_node_loc(None);
            store.mk_root_node_loc(root)
        };
        Collection {
            name: name.to_string(),
            store,
            compare,
            root: Spinlock::new(Some(root)),
        }
    }

    /// Return name of this collection.
    #[inline]
    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    /// Release the current root. Subsequent operations fail with `Fatal`.
    pub fn close(&self) {
        let r = self.root.write().take();
        if let Some(r) = r {
            self.root_dec_ref(&r);
            debug!(target: "treapkv", "{:?}, collection closed", self.name);
        }
    }

    #[inline]
    pub(crate) fn as_store(&self) -> &Store {
        &self.store
    }

    #[inline]
    pub(crate) fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.compare)(a, b)
    }
}

// Root reference counting and the CAS protocol.
impl Collection {
    pub(crate) fn root_add_ref(&self) -> Result<Arc<RootRef>> {
        let root = self.root.read();
        match &*root {
            Some(r) => {
                r.inner.write().refs += 1;
                Ok(Arc::clone(r))
            }
            None => err_at!(Fatal, msg: "collection {:?} is closed", self.name),
        }
    }

    pub(crate) fn root_dec_ref(&self, r: &Arc<RootRef>) {
        let _root = self.root.read(); // root-lock
        let mut pool = self.store.pool_write(); // free-node-lock
        root::dec_ref_unlocked(&mut pool, r);
    }

    // Install `next` as the published root provided the current root is
    // still the caller's `prev` witness. When the displaced root still
    // has readers beyond the collection and the calling writer, chain it
    // to `next` so `next`'s retired nodes outlive those readers.
    fn root_cas(&self, prev: Option<&Arc<RootRef>>, next: Arc<RootRef>) -> Result<()> {
        let mut root = self.root.write();

        let witness_ok = match (&*root, prev) {
            (Some(cur), Some(prev)) => Arc::ptr_eq(cur, prev),
            (None, None) => true,
            _ => false,
        };
        if !witness_ok {
            return err_at!(
                ConcurrentMutation,
                msg: "root changed under collection {:?}", self.name
            );
        }

        *root = Some(Arc::clone(&next));

        if let Some(prev) = prev {
            let mut inner = prev.inner.write();
            if inner.refs > 2 {
                if inner.chain.is_some() {
                    panic!("chain already taken, collection {:?}", self.name);
                }
                inner.chain = Some(Arc::clone(&next));
                drop(inner);
                next.inner.write().refs += 1; // this ref is owned by prev
            }
        }

        Ok(())
    }
}

// Point lookups.
impl Collection {
    /// Retrieve an item by its key. Use `with_value: false` if the value
    /// payload is not needed, which can save I/O for persisted items.
    /// `Ok(None)` when the key is absent.
    pub fn get_item(&self, key: &[u8], with_value: bool) -> Result<Option<Arc<Item>>> {
        let rnl = self.root_add_ref()?;
        let res = self.do_get(&rnl.root, key, with_value);
        self.root_dec_ref(&rnl);
        res
    }

    /// Retrieve a value by its key, `Ok(None)` when absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.get_item(key, true /*with_value*/)? {
            Some(item) => Ok(item.to_value()),
            None => Ok(None),
        }
    }

    fn do_get(
        &self,
        nloc: &NodeLoc,
        key: &[u8],
        with_value: bool,
    ) -> Result<Option<Arc<Item>>> {
        let store = self.store.as_ref();
        let node = match nloc.read(store)? {
            Some(node) => node,
            None => return Ok(None),
        };
        let item = node.as_item().read(store, false /*with_value*/)?;
        if item.as_key().is_empty() {
            return err_at!(Corruption, msg: "item read back without key");
        }
        match self.key_cmp(key, item.as_key()) {
            Ordering::Less => self.do_get(node.as_left(), key, with_value),
            Ordering::Greater => self.do_get(node.as_right(), key, with_value),
            Ordering::Equal if with_value => {
                Ok(Some(node.as_item().read(store, true)?))
            }
            Ordering::Equal => Ok(Some(item)),
        }
    }
}

// Mutations.
impl Collection {
    /// Replace or insert a value for `key`, with a random priority.
    pub fn set(&self, key: Vec<u8>, val: Vec<u8>) -> Result<()> {
        self.set_item(Item::new(key, val, rand::random::<u32>()))
    }

    /// Replace or insert an item. The item is validated for key length
    /// in (0, 65535] and a present value. Callers supplying their own
    /// priorities take responsibility for tree balance.
    pub fn set_item(&self, item: Item) -> Result<()> {
        item.validate()?;
        let rnl = self.root_add_ref()?;
        let res = self.do_set_item(&rnl, item);
        self.root_dec_ref(&rnl);
        res
    }

    fn do_set_item(&self, rnl: &Arc<RootRef>, item: Item) -> Result<()> {
        let store = self.store.as_ref();

        let num_bytes = item.num_bytes();
        let node = store.mk_node(
            ItemRef::in_mem(Arc::new(item)),
            store.mk_node_loc(None),
            store.mk_node_loc(None),
            1,
            num_bytes,
        );
        let nloc = store.mk_node_loc(Some(Arc::clone(&node)));

        let r = algebra::union(self, &rnl.root, &nloc)?;

        let rnl_new = store.mk_root_node_loc(r);
        // can't reclaim the singleton right now, the new root may reach it.
        rnl_new.stash_reclaim(0, node);
        self.root_cas(Some(rnl), rnl_new)?;
        self.root_dec_ref(rnl); // the displaced root's collection ref
        store.free_node_loc(nloc);
        Ok(())
    }

    /// Delete the item of a given key. `Ok(false)` when the key was not
    /// present.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let rnl = self.root_add_ref()?;
        let res = self.do_delete(&rnl, key);
        self.root_dec_ref(&rnl);
        res
    }

    fn do_delete(&self, rnl: &Arc<RootRef>, key: &[u8]) -> Result<bool> {
        let store = self.store.as_ref();

        if self.do_get(&rnl.root, key, false /*with_value*/)?.is_none() {
            return Ok(false);
        }

        let (left, middle, right) = algebra::split(self, &rnl.root, key)?;
        if middle.is_empty() {
            return err_at!(ConcurrentDelete, msg: "key {:?}", key);
        }
        if let Some(node) = middle.node() {
            store.mark_reclaimable(&node);
        }

        let r = algebra::join(self, &left, &right)?;

        let rnl_new = store.mk_root_node_loc(r);
        // can't reclaim the split halves right now due to readers.
        if let Some(node) = left.node() {
            rnl_new.stash_reclaim(0, node);
        }
        if let Some(node) = right.node() {
            rnl_new.stash_reclaim(1, node);
        }
        self.root_cas(Some(rnl), rnl_new)?;
        self.root_dec_ref(rnl); // the displaced root's collection ref
        store.free_node_loc(left);
        store.free_node_loc(middle);
        store.free_node_loc(right);
        Ok(true)
    }
}

// Directed walks: min, max, eviction.
impl Collection {
    /// Retrieve the item with the smallest key, `Ok(None)` on an empty
    /// collection.
    pub fn min_item(&self, with_value: bool) -> Result<Option<Arc<Item>>> {
        self.walk(with_value, |_: &Node| (Some(Dir::Left), true))
    }

    /// Retrieve the item with the largest key, `Ok(None)` on an empty
    /// collection.
    pub fn max_item(&self, with_value: bool) -> Result<Option<Arc<Item>>> {
        self.walk(with_value, |_: &Node| (Some(Dir::Right), true))
    }

    /// Evict the in-memory copy of clean items found by randomly walking
    /// one tree branch. Return the number of items evicted. Eviction is
    /// transparent to readers, an evicted item is re-materialized from
    /// its location on demand.
    pub fn evict_some_items(&self) -> Result<u64> {
        let mut n_evicted = 0;
        self.walk(false /*with_value*/, |node: &Node| {
            if node.as_item().evict() {
                n_evicted += 1;
            }
            let dir = match rand::random::<bool>() {
                true => Dir::Right,
                false => Dir::Left,
            };
            let next = match dir {
                Dir::Left => node.as_left(),
                Dir::Right => node.as_right(),
            };
            match next.is_empty() {
                true => (None, false),
                false => (Some(dir), true),
            }
        })?;
        Ok(n_evicted)
    }

    // Descend from the root following `choose` until it stops the walk
    // or steers into an empty edge, in which case the current node's
    // item is the result.
    fn walk<F>(&self, with_value: bool, mut choose: F) -> Result<Option<Arc<Item>>>
    where
        F: FnMut(&Node) -> (Option<Dir>, bool),
    {
        let rnl = self.root_add_ref()?;
        let res = self.do_walk(&rnl.root, with_value, &mut choose);
        self.root_dec_ref(&rnl);
        res
    }

    fn do_walk<F>(
        &self,
        nloc: &NodeLoc,
        with_value: bool,
        choose: &mut F,
    ) -> Result<Option<Arc<Item>>>
    where
        F: FnMut(&Node) -> (Option<Dir>, bool),
    {
        let store = self.store.as_ref();
        let node = match nloc.read(store)? {
            Some(node) => node,
            None => return Ok(None),
        };
        let (dir, keep_going) = choose(&node);
        if !keep_going {
            return Ok(None);
        }
        let next = match dir {
            Some(Dir::Left) => node.as_left(),
            Some(Dir::Right) => node.as_right(),
            None => return Ok(None),
        };
        match next.is_empty() {
            true => Ok(Some(node.as_item().read(store, with_value)?)),
            false => self.do_walk(next, with_value, choose),
        }
    }
}

// Ordered traversal.
impl Collection {
    /// Visit items with key greater-than-or-equal to `target`, in
    /// ascending key order. Traversal stops when `visitor` returns false.
    pub fn visit_items_ascend<F>(
        &self,
        target: &[u8],
        with_value: bool,
        mut visitor: F,
    ) -> Result<()>
    where
        F: FnMut(&Item) -> bool,
    {
        self.visit_items_ascend_ex(target, with_value, |item, _depth| visitor(item))
    }

    /// Visit items with key less-than `target`, in descending key order.
    /// Traversal stops when `visitor` returns false.
    pub fn visit_items_descend<F>(
        &self,
        target: &[u8],
        with_value: bool,
        mut visitor: F,
    ) -> Result<()>
    where
        F: FnMut(&Item) -> bool,
    {
        self.visit_items_descend_ex(target, with_value, |item, _depth| visitor(item))
    }

    /// Ascending visit with the node depth passed to the visitor.
    pub fn visit_items_ascend_ex<F>(
        &self,
        target: &[u8],
        with_value: bool,
        mut visitor: F,
    ) -> Result<()>
    where
        F: FnMut(&Item, u64) -> bool,
    {
        let rnl = self.root_add_ref()?;
        let res =
            self.visit_nodes(&rnl.root, target, with_value, &mut visitor, 0, ascend_choice);
        self.root_dec_ref(&rnl);
        res.map(|_keep_going| ())
    }

    /// Descending visit with the node depth passed to the visitor.
    pub fn visit_items_descend_ex<F>(
        &self,
        target: &[u8],
        with_value: bool,
        mut visitor: F,
    ) -> Result<()>
    where
        F: FnMut(&Item, u64) -> bool,
    {
        let rnl = self.root_add_ref()?;
        let res = self.visit_nodes(
            &rnl.root,
            target,
            with_value,
            &mut visitor,
            0,
            descend_choice,
        );
        self.root_dec_ref(&rnl);
        res.map(|_keep_going| ())
    }

    fn visit_nodes<F>(
        &self,
        nloc: &NodeLoc,
        target: &[u8],
        with_value: bool,
        visitor: &mut F,
        depth: u64,
        choice: ChoiceFn,
    ) -> Result<bool>
    where
        F: FnMut(&Item, u64) -> bool,
    {
        let store = self.store.as_ref();
        let node = match nloc.read(store)? {
            Some(node) => node,
            None => return Ok(true),
        };
        let item = node.as_item().read(store, false /*with_value*/)?;

        let (visit_self, first, second) =
            choice(self.key_cmp(target, item.as_key()), &node);

        if visit_self {
            if !self.visit_nodes(first, target, with_value, visitor, depth + 1, choice)? {
                return Ok(false);
            }
            let item = node.as_item().read(store, with_value)?;
            if !visitor(&item, depth) {
                return Ok(false);
            }
        }
        self.visit_nodes(second, target, with_value, visitor, depth + 1, choice)
    }
}

// Aggregates, persistence and statistics.
impl Collection {
    /// Return the total number of items, and the total key bytes plus
    /// value bytes, from the root's aggregates. O(1).
    pub fn get_totals(&self) -> Result<(u64, u64)> {
        let rnl = self.root_add_ref()?;
        let res = match rnl.root.read(self.store.as_ref()) {
            Ok(Some(node)) => Ok((node.to_num_nodes(), node.to_num_bytes())),
            Ok(None) => Ok((0, 0)),
            Err(err) => Err(err),
        };
        self.root_dec_ref(&rnl);
        res
    }

    /// Write dirty items and nodes of this collection to the store,
    /// items first in key order, then nodes children-first. Does NOT
    /// make the new root durable; callers persist [Collection::marshal_json]
    /// to make these writes visible to a re-opening.
    pub fn write(&self) -> Result<()> {
        let rnl = self.root_add_ref()?;
        let res = self.do_write(&rnl);
        self.root_dec_ref(&rnl);
        res
    }

    fn do_write(&self, rnl: &Arc<RootRef>) -> Result<()> {
        self.flush_items(&rnl.root)?;
        let loc = self.store.flush_nodes(&rnl.root)?;
        debug!(
            target: "treapkv",
            "{:?}, wrote tree with root at {:?}", self.name, loc
        );
        Ok(())
    }

    // Write unpersisted items of unpersisted nodes, in key order.
    fn flush_items(&self, nloc: &NodeLoc) -> Result<()> {
        if nloc.to_loc().is_some() {
            return Ok(()); // a persisted subtree is clean throughout
        }
        let node = match nloc.node() {
            Some(node) => node,
            None => return Ok(()),
        };
        self.flush_items(node.as_left())?;
        node.as_item().write(self.store.as_ref())?;
        self.flush_items(node.as_right())
    }

    /// JSON representation of the root node's file location, `null` when
    /// the root is unpersisted or empty.
    pub fn marshal_json(&self) -> Result<Vec<u8>> {
        let rnl = self.root_add_ref()?;
        let loc = rnl.root.to_loc();
        self.root_dec_ref(&rnl);
        err_at!(FailJson, serde_json::to_vec(&loc))
    }

    /// Install the root from its JSON file location. Valid only on a
    /// closed collection, any live root fails with `ConcurrentMutation`.
    pub fn unmarshal_json(&self, data: &[u8]) -> Result<()> {
        let loc: Option<crate::treap::Loc> = err_at!(FailJson, serde_json::from_slice(data))?;
        let root = match loc {
            Some(loc) if !loc.is_empty() => self.store.mk_node_loc_at(loc),
            Some(_) | None => self.store.mk_node_loc(None),
        };
        self.root_cas(None, self.store.mk_root_node_loc(root))
    }

    /// Return statistics for this collection.
    pub fn to_stats(&self) -> Result<Stats> {
        let (num_nodes, num_bytes) = self.get_totals()?;
        let mut stats = Stats::new(&self.name);
        stats.num_nodes = num_nodes;
        stats.num_bytes = num_bytes;
        stats.free = self.store.to_free_stats();
        Ok(stats)
    }

    /// Validate the tree with the following rules:
    ///
    /// * Keys obey the collection's comparator between a node and both
    ///   children, in-order.
    /// * Priorities obey max-heap order root to leaves.
    /// * Subtree aggregates equal the recomputed sums.
    ///
    /// Return statistics with the leaf-depth histogram filled in.
    pub fn validate(&self) -> Result<Stats> {
        let rnl = self.root_add_ref()?;
        let res = self.do_validate(&rnl);
        self.root_dec_ref(&rnl);
        res
    }

    fn do_validate(&self, rnl: &Arc<RootRef>) -> Result<Stats> {
        let mut depths = Depth::default();
        let (num_nodes, num_bytes) =
            self.validate_tree(&rnl.root, None, None, None, 1, &mut depths)?;

        let mut stats = Stats::new(&self.name);
        stats.num_nodes = num_nodes;
        stats.num_bytes = num_bytes;
        stats.free = self.store.to_free_stats();
        stats.depths = match depths.to_samples() {
            0 => None,
            _ => Some(depths),
        };
        Ok(stats)
    }

    fn validate_tree(
        &self,
        nloc: &NodeLoc,
        min: Option<&[u8]>,
        max: Option<&[u8]>,
        prio_limit: Option<u32>,
        depth: usize,
        depths: &mut Depth,
    ) -> Result<(u64, u64)> {
        let store = self.store.as_ref();
        let node = match nloc.read(store)? {
            Some(node) => node,
            None => return Ok((0, 0)),
        };
        let item = node.as_item().read(store, false /*with_value*/)?;
        let key = item.as_key();

        if let Some(min) = min {
            if self.key_cmp(key, min) != Ordering::Greater {
                return err_at!(Fatal, msg: "sort order left:{:?} parent:{:?}", key, min);
            }
        }
        if let Some(max) = max {
            if self.key_cmp(key, max) != Ordering::Less {
                return err_at!(Fatal, msg: "sort order right:{:?} parent:{:?}", key, max);
            }
        }
        if let Some(limit) = prio_limit {
            if item.to_priority() > limit {
                return err_at!(
                    Fatal,
                    msg: "heap order {} above parent {}", item.to_priority(), limit
                );
            }
        }

        let prio = Some(item.to_priority());
        let (l_num, l_bytes) =
            self.validate_tree(node.as_left(), min, Some(key), prio, depth + 1, depths)?;
        let (r_num, r_bytes) =
            self.validate_tree(node.as_right(), Some(key), max, prio, depth + 1, depths)?;

        let num_nodes = l_num + r_num + 1;
        let num_bytes = l_bytes + r_bytes + item.num_bytes();
        if node.to_num_nodes() != num_nodes || node.to_num_bytes() != num_bytes {
            return err_at!(
                Corruption,
                msg: "aggregates ({}, {}) expected ({}, {})",
                node.to_num_nodes(), node.to_num_bytes(), num_nodes, num_bytes
            );
        }

        if node.as_left().is_empty() && node.as_right().is_empty() {
            depths.sample(depth);
        }

        Ok((num_nodes, num_bytes))
    }
}

#[cfg(test)]
#[path = "collection_test.rs"]
mod collection_test;
