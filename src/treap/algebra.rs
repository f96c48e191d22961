// Copy-on-write treap algebra: union, split and join over lazy edges.
//
// These operations never mutate an existing node. Any node on a changed
// spine is rebuilt fresh, so the tree a concurrent reader entered through
// the old root stays intact. Subtree aggregates are recomputed from the
// children's aggregates, which may require reading children through the
// store.

use std::{cmp::Ordering, sync::Arc};

use crate::{
    err_at,
    store::Store,
    treap::{Collection, Node, NodeLoc},
    Result,
};

// Merge two treaps where `that`'s keys may overlap `this`'s. On an
// equal key, the item of `that` - the inserted side - supersedes the
// item of `this`. Priority ties also resolve toward `that`.
pub(crate) fn union(c: &Collection, this: &NodeLoc, that: &NodeLoc) -> Result<NodeLoc> {
    if this.is_empty() {
        return Ok(that.clone());
    }
    if that.is_empty() {
        return Ok(this.clone());
    }

    let store = c.as_store();
    let this_node = read_node(store, this)?;
    let that_node = read_node(store, that)?;
    let this_item = this_node.as_item().read(store, false /*with_value*/)?;
    let that_item = that_node.as_item().read(store, false /*with_value*/)?;

    if this_item.to_priority() > that_item.to_priority() {
        let (left, middle, right) = split(c, that, this_item.as_key())?;
        let new_left = union(c, this_node.as_left(), &left)?;
        let new_right = union(c, this_node.as_right(), &right)?;

        match middle.read(store)? {
            // the inserted side carries an equal key and its item
            // supersedes this node's. Re-insert the superseding item so
            // its own priority decides where it lands, keeping the heap
            // order intact.
            Some(middle_node) => {
                store.mark_reclaimable(&this_node);
                let item_ref = middle_node.as_item().clone();
                let item_bytes = item_ref.num_bytes(store)?;
                let joined = join(c, &new_left, &new_right)?;
                let node = store.mk_node(
                    item_ref,
                    store.mk_node_loc(None),
                    store.mk_node_loc(None),
                    1,
                    item_bytes,
                );
                let singleton = store.mk_node_loc(Some(node));
                union(c, &joined, &singleton)
            }
            None => {
                let (l_num, l_bytes) = num_info(store, &new_left)?;
                let (r_num, r_bytes) = num_info(store, &new_right)?;
                let node = store.mk_node(
                    this_node.as_item().clone(),
                    new_left,
                    new_right,
                    l_num + r_num + 1,
                    l_bytes + r_bytes + this_item.num_bytes(),
                );
                Ok(store.mk_node_loc(Some(node)))
            }
        }
    } else {
        let (left, middle, right) = split(c, this, that_item.as_key())?;
        let new_left = union(c, &left, that_node.as_left())?;
        let new_right = union(c, &right, that_node.as_right())?;
        let (l_num, l_bytes) = num_info(store, &new_left)?;
        let (r_num, r_bytes) = num_info(store, &new_right)?;

        // a non-empty middle came from the existing side; the inserted
        // side's item supersedes it.
        if let Some(middle_node) = middle.node() {
            store.mark_reclaimable(&middle_node);
        }

        let node = store.mk_node(
            that_node.as_item().clone(),
            new_left,
            new_right,
            l_num + r_num + 1,
            l_bytes + r_bytes + that_item.num_bytes(),
        );
        Ok(store.mk_node_loc(Some(node)))
    }
}

// Partition a treap into keys less than `key`, the single node whose key
// equals `key` (possibly empty), and keys greater than `key`. The middle
// is the matching node itself; its children are distributed into the
// low and high parts.
pub(crate) fn split(
    c: &Collection,
    nloc: &NodeLoc,
    key: &[u8],
) -> Result<(NodeLoc, NodeLoc, NodeLoc)> {
    if nloc.is_empty() {
        let store = c.as_store();
        let (lo, mid, hi) = (
            store.mk_node_loc(None),
            store.mk_node_loc(None),
            store.mk_node_loc(None),
        );
        return Ok((lo, mid, hi));
    }

    let store = c.as_store();
    let node = read_node(store, nloc)?;
    let item = node.as_item().read(store, false /*with_value*/)?;

    match c.key_cmp(key, item.as_key()) {
        Ordering::Equal => {
            Ok((node.as_left().clone(), nloc.clone(), node.as_right().clone()))
        }
        Ordering::Less => {
            let (ll, lm, lr) = split(c, node.as_left(), key)?;

            // rebuild this node over the right residue of the split.
            let (r_num, r_bytes) = num_info(store, &lr)?;
            let (nr_num, nr_bytes) = num_info(store, node.as_right())?;
            let hi = store.mk_node(
                node.as_item().clone(),
                lr,
                node.as_right().clone(),
                r_num + nr_num + 1,
                r_bytes + nr_bytes + item.num_bytes(),
            );
            Ok((ll, lm, store.mk_node_loc(Some(hi))))
        }
        Ordering::Greater => {
            let (rl, rm, rr) = split(c, node.as_right(), key)?;

            let (l_num, l_bytes) = num_info(store, &rl)?;
            let (nl_num, nl_bytes) = num_info(store, node.as_left())?;
            let lo = store.mk_node(
                node.as_item().clone(),
                node.as_left().clone(),
                rl,
                nl_num + l_num + 1,
                nl_bytes + l_bytes + item.num_bytes(),
            );
            Ok((store.mk_node_loc(Some(lo)), rm, rr))
        }
    }
}

// Merge two treaps where every key of `left` sorts before every key of
// `right`. Priority ties resolve toward `left`.
pub(crate) fn join(c: &Collection, left: &NodeLoc, right: &NodeLoc) -> Result<NodeLoc> {
    if left.is_empty() {
        return Ok(right.clone());
    }
    if right.is_empty() {
        return Ok(left.clone());
    }

    let store = c.as_store();
    let l_node = read_node(store, left)?;
    let r_node = read_node(store, right)?;
    let l_item = l_node.as_item().read(store, false /*with_value*/)?;
    let r_item = r_node.as_item().read(store, false /*with_value*/)?;

    if l_item.to_priority() >= r_item.to_priority() {
        let new_right = join(c, l_node.as_right(), right)?;
        let (l_num, l_bytes) = num_info(store, l_node.as_left())?;
        let (r_num, r_bytes) = num_info(store, &new_right)?;
        let node = store.mk_node(
            l_node.as_item().clone(),
            l_node.as_left().clone(),
            new_right,
            l_num + r_num + 1,
            l_bytes + r_bytes + l_item.num_bytes(),
        );
        Ok(store.mk_node_loc(Some(node)))
    } else {
        let new_left = join(c, left, r_node.as_left())?;
        let (l_num, l_bytes) = num_info(store, &new_left)?;
        let (r_num, r_bytes) = num_info(store, r_node.as_right())?;
        let node = store.mk_node(
            r_node.as_item().clone(),
            new_left,
            r_node.as_right().clone(),
            l_num + r_num + 1,
            l_bytes + r_bytes + r_item.num_bytes(),
        );
        Ok(store.mk_node_loc(Some(node)))
    }
}

fn read_node(store: &Store, nloc: &NodeLoc) -> Result<Arc<Node>> {
    match nloc.read(store)? {
        Some(node) => Ok(node),
        None => err_at!(Fatal, msg: "read on an empty edge"),
    }
}

// (num_nodes, num_bytes) aggregates of the subtree behind `nloc`.
fn num_info(store: &Store, nloc: &NodeLoc) -> Result<(u64, u64)> {
    match nloc.read(store)? {
        Some(node) => Ok((node.to_num_nodes(), node.to_num_bytes())),
        None => Ok((0, 0)),
    }
}

#[cfg(test)]
#[path = "algebra_test.rs"]
mod algebra_test;
