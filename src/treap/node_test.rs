use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{fs, sync::Arc};

use super::*;
use crate::{
    treap::{Item, ItemRef, Loc},
    Store,
};

#[test]
fn test_node_loc_empty() {
    let nloc = NodeLoc::empty();
    assert!(nloc.is_empty());
    assert_eq!(nloc.to_loc(), None);
    assert!(nloc.node().is_none());
    assert_eq!(nloc.evict(), false);

    let store = Store::memory();
    assert!(nloc.read(&store).unwrap().is_none());
}

#[test]
fn test_node_loc_in_mem() {
    let store = Store::memory();

    let item = Arc::new(Item::new(b"k".to_vec(), b"v".to_vec(), 3));
    let node = Arc::new(Node::new(
        ItemRef::in_mem(item),
        NodeLoc::empty(),
        NodeLoc::empty(),
        1,
        2,
    ));
    let nloc = NodeLoc::in_mem(Arc::clone(&node));

    assert!(!nloc.is_empty());
    assert_eq!(nloc.to_loc(), None);
    // not persisted, eviction must refuse to drop the only copy.
    assert_eq!(nloc.evict(), false);

    let got = nloc.read(&store).unwrap().unwrap();
    assert!(Arc::ptr_eq(&got, &node));
    assert_eq!(got.to_num_nodes(), 1);
    assert_eq!(got.to_num_bytes(), 2);
}

#[test]
fn test_node_loc_lazy_load() {
    let seed: u64 = random();
    println!("test_node_loc_lazy_load seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let path = {
        let mut path = std::env::temp_dir();
        path.push(format!("treapkv-nodeloc-{:x}.data", rng.gen::<u64>()));
        path
    };
    fs::remove_file(&path).ok();
    let store = Store::create(path.as_os_str()).unwrap();

    let item = Item::new(b"key".to_vec(), b"value".to_vec(), 11);
    let item_loc = store.write_item(&item).unwrap();
    let rec = NodeRec {
        item: item_loc,
        left: Loc::EMPTY,
        right: Loc::EMPTY,
        num_nodes: 1,
        num_bytes: item.num_bytes(),
    };
    let node_loc = store.write_node(rec).unwrap();

    let nloc = NodeLoc::on_disk(node_loc, None);
    assert!(!nloc.is_empty());
    assert_eq!(nloc.to_loc(), Some(node_loc));
    assert!(nloc.node().is_none());

    // materialize from the store, the cache sticks.
    let node = nloc.read(&store).unwrap().unwrap();
    assert_eq!(node.to_num_nodes(), 1);
    assert_eq!(node.to_num_bytes(), 8);
    assert!(node.as_left().is_empty());
    assert!(node.as_right().is_empty());
    assert!(nloc.node().is_some());

    let got = node.as_item().read(&store, true).unwrap();
    assert_eq!(got.as_key(), b"key");
    assert_eq!(got.to_value(), Some(b"value".to_vec()));

    // evict and re-materialize.
    assert_eq!(nloc.evict(), true);
    assert!(nloc.node().is_none());
    assert_eq!(nloc.evict(), false);
    let node = nloc.read(&store).unwrap().unwrap();
    assert_eq!(node.to_num_nodes(), 1);

    // a clone shares the cached node but not the cell.
    let other = nloc.clone();
    assert!(other.node().is_some());
    other.evict();
    assert!(nloc.node().is_some());

    drop(store);
    fs::remove_file(&path).ok();
}

#[test]
fn test_node_loc_persist() {
    let seed: u64 = random();
    println!("test_node_loc_persist seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let path = {
        let mut path = std::env::temp_dir();
        path.push(format!("treapkv-persist-{:x}.data", rng.gen::<u64>()));
        path
    };
    fs::remove_file(&path).ok();
    let store = Store::create(path.as_os_str()).unwrap();

    let item = Arc::new(Item::new(b"k".to_vec(), b"v".to_vec(), 3));
    let iref = ItemRef::in_mem(item);
    iref.write(&store).unwrap();
    let node = Arc::new(Node::new(iref, NodeLoc::empty(), NodeLoc::empty(), 1, 2));
    let nloc = NodeLoc::in_mem(Arc::clone(&node));

    let loc = store.flush_nodes(&nloc).unwrap();
    assert!(!loc.is_empty());
    assert_eq!(nloc.to_loc(), Some(loc));
    // the cache survives persisting.
    assert!(nloc.node().is_some());
    // flushing a clean subtree is a no-op.
    assert_eq!(store.flush_nodes(&nloc).unwrap(), loc);

    // a fresh edge at the same location reads the same node back.
    let other = NodeLoc::on_disk(loc, None);
    let got = other.read(&store).unwrap().unwrap();
    assert_eq!(got.to_num_nodes(), 1);
    assert_eq!(got.to_num_bytes(), 2);
    let got_item = got.as_item().read(&store, true).unwrap();
    assert_eq!(got_item.as_key(), b"k");
    assert_eq!(got_item.to_value(), Some(b"v".to_vec()));

    drop(store);
    fs::remove_file(&path).ok();
}
