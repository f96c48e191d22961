use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{collections::BTreeMap, sync::Arc};

use super::*;
use crate::{treap::Item, Store};

fn load(c: &Collection, items: &[(&[u8], u32)]) {
    for (key, priority) in items {
        let item = Item::new(key.to_vec(), b"v".to_vec(), *priority);
        c.set_item(item).unwrap();
    }
}

fn collect(c: &Collection, nloc: &NodeLoc) -> Vec<(Vec<u8>, u32)> {
    let mut out = vec![];
    do_collect(c, nloc, &mut out);
    out
}

fn do_collect(c: &Collection, nloc: &NodeLoc, out: &mut Vec<(Vec<u8>, u32)>) {
    let node = match nloc.read(c.as_store()).unwrap() {
        Some(node) => node,
        None => return,
    };
    do_collect(c, node.as_left(), out);
    let item = node.as_item().read(c.as_store(), false).unwrap();
    out.push((item.as_key().to_vec(), item.to_priority()));
    do_collect(c, node.as_right(), out);
}

// every node's priority dominates its children's.
fn check_heap(c: &Collection, nloc: &NodeLoc, limit: Option<u32>) {
    let node = match nloc.read(c.as_store()).unwrap() {
        Some(node) => node,
        None => return,
    };
    let item = node.as_item().read(c.as_store(), false).unwrap();
    if let Some(limit) = limit {
        assert!(item.to_priority() <= limit);
    }
    let prio = Some(item.to_priority());
    check_heap(c, node.as_left(), prio);
    check_heap(c, node.as_right(), prio);
}

#[test]
fn test_split() {
    let store = Arc::new(Store::memory());
    let c = Collection::new("split", store);
    load(
        &c,
        &[
            (b"m", 100),
            (b"d", 50),
            (b"t", 75),
            (b"a", 25),
            (b"g", 10),
            (b"x", 30),
        ],
    );

    let rnl = c.root_add_ref().unwrap();

    // split on a present key.
    let (lo, mid, hi) = split(&c, &rnl.root, b"m").unwrap();
    assert!(!mid.is_empty());
    let mid_node = mid.read(c.as_store()).unwrap().unwrap();
    let mid_item = mid_node.as_item().read(c.as_store(), false).unwrap();
    assert_eq!(mid_item.as_key(), b"m");
    let lo_items = collect(&c, &lo);
    let lo_keys: Vec<&[u8]> = lo_items.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(lo_keys, vec![b"a".as_ref(), b"d".as_ref(), b"g".as_ref()]);
    let hi_items = collect(&c, &hi);
    let hi_keys: Vec<&[u8]> = hi_items.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(hi_keys, vec![b"t".as_ref(), b"x".as_ref()]);
    check_heap(&c, &lo, None);
    check_heap(&c, &hi, None);

    // split on an absent key partitions around it.
    let (lo, mid, hi) = split(&c, &rnl.root, b"k").unwrap();
    assert!(mid.is_empty());
    let lo_items = collect(&c, &lo);
    let lo_keys: Vec<&[u8]> = lo_items.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(lo_keys, vec![b"a".as_ref(), b"d".as_ref(), b"g".as_ref()]);
    let hi_items = collect(&c, &hi);
    let hi_keys: Vec<&[u8]> = hi_items.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(hi_keys, vec![b"m".as_ref(), b"t".as_ref(), b"x".as_ref()]);

    // the split never touched the original tree.
    let all = collect(&c, &rnl.root);
    assert_eq!(all.len(), 6);

    c.root_dec_ref(&rnl);
    c.close();
}

#[test]
fn test_join() {
    let store = Arc::new(Store::memory());
    let c = Collection::new("join", store);
    load(
        &c,
        &[(b"m", 100), (b"d", 50), (b"t", 75), (b"a", 25), (b"x", 30)],
    );

    let rnl = c.root_add_ref().unwrap();
    let (lo, mid, hi) = split(&c, &rnl.root, b"m").unwrap();
    assert!(!mid.is_empty());

    let joined = join(&c, &lo, &hi).unwrap();
    let items = collect(&c, &joined);
    let keys: Vec<&[u8]> = items.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(
        keys,
        vec![b"a".as_ref(), b"d".as_ref(), b"t".as_ref(), b"x".as_ref()]
    );
    check_heap(&c, &joined, None);

    // joining with the empty tree returns the other side.
    let empty = c.as_store().mk_node_loc(None);
    let same = join(&c, &joined, &empty).unwrap();
    assert_eq!(collect(&c, &same), items);
    let same = join(&c, &empty, &joined).unwrap();
    assert_eq!(collect(&c, &same), items);

    c.root_dec_ref(&rnl);
    c.close();
}

#[test]
fn test_union_overlap() {
    let store = Arc::new(Store::memory());
    let c = Collection::new("union", Arc::clone(&store));
    load(&c, &[(b"m", 100), (b"d", 50), (b"t", 75)]);

    // an equal-key singleton supersedes, regardless of priority order.
    for &priority in [1_u32, 100, 4000].iter() {
        let rnl = c.root_add_ref().unwrap();
        let item = Item::new(b"m".to_vec(), b"new".to_vec(), priority);
        let num_bytes = item.num_bytes();
        let node = store.mk_node(
            crate::treap::ItemRef::in_mem(Arc::new(item)),
            store.mk_node_loc(None),
            store.mk_node_loc(None),
            1,
            num_bytes,
        );
        let singleton = store.mk_node_loc(Some(node));

        let merged = union(&c, &rnl.root, &singleton).unwrap();
        let node = merged.read(c.as_store()).unwrap().unwrap();
        assert_eq!(node.to_num_nodes(), 3);
        check_heap(&c, &merged, None);

        let mut found = None;
        let mut out = vec![];
        do_collect(&c, &merged, &mut out);
        for (key, prio) in out {
            if key == b"m" {
                found = Some(prio);
            }
        }
        assert_eq!(found, Some(priority));

        c.root_dec_ref(&rnl);
    }
    c.close();
}

#[test]
fn test_pathological_priorities() {
    let seed: u64 = random();
    println!("test_pathological_priorities seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let store = Arc::new(Store::memory());
    let c = Collection::new("pathological", store);
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

    // constant priorities degrade balance but never correctness.
    for _ in 0..500 {
        let key = format!("key{:03}", rng.gen_range(0..200)).into_bytes();
        let value = format!("val{:03}", rng.gen_range(0..1000)).into_bytes();
        let item = Item::new(key.clone(), value.clone(), 7);
        c.set_item(item).unwrap();
        model.insert(key, value);
    }
    for (key, value) in model.iter() {
        assert_eq!(c.get(key).unwrap().as_ref(), Some(value));
    }

    let stats = c.validate().unwrap();
    assert_eq!(stats.num_nodes as usize, model.len());

    c.close();
}
