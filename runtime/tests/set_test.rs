// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fil_market_runtime::{Set, DEFAULT_HAMT_CONFIG};
use fvm_ipld_blockstore::MemoryBlockstore;

#[test]
fn insert_is_idempotent() {
    let store = MemoryBlockstore::new();
    let mut set = Set::<_, u64>::empty(&store, DEFAULT_HAMT_CONFIG, "t");

    assert!(!set.contains(&42).unwrap());

    set.insert(&42).unwrap();
    assert!(set.contains(&42).unwrap());

    // inserting twice is a no-op
    set.insert(&42).unwrap();
    assert_eq!(set.keys().unwrap(), [42u64]);
}

#[test]
fn keys_lists_all_members() {
    let store = MemoryBlockstore::new();
    let mut set = Set::<_, u64>::empty(&store, DEFAULT_HAMT_CONFIG, "t");

    set.insert(&0u64).unwrap();

    assert_eq!(set.keys().unwrap(), [0u64]);

    set.insert(&1u64).unwrap();
    set.insert(&2u64).unwrap();
    set.insert(&3u64).unwrap();

    let mut keys = set.keys().unwrap();
    keys.sort_unstable();
    assert_eq!(keys, [0u64, 1, 2, 3]);
}

#[test]
fn remove_reports_membership() {
    let store = MemoryBlockstore::new();
    let mut set = Set::<_, u64>::empty(&store, DEFAULT_HAMT_CONFIG, "t");

    assert!(!set.contains(&0).unwrap());
    set.insert(&0).unwrap();
    assert!(set.contains(&0).unwrap());
    assert!(set.remove(&0).unwrap());
    assert!(!set.contains(&0).unwrap());
    assert!(set.is_empty());

    // removing an absent key reports it was not present
    assert!(!set.remove(&0).unwrap());
}

#[test]
fn members_survive_reload() {
    let store = MemoryBlockstore::new();
    let mut set = Set::<_, u64>::empty(&store, DEFAULT_HAMT_CONFIG, "t");
    set.insert(&7).unwrap();
    set.insert(&9).unwrap();
    let root = set.flush().unwrap();

    let reloaded = Set::<_, u64>::load(&store, &root, DEFAULT_HAMT_CONFIG, "t").unwrap();
    assert!(reloaded.contains(&7).unwrap());
    assert!(reloaded.contains(&9).unwrap());
    assert!(!reloaded.contains(&8).unwrap());
}
