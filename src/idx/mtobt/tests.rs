/*
 * Created on Tue Apr 23 2024
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2024, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

use {
    super::imp::OrdMultiset,
    parking_lot::RwLock,
    rand::{seq::SliceRandom, Rng},
    std::{
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
        thread::{self, JoinHandle},
    },
};

type Tree = OrdMultiset<u64>;

fn snapshot(tree: &Tree) -> Vec<u64> {
    let mut keys = Vec::new();
    tree.traverse(&mut keys);
    keys
}

fn is_sorted(keys: &[u64]) -> bool {
    keys.windows(2).all(|w| w[0] <= w[1])
}

// empty

#[test]
fn empty_tree() {
    let tree = Tree::new(3);
    assert!(!tree.contains(&10));
    assert!(snapshot(&tree).is_empty());
    tree.validate();
}

#[test]
fn remove_on_empty_is_a_noop() {
    let tree = Tree::new(2);
    tree.remove(&10);
    assert!(snapshot(&tree).is_empty());
    tree.validate();
}

// single-threaded lifecycles

#[test]
fn staged_removals() {
    let tree = Tree::new(3);
    for key in [1, 3, 7, 10, 11, 13, 14, 15, 18, 16, 19, 24, 25, 26] {
        tree.insert(key).unwrap();
    }
    assert_eq!(
        snapshot(&tree),
        [1, 3, 7, 10, 11, 13, 14, 15, 16, 18, 19, 24, 25, 26]
    );
    tree.remove(&13);
    assert_eq!(
        snapshot(&tree),
        [1, 3, 7, 10, 11, 14, 15, 16, 18, 19, 24, 25, 26]
    );
    tree.remove(&7);
    assert_eq!(snapshot(&tree), [1, 3, 10, 11, 14, 15, 16, 18, 19, 24, 25, 26]);
    tree.remove(&1);
    tree.remove(&11);
    tree.remove(&14);
    tree.remove(&26);
    assert_eq!(snapshot(&tree), [3, 10, 15, 16, 18, 19, 24, 25]);
    assert!(tree.contains(&15));
    assert!(!tree.contains(&26));
    assert!(!tree.contains(&13));
    tree.validate();
}

#[test]
fn duplicate_multiplicity() {
    let tree = Tree::new(2);
    for key in [5, 1, 9] {
        tree.insert(key).unwrap();
    }
    tree.insert(7).unwrap();
    tree.insert(7).unwrap();
    tree.insert(7).unwrap();
    assert_eq!(snapshot(&tree), [1, 5, 7, 7, 7, 9]);
    tree.remove(&7);
    tree.remove(&7);
    assert!(tree.contains(&7));
    assert_eq!(snapshot(&tree), [1, 5, 7, 9]);
    tree.remove(&7);
    assert!(!tree.contains(&7));
    assert_eq!(snapshot(&tree), [1, 5, 9]);
    tree.validate();
}

#[test]
fn insert_then_remove_restores_absence() {
    let tree = Tree::new(3);
    for key in [10, 20, 30] {
        tree.insert(key).unwrap();
    }
    assert!(!tree.contains(&25));
    tree.insert(25).unwrap();
    assert!(tree.contains(&25));
    tree.remove(&25);
    assert!(!tree.contains(&25));
    tree.validate();
}

#[test]
fn insertion_order_oblivious() {
    const KEYS: u64 = 512;
    let mut rng = rand::thread_rng();
    let mut keys: Vec<u64> = (0..KEYS).collect();
    for _ in 0..4 {
        keys.shuffle(&mut rng);
        let tree = Tree::new(3);
        for key in &keys {
            tree.insert(*key).unwrap();
        }
        for key in 0..KEYS {
            assert!(tree.contains(&key));
        }
        assert_eq!(snapshot(&tree), (0..KEYS).collect::<Vec<_>>());
        tree.validate();
    }
}

#[test]
fn min_degree_full_drain() {
    let tree = Tree::new(2);
    for key in 0..1000 {
        tree.insert(key).unwrap();
    }
    tree.validate();
    for key in 0..1000 {
        tree.remove(&key);
    }
    assert!(snapshot(&tree).is_empty());
    for key in 0..1000 {
        assert!(!tree.contains(&key));
    }
    tree.validate();
}

#[test]
fn absent_removal_is_identity() {
    let tree = Tree::new(3);
    for key in [2, 4, 6, 8, 10, 12, 14, 16] {
        tree.insert(key).unwrap();
    }
    let before = snapshot(&tree);
    tree.remove(&999);
    tree.remove(&5);
    assert_eq!(snapshot(&tree), before);
    tree.validate();
}

#[test]
fn repeated_insert_remove_cycles() {
    let tree = Tree::new(3);
    for _ in 0..5 {
        for key in 0..100 {
            tree.insert(key).unwrap();
        }
        tree.validate();
        for key in 0..100 {
            tree.remove(&key);
        }
        tree.validate();
    }
    assert!(snapshot(&tree).is_empty());
}

#[test]
fn alternating_insert_remove() {
    let tree = Tree::new(4);
    for key in 0..256u64 {
        tree.insert(key).unwrap();
        tree.insert(key + 1000).unwrap();
        tree.remove(&key);
    }
    let keys = snapshot(&tree);
    assert_eq!(keys, (1000..1256).collect::<Vec<_>>());
    for key in 0..256 {
        assert!(!tree.contains(&key));
    }
    tree.validate();
}

#[test]
fn large_range_ascending() {
    const KEYS: u64 = 5000;
    let tree = Tree::new(4);
    for key in 0..KEYS {
        tree.insert(key).unwrap();
    }
    let keys = snapshot(&tree);
    assert_eq!(keys.len(), KEYS as usize);
    assert_eq!(keys, (0..KEYS).collect::<Vec<_>>());
    tree.validate();
}

#[test]
fn traversal_emits_once_per_occurrence() {
    let tree = Tree::new(2);
    let mut inserted = 0usize;
    for key in 0..64u64 {
        for _ in 0..(key % 3 + 1) {
            tree.insert(key).unwrap();
            inserted += 1;
        }
    }
    let keys = snapshot(&tree);
    assert_eq!(keys.len(), inserted);
    assert!(is_sorted(&keys));
    tree.validate();
}

#[test]
fn try_clone_is_deep() {
    let tree = Tree::new(3);
    for key in 0..128 {
        tree.insert(key).unwrap();
    }
    let copy = tree.try_clone().unwrap();
    tree.insert(500).unwrap();
    tree.remove(&0);
    assert_eq!(snapshot(&copy), (0..128).collect::<Vec<_>>());
    assert!(!copy.contains(&500));
    assert!(tree.contains(&500));
    copy.validate();
    tree.validate();
}

// concurrency

const MIXED_TENANTS: usize = 16;
const MIXED_OPS: usize = 50_000;
const MIXED_KEYSPACE: u64 = 100_000;

#[test]
fn multithreaded_mixed_workload() {
    let _ = env_logger::builder().is_test(true).try_init();
    let tree = Arc::new(Tree::new(4));
    let counters: Arc<Vec<AtomicU32>> = Arc::new(
        (0..MIXED_KEYSPACE as usize)
            .map(|_| AtomicU32::new(0))
            .collect(),
    );
    let token = Arc::new(RwLock::new(()));
    let hold = token.write();
    let threads: Vec<JoinHandle<_>> = (0..MIXED_TENANTS)
        .map(|tid| {
            let this_tree = tree.clone();
            let this_counters = counters.clone();
            let this_token = token.clone();
            thread::Builder::new()
                .name(tid.to_string())
                .spawn(move || {
                    let _token = this_token.read();
                    let mut rng = rand::thread_rng();
                    // candidates for removal are keys this thread itself inserted, so
                    // every issued remove hits a live occurrence and the shared counters
                    // never drift from the tree
                    let mut owned: Vec<u64> = Vec::new();
                    for _ in 0..MIXED_OPS {
                        if owned.is_empty() || rng.gen_bool(0.6) {
                            let key = rng.gen_range(0..MIXED_KEYSPACE);
                            this_tree.insert(key).unwrap();
                            this_counters[key as usize].fetch_add(1, Ordering::Relaxed);
                            owned.push(key);
                        } else {
                            let slot = rng.gen_range(0..owned.len());
                            let key = owned.swap_remove(slot);
                            this_counters[key as usize].fetch_sub(1, Ordering::Relaxed);
                            this_tree.remove(&key);
                        }
                    }
                })
                .unwrap()
        })
        .collect();
    // rush everyone into the tree at once
    drop(hold);
    threads
        .into_iter()
        .map(JoinHandle::join)
        .for_each(Result::unwrap);
    for key in 0..MIXED_KEYSPACE {
        let live = counters[key as usize].load(Ordering::Relaxed) > 0;
        assert_eq!(
            tree.contains(&key),
            live,
            "key {key} diverged from its counter"
        );
    }
    assert!(is_sorted(&snapshot(&tree)));
    tree.validate();
}

#[test]
fn multithreaded_string_keys() {
    let _ = env_logger::builder().is_test(true).try_init();
    let tree = Arc::new(OrdMultiset::<String>::new(4));
    let counters: Arc<Vec<AtomicU32>> = Arc::new(
        (0..MIXED_KEYSPACE as usize)
            .map(|_| AtomicU32::new(0))
            .collect(),
    );
    let token = Arc::new(RwLock::new(()));
    let hold = token.write();
    let threads: Vec<JoinHandle<_>> = (0..MIXED_TENANTS)
        .map(|tid| {
            let this_tree = tree.clone();
            let this_counters = counters.clone();
            let this_token = token.clone();
            thread::Builder::new()
                .name(tid.to_string())
                .spawn(move || {
                    let _token = this_token.read();
                    let mut rng = rand::thread_rng();
                    for _ in 0..MIXED_OPS {
                        let key = rng.gen_range(0..MIXED_KEYSPACE);
                        if rng.gen_bool(0.5) {
                            this_tree.insert(format!("key-{key}")).unwrap();
                            this_counters[key as usize].fetch_add(1, Ordering::Relaxed);
                        } else {
                            // claim one live occurrence off the shared counter before
                            // issuing the remove, so no remove can ever target a key
                            // that is not in the tree
                            let mut live = this_counters[key as usize].load(Ordering::Relaxed);
                            while live > 0 {
                                match this_counters[key as usize].compare_exchange_weak(
                                    live,
                                    live - 1,
                                    Ordering::Release,
                                    Ordering::Relaxed,
                                ) {
                                    Ok(_) => {
                                        this_tree.remove(&format!("key-{key}"));
                                        break;
                                    }
                                    Err(current) => live = current,
                                }
                            }
                        }
                    }
                })
                .unwrap()
        })
        .collect();
    // rush everyone into the tree at once
    drop(hold);
    threads
        .into_iter()
        .map(JoinHandle::join)
        .for_each(Result::unwrap);
    for key in 0..MIXED_KEYSPACE {
        let live = counters[key as usize].load(Ordering::Relaxed) > 0;
        assert_eq!(
            tree.contains(&format!("key-{key}")),
            live,
            "key-{key} diverged from its counter"
        );
    }
    let mut keys: Vec<String> = Vec::new();
    tree.traverse(&mut keys);
    assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    tree.validate();
}

#[test]
fn readers_overlap_writers() {
    const WRITERS: usize = 4;
    const READERS: usize = 4;
    const RANGE: u64 = 2_048;
    let tree = Arc::new(Tree::new(3));
    let token = Arc::new(RwLock::new(()));
    let hold = token.write();
    let mut threads: Vec<JoinHandle<_>> = (0..WRITERS)
        .map(|tid| {
            let this_tree = tree.clone();
            let this_token = token.clone();
            thread::spawn(move || {
                let _token = this_token.read();
                let base = tid as u64 * RANGE;
                for key in base..base + RANGE {
                    this_tree.insert(key).unwrap();
                }
            })
        })
        .collect();
    threads.extend((0..READERS).map(|_| {
        let this_tree = tree.clone();
        let this_token = token.clone();
        thread::spawn(move || {
            let _token = this_token.read();
            for _ in 0..64 {
                let mut keys: Vec<u64> = Vec::new();
                this_tree.traverse(&mut keys);
                // every snapshot is taken under the shared lock and must be consistent
                assert!(keys.windows(2).all(|w| w[0] <= w[1]));
                thread::yield_now();
            }
        })
    }));
    drop(hold);
    threads
        .into_iter()
        .map(JoinHandle::join)
        .for_each(Result::unwrap);
    assert_eq!(
        snapshot(&tree),
        (0..WRITERS as u64 * RANGE).collect::<Vec<_>>()
    );
    tree.validate();
}
