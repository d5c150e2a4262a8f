//! Property-based tests for allocator correctness
//!
//! Uses proptest to drive random allocate/deallocate sequences through small
//! managers, and random insert/remove sequences through the B-tree engine.

use hbspace::{HbSpaceManager, MemoryTree, Position, Size, SpaceConfig};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;

#[derive(Debug, Clone)]
enum Op {
    Allocate(u64),
    /// Free the live lump with this index, modulo the live count
    Free(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1u64..24).prop_map(Op::Allocate),
        2 => any::<usize>().prop_map(Op::Free),
    ]
}

fn small_space(order: u16) -> HbSpaceManager<Cursor<Vec<u8>>> {
    HbSpaceManager::create_new(Cursor::new(Vec::new()), SpaceConfig::new(240, 128, 6, order))
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_live_lumps_never_overlap(
        order in 3u16..=6,
        ops in prop::collection::vec(op_strategy(), 1..120)
    ) {
        let mut space = small_space(order);
        let region = space.client_region();
        let mut live: BTreeMap<Position, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Allocate(size) => {
                    let largest = space.stats().unwrap().largest_hole;
                    let got = space.allocate(Size(size)).unwrap();
                    prop_assert_eq!(got.is_some(), largest >= size);
                    if let Some(pos) = got {
                        prop_assert!(region.contains(pos));
                        prop_assert!(pos + Size(size) <= region.end());
                        // Neighbours in address order must not reach into the new lump
                        if let Some((prev, len)) = live.range(..pos).next_back() {
                            prop_assert!(*prev + Size(*len) <= pos);
                        }
                        if let Some((next, _)) = live.range(pos..).next() {
                            prop_assert!(pos + Size(size) <= *next);
                        }
                        live.insert(pos, size);
                    }
                }
                Op::Free(index) => {
                    if live.is_empty() {
                        continue;
                    }
                    let pos = *live.keys().nth(index % live.len()).unwrap();
                    live.remove(&pos);
                    space.deallocate(pos).unwrap();
                }
            }
        }

        prop_assert!(space.check().unwrap());
        let used: u64 = live.values().sum();
        prop_assert_eq!(space.stats().unwrap().free_pages, 240 - used);
    }

    #[test]
    fn prop_freeing_everything_restores_one_hole(
        order in 3u16..=6,
        sizes in prop::collection::vec(1u64..16, 1..40),
        seed in any::<u64>()
    ) {
        let mut space = small_space(order);
        let initial = space.free_holes().unwrap();

        let mut live: Vec<Position> = sizes
            .iter()
            .filter_map(|size| space.allocate(Size(*size)).unwrap())
            .collect();
        // Deterministic shuffle from the seed
        let mut state = seed | 1;
        for i in (1..live.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            live.swap(i, (state % (i as u64 + 1)) as usize);
        }
        for pos in live {
            space.deallocate(pos).unwrap();
        }

        prop_assert_eq!(space.free_holes().unwrap(), initial);
        prop_assert!(space.check().unwrap());
    }

    #[test]
    fn prop_reopen_preserves_holes(
        sizes in prop::collection::vec(1u64..20, 1..20),
        frees in prop::collection::vec(any::<bool>(), 20)
    ) {
        let mut space = small_space(4);
        let live: Vec<Position> = sizes
            .iter()
            .filter_map(|size| space.allocate(Size(*size)).unwrap())
            .collect();
        for (pos, free) in live.iter().zip(&frees) {
            if *free {
                space.deallocate(*pos).unwrap();
            }
        }
        let holes = space.free_holes().unwrap();

        let mut reopened = HbSpaceManager::open(space.close().unwrap()).unwrap();
        prop_assert_eq!(reopened.free_holes().unwrap(), holes);
        prop_assert!(reopened.check().unwrap());
    }

    #[test]
    fn prop_memory_tree_matches_btreeset(
        order in 3usize..=8,
        ops in prop::collection::vec((any::<bool>(), 0u16..200), 1..400)
    ) {
        let mut tree = MemoryTree::new(order).unwrap();
        let mut model = BTreeSet::new();

        for (insert, key) in ops {
            if insert {
                prop_assert_eq!(tree.insert(key).unwrap(), model.insert(key));
            } else {
                prop_assert_eq!(tree.remove(&key).unwrap(), model.remove(&key));
            }
            prop_assert_eq!(tree.check().unwrap(), model.len());
        }

        prop_assert_eq!(tree.len(), model.len());
        prop_assert_eq!(tree.iter().unwrap().collect::<Vec<_>>(), model.iter().copied().collect::<Vec<_>>());
        prop_assert_eq!(tree.first().unwrap(), model.first().copied());
        prop_assert_eq!(tree.last().unwrap(), model.last().copied());
        for probe in [0u16, 50, 100, 199, 250] {
            prop_assert_eq!(tree.ceiling(&probe).unwrap(), model.range(probe..).next().copied());
        }
    }
}
