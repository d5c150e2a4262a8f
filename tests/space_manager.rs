//! End-to-end allocator behaviour through the public manager API

use hbspace::{HbSpaceManager, Position, Size, SpaceConfig, SpaceError};
use std::io::Cursor;

type MemSpace = HbSpaceManager<Cursor<Vec<u8>>>;

fn reference_space() -> MemSpace {
    HbSpaceManager::create_new(Cursor::new(Vec::new()), SpaceConfig::new(1000, 512, 16, 4))
        .unwrap()
}

#[test]
fn test_reference_configuration_layout() {
    let space = reference_space();
    let layout = space.layout();
    assert_eq!(layout.root.len, Size(10));
    let tiers: Vec<u64> = layout.tiers.iter().map(|r| r.len.get()).collect();
    assert_eq!(tiers, vec![18, 34, 65, 127, 252, 501, 1000]);
    assert_eq!(
        space.get_ref().get_ref().len() as u64,
        layout.total_pages * 512
    );
}

#[test]
fn test_allocations_are_disjoint_and_reused() {
    let mut space = reference_space();
    let region = space.client_region();

    let a = space.allocate(Size(10)).unwrap().unwrap();
    let b = space.allocate(Size(20)).unwrap().unwrap();
    let c = space.allocate(Size(5)).unwrap().unwrap();
    for (pos, size) in [(a, 10), (b, 20), (c, 5)] {
        assert!(region.contains(pos));
        assert!(pos + Size(size) <= region.end());
    }
    assert!(a + Size(10) <= b);
    assert!(b + Size(20) <= c);
    assert!(space.check().unwrap());

    space.deallocate(b).unwrap();
    assert!(space.check().unwrap());
    assert_eq!(space.allocate(Size(20)).unwrap(), Some(b));
    assert!(space.check().unwrap());
}

#[test]
fn test_best_fit_picks_lowest_address_among_equals() {
    let mut space = reference_space();
    let a = space.allocate(Size(5)).unwrap().unwrap();
    space.allocate(Size(1)).unwrap();
    let c = space.allocate(Size(5)).unwrap().unwrap();
    space.allocate(Size(1)).unwrap();
    let e = space.allocate(Size(8)).unwrap().unwrap();
    space.allocate(Size(1)).unwrap();
    for pos in [c, a, e] {
        space.deallocate(pos).unwrap();
    }

    assert_eq!(space.allocate(Size(5)).unwrap(), Some(a));
    assert_eq!(space.allocate(Size(6)).unwrap(), Some(e));
    assert_eq!(space.allocate(Size(5)).unwrap(), Some(c));
    assert!(space.check().unwrap());
}

#[test]
fn test_round_trip_restores_single_hole() {
    let mut space = reference_space();
    let initial = space.free_holes().unwrap();

    let mut live = Vec::new();
    for size in (1..=40u64).map(|i| i % 7 + 1) {
        live.push(space.allocate(Size(size)).unwrap().unwrap());
    }
    // Free out of order so both neighbours get merged at some point
    let (evens, odds): (Vec<_>, Vec<_>) = live.iter().enumerate().partition(|(i, _)| i % 2 == 0);
    for (_, pos) in odds.into_iter().chain(evens) {
        space.deallocate(*pos).unwrap();
    }

    assert_eq!(space.free_holes().unwrap(), initial);
    assert!(space.check().unwrap());
}

#[test]
fn test_exhaustion_returns_none() {
    let mut space = reference_space();
    let mut live = Vec::new();
    while let Some(pos) = space.allocate(Size(64)).unwrap() {
        live.push(pos);
    }
    assert_eq!(live.len(), 15);
    assert_eq!(space.stats().unwrap().free_pages, 40);
    assert_eq!(space.allocate(Size(41)).unwrap(), None);
    assert!(space.allocate(Size(40)).unwrap().is_some());
    assert_eq!(space.stats().unwrap().free_pages, 0);
    assert!(space.check().unwrap());
}

#[test]
fn test_invalid_releases_are_rejected() {
    let mut space = reference_space();
    let a = space.allocate(Size(3)).unwrap().unwrap();
    space.deallocate(a).unwrap();

    assert!(matches!(
        space.deallocate(a),
        Err(SpaceError::NotAllocated(_))
    ));
    assert!(matches!(
        space.deallocate(Position(2)),
        Err(SpaceError::OutOfRegion(2))
    ));
    let past_end = space.client_region().end();
    assert!(space.deallocate(past_end).is_err());
    assert!(space.check().unwrap());
}

#[test]
fn test_fragmentation_stats() {
    let mut space = reference_space();
    let mut live = Vec::new();
    for _ in 0..10 {
        live.push(space.allocate(Size(2)).unwrap().unwrap());
    }
    for pos in live.iter().step_by(2) {
        space.deallocate(*pos).unwrap();
    }

    let stats = space.stats().unwrap();
    assert_eq!(stats.client_pages, 1000);
    assert_eq!(stats.hole_count, 6);
    assert_eq!(stats.free_pages, 990);
    assert_eq!(stats.largest_hole, 980);
    assert!(stats.fragmentation > 0.0 && stats.fragmentation < 0.01);
}

#[test]
fn test_config_from_toml() {
    let config = SpaceConfig::from_toml_str(
        r#"
        page_count = 300
        page_size = 256
        max_root_len = 8
        btree_order = 5
        "#,
    )
    .unwrap();
    assert_eq!(config.width, 4);

    let mut space = HbSpaceManager::create_new(Cursor::new(Vec::new()), config.clone()).unwrap();
    assert_eq!(space.config(), &config);
    assert_eq!(space.client_region().len, Size(300));
    assert!(space.allocate(Size(300)).unwrap().is_some());
    assert!(space.check().unwrap());
}

#[test]
fn test_invalid_configs_write_nothing() {
    let bad = [
        SpaceConfig::new(0, 512, 16, 4),
        SpaceConfig::new(100, 16, 16, 4),
        SpaceConfig::new(100, 512, 2, 4),
        SpaceConfig::new(100, 512, 16, 2),
        // Order 40 nodes do not fit a 128-byte page
        SpaceConfig::new(100, 128, 16, 40),
        SpaceConfig::new(100, 512, 16, 4).with_width(9),
    ];
    for config in bad {
        let mut bytes = Vec::new();
        assert!(HbSpaceManager::create_new(Cursor::new(&mut bytes), config).is_err());
        assert!(bytes.is_empty());
    }
}

#[test]
fn test_narrow_fields() {
    let config = SpaceConfig::new(2000, 128, 8, 3).with_width(2);
    let mut space = HbSpaceManager::create_new(Cursor::new(Vec::new()), config).unwrap();
    let a = space.allocate(Size(100)).unwrap().unwrap();
    space.allocate(Size(50)).unwrap().unwrap();
    space.deallocate(a).unwrap();
    let holes = space.free_holes().unwrap();
    let stream = space.close().unwrap();

    let mut reopened = HbSpaceManager::open_with_width(stream, 2).unwrap();
    assert_eq!(reopened.free_holes().unwrap(), holes);
    assert!(reopened.check().unwrap());
}

mod glob_import {
    use hbspace::*;
    use std::io::*;

    #[test]
    fn test_glob_import_leaves_io_cursor_usable() {
        let mut space =
            HbSpaceManager::create_new(Cursor::new(Vec::new()), SpaceConfig::new(1000, 512, 16, 4))
                .unwrap();
        assert!(space.allocate(Size(1)).unwrap().is_some());
        assert!(space.check().unwrap());
    }
}
