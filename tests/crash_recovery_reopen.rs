//! File-backed persistence tests
//!
//! Verify a space survives close/reopen cycles on disk and keeps allocating
//! from where it left off.

use hbspace::{HbSpaceManager, Position, Size, SpaceConfig};
use tempfile::TempDir;

#[test]
fn test_reopen_after_close() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("space.hb");

    let mut space = HbSpaceManager::create_file(&path, SpaceConfig::new(1000, 512, 16, 4)).unwrap();
    let a = space.allocate(Size(10)).unwrap().unwrap();
    let b = space.allocate(Size(20)).unwrap().unwrap();
    let c = space.allocate(Size(5)).unwrap().unwrap();
    space.write_payload(c, 0, b"still here").unwrap();
    space.deallocate(b).unwrap();
    let holes = space.free_holes().unwrap();
    space.sync().unwrap();
    drop(space.close().unwrap());

    let mut space = HbSpaceManager::open_file(&path).unwrap();
    assert_eq!(space.config(), &SpaceConfig::new(1000, 512, 16, 4));
    assert_eq!(space.free_holes().unwrap(), holes);
    assert!(space.check().unwrap());

    let mut buf = [0u8; 10];
    space.read_payload(c, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"still here");

    // Allocation continues where it left off
    assert_eq!(space.allocate(Size(20)).unwrap(), Some(b));
    space.deallocate(a).unwrap();
    assert!(space.check().unwrap());
}

#[test]
fn test_many_cycles() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cycles.hb");
    HbSpaceManager::create_file(&path, SpaceConfig::new(600, 256, 8, 5))
        .unwrap()
        .close()
        .unwrap();

    let mut live: Vec<Position> = Vec::new();
    for round in 0..6u64 {
        let mut space = HbSpaceManager::open_file(&path).unwrap();
        for i in 0..8 {
            live.push(space.allocate(Size(round + i % 3 + 1)).unwrap().unwrap());
        }
        // Free every third live lump, oldest first
        let mut kept = Vec::new();
        for (i, pos) in live.drain(..).enumerate() {
            if i % 3 == 0 {
                space.deallocate(pos).unwrap();
            } else {
                kept.push(pos);
            }
        }
        live = kept;
        assert!(space.check().unwrap());
        space.close().unwrap();
    }

    let mut space = HbSpaceManager::open_file(&path).unwrap();
    for pos in live {
        space.deallocate(pos).unwrap();
    }
    let holes = space.free_holes().unwrap();
    assert_eq!(holes.len(), 1);
    assert_eq!(holes[0].size, Size(600));
    assert!(space.check().unwrap());
}

#[test]
fn test_unsynced_drop_keeps_root_record() {
    // Every operation re-persists the root record, so dropping without
    // close still leaves a consistent file
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dropped.hb");
    let mut space = HbSpaceManager::create_file(&path, SpaceConfig::new(300, 512, 16, 4)).unwrap();
    let pos = space.allocate(Size(30)).unwrap().unwrap();
    drop(space);

    let mut space = HbSpaceManager::open_file(&path).unwrap();
    assert!(space.check().unwrap());
    assert_eq!(space.stats().unwrap().free_pages, 270);
    space.deallocate(pos).unwrap();
    assert_eq!(space.stats().unwrap().free_pages, 300);
}

#[test]
fn test_open_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    assert!(HbSpaceManager::open_file(dir.path().join("absent.hb")).is_err());
}
