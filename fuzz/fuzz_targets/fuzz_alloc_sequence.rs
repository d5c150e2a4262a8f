#![no_main]
use arbitrary::Arbitrary;
use hbspace::{HbSpaceManager, Position, Size, SpaceConfig};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

#[derive(Debug, Arbitrary)]
enum Step {
    Allocate(u8),
    Free(u16),
}

#[derive(Debug, Arbitrary)]
struct Input {
    order: u8,
    steps: Vec<Step>,
}

fuzz_target!(|input: Input| {
    let order = 3 + (input.order % 6) as u16;
    let mut space = match HbSpaceManager::create_new(
        Cursor::new(Vec::new()),
        SpaceConfig::new(400, 128, 8, order),
    ) {
        Ok(space) => space,
        Err(_) => return,
    };

    let mut live: Vec<Position> = Vec::new();
    for step in input.steps.into_iter().take(512) {
        match step {
            Step::Allocate(size) => {
                let size = Size(size as u64 % 32 + 1);
                if let Some(pos) = space.allocate(size).unwrap() {
                    live.push(pos);
                }
            }
            Step::Free(index) => {
                if !live.is_empty() {
                    let pos = live.swap_remove(index as usize % live.len());
                    space.deallocate(pos).unwrap();
                }
            }
        }
    }

    assert!(space.check().unwrap());
});
