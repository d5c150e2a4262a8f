#![no_main]
use hbspace::{HbSpaceManager, Size};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

// Arbitrary bytes must be rejected or opened, never panic
fuzz_target!(|data: &[u8]| {
    // Keep the claimed geometry small enough to plan quickly
    if data.len() < 12 || data[0] != 0 || data[1] != 0 {
        return;
    }

    let mut space = match HbSpaceManager::open(Cursor::new(data.to_vec())) {
        Ok(space) => space,
        Err(_) => return,
    };
    if let Ok(true) = space.check() {
        let _ = space.allocate(Size(1));
    }
});
