#![no_main]

use fibmalloc::{Heap, HeapConfig};
use libfuzzer_sys::fuzz_target;

// Fuzz target that exercises size boundaries and alignment.
// Interprets input as a series of u32 sizes, allocates each one,
// writes to the full usable extent, verifies it back, and frees.

fuzz_target!(|data: &[u8]| {
    let mut heap = match Heap::new(HeapConfig {
        increment: 4096,
        max_size: 8 * 1024 * 1024,
    }) {
        Ok(heap) => heap,
        Err(_) => return,
    };

    let mut i = 0;
    while i + 4 <= data.len() {
        let raw_size = u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        i += 4;

        // Cap size to stay inside the configured arena limit.
        let size = (raw_size as usize) % (1024 * 1024);

        let payload = match heap.allocate(size) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                assert_eq!(size, 0, "only a zero-size request may return no offset");
                continue;
            }
            Err(_) => continue, // OOM is fine
        };

        assert_eq!(payload % 64, 0, "allocate({size}) returned unaligned offset");

        let usable = heap.usable_size(payload).unwrap();
        assert!(
            usable >= size,
            "usable_size = {usable} < requested {size}"
        );

        // Write to the full extent and read it back.
        heap.payload_mut(payload).unwrap().fill(0xBB);
        assert!(heap.payload(payload).unwrap().iter().all(|&b| b == 0xBB));

        heap.deallocate(payload);
        heap.check_invariants();
    }
});
