#![no_main]

use fibmalloc::{Heap, HeapConfig};
use libfuzzer_sys::fuzz_target;

/// Fuzz target that interprets a byte slice as a sequence of allocator
/// operations against a fresh heap.
///
/// Each operation is encoded as:
///   byte 0: opcode (0=allocate, 1=deallocate, 2=resize, 3=aligned_allocate)
///   byte 1-2: size (little-endian u16)
///   byte 3: slot index (which tracked allocation to operate on)
///
/// We track up to 64 live allocations as (payload offset, size) pairs.
const MAX_SLOTS: usize = 64;

fuzz_target!(|data: &[u8]| {
    let mut heap = match Heap::new(HeapConfig {
        increment: 4096,
        max_size: 8 * 1024 * 1024,
    }) {
        Ok(heap) => heap,
        Err(_) => return,
    };

    let mut slots: [Option<(usize, usize)>; MAX_SLOTS] = [None; MAX_SLOTS];

    let mut i = 0;
    while i + 4 <= data.len() {
        let opcode = data[i] & 0x03;
        let size = u16::from_le_bytes([data[i + 1], data[i + 2]]) as usize;
        let slot = (data[i + 3] as usize) % MAX_SLOTS;
        i += 4;

        match opcode {
            0 => {
                // allocate
                if let Some((payload, _)) = slots[slot].take() {
                    heap.deallocate(payload);
                }
                if let Ok(Some(payload)) = heap.allocate(size) {
                    assert_eq!(payload % 64, 0, "allocate({size}) misaligned");
                    heap.payload_mut(payload).unwrap()[..size].fill(0xAA);
                    slots[slot] = Some((payload, size));
                }
            }
            1 => {
                // deallocate
                if let Some((payload, _)) = slots[slot].take() {
                    heap.deallocate(payload);
                }
            }
            2 => {
                // resize
                if let Some((payload, old_size)) = slots[slot] {
                    match heap.resize(payload, size) {
                        Ok(Some(new_payload)) => {
                            let kept = old_size.min(size);
                            assert!(
                                heap.payload(new_payload).unwrap()[..kept]
                                    .iter()
                                    .all(|&b| b == 0xAA),
                                "resize lost content"
                            );
                            heap.payload_mut(new_payload).unwrap()[..size].fill(0xAA);
                            slots[slot] = Some((new_payload, size));
                        }
                        Ok(None) => {
                            slots[slot] = None;
                        }
                        // OOM leaves the original allocation live.
                        Err(_) => {}
                    }
                }
            }
            3 => {
                // aligned_allocate
                if let Some((payload, _)) = slots[slot].take() {
                    heap.deallocate(payload);
                }
                let align = 64usize << (size % 4);
                let req = (size >> 2).max(1);
                if let Ok(Some(payload)) = heap.aligned_allocate(req, align) {
                    assert_eq!(
                        payload % align,
                        0,
                        "aligned_allocate({req}, {align}) misaligned"
                    );
                    heap.payload_mut(payload).unwrap()[..req].fill(0xAA);
                    slots[slot] = Some((payload, req));
                }
            }
            _ => unreachable!(),
        }
    }

    heap.check_invariants();

    // Cleanup
    for slot in &mut slots {
        if let Some((payload, _)) = slot.take() {
            heap.deallocate(payload);
        }
    }
    heap.check_invariants();
});
