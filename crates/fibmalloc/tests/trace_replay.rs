//! Trace-driven testing: generate deterministic random op traces and
//! replay them against a fresh heap, verifying content integrity and
//! the structural invariants as the trace runs.

use fibmalloc::{AllocError, Heap, HeapConfig};

const MAX_LIVE: usize = 200;

#[derive(Debug, Clone, Copy)]
enum Op {
    Allocate(usize),
    Deallocate(usize),         // slot hint
    Resize(usize, usize),      // slot hint, new size
    AlignedAllocate(usize, usize), // size, alignment
}

/// Simple seeded PRNG.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Rng(seed)
    }

    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn next_usize(&mut self, max: usize) -> usize {
        (self.next() as usize) % max
    }
}

fn generate_trace(seed: u64, count: usize) -> Vec<Op> {
    let mut rng = Rng::new(seed);
    let mut ops = Vec::with_capacity(count);
    let mut live_count = 0usize;

    for _ in 0..count {
        let r = rng.next() % 100;
        if (r < 40 && live_count < MAX_LIVE) || live_count == 0 {
            let size = match rng.next() % 3 {
                0 => rng.next_usize(56) + 1,   // tiny: fits one block
                1 => rng.next_usize(512) + 1,  // small
                _ => rng.next_usize(4096) + 1, // spans increments
            };
            ops.push(Op::Allocate(size));
            live_count += 1;
        } else if r < 65 {
            ops.push(Op::Deallocate(rng.next_usize(live_count.max(1))));
            live_count = live_count.saturating_sub(1);
        } else if r < 90 {
            let new_size = match rng.next() % 3 {
                0 => rng.next_usize(64) + 1,
                1 => rng.next_usize(1024) + 1,
                _ => rng.next_usize(8192) + 1,
            };
            ops.push(Op::Resize(rng.next_usize(live_count.max(1)), new_size));
        } else {
            let align = 64 << (rng.next() % 4); // 64..512
            ops.push(Op::AlignedAllocate(rng.next_usize(512) + 1, align));
            live_count += 1;
        }
    }

    ops
}

fn fill(heap: &mut Heap, payload: usize, size: usize, pattern: u8) {
    heap.payload_mut(payload).unwrap()[..size].fill(pattern);
}

fn verify(heap: &Heap, payload: usize, size: usize, pattern: u8) {
    let bytes = &heap.payload(payload).unwrap()[..size];
    for (i, &b) in bytes.iter().enumerate() {
        assert_eq!(
            b, pattern,
            "content of allocation at {payload} corrupted at offset {i}"
        );
    }
}

fn replay_trace(ops: &[Op]) -> (usize, usize) {
    let mut heap = Heap::new(HeapConfig {
        increment: 4096,
        max_size: 16 * 1024 * 1024,
    })
    .unwrap();

    // (payload, requested size, fill pattern)
    let mut slots: Vec<(usize, usize, u8)> = Vec::new();
    let mut alloc_count = 0usize;
    let mut free_count = 0usize;
    let mut next_pattern = 1u8;

    for (step, op) in ops.iter().enumerate() {
        match *op {
            Op::Allocate(size) => {
                let payload = heap.allocate(size).unwrap().unwrap();
                assert_eq!(payload % 64, 0, "allocate({size}) misaligned");
                let pattern = next_pattern;
                next_pattern = next_pattern.wrapping_mul(31).wrapping_add(7) | 1;
                fill(&mut heap, payload, size, pattern);
                slots.push((payload, size, pattern));
                alloc_count += 1;
            }
            Op::Deallocate(slot_hint) => {
                if slots.is_empty() {
                    continue;
                }
                let idx = slot_hint % slots.len();
                let (payload, size, pattern) = slots.swap_remove(idx);
                verify(&heap, payload, size, pattern);
                heap.deallocate(payload);
                free_count += 1;
            }
            Op::Resize(slot_hint, new_size) => {
                if slots.is_empty() {
                    continue;
                }
                let idx = slot_hint % slots.len();
                let (payload, size, pattern) = slots[idx];
                verify(&heap, payload, size, pattern);

                match heap.resize(payload, new_size) {
                    Ok(Some(new_payload)) => {
                        // Preserved up to the smaller of the two sizes.
                        verify(&heap, new_payload, size.min(new_size), pattern);
                        fill(&mut heap, new_payload, new_size, pattern);
                        slots[idx] = (new_payload, new_size, pattern);
                    }
                    Ok(None) => unreachable!("resize to nonzero size freed the block"),
                    Err(AllocError::OutOfMemory) => {
                        // Original must be untouched.
                        verify(&heap, payload, size, pattern);
                    }
                    Err(e) => panic!("resize of a live allocation failed: {e}"),
                }
            }
            Op::AlignedAllocate(size, align) => {
                let payload = heap.aligned_allocate(size, align).unwrap().unwrap();
                assert_eq!(
                    payload % align,
                    0,
                    "aligned_allocate({size}, {align}) misaligned"
                );
                let pattern = next_pattern;
                next_pattern = next_pattern.wrapping_mul(31).wrapping_add(7) | 1;
                fill(&mut heap, payload, size, pattern);
                slots.push((payload, size, pattern));
                alloc_count += 1;
            }
        }

        if step % 256 == 0 {
            heap.check_invariants();
            for &(payload, size, pattern) in &slots {
                verify(&heap, payload, size, pattern);
            }
        }
    }

    // Drain everything; the heap must end as one coalesced wilderness.
    for &(payload, size, pattern) in &slots {
        verify(&heap, payload, size, pattern);
    }
    for (payload, _, _) in slots {
        heap.deallocate(payload);
    }
    heap.check_invariants();

    (alloc_count, free_count)
}

#[test]
fn replay_deterministic_traces() {
    for seed in 0..5 {
        let trace = generate_trace(seed, 3000);
        let (allocs, frees) = replay_trace(&trace);
        assert!(allocs > 0 && frees > 0, "seed {seed} produced a trivial trace");
    }
}
