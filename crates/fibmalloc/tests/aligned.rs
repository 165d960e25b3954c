//! aligned_allocate: alignment guarantees, carving, and the
//! invalid-argument tier.

use fibmalloc::{AllocError, Heap, HeapConfig};

fn heap() -> Heap {
    Heap::new(HeapConfig::default()).unwrap()
}

// ---------------------------------------------------------------------------
// Returned offsets honor the requested alignment
// ---------------------------------------------------------------------------

#[test]
fn aligned_offsets_for_every_alignment() {
    let mut heap = heap();
    for &align in &[64usize, 128, 256, 512, 1024, 4096] {
        let payload = heap
            .aligned_allocate(100, align)
            .unwrap()
            .unwrap_or_else(|| panic!("aligned_allocate(100, {align}) returned no offset"));
        assert_eq!(
            payload % align,
            0,
            "aligned_allocate(100, {align}) returned offset {payload}"
        );
        assert!(heap.usable_size(payload).unwrap() >= 100);

        heap.payload_mut(payload).unwrap()[..100].fill(0xE1);
        assert!(heap.payload(payload).unwrap()[..100].iter().all(|&b| b == 0xE1));
        heap.check_invariants();
    }
}

#[test]
fn aligned_blocks_interleave_with_ordinary_ones() {
    let mut heap = heap();
    let a = heap.allocate(200).unwrap().unwrap();
    let p = heap.aligned_allocate(300, 512).unwrap().unwrap();
    let b = heap.allocate(200).unwrap().unwrap();

    assert_eq!(p % 512, 0);
    heap.payload_mut(a).unwrap().fill(1);
    heap.payload_mut(p).unwrap().fill(2);
    heap.payload_mut(b).unwrap().fill(3);

    assert!(heap.payload(a).unwrap().iter().all(|&x| x == 1));
    assert!(heap.payload(p).unwrap().iter().all(|&x| x == 2));
    assert!(heap.payload(b).unwrap().iter().all(|&x| x == 3));
    heap.check_invariants();
}

// ---------------------------------------------------------------------------
// The minimum alignment request degenerates to a plain allocation
// ---------------------------------------------------------------------------

#[test]
fn minimum_alignment_behaves_like_allocate() {
    let mut heap = heap();
    let p = heap.aligned_allocate(100, 64).unwrap().unwrap();
    // Every payload offset is 64-aligned, so the very first block fits.
    assert_eq!(p % 64, 0);
    assert!(heap.usable_size(p).unwrap() >= 100);
    heap.check_invariants();
}

// ---------------------------------------------------------------------------
// Aligned allocations are ordinary blocks: freeable and coalescable
// ---------------------------------------------------------------------------

#[test]
fn aligned_allocations_release_cleanly() {
    let mut heap = heap();
    let p = heap.aligned_allocate(1000, 1024).unwrap().unwrap();
    let q = heap.aligned_allocate(64, 256).unwrap().unwrap();
    heap.check_invariants();

    heap.deallocate(p);
    heap.check_invariants();
    assert_eq!(heap.resize(q, 0), Ok(None));
    heap.check_invariants();
}

// ---------------------------------------------------------------------------
// Invalid arguments: distinct recoverable errors
// ---------------------------------------------------------------------------

#[test]
fn alignment_below_minimum_is_rejected() {
    let mut heap = heap();
    for &align in &[0usize, 1, 2, 16, 32] {
        assert_eq!(
            heap.aligned_allocate(100, align),
            Err(AllocError::InvalidAlignment(align))
        );
    }
    heap.check_invariants();
}

#[test]
fn non_power_of_two_alignment_is_rejected() {
    let mut heap = heap();
    for &align in &[65usize, 96, 100, 3 * 64] {
        assert_eq!(
            heap.aligned_allocate(100, align),
            Err(AllocError::InvalidAlignment(align))
        );
    }
}

#[test]
fn zero_size_returns_none_without_error() {
    let mut heap = heap();
    assert_eq!(heap.aligned_allocate(0, 256), Ok(None));
    heap.check_invariants();
}

#[test]
fn aligned_oom_is_recoverable() {
    let mut heap = Heap::new(HeapConfig {
        increment: 4096,
        max_size: 8192,
    })
    .unwrap();
    let survivor = heap.allocate(100).unwrap().unwrap();
    heap.payload_mut(survivor).unwrap().fill(0x42);

    assert_eq!(
        heap.aligned_allocate(1 << 20, 4096),
        Err(AllocError::OutOfMemory)
    );
    assert!(heap.payload(survivor).unwrap().iter().all(|&b| b == 0x42));
    heap.check_invariants();
}
