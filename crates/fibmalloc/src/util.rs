/// Align `value` up to the next multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Align `value` down to the previous multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Check if `value` is aligned to `align`.
#[inline(always)]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// `align_up` that reports overflow instead of wrapping.
#[inline]
pub const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Size of one metadata word.
pub const WORD: usize = 8;

/// Minimum block size; also the alignment of every block size and every
/// payload offset handed to callers.
pub const MIN_BLOCK_SIZE: usize = 64;

/// Offset of the prologue header within the arena. The pad below it
/// exists so that payload offsets come out as multiples of
/// `MIN_BLOCK_SIZE`.
pub const PROLOGUE_OFFSET: usize = MIN_BLOCK_SIZE - WORD;

/// Offset of the first usable block header, directly above the prologue.
pub const FIRST_BLOCK_OFFSET: usize = PROLOGUE_OFFSET + MIN_BLOCK_SIZE;

/// Default number of bytes added to the arena per growth step.
pub const DEFAULT_INCREMENT: usize = 4096;

/// Default hard cap on total arena size.
pub const DEFAULT_MAX_HEAP: usize = 4 * 1024 * 1024; // 4 MiB
