//! Block metadata codec.
//!
//! A block's header is one word at its lowest offset: the size in the
//! upper bits, the `allocated` flag in bit 0, and the `prev_allocated`
//! flag in bit 1. Free blocks duplicate the header word as a boundary
//! tag in their last word; allocated blocks carry no tag, which is why
//! `prev_allocated` exists at all. This module is the only place that
//! touches the bit layout.

use crate::arena::Arena;
use crate::util::WORD;

const ALLOCATED_BIT: u64 = 0x1;
const PREV_ALLOCATED_BIT: u64 = 0x2;
const STATUS_MASK: u64 = ALLOCATED_BIT | PREV_ALLOCATED_BIT;

/// A decoded metadata word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header(u64);

impl Header {
    #[inline]
    pub fn new(size: usize, allocated: bool, prev_allocated: bool) -> Self {
        debug_assert_eq!(size as u64 & STATUS_MASK, 0);
        let mut word = size as u64;
        if allocated {
            word |= ALLOCATED_BIT;
        }
        if prev_allocated {
            word |= PREV_ALLOCATED_BIT;
        }
        Header(word)
    }

    #[inline]
    pub fn from_word(word: u64) -> Self {
        Header(word)
    }

    #[inline]
    pub fn word(self) -> u64 {
        self.0
    }

    /// Total bytes occupied by the block (metadata + payload + padding).
    #[inline]
    pub fn size(self) -> usize {
        (self.0 & !STATUS_MASK) as usize
    }

    #[inline]
    pub fn is_allocated(self) -> bool {
        self.0 & ALLOCATED_BIT != 0
    }

    /// Allocation state of the block immediately below this one.
    #[inline]
    pub fn is_prev_allocated(self) -> bool {
        self.0 & PREV_ALLOCATED_BIT != 0
    }

    #[inline]
    pub fn with_size(self, size: usize) -> Self {
        debug_assert_eq!(size as u64 & STATUS_MASK, 0);
        Header((self.0 & STATUS_MASK) | size as u64)
    }

    #[inline]
    pub fn with_allocated(self, allocated: bool) -> Self {
        if allocated {
            Header(self.0 | ALLOCATED_BIT)
        } else {
            Header(self.0 & !ALLOCATED_BIT)
        }
    }

    #[inline]
    pub fn with_prev_allocated(self, prev_allocated: bool) -> Self {
        if prev_allocated {
            Header(self.0 | PREV_ALLOCATED_BIT)
        } else {
            Header(self.0 & !PREV_ALLOCATED_BIT)
        }
    }
}

/// Read the header of the block at `block`.
#[inline]
pub fn load_header(arena: &Arena, block: usize) -> Header {
    Header(arena.read_word(block))
}

#[inline]
pub fn store_header(arena: &mut Arena, block: usize, header: Header) {
    arena.write_word(block, header.0);
}

/// Duplicate `header` into the block's trailing boundary tag. Only
/// meaningful for free blocks.
#[inline]
pub fn store_footer(arena: &mut Arena, block: usize, header: Header) {
    arena.write_word(block + header.size() - WORD, header.0);
}

/// Read the boundary tag of the block that ends directly below `block`.
#[inline]
pub fn load_footer_before(arena: &Arena, block: usize) -> Header {
    Header(arena.read_word(block - WORD))
}
