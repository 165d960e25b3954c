//! The heap: one growable arena carved into boundary-tagged blocks.
//!
//! Layout, low to high: an alignment pad, a permanently allocated
//! prologue block, the usable blocks, and a zero-size allocated
//! epilogue word at the very top. The free block directly below the
//! epilogue (if any) is the wilderness block; it grows on demand and
//! lives in its own bucket instead of a size-class bucket.

use std::fmt;

use crate::arena::Arena;
use crate::block::{self, Header};
use crate::config::HeapConfig;
use crate::error::{corruption, AllocError};
use crate::free_list::{FreeLists, Link};
use crate::size_class::{self, WILDERNESS};
use crate::util::{FIRST_BLOCK_OFFSET, MIN_BLOCK_SIZE, PROLOGUE_OFFSET, WORD};
use tracing::{debug, trace};

/// Why a payload offset failed validation. `deallocate` escalates any
/// of these to a corruption abort; `resize` collapses them into
/// `AllocError::InvalidPointer`.
#[derive(Debug)]
enum PointerFault {
    Misaligned(usize),
    BeforeFirstBlock(usize),
    PastEpilogue(usize),
    BadSize(usize, usize),
    NotAllocated(usize),
    PrevNotFree(usize),
    PrevTagMismatch(usize),
    StaleSuccessor(usize),
}

impl fmt::Display for PointerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PointerFault::Misaligned(p) => {
                write!(f, "payload offset {p} is not aligned to the minimum block size")
            }
            PointerFault::BeforeFirstBlock(p) => {
                write!(f, "payload offset {p} precedes the first usable block")
            }
            PointerFault::PastEpilogue(b) => {
                write!(f, "block at offset {b} extends past the epilogue")
            }
            PointerFault::BadSize(b, s) => {
                write!(f, "block at offset {b} declares a corrupt size {s}")
            }
            PointerFault::NotAllocated(b) => {
                write!(f, "block at offset {b} is not allocated")
            }
            PointerFault::PrevNotFree(b) => write!(
                f,
                "block at offset {b} records a free predecessor, but the predecessor is allocated"
            ),
            PointerFault::PrevTagMismatch(b) => write!(
                f,
                "header and boundary tag of the block below offset {b} disagree"
            ),
            PointerFault::StaleSuccessor(b) => write!(
                f,
                "successor of block at offset {b} does not record an allocated predecessor"
            ),
        }
    }
}

/// A boundary-tag allocator over a single growable arena.
///
/// All four operations hand out and accept payload *offsets* into the
/// arena; payload bytes are reached through [`Heap::payload`] and
/// [`Heap::payload_mut`]. The heap is single-threaded by design:
/// callers needing shared access must serialize externally.
pub struct Heap {
    arena: Arena,
    free: FreeLists,
}

impl Heap {
    /// Build a heap: grow the arena far enough for the prologue, one
    /// minimum-size wilderness block and the epilogue, then lay them
    /// down. Fails with `OutOfMemory` when the configured cap cannot
    /// hold even that.
    pub fn new(config: HeapConfig) -> Result<Self, AllocError> {
        let mut arena = Arena::new(config.normalized());
        let mut free = FreeLists::new();

        while arena.end() < FIRST_BLOCK_OFFSET + MIN_BLOCK_SIZE + WORD {
            arena.grow().ok_or(AllocError::OutOfMemory)?;
        }

        let prologue = Header::new(MIN_BLOCK_SIZE, true, true);
        block::store_header(&mut arena, PROLOGUE_OFFSET, prologue);
        block::store_footer(&mut arena, PROLOGUE_OFFSET, prologue);

        let wild_size = arena.end() - FIRST_BLOCK_OFFSET - WORD;
        let wild = Header::new(wild_size, false, true);
        block::store_header(&mut arena, FIRST_BLOCK_OFFSET, wild);
        block::store_footer(&mut arena, FIRST_BLOCK_OFFSET, wild);
        free.push(&mut arena, WILDERNESS, FIRST_BLOCK_OFFSET);

        Self::write_epilogue(&mut arena, false);

        debug!(end = arena.end(), wild_size, "heap initialized");
        Ok(Heap { arena, free })
    }

    /// Allocate `size` bytes. Returns the payload offset, `Ok(None)`
    /// for a zero-size request, or `OutOfMemory` when bounded arena
    /// growth cannot satisfy the request.
    pub fn allocate(&mut self, size: usize) -> Result<Option<usize>, AllocError> {
        if size == 0 {
            return Ok(None);
        }
        self.allocate_nonzero(size).map(Some)
    }

    /// Release the allocation at `payload`.
    ///
    /// # Panics
    /// Any offset that does not name a live allocation of this heap is
    /// treated as corruption and aborts.
    pub fn deallocate(&mut self, payload: usize) {
        match self.check_block(payload) {
            Ok(block) => self.release(block),
            Err(fault) => corruption!("deallocate: {fault}"),
        }
    }

    /// Resize the allocation at `payload` to `new_size` bytes.
    ///
    /// Shrinking splits in place and returns the same offset; growing
    /// moves the payload to a fresh block and returns the new offset.
    /// `new_size == 0` releases the block and returns `Ok(None)`. An
    /// offset that does not name a live allocation is a recoverable
    /// `InvalidPointer` error here, with no effect on the heap.
    pub fn resize(&mut self, payload: usize, new_size: usize) -> Result<Option<usize>, AllocError> {
        let block = self
            .check_block(payload)
            .map_err(|_| AllocError::InvalidPointer(payload))?;

        if new_size == 0 {
            self.release(block);
            return Ok(None);
        }

        let new_block_size = round_request(new_size)?;
        let current = block::load_header(&self.arena, block).size();

        if current < new_block_size {
            let new_payload = self.allocate_nonzero(new_size)?;
            let copy_len = (current - WORD).min(new_block_size - WORD);
            self.arena.copy_within(payload, new_payload, copy_len);
            self.release(block);
            Ok(Some(new_payload))
        } else {
            self.shrink_in_place(block, new_block_size);
            Ok(Some(payload))
        }
    }

    /// Allocate `size` bytes whose payload offset is a multiple of
    /// `align`. `align` must be a power of two no smaller than the
    /// minimum block size; `size == 0` returns `Ok(None)` without an
    /// error.
    pub fn aligned_allocate(
        &mut self,
        size: usize,
        align: usize,
    ) -> Result<Option<usize>, AllocError> {
        if align < MIN_BLOCK_SIZE || !align.is_power_of_two() {
            return Err(AllocError::InvalidAlignment(align));
        }
        if size == 0 {
            return Ok(None);
        }

        // Over-allocate so that an aligned sub-region of `size` bytes
        // exists somewhere in the payload.
        let oversize = size
            .checked_add(align)
            .and_then(|s| s.checked_add(MIN_BLOCK_SIZE))
            .ok_or(AllocError::OutOfMemory)?;
        let payload = self.allocate_nonzero(oversize)?;
        let block = payload - WORD;
        let header = block::load_header(&self.arena, block);
        let payload_size = header.size() - WORD;

        let working = if payload % align == 0 {
            block
        } else {
            // First in-payload offset that is aligned, leaves room for
            // the request, and leaves a whole block's worth of bytes
            // below it to give back.
            let mut gap = None;
            let mut off = 0;
            while off < payload_size {
                if (payload + off) % align == 0
                    && off >= MIN_BLOCK_SIZE
                    && payload_size - off >= size
                {
                    gap = Some(off);
                    break;
                }
                off += 1;
            }
            let gap = match gap {
                Some(g) => g,
                None => corruption!(
                    "over-allocated block at {block} holds no {align}-aligned sub-region"
                ),
            };

            // Carve: everything above `gap` becomes the working block,
            // the head goes back through the normal release path.
            let tail = block + gap;
            block::store_header(&mut self.arena, tail, Header::new(header.size() - gap, true, true));
            block::store_header(&mut self.arena, block, header.with_size(gap));
            self.release(block);
            tail
        };

        // Trim the working block down to the request.
        self.shrink_in_place(working, round_request(size)?);
        Ok(Some(working + WORD))
    }

    /// Usable bytes of the live allocation at `payload`.
    pub fn payload(&self, payload: usize) -> Result<&[u8], AllocError> {
        let block = self
            .check_block(payload)
            .map_err(|_| AllocError::InvalidPointer(payload))?;
        let size = block::load_header(&self.arena, block).size();
        Ok(self.arena.slice(payload, size - WORD))
    }

    /// Mutable usable bytes of the live allocation at `payload`.
    pub fn payload_mut(&mut self, payload: usize) -> Result<&mut [u8], AllocError> {
        let block = self
            .check_block(payload)
            .map_err(|_| AllocError::InvalidPointer(payload))?;
        let size = block::load_header(&self.arena, block).size();
        Ok(self.arena.slice_mut(payload, size - WORD))
    }

    /// Payload capacity of the live allocation at `payload` (at least
    /// the size that was requested).
    pub fn usable_size(&self, payload: usize) -> Result<usize, AllocError> {
        let block = self
            .check_block(payload)
            .map_err(|_| AllocError::InvalidPointer(payload))?;
        Ok(block::load_header(&self.arena, block).size() - WORD)
    }

    // ------------------------------------------------------------------
    // Allocation path
    // ------------------------------------------------------------------

    fn allocate_nonzero(&mut self, size: usize) -> Result<usize, AllocError> {
        let block_size = round_request(size)?;
        let block = match self.find_fit(block_size) {
            Some(block) => {
                self.free.unlink(&mut self.arena, block);
                self.split(block, block_size, false);
                block
            }
            None => {
                let block = self.grow_wilderness(block_size)?;
                self.free.unlink(&mut self.arena, block);
                self.split(block, block_size, true);
                block
            }
        };
        Ok(block + WORD)
    }

    /// First-fit over the ordinary buckets, from the request's size
    /// class upward. The wilderness bucket is never scanned.
    fn find_fit(&self, block_size: usize) -> Option<usize> {
        for bucket in size_class::bucket_for(block_size)..WILDERNESS {
            let mut cur = self.free.next(&self.arena, Link::Sentinel(bucket));
            while let Link::Block(offset) = cur {
                if block::load_header(&self.arena, offset).size() >= block_size {
                    return Some(offset);
                }
                cur = self.free.next(&self.arena, cur);
            }
        }
        None
    }

    /// Grow the wilderness block until it can hold `block_size` bytes,
    /// fusing each arena increment into it and re-tagging the
    /// epilogue. When no wilderness block exists, a new one is formed
    /// over the old epilogue word, inheriting its `prev_allocated`
    /// bit. Growth already committed stays committed even when a later
    /// increment is refused.
    fn grow_wilderness(&mut self, block_size: usize) -> Result<usize, AllocError> {
        let (wild, mut wild_size) = match self.free.first(WILDERNESS) {
            Some(offset) => (offset, block::load_header(&self.arena, offset).size()),
            None => (self.arena.end() - WORD, 0),
        };
        let mut header = block::load_header(&self.arena, wild);
        let mut linked = wild_size != 0;

        while wild_size < block_size {
            let old_end = self.arena.end();
            self.arena.grow().ok_or(AllocError::OutOfMemory)?;
            wild_size += self.arena.end() - old_end;

            header = header.with_size(wild_size).with_allocated(false);
            block::store_header(&mut self.arena, wild, header);
            block::store_footer(&mut self.arena, wild, header);
            Self::write_epilogue(&mut self.arena, false);

            if !linked {
                self.free.push(&mut self.arena, WILDERNESS, wild);
                linked = true;
            }
        }

        debug!(wild, wild_size, block_size, "wilderness grown to fit");
        Ok(wild)
    }

    /// Split a free, unlinked `block` down to `needed` bytes and mark
    /// it allocated. The remainder, if splitting would not leave a
    /// splinter, stays free: ordinary splits file it by size,
    /// wilderness splits keep it as the new wilderness block.
    fn split(&mut self, block: usize, needed: usize, wilderness: bool) {
        let header = block::load_header(&self.arena, block);
        let size = header.size();
        let remainder = size - needed;

        if remainder < MIN_BLOCK_SIZE {
            // No splinters: hand out the whole block.
            block::store_header(&mut self.arena, block, header.with_allocated(true));
            let next = block + size;
            let next_header = block::load_header(&self.arena, next);
            block::store_header(&mut self.arena, next, next_header.with_prev_allocated(true));
            return;
        }

        block::store_header(
            &mut self.arena,
            block,
            header.with_size(needed).with_allocated(true),
        );

        let rest = block + needed;
        let rest_header = Header::new(remainder, false, true);
        block::store_header(&mut self.arena, rest, rest_header);
        block::store_footer(&mut self.arena, rest, rest_header);

        let next = rest + remainder;
        let next_header = block::load_header(&self.arena, next);
        block::store_header(&mut self.arena, next, next_header.with_prev_allocated(false));

        let bucket = if wilderness {
            WILDERNESS
        } else {
            size_class::bucket_for(remainder)
        };
        self.free.push(&mut self.arena, bucket, rest);
        trace!(block, needed, remainder, wilderness, "split block");
    }

    // ------------------------------------------------------------------
    // Release path
    // ------------------------------------------------------------------

    /// Free a validated allocated block, merging with whichever
    /// physical neighbors are free, then file the merged block: into
    /// the wilderness bucket when it now abuts the epilogue, otherwise
    /// by size.
    fn release(&mut self, block: usize) {
        let header = block::load_header(&self.arena, block);
        let size = header.size();
        let next = block + size;
        let next_header = block::load_header(&self.arena, next);

        let prev_free = !header.is_prev_allocated();
        let next_free = !next_header.is_allocated();

        let (merged, merged_size) = if prev_free && next_free {
            let (prev, prev_size) = self.prev_block(block);
            self.free.unlink(&mut self.arena, prev);
            self.free.unlink(&mut self.arena, next);
            (prev, prev_size + size + next_header.size())
        } else if prev_free {
            let (prev, prev_size) = self.prev_block(block);
            self.free.unlink(&mut self.arena, prev);
            (prev, prev_size + size)
        } else if next_free {
            self.free.unlink(&mut self.arena, next);
            (block, size + next_header.size())
        } else {
            (block, size)
        };

        let merged_header = block::load_header(&self.arena, merged)
            .with_size(merged_size)
            .with_allocated(false);
        block::store_header(&mut self.arena, merged, merged_header);
        block::store_footer(&mut self.arena, merged, merged_header);

        let after = merged + merged_size;
        let after_header = block::load_header(&self.arena, after);
        block::store_header(&mut self.arena, after, after_header.with_prev_allocated(false));

        let bucket = if after_header.size() == 0 {
            WILDERNESS
        } else {
            size_class::bucket_for(merged_size)
        };
        self.free.push(&mut self.arena, bucket, merged);
        trace!(block, merged, merged_size, bucket, "released block");
    }

    /// Locate the free predecessor of `block` through its boundary tag.
    fn prev_block(&self, block: usize) -> (usize, usize) {
        let footer = block::load_footer_before(&self.arena, block);
        let prev_size = footer.size();
        (block - prev_size, prev_size)
    }

    /// Shrink an allocated block to `new_block_size` in place; the
    /// tail is marked allocated and then sent through the normal
    /// release path so it coalesces with a free successor. The block
    /// stays whole when the tail would be a splinter.
    fn shrink_in_place(&mut self, block: usize, new_block_size: usize) {
        let header = block::load_header(&self.arena, block);
        let size = header.size();
        if size - new_block_size < MIN_BLOCK_SIZE {
            return;
        }

        let tail_size = size - new_block_size;
        block::store_header(&mut self.arena, block, header.with_size(new_block_size));
        let tail = block + new_block_size;
        block::store_header(&mut self.arena, tail, Header::new(tail_size, true, true));
        self.release(tail);
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Validate that `payload` names a live allocation and return its
    /// block offset. Shared by the fatal tier (`deallocate`) and the
    /// recoverable tier (`resize`, payload access).
    fn check_block(&self, payload: usize) -> Result<usize, PointerFault> {
        if payload % MIN_BLOCK_SIZE != 0 {
            return Err(PointerFault::Misaligned(payload));
        }
        let block = match payload.checked_sub(WORD) {
            Some(block) if block >= FIRST_BLOCK_OFFSET => block,
            _ => return Err(PointerFault::BeforeFirstBlock(payload)),
        };
        let epilogue = self.arena.end() - WORD;
        if block >= epilogue {
            return Err(PointerFault::PastEpilogue(block));
        }

        let header = block::load_header(&self.arena, block);
        let size = header.size();
        if size < MIN_BLOCK_SIZE || size % MIN_BLOCK_SIZE != 0 {
            return Err(PointerFault::BadSize(block, size));
        }
        match block.checked_add(size) {
            Some(extent) if extent <= epilogue => {}
            _ => return Err(PointerFault::PastEpilogue(block)),
        }
        if !header.is_allocated() {
            return Err(PointerFault::NotAllocated(block));
        }

        // A cleared prev_allocated bit promises a free predecessor
        // whose header and boundary tag agree.
        if !header.is_prev_allocated() {
            let footer = block::load_footer_before(&self.arena, block);
            let prev_size = footer.size();
            let prev = match block.checked_sub(prev_size) {
                Some(prev)
                    if prev >= FIRST_BLOCK_OFFSET
                        && prev_size >= MIN_BLOCK_SIZE
                        && prev_size % MIN_BLOCK_SIZE == 0 =>
                {
                    prev
                }
                _ => return Err(PointerFault::PrevTagMismatch(block)),
            };
            if block::load_header(&self.arena, prev).word() != footer.word() {
                return Err(PointerFault::PrevTagMismatch(block));
            }
            if footer.is_allocated() {
                return Err(PointerFault::PrevNotFree(block));
            }
        }

        // The successor must still know this block is allocated; a
        // cleared bit there means a merge already consumed this block.
        let next_header = block::load_header(&self.arena, block + size);
        if !next_header.is_prev_allocated() {
            return Err(PointerFault::StaleSuccessor(block));
        }

        Ok(block)
    }

    fn write_epilogue(arena: &mut Arena, prev_allocated: bool) {
        let epilogue = Header::new(0, true, prev_allocated);
        block::store_header(arena, arena.end() - WORD, epilogue);
    }

    // ------------------------------------------------------------------
    // Invariant audit
    // ------------------------------------------------------------------

    /// Walk the whole heap and verify every structural invariant:
    /// block sizes and tags, `prev_allocated` mirroring, the
    /// no-adjacent-free-blocks rule, and exact agreement between the
    /// physical set of free blocks and the free-list buckets. Aborts
    /// on the first violation. Intended for tests and debugging.
    pub fn check_invariants(&self) {
        let epilogue = self.arena.end() - WORD;

        let prologue = block::load_header(&self.arena, PROLOGUE_OFFSET);
        if prologue.size() != MIN_BLOCK_SIZE || !prologue.is_allocated() {
            corruption!("prologue header damaged");
        }

        let epilogue_header = block::load_header(&self.arena, epilogue);
        if epilogue_header.size() != 0 || !epilogue_header.is_allocated() {
            corruption!("epilogue header damaged");
        }

        // Physical walk, collecting every free block.
        let mut free_blocks: Vec<(usize, usize, bool)> = Vec::new();
        let mut offset = FIRST_BLOCK_OFFSET;
        let mut prev_allocated = true;
        let mut prev_free = false;
        while offset < epilogue {
            let header = block::load_header(&self.arena, offset);
            let size = header.size();
            if size < MIN_BLOCK_SIZE || size % MIN_BLOCK_SIZE != 0 {
                corruption!("block at {offset} declares a corrupt size {size}");
            }
            let extent = match offset.checked_add(size) {
                Some(extent) if extent <= epilogue => extent,
                _ => corruption!("block at {offset} extends past the epilogue"),
            };
            if header.is_prev_allocated() != prev_allocated {
                corruption!("block at {offset} disagrees with its predecessor's state");
            }
            if !header.is_allocated() {
                if prev_free {
                    corruption!("adjacent free blocks at {offset}");
                }
                let footer = block::load_footer_before(&self.arena, extent);
                if footer.word() != header.word() {
                    corruption!("free block at {offset} has disagreeing header and tag");
                }
                free_blocks.push((offset, size, extent == epilogue));
            }
            prev_allocated = header.is_allocated();
            prev_free = !header.is_allocated();
            offset = extent;
        }
        if epilogue_header.is_prev_allocated() != prev_allocated {
            corruption!("epilogue disagrees with the top block's state");
        }

        // Every free block must be in exactly the bucket its size (or
        // wilderness position) implies, and the lists must contain
        // nothing else.
        let mut listed = 0usize;
        for bucket in 0..size_class::NUM_BUCKETS {
            let mut cur = self.free.next(&self.arena, Link::Sentinel(bucket));
            let mut steps = 0usize;
            while let Link::Block(member) = cur {
                steps += 1;
                if steps > free_blocks.len() {
                    corruption!("free list for bucket {bucket} does not terminate");
                }
                let entry = free_blocks.iter().find(|&&(offset, _, _)| offset == member);
                let &(_, size, is_top) = match entry {
                    Some(entry) => entry,
                    None => corruption!("bucket {bucket} lists offset {member}, which is not a free block"),
                };
                let expected = if is_top {
                    WILDERNESS
                } else {
                    size_class::bucket_for(size)
                };
                if bucket != expected {
                    corruption!("free block at {member} filed in bucket {bucket}, expected {expected}");
                }
                listed += 1;
                cur = self.free.next(&self.arena, cur);
            }
        }
        if listed != free_blocks.len() {
            corruption!(
                "{} free blocks in the heap but {listed} filed in buckets",
                free_blocks.len()
            );
        }
    }
}

/// Round a payload request up to a whole block size: header overhead
/// plus padding to the next multiple of the minimum block size.
/// Overflow is reported as `OutOfMemory`.
fn round_request(size: usize) -> Result<usize, AllocError> {
    size.checked_add(WORD)
        .and_then(|s| crate::util::checked_align_up(s, MIN_BLOCK_SIZE))
        .ok_or(AllocError::OutOfMemory)
}
