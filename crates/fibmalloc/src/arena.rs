use crate::config::HeapConfig;
use crate::error::corruption;
use crate::util::WORD;
use tracing::debug;

/// The growable byte region backing a heap.
///
/// All block references in this crate are byte offsets into this
/// buffer; every read and write is bounds-checked, and an out-of-range
/// access is treated as corruption rather than undefined behavior.
/// Metadata words are stored little-endian.
pub struct Arena {
    bytes: Vec<u8>,
    increment: usize,
    max_size: usize,
}

impl Arena {
    pub(crate) fn new(config: HeapConfig) -> Self {
        Arena {
            bytes: Vec::new(),
            increment: config.increment,
            max_size: config.max_size,
        }
    }

    /// Low bound of the region. Offsets are relative to the buffer, so
    /// this is always zero; kept for symmetry with `end`.
    #[inline]
    pub fn start(&self) -> usize {
        0
    }

    /// Current high-water mark (one past the last valid byte).
    #[inline]
    pub fn end(&self) -> usize {
        self.bytes.len()
    }

    /// Extend the region by one increment. Returns the new end offset,
    /// or `None` when the configured cap would be exceeded. Failure is
    /// a normal, recoverable condition and leaves the region unchanged.
    pub fn grow(&mut self) -> Option<usize> {
        let new_len = self.bytes.len().checked_add(self.increment)?;
        if new_len > self.max_size {
            debug!(
                end = self.bytes.len(),
                max = self.max_size,
                "arena growth refused at cap"
            );
            return None;
        }
        self.bytes.resize(new_len, 0);
        Some(new_len)
    }

    /// Read one metadata word.
    pub(crate) fn read_word(&self, offset: usize) -> u64 {
        match offset.checked_add(WORD) {
            Some(end) if end <= self.bytes.len() => {
                let mut word = [0u8; WORD];
                word.copy_from_slice(&self.bytes[offset..offset + WORD]);
                u64::from_le_bytes(word)
            }
            _ => corruption!("word read at offset {offset} outside arena of {} bytes", self.bytes.len()),
        }
    }

    /// Write one metadata word.
    pub(crate) fn write_word(&mut self, offset: usize, word: u64) {
        match offset.checked_add(WORD) {
            Some(end) if end <= self.bytes.len() => {
                self.bytes[offset..offset + WORD].copy_from_slice(&word.to_le_bytes());
            }
            _ => corruption!("word write at offset {offset} outside arena of {} bytes", self.bytes.len()),
        }
    }

    pub(crate) fn slice(&self, offset: usize, len: usize) -> &[u8] {
        match offset.checked_add(len) {
            Some(end) if end <= self.bytes.len() => &self.bytes[offset..end],
            _ => corruption!("{len}-byte read at offset {offset} outside arena of {} bytes", self.bytes.len()),
        }
    }

    pub(crate) fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        let arena_len = self.bytes.len();
        match offset.checked_add(len) {
            Some(end) if end <= arena_len => &mut self.bytes[offset..end],
            _ => corruption!("{len}-byte write at offset {offset} outside arena of {arena_len} bytes"),
        }
    }

    /// Copy `len` bytes from `src` to `dst`; the ranges may overlap.
    pub(crate) fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        let arena_len = self.bytes.len();
        let src_ok = src.checked_add(len).is_some_and(|e| e <= arena_len);
        let dst_ok = dst.checked_add(len).is_some_and(|e| e <= arena_len);
        if !src_ok || !dst_ok {
            corruption!("{len}-byte copy {src} -> {dst} outside arena of {arena_len} bytes");
        }
        self.bytes.copy_within(src..src + len, dst);
    }
}
