use thiserror::Error;

/// Recoverable allocation failures. Returning one of these leaves the
/// heap structure and every live allocation untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The arena hit its configured size cap (or the rounded request
    /// overflowed) before a large enough block could be produced.
    #[error("heap limit reached while growing the arena")]
    OutOfMemory,

    /// The offset passed to `resize` does not refer to a live
    /// allocation from this heap.
    #[error("offset {0} does not refer to a live allocation")]
    InvalidPointer(usize),

    /// The alignment passed to `aligned_allocate` is below the minimum
    /// block size or not a power of two.
    #[error("invalid alignment {0}: must be a power of two of at least 64")]
    InvalidAlignment(usize),
}

/// Abort on a corrupted heap structure. Once a caller contract
/// violation or an internal consistency mismatch is observed, the
/// free lists and boundary tags can no longer be trusted, so this is a
/// panic rather than an error value.
macro_rules! corruption {
    ($($arg:tt)*) => {{
        let detail = format!($($arg)*);
        tracing::error!(%detail, "aborting on heap corruption");
        panic!("heap corruption: {detail}");
    }};
}

pub(crate) use corruption;
