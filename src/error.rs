//! Library-wide error and result types.

use std::io;

use thiserror::Error;

/// Result alias used throughout nxcarve.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the library can produce.
///
/// Every variant is fatal for the call that produced it: a malformed
/// container is never half-parsed and an extraction is never partially
/// written.
#[derive(Debug, Error)]
pub enum Error {
    /// A skip over a stream ended early.
    #[error("seek failed: requested {requested:#x} bytes, skipped {skipped:#x}")]
    Seek { requested: u64, skipped: u64 },
    /// A fixed-size read returned fewer bytes than the layout requires.
    #[error("truncated input: expected {expected:#x} bytes, got {actual:#x}")]
    Truncated { expected: u64, actual: u64 },
    /// The input is smaller than the format's fixed header.
    #[error("container too small: need at least {required:#x} bytes, got {actual:#x}")]
    UndersizedContainer { required: usize, actual: usize },
    /// Nested blocks that must be ascending were observed out of order.
    #[error("nested blocks out of order: {0}")]
    OutOfOrderBlocks(&'static str),
    /// Two sibling regions overlap, or the gap between them is negative.
    #[error("overlapping blocks: {0}")]
    OverlappingBlocks(&'static str),
    /// Ticket signature type is not one of the known codes.
    #[error("unrecognized signature type {0:#x}")]
    UnrecognizedSignatureType(u32),
    /// The compressed footer reports no growth; the data is stored raw.
    #[error("segment is not compressed")]
    NotCompressed,
    /// The compressed footer holds values this decoder does not accept.
    #[error("unsupported compressed format: {0}")]
    UnsupportedFormat(&'static str),
    /// A cursor in the compressed token stream left the valid range.
    #[error("compressed data out of range: {0}")]
    OutOfRange(&'static str),
    /// An underlying I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// LZ4 decompression failed.
    #[cfg(feature = "compression")]
    #[error("lz4 decompression failed")]
    Lz4,
}
