//! LZ4 block decompression (requires the `compression` feature).
//!
//! NSO0 segments flagged as compressed hold a single raw LZ4 block with no
//! size prefix; the decompressed size comes from the segment descriptor in
//! the NSO header.

#![cfg(feature = "compression")]

use crate::{Error, Result};

/// Decompress a raw LZ4 block into exactly `decompressed_size` bytes.
///
/// Returns [`Error::Lz4`] if the block is malformed or does not fill the
/// output exactly.
pub fn decompress_lz4(data: &[u8], decompressed_size: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; decompressed_size];
    let written = lz4_flex::block::decompress_into(data, &mut out).map_err(|_| Error::Lz4)?;
    if written != decompressed_size {
        return Err(Error::Lz4);
    }
    Ok(out)
}
