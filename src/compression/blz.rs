//! BLZ - the backward LZ scheme used for KIP1 segments.
//!
//! A BLZ blob is decoded from its end towards its start. The last 12 bytes
//! are a footer:
//!
//! ```text
//! [len - 0x0C] CompressedSize   (u32 LE) - token stream plus header zone
//! [len - 0x08] HeaderSize       (u32 LE) - trailing zone skipped by the decoder
//! [len - 0x04] AdditionalSize   (u32 LE) - how much the data grows
//! ```
//!
//! Bytes before `len - CompressedSize` are an uncompressed prefix that is
//! copied through unchanged. The token stream ends where the header zone
//! begins and is read backwards: a control byte whose bits (high bit first)
//! select either a literal byte or a two-byte back-reference
//! `(length - 3) << 12 | (distance - 3)` into the already-decoded tail.
//!
//! ```text
//! input   [ prefix | token stream ........ | header zone (incl. footer) ]
//!                   ^ stop                 ^ cursor starts here, moves left
//! output  [ prefix | decoded ................................................ ]
//!                                                    write cursor starts at end ^
//! ```

use tracing::trace;

use crate::utils::{ensure_len, le_u32_at};
use crate::{Error, Result};

/// Size of the trailing footer.
pub const FOOTER_SIZE: usize = 12;

/// Largest decompressed size accepted.
pub const MAX_DECOMPRESSED_SIZE: usize = 0x1000_0000;

/// Decoded footer of a BLZ blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Footer {
    compressed_size: usize,
    header_size: usize,
    additional_size: usize,
    /// Length of the uncompressed prefix.
    prefix: usize,
}

impl Footer {
    fn parse(compressed: &[u8]) -> Result<Self> {
        ensure_len(compressed, FOOTER_SIZE)?;
        let end = compressed.len();
        let additional = le_u32_at(compressed, end - 4)?;
        let header_size = le_u32_at(compressed, end - 8)? as usize;
        let compressed_size = le_u32_at(compressed, end - 12)? as usize;

        if additional == 0 {
            return Err(Error::NotCompressed);
        }
        if (additional as i32) < 0 {
            return Err(Error::UnsupportedFormat("additional size overflows"));
        }
        if compressed_size > end {
            return Err(Error::UnsupportedFormat("compressed size exceeds input"));
        }
        if header_size > compressed_size {
            return Err(Error::UnsupportedFormat("header size exceeds compressed size"));
        }

        let footer = Self {
            compressed_size,
            header_size,
            additional_size: additional as usize,
            prefix: end - compressed_size,
        };
        if footer.decompressed_size() > MAX_DECOMPRESSED_SIZE {
            return Err(Error::UnsupportedFormat("decompressed size too large"));
        }
        Ok(footer)
    }

    fn decompressed_size(&self) -> usize {
        self.compressed_size + self.additional_size + self.prefix
    }
}

/// Size `compressed` will occupy once decompressed.
pub fn decompressed_size(compressed: &[u8]) -> Result<usize> {
    Ok(Footer::parse(compressed)?.decompressed_size())
}

/// Decompress `compressed` into the front of `output`.
///
/// `output` must be at least [`decompressed_size`] bytes. Returns the number
/// of bytes written.
///
/// Fails with [`Error::NotCompressed`] when the footer reports no growth,
/// [`Error::UnsupportedFormat`] when the footer is inconsistent, and
/// [`Error::OutOfRange`] when the token stream would read or write outside
/// its buffers.
pub fn decompress(compressed: &[u8], output: &mut [u8]) -> Result<usize> {
    let footer = Footer::parse(compressed)?;
    let size = footer.decompressed_size();
    if output.len() < size {
        return Err(Error::OutOfRange("output buffer smaller than decompressed size"));
    }
    let stop = footer.prefix;
    let mut cmp = footer.compressed_size - footer.header_size + stop;
    let mut out = size;
    trace!(?footer, size, "decompressing BLZ");

    while out > stop {
        if cmp < 1 {
            return Err(Error::OutOfRange("control byte before start of input"));
        }
        cmp -= 1;
        let mut control = compressed[cmp];

        for _ in 0..8 {
            if control & 0x80 != 0 {
                if cmp < 2 {
                    return Err(Error::OutOfRange("back-reference before start of input"));
                }
                cmp -= 2;
                let token = u16::from_le_bytes([compressed[cmp], compressed[cmp + 1]]);
                let len = ((token >> 12) as usize + 3).min(out - stop);
                let distance = (token & 0x0FFF) as usize + 3;
                out -= len;
                if out + len + distance > size {
                    return Err(Error::OutOfRange("back-reference past end of output"));
                }
                for i in 0..len {
                    output[out + i] = output[out + i + distance];
                }
            } else {
                if cmp < 1 {
                    return Err(Error::OutOfRange("literal before start of input"));
                }
                cmp -= 1;
                out -= 1;
                output[out] = compressed[cmp];
            }
            control <<= 1;
            if out == stop {
                break;
            }
        }
    }

    output[..stop].copy_from_slice(&compressed[..stop]);
    Ok(size)
}

/// Decompress `compressed` into a new buffer of exactly the decompressed size.
pub fn decompress_to_vec(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; decompressed_size(compressed)?];
    decompress(compressed, &mut out)?;
    Ok(out)
}
