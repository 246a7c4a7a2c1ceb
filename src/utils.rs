//! Fixed-layout field decoding shared by all parsers.
//!
//! Container headers are read into memory once and then decoded field by
//! field at literal offsets. Each `*_at` function reads exactly the bytes it
//! promises or returns [`Error::Truncated`] - an offset taken from untrusted
//! input can never index past the end of the buffer.

use std::io::Read;

use crate::{Error, Result};

/// Borrow `len` bytes at `offset`.
#[inline]
pub(crate) fn slice_at(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let end = offset.checked_add(len).ok_or(Error::Truncated {
        expected: u64::MAX,
        actual: buf.len() as u64,
    })?;
    buf.get(offset..end).ok_or(Error::Truncated {
        expected: end as u64,
        actual: buf.len() as u64,
    })
}

/// Read exactly `N` bytes at `offset` into a fixed-size array.
#[inline]
pub(crate) fn bytes_at<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(slice_at(buf, offset, N)?);
    Ok(out)
}

/// Read one byte at `offset`.
#[inline]
pub(crate) fn u8_at(buf: &[u8], offset: usize) -> Result<u8> {
    Ok(bytes_at::<1>(buf, offset)?[0])
}

/// Read a little-endian `u16` at `offset`.
#[inline]
pub(crate) fn le_u16_at(buf: &[u8], offset: usize) -> Result<u16> {
    Ok(u16::from_le_bytes(bytes_at(buf, offset)?))
}

/// Read a little-endian `u32` at `offset`.
#[inline]
pub(crate) fn le_u32_at(buf: &[u8], offset: usize) -> Result<u32> {
    Ok(u32::from_le_bytes(bytes_at(buf, offset)?))
}

/// Read a little-endian `u64` at `offset`.
#[inline]
pub(crate) fn le_u64_at(buf: &[u8], offset: usize) -> Result<u64> {
    Ok(u64::from_le_bytes(bytes_at(buf, offset)?))
}

/// Decode a null-padded text field of `len` bytes at `offset`.
///
/// Bytes after the first NUL are ignored; invalid UTF-8 is replaced rather
/// than rejected, since these fields are informational.
pub(crate) fn text_at(buf: &[u8], offset: usize, len: usize) -> Result<String> {
    let raw = slice_at(buf, offset, len)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// Fail with [`Error::UndersizedContainer`] unless `buf` holds at least
/// `required` bytes.
#[inline]
pub(crate) fn ensure_len(buf: &[u8], required: usize) -> Result<()> {
    if buf.len() < required {
        return Err(Error::UndersizedContainer {
            required,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Read a little-endian `u32` from a stream.
#[inline]
pub(crate) fn le_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    let n = fill(r, &mut b)?;
    if n < b.len() {
        return Err(Error::Truncated {
            expected: b.len() as u64,
            actual: n as u64,
        });
    }
    Ok(u32::from_le_bytes(b))
}

/// Read until `buf` is full or the stream ends. Returns the byte count.
pub(crate) fn fill<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_fields() {
        let buf = [0x78, 0x56, 0x34, 0x12, 0xEF, 0xCD, 0xAB, 0x89, 0x01];
        assert_eq!(le_u16_at(&buf, 0).unwrap(), 0x5678);
        assert_eq!(le_u32_at(&buf, 0).unwrap(), 0x1234_5678);
        assert_eq!(le_u64_at(&buf, 0).unwrap(), 0x89AB_CDEF_1234_5678);
        assert_eq!(u8_at(&buf, 8).unwrap(), 0x01);
    }

    #[test]
    fn field_past_end_is_truncated() {
        let buf = [0u8; 6];
        match le_u32_at(&buf, 4) {
            Err(Error::Truncated { expected, actual }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 6);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(slice_at(&buf, usize::MAX, 2).is_err());
    }

    #[test]
    fn text_stops_at_first_nul() {
        let buf = *b"Application\0junk";
        assert_eq!(text_at(&buf, 0, 16).unwrap(), "Application");
        assert_eq!(text_at(&buf, 0, 4).unwrap(), "Appl");
    }

    #[test]
    fn undersized_buffer_is_reported() {
        assert!(ensure_len(&[0u8; 0x80], 0x80).is_ok());
        assert!(matches!(
            ensure_len(&[0u8; 0x7F], 0x80),
            Err(Error::UndersizedContainer {
                required: 0x80,
                actual: 0x7F
            })
        ));
    }

    #[test]
    fn stream_u32_reports_short_read() {
        let mut r: &[u8] = &[1, 0];
        assert!(matches!(
            le_u32(&mut r),
            Err(Error::Truncated {
                expected: 4,
                actual: 2
            })
        ));
    }
}
