//! Parsers for Nintendo Switch metadata, ticket and executable containers.
//!
//! Each submodule targets one format family. All parsers follow the same
//! conventions:
//!
//! * **Decode from a buffer** - [`Container::decode`] takes the container's
//!   bytes and returns the parsed value together with the number of bytes
//!   the layout consumed. [`Container::read_from`] and [`Container::open`]
//!   fill that buffer from a stream or a [`StreamProducer`] first.
//! * **Validate structure, not identity** - magic fields are captured as
//!   text and left for the caller to check. Bounds, ordering and enum codes
//!   are enforced at decode time because getting them wrong would read
//!   outside the container.
//! * **Offsets are container-relative** - nested `(offset, size)` pairs are
//!   resolved against the start of the container that declares them, never
//!   against the file.
//! * **Crypto is separate** - parsers receive already-decrypted bytes.
//!
//! ## Format overview
//!
//! | Module     | Format | Description |
//! |------------|--------|-------------|
//! | [`npdm`]   | NPDM   | Program descriptor with embedded ACI0 and ACID |
//! | [`access`] | FAC/SAC/KAC | Access-control blocks nested in ACI0/ACID |
//! | [`kip`]    | KIP1   | Kernel initial process image with BLZ-compressed segments |
//! | [`nso`]    | NSO0   | Userland executable image with LZ4-compressed segments |
//! | [`ticket`] | Ticket | Signed title-key and rights record |

use std::io::Read;

use crate::compression::blz::MAX_DECOMPRESSED_SIZE;
use crate::region::{StreamProducer, read_exact_or_truncated};
use crate::{Error, Result};
use crate::utils::slice_at;

pub mod access;
pub mod kip;
pub mod npdm;
pub mod nso;
pub mod ticket;

/// A named byte range nested inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Short name, suitable as a file name when extracted.
    pub name: &'static str,
    /// Offset relative to the start of the declaring container.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
}

impl Region {
    pub(crate) fn new(name: &'static str, offset: u32, size: u32) -> Self {
        Self {
            name,
            offset: offset as u64,
            size: size as u64,
        }
    }

    /// First byte past the region.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Borrow this region out of its parent container's buffer.
    pub(crate) fn carve<'a>(&self, parent: &'a [u8]) -> Result<&'a [u8]> {
        slice_at(parent, self.offset as usize, self.size as usize)
    }
}

/// A fixed-layout binary container.
pub trait Container: Sized {
    /// Minimum number of bytes the fixed header occupies.
    const HEADER_SIZE: usize;

    /// Decode from the container's bytes, starting at offset zero.
    ///
    /// Returns the parsed value and the number of bytes of `buf` the decode
    /// consumed (header plus every nested block it resolved).
    fn decode(buf: &[u8]) -> Result<(Self, usize)>;

    /// Nested regions, relative to the start of this container.
    fn regions(&self) -> Vec<Region> {
        Vec::new()
    }

    /// Read `size` bytes from `r` and decode them.
    fn read_from<R: Read>(r: &mut R, size: usize) -> Result<Self> {
        let buf = read_exact_or_truncated(r, size)?;
        Ok(Self::decode(&buf)?.0)
    }

    /// Open a fresh stream from `producer` and decode `size` bytes from it.
    fn open<P: StreamProducer>(producer: &P, size: usize) -> Result<Self> {
        let mut stream = producer.open()?;
        Self::read_from(&mut stream, size)
    }
}

/// Segment slot of an executable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Text,
    Rodata,
    Data,
    /// Zero-filled; occupies memory but no file bytes.
    Bss,
}

impl SegmentKind {
    pub const ALL: [SegmentKind; 4] = [Self::Text, Self::Rodata, Self::Data, Self::Bss];

    /// Short name used for per-segment output files.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Rodata => "rodata",
            Self::Data => "data",
            Self::Bss => "bss",
        }
    }
}

/// Placement of one segment on disk and in memory.
///
/// `size` is the in-memory (decompressed) size. `file_size` is what the
/// segment occupies on disk, which differs when the segment is stored
/// compressed and is always zero for BSS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Offset of the stored bytes from the start of the image.
    pub file_offset: u32,
    /// Load offset from the image base.
    pub memory_offset: u32,
    pub size: u32,
    pub file_size: u32,
}

/// An executable image made of text, rodata, data and BSS segments.
pub trait SegmentedImage: Container {
    /// The four segments in [`SegmentKind::ALL`] order.
    fn segments(&self) -> [(SegmentKind, SegmentDescriptor); 4];

    /// Whether the stored bytes of `kind` are compressed.
    fn is_compressed(&self, kind: SegmentKind) -> bool;

    /// Turn a segment's stored bytes into its `size`-byte in-memory form.
    fn decompress_segment(&self, kind: SegmentKind, stored: &[u8]) -> Result<Vec<u8>>;

    /// Look up one segment.
    fn segment(&self, kind: SegmentKind) -> SegmentDescriptor {
        self.segments()
            .into_iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| d)
            .unwrap_or_default()
    }

    /// Total on-disk size: the header plus every stored segment.
    fn extent(&self) -> u64 {
        self.segments()
            .iter()
            .filter(|(kind, _)| *kind != SegmentKind::Bss)
            .map(|(_, d)| d.file_offset as u64 + d.file_size as u64)
            .fold(Self::HEADER_SIZE as u64, u64::max)
    }
}

/// Largest in-memory image a segmented executable may describe.
pub const MAX_IMAGE_SIZE: u64 = MAX_DECOMPRESSED_SIZE as u64;

/// In-memory size of `segment`, once its end is known to fit within
/// [`MAX_IMAGE_SIZE`].
///
/// Header fields are untrusted; this runs before any buffer is sized from
/// them.
pub(crate) fn checked_size(segment: &SegmentDescriptor) -> Result<usize> {
    let end = segment.memory_offset as u64 + segment.size as u64;
    if end > MAX_IMAGE_SIZE {
        return Err(Error::UnsupportedFormat("segment ends past maximum image size"));
    }
    Ok(segment.size as usize)
}

/// Return `stored` unchanged after checking it is exactly `size` bytes.
pub(crate) fn uncompressed_segment(stored: &[u8], size: usize) -> Result<Vec<u8>> {
    if stored.len() != size {
        return Err(Error::Truncated {
            expected: size as u64,
            actual: stored.len() as u64,
        });
    }
    Ok(stored.to_vec())
}
