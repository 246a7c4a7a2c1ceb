//! NSO0 - userland executable image.
//!
//! Found as `main`, `rtld`, `sdk` and `subsdk*` in the ExeFS section of a
//! Program NCA, next to `main.npdm`. Segments are optionally LZ4 block
//! compressed; decompression needs the `compression` feature.
//!
//! ## Header Layout (0x100 bytes)
//! ```text
//! [0x00] Magic "NSO0"                                   (4 bytes)
//! [0x04] Version                                        (u32 LE)
//! [0x08] Reserved                                       (4 bytes)
//! [0x0C] Flags                                          (u32 LE)
//! [0x10] Text   { FileOffset, MemoryOffset, Size }      (u32 LE × 3)
//! [0x1C] ModuleNameOffset                               (u32 LE)
//! [0x20] Rodata { FileOffset, MemoryOffset, Size }      (u32 LE × 3)
//! [0x2C] ModuleNameSize                                 (u32 LE)
//! [0x30] Data   { FileOffset, MemoryOffset, Size }      (u32 LE × 3)
//! [0x3C] BssSize                                        (u32 LE)
//! [0x40] ModuleId                                       (0x20 bytes)
//! [0x60] TextFileSize / RodataFileSize / DataFileSize   (u32 LE × 3)
//! [0x6C] Reserved                                       (0x1C bytes)
//! [0x88] ApiInfo { Offset, Size } (relative to rodata)  (u32 LE × 2)
//! [0x90] DynStr  { Offset, Size } (relative to rodata)  (u32 LE × 2)
//! [0x98] DynSym  { Offset, Size } (relative to rodata)  (u32 LE × 2)
//! [0xA0] Text / Rodata / Data SHA-256                   (0x20 bytes × 3)
//! ```
//!
//! ## Flags
//! ```text
//! bit 0-2  Text / Rodata / Data compressed
//! bit 3-5  Text / Rodata / Data hash check
//! ```

use tracing::{debug, warn};

use super::{
    Container, Region, SegmentDescriptor, SegmentKind, SegmentedImage, checked_size,
    uncompressed_segment,
};
use crate::Result;
use crate::utils::{bytes_at, ensure_len, le_u32_at};

/// Parsed NSO0 header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsoHeader {
    /// Magic as read; `"NSO0"` for well-formed images.
    pub magic: String,
    pub version: u32,
    /// Raw flags word.
    pub flags: u32,
    /// Text, rodata, data and BSS placement.
    pub segments: [SegmentDescriptor; 4],
    pub module_name_offset: u32,
    pub module_name_size: u32,
    /// Build ID of the module.
    pub module_id: [u8; 0x20],
    /// `.api_info` range, relative to the start of rodata.
    pub api_info: Region,
    /// `.dynstr` range, relative to the start of rodata.
    pub dynstr: Region,
    /// `.dynsym` range, relative to the start of rodata.
    pub dynsym: Region,
    /// SHA-256 of each decompressed segment. Not verified here.
    pub hashes: [[u8; 0x20]; 3],
}

impl NsoHeader {
    /// Whether the loader is asked to verify the hash of `kind`.
    pub fn checks_hash(&self, kind: SegmentKind) -> bool {
        match kind {
            SegmentKind::Text => self.flags & 0x08 != 0,
            SegmentKind::Rodata => self.flags & 0x10 != 0,
            SegmentKind::Data => self.flags & 0x20 != 0,
            SegmentKind::Bss => false,
        }
    }
}

impl Container for NsoHeader {
    const HEADER_SIZE: usize = 0x100;

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        ensure_len(buf, Self::HEADER_SIZE)?;
        let magic = String::from_utf8_lossy(&bytes_at::<4>(buf, 0)?).into_owned();
        if magic != "NSO0" {
            warn!(%magic, "NSO0 magic mismatch");
        }

        let segment = |at: usize, file_size_at: usize| -> Result<SegmentDescriptor> {
            Ok(SegmentDescriptor {
                file_offset: le_u32_at(buf, at)?,
                memory_offset: le_u32_at(buf, at + 4)?,
                size: le_u32_at(buf, at + 8)?,
                file_size: le_u32_at(buf, file_size_at)?,
            })
        };
        let text = segment(0x10, 0x60)?;
        let rodata = segment(0x20, 0x64)?;
        let data = segment(0x30, 0x68)?;
        let bss = SegmentDescriptor {
            file_offset: data.file_offset.saturating_add(data.file_size),
            memory_offset: data.memory_offset.saturating_add(data.size),
            size: le_u32_at(buf, 0x3C)?,
            file_size: 0,
        };

        let rodata_region = |name, at: usize| -> Result<Region> {
            Ok(Region::new(name, le_u32_at(buf, at)?, le_u32_at(buf, at + 4)?))
        };

        let header = Self {
            magic,
            version: le_u32_at(buf, 0x04)?,
            flags: le_u32_at(buf, 0x0C)?,
            segments: [text, rodata, data, bss],
            module_name_offset: le_u32_at(buf, 0x1C)?,
            module_name_size: le_u32_at(buf, 0x2C)?,
            module_id: bytes_at(buf, 0x40)?,
            api_info: rodata_region("api_info", 0x88)?,
            dynstr: rodata_region("dynstr", 0x90)?,
            dynsym: rodata_region("dynsym", 0x98)?,
            hashes: [bytes_at(buf, 0xA0)?, bytes_at(buf, 0xC0)?, bytes_at(buf, 0xE0)?],
        };
        debug!(extent = header.extent(), flags = header.flags, "decoded NSO0 header");
        Ok((header, Self::HEADER_SIZE))
    }

    fn regions(&self) -> Vec<Region> {
        self.segments()
            .into_iter()
            .filter(|(kind, _)| *kind != SegmentKind::Bss)
            .map(|(kind, d)| Region::new(kind.name(), d.file_offset, d.file_size))
            .collect()
    }
}

impl SegmentedImage for NsoHeader {
    fn segments(&self) -> [(SegmentKind, SegmentDescriptor); 4] {
        let [text, rodata, data, bss] = self.segments;
        [
            (SegmentKind::Text, text),
            (SegmentKind::Rodata, rodata),
            (SegmentKind::Data, data),
            (SegmentKind::Bss, bss),
        ]
    }

    fn is_compressed(&self, kind: SegmentKind) -> bool {
        match kind {
            SegmentKind::Text => self.flags & 0x01 != 0,
            SegmentKind::Rodata => self.flags & 0x02 != 0,
            SegmentKind::Data => self.flags & 0x04 != 0,
            SegmentKind::Bss => false,
        }
    }

    fn decompress_segment(&self, kind: SegmentKind, stored: &[u8]) -> Result<Vec<u8>> {
        let size = checked_size(&self.segment(kind))?;
        if !self.is_compressed(kind) {
            return uncompressed_segment(stored, size);
        }
        decompress_lz4(stored, size)
    }
}

#[cfg(feature = "compression")]
fn decompress_lz4(stored: &[u8], size: usize) -> Result<Vec<u8>> {
    crate::compression::lz4::decompress_lz4(stored, size)
}

#[cfg(not(feature = "compression"))]
fn decompress_lz4(_stored: &[u8], _size: usize) -> Result<Vec<u8>> {
    Err(crate::Error::UnsupportedFormat(
        "LZ4 segments require the `compression` feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &[u8] = b"\x00\x00\x80\xd2\xc0\x03\x5f\xd6";
    const RODATA: &[u8] = b"hello from rodata";
    const DATA: &[u8] = b"data";

    /// An NSO with uncompressed segments packed right after the header.
    fn nso_bytes(flags: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 0x100];
        buf[0..4].copy_from_slice(b"NSO0");
        buf[0x0C..0x10].copy_from_slice(&flags.to_le_bytes());
        let mut file_offset = 0x100u32;
        let segments = [
            (0x10, 0x60, 0x0000u32, TEXT),
            (0x20, 0x64, 0x1000, RODATA),
            (0x30, 0x68, 0x2000, DATA),
        ];
        for (at, file_size_at, memory_offset, bytes) in segments {
            let len = bytes.len() as u32;
            buf[at..at + 4].copy_from_slice(&file_offset.to_le_bytes());
            buf[at + 4..at + 8].copy_from_slice(&memory_offset.to_le_bytes());
            buf[at + 8..at + 12].copy_from_slice(&len.to_le_bytes());
            buf[file_size_at..file_size_at + 4].copy_from_slice(&len.to_le_bytes());
            file_offset += len;
        }
        buf[0x3C..0x40].copy_from_slice(&0x100u32.to_le_bytes());
        buf[0x40..0x60].fill(0xAB);
        buf[0x90..0x94].copy_from_slice(&6u32.to_le_bytes());
        buf[0x94..0x98].copy_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(TEXT);
        buf.extend_from_slice(RODATA);
        buf.extend_from_slice(DATA);
        buf
    }

    #[test]
    fn decodes_header() {
        let buf = nso_bytes(0x38);
        let (nso, consumed) = NsoHeader::decode(&buf).unwrap();
        assert_eq!(consumed, 0x100);
        assert_eq!(nso.magic, "NSO0");
        assert_eq!(nso.module_id, [0xAB; 0x20]);
        assert_eq!(nso.dynstr.offset, 6);
        assert_eq!(nso.dynstr.size, 4);
        assert!(nso.checks_hash(SegmentKind::Rodata));
        assert!(!nso.is_compressed(SegmentKind::Text));
        assert_eq!(nso.extent(), buf.len() as u64);
    }

    #[test]
    fn bss_follows_data_in_memory() {
        let (nso, _) = NsoHeader::decode(&nso_bytes(0)).unwrap();
        let bss = nso.segment(SegmentKind::Bss);
        assert_eq!(bss.memory_offset, 0x2000 + DATA.len() as u32);
        assert_eq!(bss.size, 0x100);
        assert_eq!(bss.file_size, 0);
    }

    #[test]
    fn plain_segments_pass_through() {
        let (nso, _) = NsoHeader::decode(&nso_bytes(0)).unwrap();
        assert_eq!(nso.decompress_segment(SegmentKind::Rodata, RODATA).unwrap(), RODATA);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn compressed_segment_uses_lz4() {
        let (mut nso, _) = NsoHeader::decode(&nso_bytes(0x01)).unwrap();
        let plain = b"nop nop nop nop nop nop nop nop nop nop ".to_vec();
        nso.segments[0].size = plain.len() as u32;
        let packed = lz4_flex::block::compress(&plain);
        assert_eq!(nso.decompress_segment(SegmentKind::Text, &packed).unwrap(), plain);
    }

    #[cfg(not(feature = "compression"))]
    #[test]
    fn compressed_segment_needs_feature() {
        let (nso, _) = NsoHeader::decode(&nso_bytes(0x01)).unwrap();
        assert!(matches!(
            nso.decompress_segment(SegmentKind::Text, TEXT),
            Err(crate::Error::UnsupportedFormat(_))
        ));
    }
}
