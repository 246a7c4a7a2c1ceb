//! KIP1 (Kernel Initial Process) - built-in system module image.
//!
//! KIPs are embedded in the kernel package (INI1) and loaded before the
//! filesystem is up. Code and data segments are usually stored with BLZ
//! compression (see [`crate::compression::blz`]).
//!
//! ## Header Layout (0x100 bytes)
//! ```text
//! [0x00] Magic "KIP1"                                   (4 bytes)
//! [0x04] Name (null-padded, 12 bytes)
//! [0x10] ProgramId                                      (u64 LE)
//! [0x18] Version                                        (u32 LE)
//! [0x1C] MainThreadPriority                             (1 byte)
//! [0x1D] DefaultCore                                    (1 byte)
//! [0x1E] Reserved                                       (1 byte)
//! [0x1F] Flags                                          (1 byte)
//! [0x20] Text   { MemoryOffset, Size, CompressedSize, AffinityMask }
//! [0x30] Rodata { MemoryOffset, Size, CompressedSize, MainThreadStackSize }
//! [0x40] Data   { MemoryOffset, Size, CompressedSize, Reserved }
//! [0x50] Bss    { MemoryOffset, Size, Reserved, Reserved }
//! [0x60] Reserved (0x20 bytes)
//! [0x80] Kernel capabilities (32 × u32 LE)
//! [0x100] Text, Rodata, Data stored back to back
//! ```
//!
//! ## Flags
//! ```text
//! bit 0-2  Text / Rodata / Data compressed
//! bit 3    64-bit instructions
//! bit 4    64-bit address space
//! bit 5    Uses secure memory
//! ```

use tracing::{debug, warn};

use super::access::KernelAccessControl;
use super::{
    Container, Region, SegmentDescriptor, SegmentKind, SegmentedImage, checked_size,
    uncompressed_segment,
};
use crate::compression::blz;
use crate::utils::{ensure_len, le_u32_at, le_u64_at, slice_at, text_at, u8_at};
use crate::{Error, Result};

/// Parsed KIP1 header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KipHeader {
    /// Magic as read; `"KIP1"` for well-formed images.
    pub magic: String,
    /// Module name, e.g. `"FS"` or `"Loader"`.
    pub name: String,
    pub program_id: u64,
    pub version: u32,
    pub main_thread_priority: u8,
    pub default_core: u8,
    /// Raw flags byte.
    pub flags: u8,
    pub affinity_mask: u32,
    pub main_thread_stack_size: u32,
    /// Text, rodata, data and BSS placement.
    pub segments: [SegmentDescriptor; 4],
    /// Kernel capability descriptors from the header.
    pub capabilities: KernelAccessControl,
}

impl KipHeader {
    pub fn is_64bit(&self) -> bool {
        self.flags & 0x08 != 0
    }

    pub fn is_64bit_address_space(&self) -> bool {
        self.flags & 0x10 != 0
    }

    pub fn uses_secure_memory(&self) -> bool {
        self.flags & 0x20 != 0
    }
}

impl Container for KipHeader {
    const HEADER_SIZE: usize = 0x100;

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        ensure_len(buf, Self::HEADER_SIZE)?;
        let magic = text_at(buf, 0x00, 4)?;
        if magic != "KIP1" {
            warn!(%magic, "KIP1 magic mismatch");
        }

        // Stored segments follow the header back to back; BSS has no bytes.
        let mut segments = [SegmentDescriptor::default(); 4];
        let mut file_offset = Self::HEADER_SIZE as u32;
        for (i, segment) in segments.iter_mut().enumerate() {
            let at = 0x20 + i * 0x10;
            let memory_offset = le_u32_at(buf, at)?;
            let size = le_u32_at(buf, at + 4)?;
            let file_size = if i == 3 { 0 } else { le_u32_at(buf, at + 8)? };
            *segment = SegmentDescriptor {
                file_offset,
                memory_offset,
                size,
                file_size,
            };
            file_offset = file_offset
                .checked_add(file_size)
                .ok_or(Error::UnsupportedFormat("KIP1 segments exceed 4 GiB"))?;
        }

        let header = Self {
            magic,
            name: text_at(buf, 0x04, 0x0C)?,
            program_id: le_u64_at(buf, 0x10)?,
            version: le_u32_at(buf, 0x18)?,
            main_thread_priority: u8_at(buf, 0x1C)?,
            default_core: u8_at(buf, 0x1D)?,
            flags: u8_at(buf, 0x1F)?,
            affinity_mask: le_u32_at(buf, 0x2C)?,
            main_thread_stack_size: le_u32_at(buf, 0x3C)?,
            segments,
            capabilities: KernelAccessControl::decode(slice_at(buf, 0x80, 0x80)?)?.0,
        };
        debug!(
            name = %header.name,
            program_id = header.program_id,
            extent = header.extent(),
            "decoded KIP1 header"
        );
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

impl SegmentedImage for KipHeader {
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
        let mut out = vec![0u8; size];
        let written = blz::decompress(stored, &mut out)?;
        if written != out.len() {
            return Err(Error::UnsupportedFormat(
                "BLZ size does not match KIP1 segment size",
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::compression::blz::tests::{build, repeated_plain, repeated_units};

    pub(crate) const RODATA: &[u8] = b"read-only data!!";
    pub(crate) const DATA: &[u8] = b"rw";
    pub(crate) const BSS_SIZE: u32 = 0x20;

    /// A KIP with a BLZ-compressed text segment, plain rodata and data, and
    /// a BSS tail. Segments are packed at 0x1000-aligned memory offsets.
    pub(crate) fn kip_bytes() -> Vec<u8> {
        let plain_text = repeated_plain();
        let text = build(&repeated_units(), &[], 0, plain_text.len());

        let mut buf = vec![0u8; 0x100];
        buf[0..4].copy_from_slice(b"KIP1");
        buf[4..10].copy_from_slice(b"Loader");
        buf[0x10..0x18].copy_from_slice(&0x0100_0000_0000_0001u64.to_le_bytes());
        buf[0x1C] = 49;
        buf[0x1D] = 3;
        buf[0x1F] = 0x01 | 0x08 | 0x10;
        let layout = [
            (0x0000u32, plain_text.len() as u32, text.len() as u32),
            (0x1000, RODATA.len() as u32, RODATA.len() as u32),
            (0x2000, DATA.len() as u32, DATA.len() as u32),
            (0x2000 + DATA.len() as u32, BSS_SIZE, 0),
        ];
        for (i, (memory_offset, size, stored)) in layout.into_iter().enumerate() {
            let at = 0x20 + i * 0x10;
            buf[at..at + 4].copy_from_slice(&memory_offset.to_le_bytes());
            buf[at + 4..at + 8].copy_from_slice(&size.to_le_bytes());
            buf[at + 8..at + 12].copy_from_slice(&stored.to_le_bytes());
        }
        buf[0x3C..0x40].copy_from_slice(&0x4000u32.to_le_bytes());
        for cap in buf[0x80..0x100].chunks_exact_mut(4) {
            cap.copy_from_slice(&u32::MAX.to_le_bytes());
        }
        buf[0x80..0x84].copy_from_slice(&0x0000_0007u32.to_le_bytes());

        buf.extend_from_slice(&text);
        buf.extend_from_slice(RODATA);
        buf.extend_from_slice(DATA);
        buf
    }

    #[test]
    fn decodes_header() {
        let buf = kip_bytes();
        let (kip, consumed) = KipHeader::decode(&buf).unwrap();
        assert_eq!(consumed, 0x100);
        assert_eq!(kip.magic, "KIP1");
        assert_eq!(kip.name, "Loader");
        assert_eq!(kip.main_thread_priority, 49);
        assert_eq!(kip.default_core, 3);
        assert_eq!(kip.main_thread_stack_size, 0x4000);
        assert!(kip.is_64bit());
        assert!(kip.is_64bit_address_space());
        assert!(!kip.uses_secure_memory());
        assert!(kip.is_compressed(SegmentKind::Text));
        assert!(!kip.is_compressed(SegmentKind::Rodata));
        assert_eq!(kip.capabilities.capabilities.len(), 32);
    }

    #[test]
    fn extent_excludes_bss() {
        let buf = kip_bytes();
        let (kip, _) = KipHeader::decode(&buf).unwrap();
        let stored: u64 = kip.segments[..3].iter().map(|s| s.file_size as u64).sum();
        assert_eq!(kip.extent(), 0x100 + stored);
        assert_eq!(kip.extent(), buf.len() as u64);
        let bss = kip.segment(SegmentKind::Bss);
        assert_eq!(bss.size, BSS_SIZE);
        assert_eq!(bss.file_size, 0);
    }

    #[test]
    fn segment_file_offsets_are_sequential() {
        let (kip, _) = KipHeader::decode(&kip_bytes()).unwrap();
        let text = kip.segment(SegmentKind::Text);
        let rodata = kip.segment(SegmentKind::Rodata);
        let data = kip.segment(SegmentKind::Data);
        assert_eq!(text.file_offset, 0x100);
        assert_eq!(rodata.file_offset, text.file_offset + text.file_size);
        assert_eq!(data.file_offset, rodata.file_offset + rodata.file_size);
        let names: Vec<_> = kip.regions().iter().map(|r| r.name).collect();
        assert_eq!(names, ["text", "rodata", "data"]);
    }

    #[test]
    fn decompresses_text_segment() {
        let buf = kip_bytes();
        let (kip, _) = KipHeader::decode(&buf).unwrap();
        let text = kip.segment(SegmentKind::Text);
        let stored = &buf[text.file_offset as usize..(text.file_offset + text.file_size) as usize];
        let plain = kip.decompress_segment(SegmentKind::Text, stored).unwrap();
        assert_eq!(plain, repeated_plain());
    }

    #[test]
    fn uncompressed_segment_size_must_match() {
        let (kip, _) = KipHeader::decode(&kip_bytes()).unwrap();
        assert!(matches!(
            kip.decompress_segment(SegmentKind::Rodata, &RODATA[1..]),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn compressed_flag_with_raw_footer_is_not_compressed() {
        let mut buf = kip_bytes();
        buf[0x1F] |= 0x04;
        let (kip, _) = KipHeader::decode(&buf).unwrap();
        let mut stored = vec![0u8; 4];
        stored.extend_from_slice(&[16, 0, 0, 0, 12, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            kip.decompress_segment(SegmentKind::Data, &stored),
            Err(Error::NotCompressed)
        ));
    }

    #[test]
    fn declared_size_past_ceiling_is_rejected() {
        let mut buf = kip_bytes();
        buf[0x24..0x28].copy_from_slice(&0x1000_0001u32.to_le_bytes());
        let (kip, _) = KipHeader::decode(&buf).unwrap();
        assert!(matches!(
            kip.decompress_segment(SegmentKind::Text, &[0u8; 16]),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn overflowing_segment_sizes_are_rejected() {
        let mut buf = kip_bytes();
        buf[0x28..0x2C].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            KipHeader::decode(&buf),
            Err(Error::UnsupportedFormat(_))
        ));
    }
}
