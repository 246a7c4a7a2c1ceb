//! NPDM (Nintendo Program Descriptor Meta) - process security metadata.
//!
//! Found as `main.npdm` in the ExeFS section of a Program NCA.
//! Describes the memory model, thread configuration, and access-control
//! policy for a Switch title.
//!
//! ## File Layout
//! ```text
//! [0x00] Magic "META"                                   (4 bytes)
//! [0x04] SignatureKeyGeneration                         (u32 LE)
//! [0x08] Reserved                                       (4 bytes)
//! [0x0C] MMUFlags   (bit 0 = 64-bit, bits 1-3 = address space)
//! [0x0D] Reserved                                       (1 byte)
//! [0x0E] MainThreadPriority (0–63)                      (1 byte)
//! [0x0F] MainThreadCoreNumber                           (1 byte)
//! [0x10] Reserved                                       (4 bytes)
//! [0x14] SystemResourceSize (personal heap)             (u32 LE)
//! [0x18] Version                                        (u32 LE)
//! [0x1C] MainThreadStackSize                            (u32 LE)
//! [0x20] TitleName (null-padded UTF-8, 16 bytes)
//! [0x30] ProductCode (null-padded, 16 bytes)
//! [0x40] Reserved (0x30 bytes)
//! [0x70] AciOffset  (relative to start of NPDM file)   (u32 LE)
//! [0x74] AciSize                                        (u32 LE)
//! [0x78] AcidOffset (relative to start of NPDM file)   (u32 LE)
//! [0x7C] AcidSize                                       (u32 LE)
//! ```
//!
//! ACI0 and ACID may appear on disk in either order; retail files usually
//! put ACID first. They are decoded in ascending offset order and must not
//! overlap each other or the header.
//!
//! ## ACI0 (Access Control Info) - at AciOffset
//! ```text
//! [0x00] Magic "ACI0"          (4 bytes)
//! [0x04] Reserved              (0xC bytes)
//! [0x10] ProgramId             (u64 LE)
//! [0x18] Reserved              (8 bytes)
//! [0x20] FsAccessHeaderOffset  (u32 LE)
//! [0x24] FsAccessHeaderSize    (u32 LE)
//! [0x28] SvcAccessControlOffset(u32 LE)
//! [0x2C] SvcAccessControlSize  (u32 LE)
//! [0x30] KernelAccessControlOffset (u32 LE)
//! [0x34] KernelAccessControlSize   (u32 LE)
//! [0x38] Reserved              (8 bytes)
//! ```
//!
//! ## ACID (Access Control Info Descriptor) - at AcidOffset
//! ```text
//! [0x000] RSA-2048 signature   (0x100 bytes)
//! [0x100] RSA-2048 public key  (0x100 bytes)
//! [0x200] Magic "ACID"         (4 bytes)
//! [0x204] Size                 (u32 LE)
//! [0x208] Version              (1 byte)
//! [0x209] Reserved             (3 bytes)
//! [0x20C] Flags                (u32 LE)
//! [0x210] ProgramIdMin         (u64 LE)
//! [0x218] ProgramIdMax         (u64 LE)
//! [0x220] FsAccessControlOffset / Size      (u32 LE × 2)
//! [0x228] SvcAccessControlOffset / Size     (u32 LE × 2)
//! [0x230] KernelAccessControlOffset / Size  (u32 LE × 2)
//! [0x238] Reserved             (8 bytes)
//! ```
//! The three ACID children must be laid out in that order.

use std::io::Read;

use tracing::{debug, trace, warn};

use super::access::{FsAccessControl, FsAccessHeader, KernelAccessControl, ServiceAccessControl};
use super::{Container, Region};
use crate::region::{read_exact_or_truncated, skip_exact};
use crate::utils::{bytes_at, ensure_len, le_u32_at, le_u64_at, text_at, u8_at};
use crate::{Error, Result};

/// Process address-space layout selected by the MMU flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    AddressSpace32Bit,
    AddressSpace64BitOld,
    AddressSpace32BitNoReserved,
    AddressSpace64Bit,
    Unknown(u8),
}

impl From<u8> for AddressSpace {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::AddressSpace32Bit,
            1 => Self::AddressSpace64BitOld,
            2 => Self::AddressSpace32BitNoReserved,
            3 => Self::AddressSpace64Bit,
            x => Self::Unknown(x),
        }
    }
}

/// Parsed NPDM file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Npdm {
    /// Magic as read; `"META"` for well-formed files.
    pub magic: String,
    pub signature_key_generation: u32,
    /// Raw MMU flags byte.
    pub mmu_flags: u8,
    /// Priority of the main thread (0–63).
    pub main_thread_priority: u8,
    /// Core number the main thread starts on.
    pub main_thread_core: u8,
    /// System resource (personal heap) size in bytes.
    pub system_resource_size: u32,
    /// Version field from META header.
    pub version: u32,
    /// Main thread stack size in bytes.
    pub main_thread_stack_size: u32,
    /// Human-readable title name (up to 16 bytes, null-padded).
    pub title_name: String,
    /// Product code string (up to 16 bytes, null-padded).
    pub product_code: String,
    /// Location of ACI0 within the file.
    pub aci_region: Region,
    /// Location of ACID within the file.
    pub acid_region: Region,
    /// Access control info for this title.
    pub aci: Aci0,
    /// Access control descriptor (signed policy from Nintendo / publisher).
    pub acid: Acid,
}

impl Npdm {
    /// Whether the process runs in 64-bit mode.
    pub fn is_64bit(&self) -> bool {
        self.mmu_flags & 0x01 != 0
    }

    pub fn address_space(&self) -> AddressSpace {
        AddressSpace::from((self.mmu_flags >> 1) & 0x07)
    }

    /// Decode an NPDM by streaming over `r` instead of slicing a buffer.
    ///
    /// `r` must be positioned at the "META" magic. The header is read, then
    /// the earlier of ACI0/ACID is reached by skipping to it and the later
    /// one by skipping the gap between them. Nothing past the end of the
    /// later block is consumed.
    pub fn read_from_stream<R: Read>(r: &mut R) -> Result<Self> {
        let header = read_exact_or_truncated(r, Self::HEADER_SIZE)?;
        let (aci_region, acid_region) = Self::block_regions(&header)?;
        let (first, second) = ordered(aci_region, acid_region)?;

        skip_exact(r, first.offset - Self::HEADER_SIZE as u64)?;
        let first_buf = read_exact_or_truncated(r, first.size as usize)?;
        skip_exact(r, second.offset - first.offset - first.size)?;
        let second_buf = read_exact_or_truncated(r, second.size as usize)?;

        let (aci_buf, acid_buf) = if first.name == aci_region.name {
            (first_buf, second_buf)
        } else {
            (second_buf, first_buf)
        };
        Self::assemble(&header, aci_region, acid_region, &aci_buf, &acid_buf)
    }

    fn block_regions(header: &[u8]) -> Result<(Region, Region)> {
        let aci = Region::new("aci0", le_u32_at(header, 0x70)?, le_u32_at(header, 0x74)?);
        let acid = Region::new("acid", le_u32_at(header, 0x78)?, le_u32_at(header, 0x7C)?);
        Ok((aci, acid))
    }

    fn assemble(
        header: &[u8],
        aci_region: Region,
        acid_region: Region,
        aci_buf: &[u8],
        acid_buf: &[u8],
    ) -> Result<Self> {
        let magic = text_at(header, 0x00, 4)?;
        if magic != "META" {
            warn!(%magic, "NPDM magic mismatch");
        }
        let (aci, _) = Aci0::decode(aci_buf)?;
        let (acid, _) = Acid::decode(acid_buf)?;

        let npdm = Self {
            magic,
            signature_key_generation: le_u32_at(header, 0x04)?,
            mmu_flags: u8_at(header, 0x0C)?,
            main_thread_priority: u8_at(header, 0x0E)?,
            main_thread_core: u8_at(header, 0x0F)?,
            system_resource_size: le_u32_at(header, 0x14)?,
            version: le_u32_at(header, 0x18)?,
            main_thread_stack_size: le_u32_at(header, 0x1C)?,
            title_name: text_at(header, 0x20, 0x10)?,
            product_code: text_at(header, 0x30, 0x10)?,
            aci_region,
            acid_region,
            aci,
            acid,
        };
        debug!(
            title = %npdm.title_name,
            program_id = npdm.aci.program_id,
            "decoded NPDM"
        );
        Ok(npdm)
    }
}

impl Container for Npdm {
    const HEADER_SIZE: usize = 0x80;

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        ensure_len(buf, Self::HEADER_SIZE)?;
        let (aci_region, acid_region) = Self::block_regions(buf)?;
        let (_, second) = ordered(aci_region, acid_region)?;
        let aci_buf = aci_region.carve(buf)?;
        let acid_buf = acid_region.carve(buf)?;
        let npdm = Self::assemble(buf, aci_region, acid_region, aci_buf, acid_buf)?;
        Ok((npdm, second.end() as usize))
    }

    fn regions(&self) -> Vec<Region> {
        vec![self.aci_region, self.acid_region]
    }
}

/// Sort the two top-level blocks by offset and reject overlap.
fn ordered(a: Region, b: Region) -> Result<(Region, Region)> {
    let (first, second) = if a.offset <= b.offset { (a, b) } else { (b, a) };
    if first.offset < Npdm::HEADER_SIZE as u64 {
        return Err(Error::OverlappingBlocks("access block overlaps NPDM header"));
    }
    if first.end() > second.offset {
        return Err(Error::OverlappingBlocks("ACI0 and ACID overlap"));
    }
    trace!(first = first.name, second = second.name, "resolved NPDM block order");
    Ok((first, second))
}

/// ACI0 - per-title access control info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aci0 {
    /// Magic as read; `"ACI0"` for well-formed blocks.
    pub magic: String,
    /// Program (title) ID for this build.
    pub program_id: u64,
    pub fs_access: FsAccessHeader,
    pub service_access: ServiceAccessControl,
    pub kernel_access: KernelAccessControl,
    regions: [Region; 3],
}

impl Container for Aci0 {
    const HEADER_SIZE: usize = 0x40;

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        ensure_len(buf, Self::HEADER_SIZE)?;
        let magic = text_at(buf, 0x00, 4)?;
        if magic != "ACI0" {
            warn!(%magic, "ACI0 magic mismatch");
        }
        let regions = child_regions(buf, 0x20)?;
        let [fs, sac, kac] = regions;
        trace!(?fs, ?sac, ?kac, "resolved ACI0 children");

        let aci = Self {
            magic,
            program_id: le_u64_at(buf, 0x10)?,
            fs_access: FsAccessHeader::decode(fs.carve(buf)?)?.0,
            service_access: ServiceAccessControl::decode(sac.carve(buf)?)?.0,
            kernel_access: KernelAccessControl::decode(kac.carve(buf)?)?.0,
            regions,
        };
        Ok((aci, consumed(Self::HEADER_SIZE, &regions)))
    }

    fn regions(&self) -> Vec<Region> {
        self.regions.to_vec()
    }
}

/// ACID - signed access control descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acid {
    /// RSA-2048 signature over the descriptor. Not verified.
    pub signature: [u8; 0x100],
    /// RSA-2048 public key used to verify the NPDM header signature.
    pub public_key: [u8; 0x100],
    /// Magic as read; `"ACID"` for well-formed blocks.
    pub magic: String,
    /// Signed data size declared by the descriptor.
    pub size: u32,
    pub version: u8,
    /// ACID flags field.
    pub flags: u32,
    /// Minimum allowed program ID for this descriptor.
    pub program_id_min: u64,
    /// Maximum allowed program ID for this descriptor.
    pub program_id_max: u64,
    pub fs_access: FsAccessControl,
    pub service_access: ServiceAccessControl,
    pub kernel_access: KernelAccessControl,
    regions: [Region; 3],
}

impl Acid {
    /// Whether the descriptor is flagged as a production (retail) signature.
    pub fn is_production(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

impl Container for Acid {
    const HEADER_SIZE: usize = 0x240;

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        ensure_len(buf, Self::HEADER_SIZE)?;
        let magic = text_at(buf, 0x200, 4)?;
        if magic != "ACID" {
            warn!(%magic, "ACID magic mismatch");
        }
        let regions = child_regions(buf, 0x220)?;
        let [fs, sac, kac] = regions;
        if fs.offset > sac.offset {
            return Err(Error::OutOfOrderBlocks(
                "ACID service access control precedes filesystem access control",
            ));
        }
        if sac.offset > kac.offset {
            return Err(Error::OutOfOrderBlocks(
                "ACID kernel access control precedes service access control",
            ));
        }
        trace!(?fs, ?sac, ?kac, "resolved ACID children");

        let acid = Self {
            signature: bytes_at(buf, 0x000)?,
            public_key: bytes_at(buf, 0x100)?,
            magic,
            size: le_u32_at(buf, 0x204)?,
            version: u8_at(buf, 0x208)?,
            flags: le_u32_at(buf, 0x20C)?,
            program_id_min: le_u64_at(buf, 0x210)?,
            program_id_max: le_u64_at(buf, 0x218)?,
            fs_access: FsAccessControl::decode(fs.carve(buf)?)?.0,
            service_access: ServiceAccessControl::decode(sac.carve(buf)?)?.0,
            kernel_access: KernelAccessControl::decode(kac.carve(buf)?)?.0,
            regions,
        };
        Ok((acid, consumed(Self::HEADER_SIZE, &regions)))
    }

    fn regions(&self) -> Vec<Region> {
        self.regions.to_vec()
    }
}

/// Read the three `(offset, size)` child pairs starting at `at`.
fn child_regions(buf: &[u8], at: usize) -> Result<[Region; 3]> {
    let pair = |name, i: usize| -> Result<Region> {
        Ok(Region::new(
            name,
            le_u32_at(buf, at + i * 8)?,
            le_u32_at(buf, at + i * 8 + 4)?,
        ))
    };
    Ok([
        pair("fs_access", 0)?,
        pair("service_access", 1)?,
        pair("kernel_access", 2)?,
    ])
}

fn consumed(header_size: usize, regions: &[Region]) -> usize {
    regions
        .iter()
        .map(Region::end)
        .fold(header_size as u64, u64::max) as usize
}
