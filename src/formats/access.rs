//! Access-control blocks nested inside ACI0 and ACID.
//!
//! Both access-info containers point at three children: a filesystem
//! block, a service list and a kernel capability list. ACI0 carries the
//! per-title *header* form of the filesystem block ([`FsAccessHeader`]);
//! ACID carries the signed *control* form ([`FsAccessControl`]). The
//! service and kernel lists share one layout.
//!
//! ## FsAccessHeader (ACI0)
//! ```text
//! [0x00] Version                          (1 byte)
//! [0x01] Padding                          (3 bytes)
//! [0x04] Permissions                      (u64 LE)
//! [0x0C] ContentOwnerInfoOffset           (u32 LE, relative to this block)
//! [0x10] ContentOwnerInfoSize             (u32 LE)
//! [0x14] SaveDataOwnerInfoOffset          (u32 LE, relative to this block)
//! [0x18] SaveDataOwnerInfoSize            (u32 LE)
//! ```
//!
//! ## FsAccessControl (ACID)
//! ```text
//! [0x00] Version                          (1 byte)
//! [0x01] ContentOwnerIdCount              (1 byte)
//! [0x02] SaveDataOwnerIdCount             (1 byte)
//! [0x03] Padding                          (1 byte)
//! [0x04] Permissions                      (u64 LE)
//! [0x0C] ContentOwnerIdMin / Max          (u64 LE × 2)
//! [0x1C] SaveDataOwnerIdMin / Max         (u64 LE × 2)
//! [0x2C] ContentOwnerIds, then SaveDataOwnerIds (u64 LE each)
//! ```
//!
//! ## Service access control
//! A packed list of entries, each a control byte (`bits 0-2` = name
//! length - 1, `bit 7` = server) followed by the ASCII service name.
//!
//! ## Kernel access control
//! A list of `u32 LE` capability descriptors. The descriptor type is the
//! number of trailing one bits.

use tracing::trace;

use super::{Container, Region};
use crate::utils::{ensure_len, le_u32_at, le_u64_at, slice_at, u8_at};
use crate::{Error, Result};

/// Filesystem access header (ACI0 form).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsAccessHeader {
    /// Block version.
    pub version: u8,
    /// Filesystem permission bits.
    pub permissions: u64,
    /// Content owner IDs this title may access.
    pub content_owner_ids: Vec<u64>,
    /// Save-data owners as `(id, accessibility)` pairs.
    pub save_data_owners: Vec<(u64, u8)>,
    content_owner_info: Region,
    save_data_owner_info: Region,
}

impl Container for FsAccessHeader {
    const HEADER_SIZE: usize = 0x1C;

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        ensure_len(buf, Self::HEADER_SIZE)?;
        let content_owner_info = Region::new(
            "content_owner_info",
            le_u32_at(buf, 0x0C)?,
            le_u32_at(buf, 0x10)?,
        );
        let save_data_owner_info = Region::new(
            "save_data_owner_info",
            le_u32_at(buf, 0x14)?,
            le_u32_at(buf, 0x18)?,
        );

        let content_owner_ids = if content_owner_info.size == 0 {
            Vec::new()
        } else {
            let info = content_owner_info.carve(buf)?;
            let count = le_u32_at(info, 0)? as usize;
            read_ids(info, 4, count)?
        };

        let save_data_owners = if save_data_owner_info.size == 0 {
            Vec::new()
        } else {
            let info = save_data_owner_info.carve(buf)?;
            let count = le_u32_at(info, 0)? as usize;
            let access = slice_at(info, 4, count)?;
            // IDs start at the next 4-byte boundary after the accessibility bytes.
            let ids_offset = (4 + count).next_multiple_of(4);
            let ids = read_ids(info, ids_offset, count)?;
            ids.into_iter().zip(access.iter().copied()).collect()
        };

        let consumed = [content_owner_info.end(), save_data_owner_info.end()]
            .into_iter()
            .fold(Self::HEADER_SIZE as u64, u64::max) as usize;

        Ok((
            Self {
                version: u8_at(buf, 0)?,
                permissions: le_u64_at(buf, 0x04)?,
                content_owner_ids,
                save_data_owners,
                content_owner_info,
                save_data_owner_info,
            },
            consumed,
        ))
    }

    fn regions(&self) -> Vec<Region> {
        vec![self.content_owner_info, self.save_data_owner_info]
    }
}

/// Filesystem access control (ACID form).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsAccessControl {
    /// Block version.
    pub version: u8,
    /// Filesystem permission bits.
    pub permissions: u64,
    pub content_owner_id_min: u64,
    pub content_owner_id_max: u64,
    pub save_data_owner_id_min: u64,
    pub save_data_owner_id_max: u64,
    /// Explicitly listed content owner IDs.
    pub content_owner_ids: Vec<u64>,
    /// Explicitly listed save-data owner IDs.
    pub save_data_owner_ids: Vec<u64>,
}

impl Container for FsAccessControl {
    const HEADER_SIZE: usize = 0x2C;

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        ensure_len(buf, Self::HEADER_SIZE)?;
        let content_count = u8_at(buf, 0x01)? as usize;
        let save_count = u8_at(buf, 0x02)? as usize;

        let content_owner_ids = read_ids(buf, Self::HEADER_SIZE, content_count)?;
        let save_offset = Self::HEADER_SIZE + content_count * 8;
        let save_data_owner_ids = read_ids(buf, save_offset, save_count)?;

        Ok((
            Self {
                version: u8_at(buf, 0x00)?,
                permissions: le_u64_at(buf, 0x04)?,
                content_owner_id_min: le_u64_at(buf, 0x0C)?,
                content_owner_id_max: le_u64_at(buf, 0x14)?,
                save_data_owner_id_min: le_u64_at(buf, 0x1C)?,
                save_data_owner_id_max: le_u64_at(buf, 0x24)?,
                content_owner_ids,
                save_data_owner_ids,
            },
            save_offset + save_count * 8,
        ))
    }
}

/// One entry of a service access-control list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// Service name, e.g. `fsp-srv` or a `*` wildcard pattern.
    pub name: String,
    /// Whether the title may *host* the service rather than connect to it.
    pub is_server: bool,
}

/// Service access-control list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceAccessControl {
    pub entries: Vec<ServiceEntry>,
}

impl Container for ServiceAccessControl {
    const HEADER_SIZE: usize = 0;

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let control = buf[pos];
            let len = (control & 0x07) as usize + 1;
            let name = slice_at(buf, pos + 1, len)?;
            entries.push(ServiceEntry {
                name: String::from_utf8_lossy(name).into_owned(),
                is_server: control & 0x80 != 0,
            });
            pos += 1 + len;
        }
        trace!(count = entries.len(), "decoded service access control");
        Ok((Self { entries }, pos))
    }
}

/// Kind of a kernel capability descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    ThreadInfo,
    EnableSystemCalls,
    MemoryMap,
    IoMemoryMap,
    MemoryRegionMap,
    EnableInterrupts,
    MiscParams,
    KernelVersion,
    HandleTableSize,
    MiscFlags,
    /// All bits set; used as padding.
    Empty,
    Unknown,
}

/// One raw kernel capability descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelCapability(pub u32);

impl KernelCapability {
    /// Classify the descriptor by its trailing-ones pattern.
    pub fn kind(&self) -> CapabilityKind {
        match self.0.trailing_ones() {
            3 => CapabilityKind::ThreadInfo,
            4 => CapabilityKind::EnableSystemCalls,
            6 => CapabilityKind::MemoryMap,
            7 => CapabilityKind::IoMemoryMap,
            10 => CapabilityKind::MemoryRegionMap,
            11 => CapabilityKind::EnableInterrupts,
            13 => CapabilityKind::MiscParams,
            14 => CapabilityKind::KernelVersion,
            15 => CapabilityKind::HandleTableSize,
            16 => CapabilityKind::MiscFlags,
            32 => CapabilityKind::Empty,
            _ => CapabilityKind::Unknown,
        }
    }
}

/// Kernel access-control list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelAccessControl {
    pub capabilities: Vec<KernelCapability>,
}

impl Container for KernelAccessControl {
    const HEADER_SIZE: usize = 0;

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() % 4 != 0 {
            return Err(Error::Truncated {
                expected: buf.len().next_multiple_of(4) as u64,
                actual: buf.len() as u64,
            });
        }
        let capabilities = buf
            .chunks_exact(4)
            .map(|c| KernelCapability(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect();
        Ok((Self { capabilities }, buf.len()))
    }
}

/// Read `count` little-endian `u64` IDs starting at `offset`.
fn read_ids(buf: &[u8], offset: usize, count: usize) -> Result<Vec<u64>> {
    (0..count).map(|i| le_u64_at(buf, offset + i * 8)).collect()
}
