//! Ticket - signed title-key and rights record (`.tik`).
//!
//! Shipped next to NCAs in NSPs and installed into the ES save data. A
//! ticket is a signature block followed by a fixed 0x180-byte body; the
//! signature length depends on the signature type read first.
//!
//! ## Layout
//! ```text
//! [0x00] SignatureType                                  (u32 LE)
//! [0x04] Signature + padding (size by type, see below)
//! [B+0x000] Issuer (null-padded, 0x40 bytes)
//! [B+0x040] TitleKeyBlock                               (0x100 bytes)
//! [B+0x140] FormatVersion                               (1 byte)
//! [B+0x141] TitleKeyType (0 = common, 1 = personalized) (1 byte)
//! [B+0x142] TicketVersion                               (u16 LE)
//! [B+0x144] LicenseType                                 (1 byte)
//! [B+0x145] KeyGeneration                               (1 byte)
//! [B+0x146] PropertyMask                                (u16 LE)
//! [B+0x148] Reserved                                    (8 bytes)
//! [B+0x150] TicketId                                    (u64 LE)
//! [B+0x158] DeviceId                                    (u64 LE)
//! [B+0x160] RightsId                                    (0x10 bytes)
//! [B+0x170] AccountId                                   (u32 LE)
//! [B+0x174] SectionTotalSize                            (u32 LE)
//! [B+0x178] SectionHeaderOffset                         (u32 LE)
//! [B+0x17C] SectionCount / SectionEntrySize             (u16 LE × 2)
//! ```
//!
//! ## Signature types
//! | Code      | Algorithm         | Signature | Padding |
//! |-----------|-------------------|-----------|---------|
//! | `0x10000` | RSA-4096 SHA-1    | 0x200     | 0x3C    |
//! | `0x10001` | RSA-2048 SHA-1    | 0x100     | 0x3C    |
//! | `0x10002` | ECDSA SHA-1       | 0x3C      | 0x40    |
//! | `0x10003` | RSA-4096 SHA-256  | 0x200     | 0x3C    |
//! | `0x10004` | RSA-2048 SHA-256  | 0x100     | 0x3C    |
//! | `0x10005` | ECDSA SHA-256     | 0x3C      | 0x40    |

use std::io::Read;

use tracing::debug;

use super::Container;
use crate::region::read_exact_or_truncated;
use crate::utils::{
    bytes_at, ensure_len, le_u16_at, le_u32, le_u32_at, le_u64_at, slice_at, text_at, u8_at,
};
use crate::{Error, Result};

/// Size of the ticket body that follows the signature block.
pub const BODY_SIZE: usize = 0x180;

/// Ticket signature algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SignatureType {
    Rsa4096Sha1 = 0x10000,
    Rsa2048Sha1 = 0x10001,
    EcdsaSha1 = 0x10002,
    Rsa4096Sha256 = 0x10003,
    Rsa2048Sha256 = 0x10004,
    EcdsaSha256 = 0x10005,
}

impl TryFrom<u32> for SignatureType {
    type Error = Error;
    fn try_from(v: u32) -> Result<Self> {
        match v {
            0x10000 => Ok(Self::Rsa4096Sha1),
            0x10001 => Ok(Self::Rsa2048Sha1),
            0x10002 => Ok(Self::EcdsaSha1),
            0x10003 => Ok(Self::Rsa4096Sha256),
            0x10004 => Ok(Self::Rsa2048Sha256),
            0x10005 => Ok(Self::EcdsaSha256),
            x => Err(Error::UnrecognizedSignatureType(x)),
        }
    }
}

impl SignatureType {
    /// Length of the signature itself.
    pub fn signature_size(self) -> usize {
        match self {
            Self::Rsa4096Sha1 | Self::Rsa4096Sha256 => 0x200,
            Self::Rsa2048Sha1 | Self::Rsa2048Sha256 => 0x100,
            Self::EcdsaSha1 | Self::EcdsaSha256 => 0x3C,
        }
    }

    /// Signature plus the padding that aligns the body.
    pub fn zone_size(self) -> usize {
        match self {
            Self::EcdsaSha1 | Self::EcdsaSha256 => self.signature_size() + 0x40,
            _ => self.signature_size() + 0x3C,
        }
    }
}

/// How the title key in a ticket is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleKeyType {
    /// Wrapped with the title-key KEK; the first 16 bytes are the key.
    Common,
    /// RSA-OAEP wrapped for one console.
    Personalized,
    Unknown(u8),
}

impl From<u8> for TitleKeyType {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Common,
            1 => Self::Personalized,
            x => Self::Unknown(x),
        }
    }
}

/// Parsed ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub signature_type: SignatureType,
    /// Raw signature bytes (without padding). Not verified.
    pub signature: Vec<u8>,
    /// Issuer, e.g. `Root-CA00000003-XS00000020`.
    pub issuer: String,
    /// Encrypted title key material.
    pub title_key_block: [u8; 0x100],
    pub format_version: u8,
    pub title_key_type: TitleKeyType,
    pub ticket_version: u16,
    pub license_type: u8,
    /// Master key revision the title key is wrapped with.
    pub key_generation: u8,
    pub property_mask: u16,
    pub ticket_id: u64,
    pub device_id: u64,
    pub rights_id: [u8; 0x10],
    pub account_id: u32,
    pub section_total_size: u32,
    pub section_header_offset: u32,
    pub section_count: u16,
    pub section_entry_size: u16,
}

impl Ticket {
    /// Encrypted title key for common tickets; [`None`] for personalized ones.
    pub fn title_key(&self) -> Option<[u8; 0x10]> {
        if self.title_key_type != TitleKeyType::Common {
            return None;
        }
        let mut key = [0u8; 0x10];
        key.copy_from_slice(&self.title_key_block[..0x10]);
        Some(key)
    }

    /// Offset of the body from the start of the ticket.
    pub fn body_offset(&self) -> usize {
        4 + self.signature_type.zone_size()
    }

    /// Decode a ticket from a stream, reading only the bytes its signature
    /// type calls for.
    pub fn read_from_stream<R: Read>(r: &mut R) -> Result<Self> {
        let code = le_u32(r)?;
        let signature_type = SignatureType::try_from(code)?;
        let mut buf = code.to_le_bytes().to_vec();
        buf.extend(read_exact_or_truncated(
            r,
            signature_type.zone_size() + BODY_SIZE,
        )?);
        Ok(Self::decode(&buf)?.0)
    }
}

impl Container for Ticket {
    /// Smallest possible ticket: ECDSA signature zone plus body.
    const HEADER_SIZE: usize = 4 + 0x7C + BODY_SIZE;

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        ensure_len(buf, Self::HEADER_SIZE)?;
        let signature_type = SignatureType::try_from(le_u32_at(buf, 0)?)?;
        let b = 4 + signature_type.zone_size();
        let consumed = b + BODY_SIZE;
        if buf.len() < consumed {
            return Err(Error::Truncated {
                expected: consumed as u64,
                actual: buf.len() as u64,
            });
        }

        let ticket = Self {
            signature_type,
            signature: slice_at(buf, 4, signature_type.signature_size())?.to_vec(),
            issuer: text_at(buf, b, 0x40)?,
            title_key_block: bytes_at(buf, b + 0x40)?,
            format_version: u8_at(buf, b + 0x140)?,
            title_key_type: TitleKeyType::from(u8_at(buf, b + 0x141)?),
            ticket_version: le_u16_at(buf, b + 0x142)?,
            license_type: u8_at(buf, b + 0x144)?,
            key_generation: u8_at(buf, b + 0x145)?,
            property_mask: le_u16_at(buf, b + 0x146)?,
            ticket_id: le_u64_at(buf, b + 0x150)?,
            device_id: le_u64_at(buf, b + 0x158)?,
            rights_id: bytes_at(buf, b + 0x160)?,
            account_id: le_u32_at(buf, b + 0x170)?,
            section_total_size: le_u32_at(buf, b + 0x174)?,
            section_header_offset: le_u32_at(buf, b + 0x178)?,
            section_count: le_u16_at(buf, b + 0x17C)?,
            section_entry_size: le_u16_at(buf, b + 0x17E)?,
        };
        debug!(
            signature_type = ?ticket.signature_type,
            issuer = %ticket.issuer,
            "decoded ticket"
        );
        Ok((ticket, consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TITLE_KEY: [u8; 16] = *b"0123456789ABCDEF";

    fn ticket_bytes(code: u32, zone: usize) -> Vec<u8> {
        let mut buf = code.to_le_bytes().to_vec();
        buf.resize(4 + zone, 0x5A);
        let b = buf.len();
        buf.resize(b + BODY_SIZE, 0);
        buf[b..b + 26].copy_from_slice(b"Root-CA00000003-XS00000020");
        buf[b + 0x40..b + 0x50].copy_from_slice(&TITLE_KEY);
        buf[b + 0x141] = 0;
        buf[b + 0x145] = 0x0A;
        let mut rights_id = [0u8; 0x10];
        rights_id[..4].copy_from_slice(&[0x01, 0x00, 0x2B, 0x00]);
        rights_id[0x0F] = 0x0A;
        buf[b + 0x160..b + 0x170].copy_from_slice(&rights_id);
        buf[b + 0x170..b + 0x174].copy_from_slice(&0xCAFE_F00Du32.to_le_bytes());
        buf
    }

    #[test]
    fn rsa2048_ticket() {
        let buf = ticket_bytes(0x10004, 0x13C);
        let (tik, consumed) = Ticket::decode(&buf).unwrap();
        assert_eq!(consumed, 0x2C0);
        assert_eq!(tik.signature_type, SignatureType::Rsa2048Sha256);
        assert_eq!(tik.signature.len(), 0x100);
        assert_eq!(tik.body_offset(), 0x140);
        assert_eq!(tik.issuer, "Root-CA00000003-XS00000020");
        assert_eq!(tik.title_key(), Some(TITLE_KEY));
        assert_eq!(tik.key_generation, 0x0A);
        assert_eq!(tik.rights_id[15], 0x0A);
        assert_eq!(tik.account_id, 0xCAFE_F00D);
    }

    #[test]
    fn ecdsa_sha1_signature_zone_is_0x7c() {
        let buf = ticket_bytes(0x10002, 0x7C);
        let (tik, consumed) = Ticket::decode(&buf).unwrap();
        assert_eq!(tik.body_offset(), 4 + 0x7C);
        assert_eq!(consumed, 4 + 0x7C + BODY_SIZE);
        assert_eq!(tik.signature.len(), 0x3C);
        assert_eq!(tik.title_key(), Some(TITLE_KEY));
    }

    #[test]
    fn zone_sizes_per_type() {
        let expected = [0x23C, 0x13C, 0x7C, 0x23C, 0x13C, 0x7C];
        for (code, zone) in (0x10000u32..=0x10005).zip(expected) {
            assert_eq!(SignatureType::try_from(code).unwrap().zone_size(), zone);
        }
    }

    #[test]
    fn unknown_signature_type_fails() {
        let buf = ticket_bytes(0x10006, 0x13C);
        assert!(matches!(
            Ticket::decode(&buf),
            Err(Error::UnrecognizedSignatureType(0x10006))
        ));
        let mut r: &[u8] = &buf;
        assert!(matches!(
            Ticket::read_from_stream(&mut r),
            Err(Error::UnrecognizedSignatureType(0x10006))
        ));
    }

    #[test]
    fn rsa4096_body_past_end_is_truncated() {
        let mut buf = ticket_bytes(0x10000, 0x23C);
        buf.truncate(0x300);
        assert!(matches!(
            Ticket::decode(&buf),
            Err(Error::Truncated {
                expected: 0x3C0,
                actual: 0x300
            })
        ));
    }

    #[test]
    fn undersized_ticket() {
        assert!(matches!(
            Ticket::decode(&[0u8; 0x1FF]),
            Err(Error::UndersizedContainer { required: 0x200, .. })
        ));
    }

    #[test]
    fn stream_decode_stops_after_body() {
        let mut buf = ticket_bytes(0x10005, 0x7C);
        buf.extend_from_slice(b"trailing");
        let mut r: &[u8] = &buf;
        let tik = Ticket::read_from_stream(&mut r).unwrap();
        assert_eq!(tik.signature_type, SignatureType::EcdsaSha256);
        assert_eq!(r, b"trailing");
    }

    #[test]
    fn personalized_ticket_has_no_common_key() {
        let mut buf = ticket_bytes(0x10004, 0x13C);
        buf[0x140 + 0x141] = 1;
        let (tik, _) = Ticket::decode(&buf).unwrap();
        assert_eq!(tik.title_key_type, TitleKeyType::Personalized);
        assert_eq!(tik.title_key(), None);
    }
}
