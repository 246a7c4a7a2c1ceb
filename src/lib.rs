//! **nxcarve** - decoders and region extraction for Nintendo Switch
//! metadata, ticket and executable containers.
//!
//! Parsers take already-decrypted bytes. Regions of a larger file are read
//! through [`region::StreamProducer`]s, which hand out an independent stream
//! per consumer, and copied out with [`extract`].
//!
//! # Supported formats
//! | Module | Format |
//! |--------|--------|
//! | [`formats::npdm`]   | NPDM - Program Descriptor Meta with ACI0 / ACID |
//! | [`formats::access`] | FAH / FAC / SAC / KAC - access-control blocks |
//! | [`formats::kip`]    | KIP1 - Kernel Initial Process (BLZ segments) |
//! | [`formats::nso`]    | NSO0 - userland executable (LZ4 segments) |
//! | [`formats::ticket`] | Ticket - title-key record |
//!
//! # Features
//! * `compression` - LZ4 decompression of NSO0 segments via `lz4_flex`.
//!   BLZ is always available.

pub mod compression;
pub mod error;
pub mod extract;
pub mod formats;
pub mod region;
pub(crate) mod utils;

pub use error::{Error, Result};
