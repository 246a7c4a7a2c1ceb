//! Segment decompression.
//!
//! Executable images store their code and data segments compressed with one
//! of two schemes:
//!
//! | Module   | Algorithm | Used by | Availability |
//! |----------|-----------|---------|--------------|
//! | [`blz`]  | Backward LZ (BLZ) | KIP1 segments | always |
//! | [`lz4`]  | LZ4 block | NSO0 segments | `compression` feature |
//!
//! Both take the compressed bytes and the expected decompressed size, and
//! fail rather than return a short or oversized buffer.
//!
//! Enable the `compression` feature for LZ4:
//!
//! ```toml
//! [dependencies]
//! nxcarve = { version = "0.1", features = ["compression"] }
//! ```

pub mod blz;

#[cfg(feature = "compression")]
pub mod lz4;
