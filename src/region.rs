//! Region streams - independent read cursors anchored inside a larger file.
//!
//! A [`StreamProducer`] describes *where* a region starts; every call to
//! [`StreamProducer::open`] hands out a fresh stream whose first byte is that
//! start offset. Streams never share a handle, so two providers decoding the
//! same file each get their own cursor and can run on separate threads.
//!
//! Producers do not know where a region ends. Callers compute the size from
//! a container header and must not read past it.
//!
//! Decrypting producers (AES-CTR over NCA sections and the like) live
//! outside this crate; they only need to implement [`StreamProducer`] to
//! plug into the parsers and [`crate::extract`].

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::trace;

use crate::utils::fill;
use crate::{Error, Result};

/// Factory for independent streams positioned at a fixed start offset.
pub trait StreamProducer {
    /// Stream type handed out by [`open`](Self::open).
    type Stream: Read;

    /// Open a new stream whose first readable byte is at this producer's
    /// start offset.
    fn open(&self) -> Result<Self::Stream>;

    /// Absolute start offset of the region within the underlying file.
    fn start(&self) -> u64;

    /// A new producer for the region `relative` bytes past this one's start.
    fn derive_at(&self, relative: u64) -> Self
    where
        Self: Sized;
}

/// A region of a file on disk.
///
/// Every [`open`](StreamProducer::open) opens its own [`File`] and seeks it
/// to the start offset. The handle is released when the returned stream is
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRegion {
    path: PathBuf,
    start: u64,
}

impl FileRegion {
    /// Region of `path` starting at `start`.
    pub fn new(path: impl Into<PathBuf>, start: u64) -> Self {
        Self {
            path: path.into(),
            start,
        }
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StreamProducer for FileRegion {
    type Stream = io::BufReader<File>;

    fn open(&self) -> Result<Self::Stream> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if self.start > len {
            return Err(Error::Seek {
                requested: self.start,
                skipped: len,
            });
        }
        file.seek(SeekFrom::Start(self.start))?;
        trace!(path = %self.path.display(), start = self.start, "opened file region");
        Ok(io::BufReader::new(file))
    }

    fn start(&self) -> u64 {
        self.start
    }

    fn derive_at(&self, relative: u64) -> Self {
        Self::new(self.path.clone(), self.start + relative)
    }
}

/// A region of an in-memory buffer shared between producers.
///
/// Used for payloads a collaborator has already decrypted into memory.
#[derive(Debug, Clone)]
pub struct BytesRegion {
    data: Arc<[u8]>,
    start: u64,
}

impl BytesRegion {
    /// Region of `data` starting at offset zero.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            start: 0,
        }
    }
}

impl StreamProducer for BytesRegion {
    type Stream = Cursor<Arc<[u8]>>;

    fn open(&self) -> Result<Self::Stream> {
        let len = self.data.len() as u64;
        if self.start > len {
            return Err(Error::Seek {
                requested: self.start,
                skipped: len,
            });
        }
        let mut stream = Cursor::new(Arc::clone(&self.data));
        stream.set_position(self.start);
        Ok(stream)
    }

    fn start(&self) -> u64 {
        self.start
    }

    fn derive_at(&self, relative: u64) -> Self {
        Self {
            data: Arc::clone(&self.data),
            start: self.start + relative,
        }
    }
}

/// Consume exactly `n` bytes from `r`.
///
/// Works by reading and discarding, so it behaves the same on plain files
/// and on transform-decorated streams that cannot seek. Returns
/// [`Error::Seek`] if the stream ends first.
pub fn skip_exact<R: Read>(r: &mut R, n: u64) -> Result<()> {
    if n == 0 {
        return Ok(());
    }
    let skipped = io::copy(&mut r.by_ref().take(n), &mut io::sink())?;
    if skipped != n {
        return Err(Error::Seek {
            requested: n,
            skipped,
        });
    }
    Ok(())
}

/// Read exactly `len` bytes into a new buffer.
///
/// Returns [`Error::Truncated`] if the stream ends first.
pub fn read_exact_or_truncated<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let n = fill(r, &mut buf)?;
    if n != len {
        return Err(Error::Truncated {
            expected: len as u64,
            actual: n as u64,
        });
    }
    Ok(buf)
}
