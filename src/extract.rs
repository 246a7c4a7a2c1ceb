//! Extraction - copy resolved regions out of a container into files.
//!
//! Every export opens its own stream from a [`StreamProducer`], so exports
//! of different regions of the same file may run on separate threads.
//! Writing the same destination file from two exports at once is not
//! supported.
//!
//! Raw regions are streamed in [`BLOCK_SIZE`] blocks and never loaded whole.
//! Executable segments are loaded one at a time so they can be
//! decompressed before writing.
//!
//! A failed export removes the file it was writing; nothing is left
//! half-written.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::formats::{Container, SegmentDescriptor, SegmentKind, SegmentedImage, checked_size};
use crate::region::{StreamProducer, read_exact_or_truncated};
use crate::utils::fill;
use crate::{Error, Result};

/// Copy granularity for raw extraction.
pub const BLOCK_SIZE: usize = 0x200;

/// Output shape for [`export_image`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtractMode {
    /// The image exactly as stored, header and compressed segments included.
    Verbatim,
    /// One decompressed memory image with BSS zero-filled.
    #[default]
    Image,
    /// One decompressed file per segment, named `<name>.<segment>`.
    Segments,
}

/// Copy `size` bytes starting `start` bytes into `producer`'s region to
/// `dir/name`.
///
/// `dir` is created if missing. Fails with [`Error::Seek`] if the region
/// does not reach `start`, and with [`Error::Truncated`] if fewer than
/// `size` bytes follow it.
pub fn extract<P: StreamProducer>(
    producer: &P,
    start: u64,
    size: u64,
    dir: impl AsRef<Path>,
    name: &str,
) -> Result<PathBuf> {
    let path = write_file(dir.as_ref(), name, |out| {
        let mut stream = producer.derive_at(start).open()?;
        copy_blocks(&mut stream, out, size)
    })?;
    debug!(
        start = producer.start() + start,
        size,
        path = %path.display(),
        "extracted region"
    );
    Ok(path)
}

/// Copy exactly `size` bytes from `r` to `w` in [`BLOCK_SIZE`] blocks.
///
/// Every block except the last must be read in full.
pub fn copy_blocks<R: Read, W: Write>(r: &mut R, w: &mut W, size: u64) -> Result<()> {
    let mut block = [0u8; BLOCK_SIZE];
    let mut remaining = size;
    while remaining > 0 {
        let want = remaining.min(BLOCK_SIZE as u64) as usize;
        let got = fill(r, &mut block[..want])?;
        if got != want {
            return Err(Error::Truncated {
                expected: size,
                actual: size - remaining + got as u64,
            });
        }
        w.write_all(&block[..want])?;
        remaining -= want as u64;
    }
    Ok(())
}

/// Extract every nested region `container` reports, one file per region.
///
/// `producer` must start at the container. Empty regions are skipped.
pub fn export_regions<P: StreamProducer, C: Container>(
    producer: &P,
    container: &C,
    dir: impl AsRef<Path>,
) -> Result<Vec<PathBuf>> {
    container
        .regions()
        .into_iter()
        .filter(|region| region.size > 0)
        .map(|region| extract(producer, region.offset, region.size, dir.as_ref(), region.name))
        .collect()
}

/// Export an executable image in the shape `mode` selects.
///
/// `producer` must start at the image header.
pub fn export_image<P: StreamProducer, I: SegmentedImage>(
    producer: &P,
    image: &I,
    dir: impl AsRef<Path>,
    name: &str,
    mode: ExtractMode,
) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    match mode {
        ExtractMode::Verbatim => Ok(vec![extract(producer, 0, image.extent(), dir, name)?]),
        ExtractMode::Image => {
            let bytes = memory_image(producer, image)?;
            let path = write_file(dir, name, |out| Ok(out.write_all(&bytes)?))?;
            debug!(size = bytes.len(), path = %path.display(), "exported memory image");
            Ok(vec![path])
        }
        ExtractMode::Segments => image
            .segments()
            .into_iter()
            .map(|(kind, descriptor)| {
                let bytes = load_segment(producer, image, kind, descriptor)?;
                let file_name = format!("{name}.{}", kind.name());
                write_file(dir, &file_name, |out| Ok(out.write_all(&bytes)?))
            })
            .collect(),
    }
}

/// Build the decompressed memory image of `image`.
///
/// Segments are laid out in ascending memory-offset order. Gaps between
/// segments and the BSS segment are zero-filled.
///
/// Fails with [`Error::UnsupportedFormat`] if any segment ends past
/// [`MAX_IMAGE_SIZE`](crate::formats::MAX_IMAGE_SIZE).
pub fn memory_image<P, I>(producer: &P, image: &I) -> Result<Vec<u8>>
where
    P: StreamProducer,
    I: SegmentedImage,
{
    let mut segments: Vec<_> = image
        .segments()
        .into_iter()
        .filter(|(_, d)| d.size > 0)
        .collect();
    segments.sort_by_key(|(_, d)| d.memory_offset);

    let mut out = Vec::new();
    for (kind, descriptor) in segments {
        checked_size(&descriptor)?;
        let at = descriptor.memory_offset as usize;
        if at < out.len() {
            return Err(Error::OverlappingBlocks("segments overlap in memory"));
        }
        out.resize(at, 0);
        out.extend(load_segment(producer, image, kind, descriptor)?);
    }
    Ok(out)
}

/// Read one segment through its own stream and restore its in-memory form.
fn load_segment<P: StreamProducer, I: SegmentedImage>(
    producer: &P,
    image: &I,
    kind: SegmentKind,
    descriptor: SegmentDescriptor,
) -> Result<Vec<u8>> {
    if kind == SegmentKind::Bss {
        return Ok(vec![0u8; checked_size(&descriptor)?]);
    }
    let mut stream = producer.derive_at(descriptor.file_offset as u64).open()?;
    let stored = read_exact_or_truncated(&mut stream, descriptor.file_size as usize)?;
    trace!(
        segment = kind.name(),
        stored = stored.len(),
        compressed = image.is_compressed(kind),
        "loaded segment"
    );
    image.decompress_segment(kind, &stored)
}

/// Create `dir/name`, fill it with `body`, and remove it again if `body`
/// fails.
fn write_file<F>(dir: &Path, name: &str, body: F) -> Result<PathBuf>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    let mut out = BufWriter::new(File::create(&path)?);
    let result = body(&mut out).and_then(|()| Ok(out.flush()?));
    drop(out);
    if let Err(e) = result {
        let _ = fs::remove_file(&path);
        return Err(e);
    }
    Ok(path)
}
