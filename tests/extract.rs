use std::fs;
use std::thread;

use nxcarve::Error;
use nxcarve::extract::{ExtractMode, export_image, extract};
use nxcarve::formats::kip::KipHeader;
use nxcarve::formats::{Container, SegmentKind, SegmentedImage};
use nxcarve::region::FileRegion;
use tempfile::{NamedTempFile, tempdir};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

fn source(data: &[u8]) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    fs::write(file.path(), data).unwrap();
    file
}

#[test]
fn extracts_region_byte_for_byte() {
    let data = pattern(0x800);
    let file = source(&data);
    let out = tempdir().unwrap();

    let region = FileRegion::new(file.path(), 0);
    let path = extract(&region, 0x100, 0x400, out.path(), "region.bin").unwrap();
    assert_eq!(fs::read(path).unwrap(), &data[0x100..0x500]);
}

#[test]
fn producer_start_is_honoured() {
    let data = pattern(0x800);
    let file = source(&data);
    let out = tempdir().unwrap();

    let region = FileRegion::new(file.path(), 0x200);
    let path = extract(&region, 0x10, 0x20, out.path().join("nested"), "inner.bin").unwrap();
    assert_eq!(fs::read(path).unwrap(), &data[0x210..0x230]);
}

#[test]
fn size_one_past_end_is_truncated() {
    let file = source(&pattern(0x500));
    let out = tempdir().unwrap();

    let region = FileRegion::new(file.path(), 0);
    let err = extract(&region, 0x100, 0x401, out.path(), "short.bin").unwrap_err();
    assert!(matches!(
        err,
        Error::Truncated {
            expected: 0x401,
            actual: 0x400
        }
    ));
    assert!(!out.path().join("short.bin").exists());
}

#[test]
fn start_past_end_is_a_seek_error() {
    let file = source(&pattern(0x80));
    let out = tempdir().unwrap();

    let region = FileRegion::new(file.path(), 0);
    let err = extract(&region, 0x81, 1, out.path(), "x.bin").unwrap_err();
    assert!(matches!(
        err,
        Error::Seek {
            requested: 0x81,
            skipped: 0x80
        }
    ));
}

#[test]
fn parallel_extractions_share_one_producer() {
    let data = pattern(0x4000);
    let file = source(&data);
    let out = tempdir().unwrap();
    let region = FileRegion::new(file.path(), 0);

    thread::scope(|s| {
        let handles: Vec<_> = (0..4u64)
            .map(|i| {
                let (region, dir) = (&region, out.path());
                s.spawn(move || extract(region, i * 0x1000, 0x1000, dir, &format!("part{i}")))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
    });

    for i in 0..4usize {
        let part = fs::read(out.path().join(format!("part{i}"))).unwrap();
        assert_eq!(part, &data[i * 0x1000..(i + 1) * 0x1000]);
    }
}

/// A KIP1 whose segments are all stored uncompressed.
fn plain_kip() -> Vec<u8> {
    let text = b"\x1f\x20\x03\xd5\xc0\x03\x5f\xd6".to_vec();
    let rodata = b"version string\0\0".to_vec();
    let data = vec![0x5A; 12];

    let mut buf = vec![0u8; 0x100];
    buf[0..4].copy_from_slice(b"KIP1");
    buf[4..6].copy_from_slice(b"sm");
    let layout = [
        (0x0000u32, text.len() as u32),
        (0x1000, rodata.len() as u32),
        (0x1800, data.len() as u32),
    ];
    for (i, (memory_offset, size)) in layout.into_iter().enumerate() {
        let at = 0x20 + i * 0x10;
        buf[at..at + 4].copy_from_slice(&memory_offset.to_le_bytes());
        buf[at + 4..at + 8].copy_from_slice(&size.to_le_bytes());
        buf[at + 8..at + 12].copy_from_slice(&size.to_le_bytes());
    }
    buf[0x50..0x54].copy_from_slice(&0x2000u32.to_le_bytes());
    buf[0x54..0x58].copy_from_slice(&0x100u32.to_le_bytes());
    buf.extend_from_slice(&text);
    buf.extend_from_slice(&rodata);
    buf.extend_from_slice(&data);
    buf
}

#[test]
fn kip_image_and_segments() {
    let bytes = plain_kip();
    let file = source(&bytes);
    let out = tempdir().unwrap();
    let region = FileRegion::new(file.path(), 0);
    let (kip, _) = KipHeader::decode(&bytes).unwrap();
    assert_eq!(kip.extent(), bytes.len() as u64);

    let image = export_image(&region, &kip, out.path(), "sm.bin", ExtractMode::Image).unwrap();
    let image = fs::read(&image[0]).unwrap();
    assert_eq!(image.len(), 0x2100);
    assert_eq!(&image[..8], &bytes[0x100..0x108]);
    assert_eq!(&image[0x1000..0x1010], b"version string\0\0");
    assert_eq!(&image[0x1800..0x180C], &[0x5A; 12]);
    assert!(image[0x180C..].iter().all(|&b| b == 0));

    let parts = export_image(&region, &kip, out.path(), "sm", ExtractMode::Segments).unwrap();
    assert_eq!(parts.len(), SegmentKind::ALL.len());
    assert_eq!(fs::read(&parts[2]).unwrap(), vec![0x5A; 12]);
    assert_eq!(fs::read(&parts[3]).unwrap().len(), 0x100);

    let verbatim =
        export_image(&region, &kip, out.path(), "sm.kip1", ExtractMode::Verbatim).unwrap();
    assert_eq!(fs::read(&verbatim[0]).unwrap(), bytes);
}
