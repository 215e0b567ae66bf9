//! Corrupt and truncated archives must fail with format errors, never
//! a panic or a crash

use revpak::{ArchiveReader, ArchiveWriter, Error, ReaderConfig};
use tempfile::TempDir;

#[test]
fn test_every_prefix_fails_as_format_error() {
    let mut writer = ArchiveWriter::default();
    writer.add_file("a.txt", "Hello, World!").unwrap();
    writer.add_file_aligned("b.bin", vec![7u8; 40], 16).unwrap();
    let full = writer.write_to_memory().unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cut.gfs");

    for cut in 0..full.len() {
        std::fs::write(&path, &full[..cut]).unwrap();
        match ArchiveReader::open(&path, ReaderConfig::default()) {
            Err(
                Error::Truncated { .. }
                | Error::ImplausibleEntryCount { .. }
                | Error::FileOutOfBounds { .. },
            ) => {}
            Err(e) => panic!("cut {cut}: unexpected error kind: {e}"),
            Ok(_) => panic!("cut {cut}: truncated archive opened"),
        }
    }

    // The untouched archive still opens
    std::fs::write(&path, &full).unwrap();
    assert!(ArchiveReader::open(&path, ReaderConfig::default()).is_ok());
}

#[test]
fn test_garbage_bytes_fail_cleanly() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("noise.gfs");
    std::fs::write(&path, [0xABu8; 64]).unwrap();

    assert!(ArchiveReader::open(&path, ReaderConfig::default()).is_err());
}

#[test]
fn test_flipped_length_field_fails_cleanly() {
    let mut writer = ArchiveWriter::default();
    writer.add_file("a.txt", "Hello, World!").unwrap();
    let mut bytes = writer.write_to_memory().unwrap();

    // Blow up the identifier length (bytes 4..12, big-endian)
    bytes[4] = 0xFF;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flipped.gfs");
    std::fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        ArchiveReader::open(&path, ReaderConfig::default()),
        Err(Error::Truncated {
            context: "identifier",
            ..
        })
    ));
}
