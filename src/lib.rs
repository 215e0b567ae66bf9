//! Reverge Package File (`.gfs`) archive reading and writing
//!
//! A package archive is one file: a header (data offset, identifier,
//! version), a file table (path, size, alignment per entry), and the entry
//! data laid out in table order with optional alignment padding.
//! [`ArchiveReader`] memory-maps an archive and serves entry contents
//! zero-copy from the mapping or from droppable per-entry caches;
//! [`ArchiveWriter`] stages files in memory and serializes them
//! deterministically in insertion order.
//!
//! # Example
//!
//! ```no_run
//! use revpak::{ArchiveReader, ArchiveWriter, ReaderConfig, WriterConfig};
//!
//! # fn main() -> revpak::Result<()> {
//! let mut writer = ArchiveWriter::new(WriterConfig::default());
//! writer.add_file("hello.txt", "Hello, World!")?;
//! writer.write_to_file("game.gfs")?;
//!
//! let mut reader = ArchiveReader::open("game.gfs", ReaderConfig::default())?;
//! let file = reader.get_file_mut("hello.txt")?;
//! assert_eq!(file.as_str()?, "Hello, World!");
//! # Ok(())
//! # }
//! ```

pub mod endian;
pub mod error;
pub mod file;
pub mod mmap;
pub mod reader;
pub mod writer;

pub use endian::Endianness;
pub use error::{Error, Result};
pub use file::{ArchiveFile, FileStream};
pub use mmap::{MapOptions, MappedFile};
pub use reader::{ArchiveReader, ReaderConfig};
pub use writer::{ArchiveWriter, WriterConfig};

/// Identifier written into new archives unless overridden.
pub const DEFAULT_IDENTIFIER: &str = "Reverge Package File";

/// Format version written into new archives unless overridden.
pub const DEFAULT_VERSION: &str = "1.1";

/// Entries at or below this many bytes are cached on first access;
/// larger entries are served from the mapping (or a stream buffer).
pub const DEFAULT_CACHE_THRESHOLD: u64 = 1024 * 1024;

/// Alignment used for staged files without an explicit one. 1 means
/// entries pack back to back.
pub const DEFAULT_ALIGNMENT: u32 = 1;

/// Rounds `offset` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two; both the reader and the writer
/// validate that before offsets are accumulated.
pub(crate) fn align_up(offset: u64, alignment: u32) -> u64 {
    let align = u64::from(alignment);
    (offset + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up_rounds_to_next_multiple() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(76, 16), 80);
        assert_eq!(align_up(4096, 4096), 4096);
    }

    #[test]
    fn test_align_up_with_one_is_identity() {
        for offset in [0, 1, 13, 76, 89, 4097] {
            assert_eq!(align_up(offset, 1), offset);
        }
    }
}
