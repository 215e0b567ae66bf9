//! Archive reader over a memory-mapped file
//!
//! [`ArchiveReader::open`] maps the archive, parses the header and file
//! table, and builds the ordered entry list plus a path index. Every
//! parse step checks the remaining length first, so any truncated or
//! corrupt archive surfaces as a format error, never a panic. Entry
//! data offsets accumulate from the header's data offset in table
//! order, applying the same alignment round-up the writer uses.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::endian::Endianness;
use crate::error::{Error, Result};
use crate::file::ArchiveFile;
use crate::mmap::{MapOptions, MappedFile};
use crate::{DEFAULT_CACHE_THRESHOLD, align_up};

/// Fixed bytes per table row: path length (8) + size (8) + alignment (4).
const MIN_ROW_LEN: u64 = 20;

/// Configuration for opening an archive.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Entries at or below this size are cached on first access;
    /// larger entries are served from the mapping.
    pub cache_threshold: u64,
    /// Buffer above-threshold entries for streaming instead of serving
    /// them zero-copy from the mapping.
    pub allow_streaming: bool,
    /// Byte order of the archive's integer fields.
    pub endianness: Endianness,
    /// How the archive file is mapped.
    pub map: MapOptions,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            cache_threshold: DEFAULT_CACHE_THRESHOLD,
            allow_streaming: false,
            endianness: Endianness::default(),
            map: MapOptions::default(),
        }
    }
}

/// Bounds-checked cursor over the mapped archive bytes.
struct Scanner<'a> {
    data: &'a [u8],
    pos: u64,
    order: Endianness,
}

impl<'a> Scanner<'a> {
    fn new(data: &'a [u8], order: Endianness) -> Self {
        Self {
            data,
            pos: 0,
            order,
        }
    }

    fn remaining(&self) -> u64 {
        self.data.len() as u64 - self.pos
    }

    fn take(&mut self, needed: u64, context: &'static str) -> Result<&'a [u8]> {
        if needed > self.remaining() {
            return Err(Error::Truncated {
                context,
                offset: self.pos,
                needed,
                remaining: self.remaining(),
            });
        }
        let start = self.pos as usize;
        self.pos += needed;
        Ok(&self.data[start..self.pos as usize])
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32> {
        Ok(self.order.read_u32(self.take(4, context)?))
    }

    fn read_u64(&mut self, context: &'static str) -> Result<u64> {
        Ok(self.order.read_u64(self.take(8, context)?))
    }

    /// Length-prefixed UTF-8 string (u64 length, then bytes).
    fn read_string(&mut self, context: &'static str) -> Result<String> {
        let len = self.read_u64(context)?;
        let bytes = self.take(len, context)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::InvalidUtf8(context.to_string()))
    }
}

/// A package archive opened for reading.
///
/// Entries are handed out in table order and indexed by path. Each
/// entry shares the reader's mapping, so entries obtained before a
/// [`close`](Self::close) stay readable afterwards.
pub struct ArchiveReader {
    mapping: Option<Arc<MappedFile>>,
    identifier: String,
    version: String,
    files: Vec<ArchiveFile>,
    index: HashMap<String, usize>,
}

impl ArchiveReader {
    /// Maps `path` and parses its header and file table.
    pub fn open<P: AsRef<Path>>(path: P, config: ReaderConfig) -> Result<Self> {
        let path = path.as_ref();
        let mapping = Arc::new(MappedFile::open(path, config.map)?);
        let data = mapping.data();

        let mut scanner = Scanner::new(data, config.endianness);
        let data_offset = scanner.read_u32("data offset")?;
        let identifier = scanner.read_string("identifier")?;
        let version = scanner.read_string("version")?;
        let entry_count = scanner.read_u64("entry count")?;

        // Reject counts the remaining bytes could never hold before
        // allocating anything for them
        if entry_count > scanner.remaining() / MIN_ROW_LEN {
            return Err(Error::ImplausibleEntryCount {
                count: entry_count,
                remaining: scanner.remaining(),
            });
        }

        let mut files = Vec::with_capacity(entry_count as usize);
        let mut index = HashMap::with_capacity(entry_count as usize);
        let mut offset = u64::from(data_offset);

        for row in 0..entry_count {
            let entry_path = scanner.read_string("entry path")?;
            let size = scanner.read_u64("entry size")?;
            let alignment = scanner.read_u32("entry alignment")?;

            if !alignment.is_power_of_two() {
                return Err(Error::InvalidAlignment {
                    path: entry_path,
                    alignment,
                });
            }
            if alignment > 1 {
                offset = align_up(offset, alignment);
            }
            if !mapping.is_range_valid(offset, size) {
                return Err(Error::FileOutOfBounds {
                    path: entry_path,
                    end: offset.saturating_add(size),
                    archive_len: mapping.len(),
                });
            }

            trace!(
                "Entry {}: '{}' at offset {} ({} bytes, align {})",
                row, entry_path, offset, size, alignment
            );

            if let Some(previous) = index.insert(entry_path.clone(), files.len()) {
                warn!(
                    "Duplicate path '{}' in file table; entry {} shadows {}",
                    entry_path,
                    files.len(),
                    previous
                );
            }
            files.push(ArchiveFile::new(
                entry_path,
                offset,
                size,
                Arc::clone(&mapping),
                config.cache_threshold,
                config.allow_streaming,
            ));
            offset += size;
        }

        debug!(
            "Opened archive {:?}: '{}' v{}, {} files, {} bytes",
            path,
            identifier,
            version,
            files.len(),
            mapping.len()
        );

        Ok(Self {
            mapping: Some(mapping),
            identifier,
            version,
            files,
            index,
        })
    }

    /// Drops entries, index, and the reader's mapping handle.
    /// Idempotent. Entries handed out earlier keep the mapping alive
    /// through their own handles; the header strings stay readable.
    pub fn close(&mut self) {
        self.files.clear();
        self.index.clear();
        self.mapping = None;
    }

    pub fn is_open(&self) -> bool {
        self.mapping.is_some()
    }

    /// Identifier string from the archive header.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Version string from the archive header.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn get_file(&self, path: &str) -> Result<&ArchiveFile> {
        self.index
            .get(path)
            .map(|&i| &self.files[i])
            .ok_or_else(|| Error::FileNotFound(path.to_string()))
    }

    pub fn get_file_mut(&mut self, path: &str) -> Result<&mut ArchiveFile> {
        match self.index.get(path) {
            Some(&i) => Ok(&mut self.files[i]),
            None => Err(Error::FileNotFound(path.to_string())),
        }
    }

    /// Entries in table order.
    pub fn files(&self) -> &[ArchiveFile] {
        &self.files
    }

    /// Mutable entries in table order.
    pub fn files_mut(&mut self) -> impl Iterator<Item = &mut ArchiveFile> {
        self.files.iter_mut()
    }

    /// Releases every entry's cache buffer.
    pub fn release_all_caches(&mut self) {
        for file in &mut self.files {
            file.release_cache();
        }
    }

    /// Total bytes currently held in entry caches.
    pub fn cache_size(&self) -> u64 {
        self.files.iter().map(ArchiveFile::cached_len).sum()
    }

    /// Zero-copy view of an entry's bytes straight from the mapping.
    /// The entry's residency is left untouched.
    pub fn read_raw(&self, path: &str) -> Result<&[u8]> {
        let file = self.get_file(path)?;
        match &self.mapping {
            Some(mapping) => {
                let start = file.offset() as usize;
                let end = start + file.size() as usize;
                Ok(&mapping.data()[start..end])
            }
            // Unreachable while entries exist; closing clears both
            None => Err(Error::FileNotFound(path.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn push_u32(buf: &mut Vec<u8>, order: Endianness, value: u32) {
        let mut tmp = [0u8; 4];
        order.write_u32(&mut tmp, value);
        buf.extend_from_slice(&tmp);
    }

    fn push_u64(buf: &mut Vec<u8>, order: Endianness, value: u64) {
        let mut tmp = [0u8; 8];
        order.write_u64(&mut tmp, value);
        buf.extend_from_slice(&tmp);
    }

    fn push_str(buf: &mut Vec<u8>, order: Endianness, s: &str) {
        push_u64(buf, order, s.len() as u64);
        buf.extend_from_slice(s.as_bytes());
    }

    /// One-entry archive: "a.txt" -> "Hello, World!", alignment 1,
    /// big-endian, data offset 76, 89 bytes total.
    fn hello_archive() -> Vec<u8> {
        let order = Endianness::Big;
        let mut buf = Vec::new();
        push_u32(&mut buf, order, 76);
        push_str(&mut buf, order, "Reverge Package File");
        push_str(&mut buf, order, "1.1");
        push_u64(&mut buf, order, 1);
        push_str(&mut buf, order, "a.txt");
        push_u64(&mut buf, order, 13);
        push_u32(&mut buf, order, 1);
        assert_eq!(buf.len(), 76);
        buf.extend_from_slice(b"Hello, World!");
        assert_eq!(buf.len(), 89);
        buf
    }

    fn write_archive(dir: &TempDir, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join("test.gfs");
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_opens_and_indexes_single_entry() {
        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, &hello_archive());

        let mut reader = ArchiveReader::open(&path, ReaderConfig::default()).unwrap();
        assert!(reader.is_open());
        assert_eq!(reader.identifier(), "Reverge Package File");
        assert_eq!(reader.version(), "1.1");
        assert_eq!(reader.file_count(), 1);
        assert!(reader.contains("a.txt"));

        let file = reader.get_file("a.txt").unwrap();
        assert_eq!(file.size(), 13);
        assert_eq!(file.offset(), 76);

        let file = reader.get_file_mut("a.txt").unwrap();
        assert_eq!(file.as_str().unwrap(), "Hello, World!");
    }

    #[test]
    fn test_read_raw_leaves_residency_untouched() {
        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, &hello_archive());

        let reader = ArchiveReader::open(&path, ReaderConfig::default()).unwrap();
        assert_eq!(reader.read_raw("a.txt").unwrap(), b"Hello, World!");
        assert!(!reader.get_file("a.txt").unwrap().is_loaded());
        assert_eq!(reader.cache_size(), 0);
    }

    #[test]
    fn test_missing_path_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, &hello_archive());

        let reader = ArchiveReader::open(&path, ReaderConfig::default()).unwrap();
        assert!(!reader.contains("b.txt"));
        assert!(matches!(
            reader.get_file("b.txt"),
            Err(Error::FileNotFound(_))
        ));
        assert!(matches!(
            reader.read_raw("b.txt"),
            Err(Error::FileNotFound(_))
        ));
    }

    #[test]
    fn test_close_releases_entries_and_index() {
        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, &hello_archive());

        let mut reader = ArchiveReader::open(&path, ReaderConfig::default()).unwrap();
        reader.close();
        assert!(!reader.is_open());
        assert_eq!(reader.file_count(), 0);
        assert!(!reader.contains("a.txt"));
        assert!(matches!(
            reader.get_file("a.txt"),
            Err(Error::FileNotFound(_))
        ));
        // Header strings survive the close
        assert_eq!(reader.identifier(), "Reverge Package File");
        assert_eq!(reader.version(), "1.1");

        reader.close();
        assert!(!reader.is_open());
    }

    #[test]
    fn test_aligned_entries_follow_padding() {
        let order = Endianness::Big;
        let mut buf = Vec::new();
        // header: 4 + 28 + 11 + 8 = 51, table: 2 rows of (8+1+8+4) = 42
        push_u32(&mut buf, order, 93);
        push_str(&mut buf, order, "Reverge Package File");
        push_str(&mut buf, order, "1.1");
        push_u64(&mut buf, order, 2);
        push_str(&mut buf, order, "a");
        push_u64(&mut buf, order, 3);
        push_u32(&mut buf, order, 1);
        push_str(&mut buf, order, "b");
        push_u64(&mut buf, order, 5);
        push_u32(&mut buf, order, 64);
        assert_eq!(buf.len(), 93);
        buf.extend_from_slice(b"abc"); // 93..96
        buf.resize(128, 0); // padding up to the 64-byte boundary
        buf.extend_from_slice(b"hello"); // 128..133

        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, &buf);

        let mut reader = ArchiveReader::open(&path, ReaderConfig::default()).unwrap();
        assert_eq!(reader.file_count(), 2);

        let a = reader.get_file("a").unwrap();
        assert_eq!(a.offset(), 93);
        let b = reader.get_file("b").unwrap();
        assert_eq!(b.offset(), 128);

        assert_eq!(reader.get_file_mut("a").unwrap().data(), b"abc");
        assert_eq!(reader.get_file_mut("b").unwrap().data(), b"hello");
    }

    #[test]
    fn test_truncated_header_fields() {
        let dir = TempDir::new().unwrap();
        let archive = hello_archive();

        // Inside the data offset
        let path = write_archive(&dir, &archive[..2]);
        assert!(matches!(
            ArchiveReader::open(&path, ReaderConfig::default()),
            Err(Error::Truncated {
                context: "data offset",
                ..
            })
        ));

        // Inside the identifier bytes
        let path = write_archive(&dir, &archive[..20]);
        assert!(matches!(
            ArchiveReader::open(&path, ReaderConfig::default()),
            Err(Error::Truncated {
                context: "identifier",
                ..
            })
        ));

        // Inside the entry count
        let path = write_archive(&dir, &archive[..46]);
        assert!(matches!(
            ArchiveReader::open(&path, ReaderConfig::default()),
            Err(Error::Truncated {
                context: "entry count",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_length_file_is_truncated_not_io() {
        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, b"");
        assert!(matches!(
            ArchiveReader::open(&path, ReaderConfig::default()),
            Err(Error::Truncated {
                context: "data offset",
                ..
            })
        ));
    }

    #[test]
    fn test_entry_data_beyond_archive_is_out_of_bounds() {
        let dir = TempDir::new().unwrap();
        let archive = hello_archive();
        // Keep the whole table, cut into the entry data
        let path = write_archive(&dir, &archive[..80]);

        match ArchiveReader::open(&path, ReaderConfig::default()) {
            Err(Error::FileOutOfBounds {
                path,
                end,
                archive_len,
            }) => {
                assert_eq!(path, "a.txt");
                assert_eq!(end, 89);
                assert_eq!(archive_len, 80);
            }
            _ => panic!("expected FileOutOfBounds"),
        }
    }

    #[test]
    fn test_hostile_entry_count_is_rejected() {
        let order = Endianness::Big;
        let mut buf = Vec::new();
        push_u32(&mut buf, order, 51);
        push_str(&mut buf, order, "Reverge Package File");
        push_str(&mut buf, order, "1.1");
        push_u64(&mut buf, order, u64::MAX);

        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, &buf);
        assert!(matches!(
            ArchiveReader::open(&path, ReaderConfig::default()),
            Err(Error::ImplausibleEntryCount { count: u64::MAX, .. })
        ));
    }

    #[test]
    fn test_non_power_of_two_alignment_is_rejected() {
        let order = Endianness::Big;
        let mut buf = Vec::new();
        push_u32(&mut buf, order, 76);
        push_str(&mut buf, order, "Reverge Package File");
        push_str(&mut buf, order, "1.1");
        push_u64(&mut buf, order, 1);
        push_str(&mut buf, order, "a.txt");
        push_u64(&mut buf, order, 13);
        push_u32(&mut buf, order, 3);
        buf.extend_from_slice(b"Hello, World!");

        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, &buf);
        match ArchiveReader::open(&path, ReaderConfig::default()) {
            Err(Error::InvalidAlignment { path, alignment }) => {
                assert_eq!(path, "a.txt");
                assert_eq!(alignment, 3);
            }
            _ => panic!("expected InvalidAlignment"),
        }
    }

    #[test]
    fn test_invalid_utf8_path_is_rejected() {
        let order = Endianness::Big;
        let mut buf = Vec::new();
        push_u32(&mut buf, order, 73);
        push_str(&mut buf, order, "Reverge Package File");
        push_str(&mut buf, order, "1.1");
        push_u64(&mut buf, order, 1);
        push_u64(&mut buf, order, 2);
        buf.extend_from_slice(&[0xFF, 0xFE]);
        push_u64(&mut buf, order, 0);
        push_u32(&mut buf, order, 1);

        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, &buf);
        assert!(matches!(
            ArchiveReader::open(&path, ReaderConfig::default()),
            Err(Error::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_duplicate_path_keeps_later_entry_in_index() {
        let order = Endianness::Big;
        let mut buf = Vec::new();
        // header 51 + 2 rows of (8+3+8+4) = 97
        push_u32(&mut buf, order, 97);
        push_str(&mut buf, order, "Reverge Package File");
        push_str(&mut buf, order, "1.1");
        push_u64(&mut buf, order, 2);
        push_str(&mut buf, order, "dup");
        push_u64(&mut buf, order, 3);
        push_u32(&mut buf, order, 1);
        push_str(&mut buf, order, "dup");
        push_u64(&mut buf, order, 3);
        push_u32(&mut buf, order, 1);
        assert_eq!(buf.len(), 97);
        buf.extend_from_slice(b"one");
        buf.extend_from_slice(b"two");

        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, &buf);

        let mut reader = ArchiveReader::open(&path, ReaderConfig::default()).unwrap();
        assert_eq!(reader.file_count(), 2);
        assert_eq!(reader.files()[0].offset(), 97);
        assert_eq!(reader.files()[1].offset(), 100);
        assert_eq!(reader.get_file_mut("dup").unwrap().data(), b"two");
    }

    #[test]
    fn test_little_endian_archive_round_trips() {
        let order = Endianness::Little;
        let mut buf = Vec::new();
        push_u32(&mut buf, order, 76);
        push_str(&mut buf, order, "Reverge Package File");
        push_str(&mut buf, order, "1.1");
        push_u64(&mut buf, order, 1);
        push_str(&mut buf, order, "a.txt");
        push_u64(&mut buf, order, 13);
        push_u32(&mut buf, order, 1);
        buf.extend_from_slice(b"Hello, World!");

        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, &buf);

        let config = ReaderConfig {
            endianness: Endianness::Little,
            ..ReaderConfig::default()
        };
        let mut reader = ArchiveReader::open(&path, config).unwrap();
        assert_eq!(reader.get_file_mut("a.txt").unwrap().data(), b"Hello, World!");

        // The wrong byte order must fail parsing, not crash
        assert!(ArchiveReader::open(&path, ReaderConfig::default()).is_err());
    }

    #[test]
    fn test_empty_table_archive_opens() {
        let order = Endianness::Big;
        let mut buf = Vec::new();
        push_u32(&mut buf, order, 51);
        push_str(&mut buf, order, "Reverge Package File");
        push_str(&mut buf, order, "1.1");
        push_u64(&mut buf, order, 0);

        let dir = TempDir::new().unwrap();
        let path = write_archive(&dir, &buf);

        let reader = ArchiveReader::open(&path, ReaderConfig::default()).unwrap();
        assert_eq!(reader.file_count(), 0);
        assert_eq!(reader.cache_size(), 0);
        assert!(reader.files().is_empty());
    }
}
