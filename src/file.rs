//! Archived file entries with lazy data residency
//!
//! An [`ArchiveFile`] is one row of the file table plus a shared handle
//! to the archive mapping. Its bytes are not touched until first access.
//! At construction the entry picks exactly one residency from its size
//! and the reader's configuration: at or below the cache threshold the
//! bytes are copied into a private cache, above it they are served
//! zero-copy from the mapping, unless streaming is allowed, in which
//! case a private buffer backs repeated stream opens. Only the cached
//! residency can be released and re-materialized later.

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, Result};
use crate::mmap::MappedFile;

/// Residency chosen for an entry when it is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadPolicy {
    /// Copy into a private heap buffer on first access
    Cache,
    /// Buffer once, hand out independent streams over copies
    Stream,
    /// Serve subslices of the mapping, no private copy
    Map,
}

/// Where an entry's bytes currently live.
enum FileData {
    Unloaded,
    Mapped,
    Cached(Vec<u8>),
    Stream(Vec<u8>),
}

/// One file inside an archive.
///
/// Move-only. The entry holds its own `Arc` to the mapping, so it stays
/// readable even if the reader that produced it is closed or dropped
/// first.
pub struct ArchiveFile {
    path: String,
    offset: u64,
    size: u64,
    archive: Arc<MappedFile>,
    policy: LoadPolicy,
    data: FileData,
}

impl ArchiveFile {
    /// `offset` and `size` must already be validated against the mapping.
    pub(crate) fn new(
        path: String,
        offset: u64,
        size: u64,
        archive: Arc<MappedFile>,
        cache_threshold: u64,
        allow_streaming: bool,
    ) -> Self {
        debug_assert!(archive.is_range_valid(offset, size));
        let policy = if size <= cache_threshold {
            LoadPolicy::Cache
        } else if allow_streaming {
            LoadPolicy::Stream
        } else {
            LoadPolicy::Map
        };
        Self {
            path,
            offset,
            size,
            archive,
            policy,
            data: FileData::Unloaded,
        }
    }

    /// Archive path of this entry.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Entry size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Absolute offset of the entry data inside the archive.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The entry's bytes, materializing the residency on first call.
    pub fn data(&mut self) -> &[u8] {
        self.ensure_loaded();
        self.loaded_bytes()
    }

    /// The entry's bytes as UTF-8 text.
    pub fn as_str(&mut self) -> Result<&str> {
        self.ensure_loaded();
        let bytes = self.loaded_bytes();
        std::str::from_utf8(bytes)
            .map_err(|_| Error::InvalidUtf8(format!("contents of '{}'", self.path)))
    }

    /// Up to `length` bytes starting at `offset` within the entry,
    /// clipped to the entry size. Empty when `offset` is at or past the
    /// end. Never panics.
    pub fn read_chunk(&mut self, offset: u64, length: u64) -> &[u8] {
        self.ensure_loaded();
        let bytes = self.loaded_bytes();
        if offset >= bytes.len() as u64 {
            return &[];
        }
        let end = offset.saturating_add(length).min(bytes.len() as u64) as usize;
        &bytes[offset as usize..end]
    }

    /// A fresh, independently seekable stream over a copy of the entry
    /// bytes. Each call returns a new stream positioned at 0, whatever
    /// the residency; later cache releases do not touch it.
    pub fn open_stream(&mut self) -> FileStream {
        FileStream::new(self.data().to_vec())
    }

    /// True only while the entry holds a private cache buffer.
    pub fn is_cached(&self) -> bool {
        matches!(self.data, FileData::Cached(_))
    }

    /// True once any residency has been materialized.
    pub fn is_loaded(&self) -> bool {
        !matches!(self.data, FileData::Unloaded)
    }

    /// Drops the cache buffer, returning the entry to the unloaded
    /// state. Mapped and stream residencies are untouched. A later
    /// access re-materializes the same bytes.
    pub fn release_cache(&mut self) {
        if self.is_cached() {
            trace!("Releasing cache for '{}'", self.path);
            self.data = FileData::Unloaded;
        }
    }

    /// Bytes held by the cache residency, 0 otherwise.
    pub(crate) fn cached_len(&self) -> u64 {
        match &self.data {
            FileData::Cached(bytes) => bytes.len() as u64,
            _ => 0,
        }
    }

    fn ensure_loaded(&mut self) {
        if self.is_loaded() {
            return;
        }
        self.data = match self.policy {
            LoadPolicy::Cache => {
                trace!("Caching '{}' ({} bytes)", self.path, self.size);
                FileData::Cached(self.mapped_bytes().to_vec())
            }
            LoadPolicy::Stream => {
                trace!("Buffering '{}' for streaming", self.path);
                FileData::Stream(self.mapped_bytes().to_vec())
            }
            LoadPolicy::Map => FileData::Mapped,
        };
    }

    fn loaded_bytes(&self) -> &[u8] {
        match &self.data {
            FileData::Mapped => self.mapped_bytes(),
            FileData::Cached(bytes) | FileData::Stream(bytes) => bytes,
            FileData::Unloaded => unreachable!("entry data accessed before materialization"),
        }
    }

    fn mapped_bytes(&self) -> &[u8] {
        let start = self.offset as usize;
        let end = start + self.size as usize;
        &self.archive.data()[start..end]
    }
}

/// An independently seekable stream over one entry's bytes.
pub struct FileStream {
    data: Cursor<Vec<u8>>,
}

impl FileStream {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data: Cursor::new(data),
        }
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.data.read(buf)
    }
}

impl Seek for FileStream {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.data.seek(pos)
    }
}
