//! Read-only memory-mapped file access
//!
//! [`MappedFile`] wraps `memmap2` with the small surface the archive
//! engine needs: map a whole file, optionally advise the OS to prefetch
//! it, serve the bytes as one slice, and release the mapping early when
//! asked. Zero-length files cannot be mapped on every platform, so they
//! are represented as an empty mapping instead.

use std::fs::File;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};
use tracing::{debug, trace};

use crate::error::Result;

/// Options controlling how an archive file is mapped.
#[derive(Debug, Clone, Copy)]
pub struct MapOptions {
    /// Map for reading only. The engine never writes through a mapping,
    /// so `false` is accepted and recorded but grants nothing extra.
    pub read_only: bool,
    /// Advise the OS up front that the whole range will be needed.
    pub prefetch: bool,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            read_only: true,
            prefetch: false,
        }
    }
}

enum Backing {
    Mapped(Mmap),
    Empty,
}

/// A whole file mapped read-only into memory.
///
/// Move-only: shared access goes through `Arc<MappedFile>`, and
/// [`close`](Self::close) needs `&mut self`, so a mapping shared with
/// live archive entries cannot be torn down underneath them.
pub struct MappedFile {
    backing: Option<Backing>,
}

impl MappedFile {
    /// Maps `path` in its entirety.
    ///
    /// A zero-length file yields an open, empty mapping rather than an
    /// error.
    pub fn open<P: AsRef<Path>>(path: P, options: MapOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        let backing = if len == 0 {
            Backing::Empty
        } else {
            let mmap = unsafe { MmapOptions::new().map(&file) }?;
            if options.prefetch {
                // Advise the OS that the whole archive will be needed soon
                #[cfg(unix)]
                {
                    use memmap2::Advice;
                    let _ = mmap.advise(Advice::WillNeed);
                }
            }
            Backing::Mapped(mmap)
        };

        debug!(
            "Mapped {:?} ({} bytes, read_only={}, prefetch={})",
            path, len, options.read_only, options.prefetch
        );
        Ok(Self {
            backing: Some(backing),
        })
    }

    /// The mapped bytes; empty once the mapping is closed.
    pub fn data(&self) -> &[u8] {
        match &self.backing {
            Some(Backing::Mapped(mmap)) => &mmap[..],
            Some(Backing::Empty) | None => &[],
        }
    }

    /// Mapped length in bytes; 0 once closed.
    pub fn len(&self) -> u64 {
        self.data().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    pub fn is_open(&self) -> bool {
        self.backing.is_some()
    }

    /// Overflow-safe check that `[offset, offset + length)` lies inside
    /// the mapping.
    pub fn is_range_valid(&self, offset: u64, length: u64) -> bool {
        offset
            .checked_add(length)
            .is_some_and(|end| end <= self.len())
    }

    /// Releases the mapping. Idempotent; `data()` returns an empty slice
    /// afterwards.
    pub fn close(&mut self) {
        if self.backing.take().is_some() {
            trace!("Released file mapping");
        }
    }
}
