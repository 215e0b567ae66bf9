//! Archive writer with an insertion-ordered staging table
//!
//! [`ArchiveWriter`] stages files in memory (raw bytes, single disk
//! files, or recursive directory walks) and serializes them as one
//! archive: header, file table, then file data at each entry's
//! alignment boundary. The staging table preserves insertion order, so
//! the same files staged in the same order always produce
//! byte-identical output.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::endian::Endianness;
use crate::error::{Error, Result};
use crate::{DEFAULT_ALIGNMENT, DEFAULT_IDENTIFIER, DEFAULT_VERSION, align_up};

/// Configuration for serializing archives.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Identifier string written into the header.
    pub identifier: String,
    /// Version string written into the header.
    pub version: String,
    /// Byte order for every integer field.
    pub endianness: Endianness,
    /// Alignment for files staged without an explicit one.
    pub default_alignment: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            identifier: DEFAULT_IDENTIFIER.to_string(),
            version: DEFAULT_VERSION.to_string(),
            endianness: Endianness::default(),
            default_alignment: DEFAULT_ALIGNMENT,
        }
    }
}

struct PendingFile {
    path: String,
    data: Vec<u8>,
    alignment: u32,
}

/// Builds a package archive in memory.
pub struct ArchiveWriter {
    config: WriterConfig,
    files: Vec<PendingFile>,
    index: HashMap<String, usize>,
}

impl ArchiveWriter {
    pub fn new(config: WriterConfig) -> Self {
        Self {
            config,
            files: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Stages `data` under `path` with the configured default alignment.
    pub fn add_file<P, D>(&mut self, path: P, data: D) -> Result<()>
    where
        P: Into<String>,
        D: Into<Vec<u8>>,
    {
        self.add_file_aligned(path, data, 0)
    }

    /// Stages `data` under `path`. Alignment 0 means the configured
    /// default; the resolved alignment must be a power of two.
    pub fn add_file_aligned<P, D>(&mut self, path: P, data: D, alignment: u32) -> Result<()>
    where
        P: Into<String>,
        D: Into<Vec<u8>>,
    {
        let path = path.into();
        if path.is_empty() {
            return Err(Error::EmptyPath);
        }
        if self.index.contains_key(&path) {
            return Err(Error::DuplicatePath(path));
        }
        let alignment = if alignment == 0 {
            self.config.default_alignment
        } else {
            alignment
        };
        if !alignment.is_power_of_two() {
            return Err(Error::InvalidAlignment { path, alignment });
        }

        let data = data.into();
        trace!("Staged '{}' ({} bytes, align {})", path, data.len(), alignment);
        self.index.insert(path.clone(), self.files.len());
        self.files.push(PendingFile {
            path,
            data,
            alignment,
        });
        Ok(())
    }

    /// Reads `source` from disk and stages it. A missing or unreadable
    /// source is skipped with `Ok(false)`, not an error. An empty
    /// `archive_path` stages the file under its own file name.
    /// Alignment 0 means the configured default.
    pub fn add_file_from_disk<P: AsRef<Path>>(
        &mut self,
        source: P,
        archive_path: &str,
        alignment: u32,
    ) -> Result<bool> {
        let source = source.as_ref();
        let data = match fs::read(source) {
            Ok(data) => data,
            Err(e) => {
                warn!("Skipping unreadable file {:?}: {}", source, e);
                return Ok(false);
            }
        };
        let path = if archive_path.is_empty() {
            match source.file_name().and_then(|name| name.to_str()) {
                Some(name) => name.to_string(),
                None => {
                    warn!("Skipping {:?}: no usable file name", source);
                    return Ok(false);
                }
            }
        } else {
            archive_path.to_string()
        };
        self.add_file_aligned(path, data, alignment)?;
        Ok(true)
    }

    /// Recursively stages every regular file under `dir` with the
    /// default alignment. Archive paths are `prefix` + the
    /// `/`-separated path relative to `dir`. A missing or
    /// non-directory `dir` is a no-op; unreadable files and non-UTF-8
    /// paths are skipped.
    pub fn add_files_from_directory<P: AsRef<Path>>(&mut self, dir: P, prefix: &str) -> Result<()> {
        self.add_files_from_directory_filtered(dir, prefix, |_| true)
    }

    /// Like [`add_files_from_directory`](Self::add_files_from_directory),
    /// staging only the files for which `filter` returns true.
    pub fn add_files_from_directory_filtered<P, F>(
        &mut self,
        dir: P,
        prefix: &str,
        mut filter: F,
    ) -> Result<()>
    where
        P: AsRef<Path>,
        F: FnMut(&Path) -> bool,
    {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            debug!("Not a directory, nothing to stage: {:?}", dir);
            return Ok(());
        }

        // Sorted walk keeps the staging order independent of the
        // filesystem's enumeration order
        for entry in WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !filter(path) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            let Some(relative) = forward_slashed(relative) else {
                warn!("Skipping non-UTF-8 path {:?}", path);
                continue;
            };
            self.add_file_from_disk(path, &format!("{prefix}{relative}"), 0)?;
        }
        Ok(())
    }

    /// Removes a staged file. Returns whether it was present.
    pub fn remove_file(&mut self, path: &str) -> bool {
        match self.index.remove(path) {
            Some(idx) => {
                self.files.remove(idx);
                for slot in self.index.values_mut() {
                    if *slot > idx {
                        *slot -= 1;
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Replaces the bytes of a staged file, keeping its alignment and
    /// table position. Returns whether it was present.
    pub fn update_file<D: Into<Vec<u8>>>(&mut self, path: &str, data: D) -> bool {
        match self.index.get(path) {
            Some(&idx) => {
                self.files[idx].data = data.into();
                true
            }
            None => false,
        }
    }

    /// Drops every staged file.
    pub fn clear(&mut self) {
        self.files.clear();
        self.index.clear();
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn header_len(&self) -> u64 {
        4 + 8 + self.config.identifier.len() as u64 + 8 + self.config.version.len() as u64 + 8
    }

    fn table_len(&self) -> u64 {
        self.files
            .iter()
            .map(|file| 8 + file.path.len() as u64 + 8 + 4)
            .sum()
    }

    fn data_offset(&self) -> u64 {
        self.header_len() + self.table_len()
    }

    /// Exact size of the serialized archive in bytes.
    pub fn total_size(&self) -> u64 {
        let mut total = self.data_offset();
        for file in &self.files {
            if file.alignment > 1 {
                total = align_up(total, file.alignment);
            }
            total += file.data.len() as u64;
        }
        total
    }

    /// Serializes the archive into a byte vector: header, table rows in
    /// insertion order, then each file's bytes at its alignment
    /// boundary with gaps zero-filled.
    pub fn write_to_memory(&self) -> Result<Vec<u8>> {
        let data_offset = self.data_offset();
        if data_offset > u64::from(u32::MAX) {
            return Err(Error::ArchiveTooLarge {
                offset: data_offset,
                max: u64::from(u32::MAX),
            });
        }

        let order = self.config.endianness;
        let mut buf = Vec::with_capacity(self.total_size() as usize);

        push_u32(&mut buf, order, data_offset as u32);
        push_string(&mut buf, order, &self.config.identifier);
        push_string(&mut buf, order, &self.config.version);
        push_u64(&mut buf, order, self.files.len() as u64);

        for file in &self.files {
            push_string(&mut buf, order, &file.path);
            push_u64(&mut buf, order, file.data.len() as u64);
            push_u32(&mut buf, order, file.alignment);
        }
        debug_assert_eq!(buf.len() as u64, data_offset);

        for file in &self.files {
            if file.alignment > 1 {
                let aligned = align_up(buf.len() as u64, file.alignment) as usize;
                buf.resize(aligned, 0);
            }
            buf.extend_from_slice(&file.data);
        }

        debug!(
            "Serialized archive: {} files, {} bytes",
            self.files.len(),
            buf.len()
        );
        Ok(buf)
    }

    /// Serializes the archive to any writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.write_to_memory()?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Serializes the archive to a file, replacing any existing one.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        debug!("Wrote archive to {:?}", path);
        Ok(())
    }
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new(WriterConfig::default())
    }
}

fn push_u32(buf: &mut Vec<u8>, order: Endianness, value: u32) {
    let mut bytes = [0u8; 4];
    order.write_u32(&mut bytes, value);
    buf.extend_from_slice(&bytes);
}

fn push_u64(buf: &mut Vec<u8>, order: Endianness, value: u64) {
    let mut bytes = [0u8; 8];
    order.write_u64(&mut bytes, value);
    buf.extend_from_slice(&bytes);
}

fn push_string(buf: &mut Vec<u8>, order: Endianness, s: &str) {
    push_u64(buf, order, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Relative path with `/` separators, or None when a component is not
/// UTF-8.
fn forward_slashed(path: &Path) -> Option<String> {
    let mut out = String::new();
    for component in path.components() {
        let piece = component.as_os_str().to_str()?;
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(piece);
    }
    Some(out)
}
