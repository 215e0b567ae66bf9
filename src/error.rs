//! Error types for package archive operations

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Truncated archive: {context} needs {needed} bytes at offset {offset}, {remaining} remain")]
    Truncated {
        context: &'static str,
        offset: u64,
        needed: u64,
        remaining: u64,
    },

    #[error("Implausible entry count {count}: table has {remaining} bytes left")]
    ImplausibleEntryCount { count: u64, remaining: u64 },

    #[error("File '{path}' extends beyond the archive: {end} > {archive_len}")]
    FileOutOfBounds {
        path: String,
        end: u64,
        archive_len: u64,
    },

    #[error("Invalid alignment {alignment} for '{path}': must be a power of two")]
    InvalidAlignment { path: String, alignment: u32 },

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(String),

    #[error("File not found in archive: {0}")]
    FileNotFound(String),

    #[error("File path cannot be empty")]
    EmptyPath,

    #[error("File '{0}' already exists in archive")]
    DuplicatePath(String),

    #[error("Archive layout exceeded: data offset {offset} > {max}")]
    ArchiveTooLarge { offset: u64, max: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
