//! Byte-order codec for fixed-width archive fields
//!
//! Every integer in the archive format is read and written through
//! [`Endianness`], which dispatches to the matching `byteorder`
//! implementation. The codec itself does no range validation; callers
//! check bounds before handing it a slice.

use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian};

/// Byte order used for every integer field in an archive.
///
/// Archives are big-endian by default. `Native` resolves to the host
/// order at compile time, so archives written with it only round-trip
/// between hosts of the same endianness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    /// Least significant byte first
    Little,
    /// Most significant byte first (the format default)
    #[default]
    Big,
    /// Host byte order
    Native,
}

impl Endianness {
    /// Reads a `u32` from the start of `buf`.
    ///
    /// Panics if `buf` holds fewer than 4 bytes. Range checks belong to
    /// the caller, which knows the field and offset being decoded.
    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Self::Little => LittleEndian::read_u32(buf),
            Self::Big => BigEndian::read_u32(buf),
            Self::Native => NativeEndian::read_u32(buf),
        }
    }

    /// Reads a `u64` from the start of `buf` (panics if shorter than 8 bytes).
    pub fn read_u64(self, buf: &[u8]) -> u64 {
        match self {
            Self::Little => LittleEndian::read_u64(buf),
            Self::Big => BigEndian::read_u64(buf),
            Self::Native => NativeEndian::read_u64(buf),
        }
    }

    /// Writes a `u32` to the start of `buf` (panics if shorter than 4 bytes).
    pub fn write_u32(self, buf: &mut [u8], value: u32) {
        match self {
            Self::Little => LittleEndian::write_u32(buf, value),
            Self::Big => BigEndian::write_u32(buf, value),
            Self::Native => NativeEndian::write_u32(buf, value),
        }
    }

    /// Writes a `u64` to the start of `buf` (panics if shorter than 8 bytes).
    pub fn write_u64(self, buf: &mut [u8], value: u64) {
        match self {
            Self::Little => LittleEndian::write_u64(buf, value),
            Self::Big => BigEndian::write_u64(buf, value),
            Self::Native => NativeEndian::write_u64(buf, value),
        }
    }
}
