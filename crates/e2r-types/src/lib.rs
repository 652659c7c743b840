#![forbid(unsafe_code)]
//! Core types for e2rescue.
//!
//! Unit-carrying newtypes, the byte-level `ParseError`, little-endian slice
//! readers, and the block-group arithmetic shared by the decode and repair
//! layers. No I/O happens here.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const EXT2_SUPERBLOCK_OFFSET: u64 = 1024;
pub const EXT2_SUPERBLOCK_SIZE: usize = 1024;
pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

/// Revision-0 inode record size. The on-disk `s_inode_size` field only
/// becomes authoritative with the dynamic revision.
pub const EXT2_INODE_SIZE: u32 = 128;

/// On-disk group descriptor size (ext2 has no 64-bit descriptors).
pub const EXT2_GROUP_DESC_SIZE: u64 = 32;

/// Byte offset of the group descriptor table: the fixed-size superblock
/// region immediately follows the 1024-byte boot padding.
pub const EXT2_GDT_OFFSET: u64 = EXT2_SUPERBLOCK_OFFSET + EXT2_SUPERBLOCK_SIZE as u64;

/// Direct block pointer slots in an inode.
pub const EXT2_DIRECT_BLOCKS: usize = 12;

/// Inodes 1..=11 are reserved by the format (root, lost+found, journal slot
/// and friends) and are always live.
pub const EXT2_RESERVED_INODES: u32 = 11;

/// ext2 block number (u32, 0-indexed; 0 in a pointer slot means "absent").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u32);

/// ext2 inode number (u32, 1-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u32);

impl InodeNumber {
    pub const ROOT: Self = Self(2);
}

/// Block group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupNumber(pub u32);

/// Byte offset on a `ByteDevice` (pread/pwrite semantics).
///
/// Unit-carrying wrapper to keep bytes and blocks from mixing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

/// Validated block size: `1024 << s_log_block_size` with the shift capped
/// at 6, so a power of two in 1024..=65536.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Derive from the superblock's `s_log_block_size` field.
    #[must_use]
    pub fn from_log(log_block_size: u32) -> Option<Self> {
        if log_block_size > 6 {
            return None;
        }
        Some(Self(1024 << log_block_size))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Byte offset of the start of a block.
    #[must_use]
    pub fn block_to_byte(self, block: BlockNumber) -> ByteOffset {
        ByteOffset(u64::from(block.0) * u64::from(self.0))
    }

    /// Number of 32-bit block pointers that fit in one block.
    #[must_use]
    pub fn pointers_per_block(self) -> u32 {
        self.0 / 4
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

// ── POSIX file mode constants ───────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0xF000;
/// Named pipe (FIFO).
pub const S_IFIFO: u16 = 0x1000;
/// Character device.
pub const S_IFCHR: u16 = 0x2000;
/// Directory.
pub const S_IFDIR: u16 = 0x4000;
/// Block device.
pub const S_IFBLK: u16 = 0x6000;
/// Regular file.
pub const S_IFREG: u16 = 0x8000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0xA000;
/// Socket.
pub const S_IFSOCK: u16 = 0xC000;

/// Whether a mode word carries the directory file type.
#[must_use]
pub fn mode_is_dir(mode: u16) -> bool {
    (mode & S_IFMT) == S_IFDIR
}

// ── Group arithmetic ────────────────────────────────────────────────────────

/// Block group of an inode. Inode numbers are 1-indexed.
#[must_use]
pub fn inode_to_group(ino: InodeNumber, inodes_per_group: u32) -> GroupNumber {
    GroupNumber(ino.0.saturating_sub(1) / inodes_per_group)
}

/// Index of an inode within its group's inode table.
#[must_use]
pub fn inode_index_in_group(ino: InodeNumber, inodes_per_group: u32) -> u32 {
    ino.0.saturating_sub(1) % inodes_per_group
}

/// Block group of a block. Group g spans blocks
/// `[g * blocks_per_group, (g + 1) * blocks_per_group)`.
#[must_use]
pub fn block_to_group(block: BlockNumber, blocks_per_group: u32) -> GroupNumber {
    GroupNumber(block.0 / blocks_per_group)
}

/// First block of a group.
#[must_use]
pub fn group_first_block(group: GroupNumber, blocks_per_group: u32) -> BlockNumber {
    BlockNumber(group.0.saturating_mul(blocks_per_group))
}

/// Bytes needed for an n-bit bitmap.
#[must_use]
pub fn bitmap_len(bits: u32) -> usize {
    (bits as usize).div_ceil(8)
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
