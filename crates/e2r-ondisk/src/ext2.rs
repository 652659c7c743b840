#![forbid(unsafe_code)]

use e2r_types::{
    BlockNumber, BlockSize, EXT2_DIRECT_BLOCKS, EXT2_GROUP_DESC_SIZE, EXT2_INODE_SIZE,
    EXT2_SUPER_MAGIC, EXT2_SUPERBLOCK_SIZE, InodeNumber, ParseError, mode_is_dir, read_le_u16,
    read_le_u32,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Superblock {
    // ── Core geometry ────────────────────────────────────────────────────
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,

    // ── Identity & state ─────────────────────────────────────────────────
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub rev_level: u32,
    pub minor_rev_level: u16,

    // ── Mount bookkeeping ────────────────────────────────────────────────
    pub mtime: u32,
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub lastcheck: u32,

    // ── Dynamic-revision fields (informational for revision 0) ──────────
    pub first_ino: u32,
    pub inode_size: u16,
}

impl Ext2Superblock {
    /// Parse an ext2 superblock from the 1024-byte superblock region.
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < EXT2_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        Ok(Self {
            inodes_count: read_le_u32(region, 0x00)?,
            blocks_count: read_le_u32(region, 0x04)?,
            reserved_blocks_count: read_le_u32(region, 0x08)?,
            free_blocks_count: read_le_u32(region, 0x0C)?,
            free_inodes_count: read_le_u32(region, 0x10)?,
            first_data_block: read_le_u32(region, 0x14)?,
            log_block_size: read_le_u32(region, 0x18)?,
            blocks_per_group: read_le_u32(region, 0x20)?,
            inodes_per_group: read_le_u32(region, 0x28)?,

            magic: read_le_u16(region, 0x38)?,
            state: read_le_u16(region, 0x3A)?,
            errors: read_le_u16(region, 0x3C)?,
            rev_level: read_le_u32(region, 0x4C)?,
            minor_rev_level: read_le_u16(region, 0x3E)?,

            mtime: read_le_u32(region, 0x2C)?,
            wtime: read_le_u32(region, 0x30)?,
            mnt_count: read_le_u16(region, 0x34)?,
            max_mnt_count: read_le_u16(region, 0x36)?,
            lastcheck: read_le_u32(region, 0x40)?,

            first_ino: read_le_u32(region, 0x54)?,
            inode_size: read_le_u16(region, 0x58)?,
        })
    }

    /// First field whose value makes the superblock unusable, if any.
    ///
    /// Returns the on-disk field name and the offending value, which the
    /// repair layer folds into its corrupt-superblock error. An image
    /// failing any of these checks is never written to.
    #[must_use]
    pub fn implausible_field(&self) -> Option<(&'static str, u64)> {
        if self.magic != EXT2_SUPER_MAGIC {
            return Some(("s_magic", u64::from(self.magic)));
        }
        if self.log_block_size > 6 {
            return Some(("s_log_block_size", u64::from(self.log_block_size)));
        }
        if self.inodes_count == 0 {
            return Some(("s_inodes_count", 0));
        }
        if self.blocks_count == 0 {
            return Some(("s_blocks_count", 0));
        }
        if self.blocks_per_group == 0 {
            return Some(("s_blocks_per_group", 0));
        }
        if self.inodes_per_group == 0 {
            return Some(("s_inodes_per_group", 0));
        }
        // One bitmap block must cover a whole group.
        let bits_per_block = 8 * (1024_u32 << self.log_block_size);
        if self.blocks_per_group > bits_per_block {
            return Some(("s_blocks_per_group", u64::from(self.blocks_per_group)));
        }
        if self.inodes_per_group > bits_per_block {
            return Some(("s_inodes_per_group", u64::from(self.inodes_per_group)));
        }
        None
    }

    /// Block size derived from `s_log_block_size`, when plausible.
    #[must_use]
    pub fn block_size(&self) -> Option<BlockSize> {
        BlockSize::from_log(self.log_block_size)
    }

    /// Number of block groups: `ceil(blocks_count / blocks_per_group)`.
    #[must_use]
    pub fn groups_count(&self) -> u32 {
        if self.blocks_per_group == 0 {
            return 0;
        }
        self.blocks_count.div_ceil(self.blocks_per_group)
    }

    /// Inode records per block (revision-0 inode size).
    #[must_use]
    pub fn inodes_per_block(&self) -> Option<u32> {
        Some(self.block_size()?.get() / EXT2_INODE_SIZE)
    }

    /// Blocks spanned by one group's inode table.
    #[must_use]
    pub fn inode_table_blocks_per_group(&self) -> Option<u32> {
        Some(self.inodes_per_group.div_ceil(self.inodes_per_block()?))
    }

    /// Blocks spanned by the group descriptor table.
    #[must_use]
    pub fn gdt_blocks(&self) -> Option<u32> {
        let bs = self.block_size()?;
        let gdt_bytes = u64::from(self.groups_count()) * EXT2_GROUP_DESC_SIZE;
        u32::try_from(gdt_bytes.div_ceil(u64::from(bs.get()))).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2GroupDesc {
    pub block_bitmap: BlockNumber,
    pub inode_bitmap: BlockNumber,
    pub inode_table: BlockNumber,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl Ext2GroupDesc {
    /// Parse a 32-byte ext2 group descriptor.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            block_bitmap: BlockNumber(read_le_u32(bytes, 0x00)?),
            inode_bitmap: BlockNumber(read_le_u32(bytes, 0x04)?),
            inode_table: BlockNumber(read_le_u32(bytes, 0x08)?),
            free_blocks_count: read_le_u16(bytes, 0x0C)?,
            free_inodes_count: read_le_u16(bytes, 0x0E)?,
            used_dirs_count: read_le_u16(bytes, 0x10)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Inode {
    pub mode: u16,
    pub uid: u16,
    pub size: u32,
    pub gid: u16,
    pub links_count: u16,
    pub blocks: u32,
    pub flags: u32,

    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,

    pub direct: [u32; EXT2_DIRECT_BLOCKS],
    pub single_indirect: u32,
    pub double_indirect: u32,
    pub triple_indirect: u32,
}

impl Ext2Inode {
    /// Parse a 128-byte revision-0 inode record.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < EXT2_INODE_SIZE as usize {
            return Err(ParseError::InsufficientData {
                needed: EXT2_INODE_SIZE as usize,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mut direct = [0_u32; EXT2_DIRECT_BLOCKS];
        for (slot, value) in direct.iter_mut().enumerate() {
            *value = read_le_u32(bytes, 0x28 + slot * 4)?;
        }

        Ok(Self {
            mode: read_le_u16(bytes, 0x00)?,
            uid: read_le_u16(bytes, 0x02)?,
            size: read_le_u32(bytes, 0x04)?,
            gid: read_le_u16(bytes, 0x18)?,
            links_count: read_le_u16(bytes, 0x1A)?,
            blocks: read_le_u32(bytes, 0x1C)?,
            flags: read_le_u32(bytes, 0x20)?,

            atime: read_le_u32(bytes, 0x08)?,
            ctime: read_le_u32(bytes, 0x0C)?,
            mtime: read_le_u32(bytes, 0x10)?,
            dtime: read_le_u32(bytes, 0x14)?,

            direct,
            single_indirect: read_le_u32(bytes, 0x58)?,
            double_indirect: read_le_u32(bytes, 0x5C)?,
            triple_indirect: read_le_u32(bytes, 0x60)?,
        })
    }

    /// Whether this inode record is in use: a zeroed mode or a zero link
    /// count marks it dead for the allocation sweep.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.mode != 0 && self.links_count > 0
    }

    /// Whether the mode word carries the directory file type.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        mode_is_dir(self.mode)
    }
}

// ── Directory entry parsing ─────────────────────────────────────────────────

/// A live ext2 directory entry. Tombstones (`inode == 0`) are consumed by
/// the scan but never surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2DirEntry {
    pub inode: InodeNumber,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: u8,
    pub name: Vec<u8>,
}

impl Ext2DirEntry {
    /// Entry name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// Whether this is the `.` or `..` entry.
    #[must_use]
    pub fn is_dot_or_dotdot(&self) -> bool {
        self.name == b"." || self.name == b".."
    }
}

/// Result of scanning one directory data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirBlock {
    pub entries: Vec<Ext2DirEntry>,
    /// True when the scan hit a zero or out-of-bounds `rec_len` and gave
    /// up before the end of the block. The image is corrupt by assumption,
    /// so this is a scan boundary, not an error.
    pub truncated: bool,
}

/// Scan the variable-length records of a directory data block.
///
/// Records never span blocks; `rec_len` advances to the next record. The
/// scan stops at the first record whose `rec_len` is zero, shorter than
/// the 8-byte header, or runs past the end of the block.
#[must_use]
pub fn parse_dir_block(block: &[u8]) -> DirBlock {
    let mut entries = Vec::new();
    let mut offset = 0_usize;

    while offset + 8 <= block.len() {
        // The header reads cannot fail: offset + 8 <= block.len().
        let inode = read_le_u32(block, offset).unwrap_or(0);
        let rec_len = read_le_u16(block, offset + 4).unwrap_or(0);
        let name_len = block[offset + 6];
        let file_type = block[offset + 7];

        let rec_len_usize = usize::from(rec_len);
        if rec_len_usize < 8 || offset + rec_len_usize > block.len() {
            return DirBlock {
                entries,
                truncated: true,
            };
        }

        if inode != 0 {
            let name_end = (offset + 8 + usize::from(name_len)).min(offset + rec_len_usize);
            let name = block[offset + 8..name_end].to_vec();
            entries.push(Ext2DirEntry {
                inode: InodeNumber(inode),
                rec_len,
                name_len,
                file_type,
                name,
            });
        }

        offset += rec_len_usize;
    }

    DirBlock {
        entries,
        truncated: false,
    }
}
