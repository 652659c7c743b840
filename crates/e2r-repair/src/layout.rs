//! Decoded image layout.
//!
//! [`ImageLayout`] owns the validated superblock and derived geometry and
//! is the single handle every later stage goes through for positioned
//! reads: group descriptors (fetched lazily, cached), inode records, and
//! whole blocks. Nothing here writes to the image.

use e2r_block::ByteDevice;
use e2r_error::{E2rError, Result};
use e2r_ondisk::{Ext2GroupDesc, Ext2Inode, Ext2Superblock};
use e2r_types::{
    BlockNumber, BlockSize, ByteOffset, EXT2_GDT_OFFSET, EXT2_GROUP_DESC_SIZE, EXT2_INODE_SIZE,
    EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE, GroupNumber, InodeNumber, inode_index_in_group,
    inode_to_group,
};
use std::cell::RefCell;
use tracing::debug;

/// Validated superblock plus derived geometry for one open image.
pub struct ImageLayout<'d> {
    dev: &'d dyn ByteDevice,
    sb: Ext2Superblock,
    block_size: BlockSize,
    groups: u32,
    inode_table_blocks: u32,
    gdt_blocks: u32,
    desc_cache: RefCell<Vec<Option<Ext2GroupDesc>>>,
}

impl std::fmt::Debug for ImageLayout<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLayout")
            .field("sb", &self.sb)
            .field("block_size", &self.block_size)
            .field("groups", &self.groups)
            .field("inode_table_blocks", &self.inode_table_blocks)
            .field("gdt_blocks", &self.gdt_blocks)
            .finish()
    }
}

impl<'d> ImageLayout<'d> {
    /// Read and validate the superblock, then derive the image geometry.
    ///
    /// No writes are issued here; a superblock that fails validation
    /// leaves the image untouched.
    pub fn open(dev: &'d dyn ByteDevice) -> Result<Self> {
        let mut region = vec![0_u8; EXT2_SUPERBLOCK_SIZE];
        dev.read_exact_at(ByteOffset(EXT2_SUPERBLOCK_OFFSET), &mut region)?;

        let sb = Ext2Superblock::parse_superblock_region(&region)
            .map_err(|e| E2rError::Format(e.to_string()))?;

        if let Some((field, value)) = sb.implausible_field() {
            return Err(E2rError::CorruptSuperblock { field, value });
        }

        // Validation guarantees these derivations succeed.
        let Some(block_size) = sb.block_size() else {
            return Err(E2rError::CorruptSuperblock {
                field: "s_log_block_size",
                value: u64::from(sb.log_block_size),
            });
        };
        let Some(inode_table_blocks) = sb.inode_table_blocks_per_group() else {
            return Err(E2rError::CorruptSuperblock {
                field: "s_inodes_per_group",
                value: u64::from(sb.inodes_per_group),
            });
        };
        let Some(gdt_blocks) = sb.gdt_blocks() else {
            return Err(E2rError::CorruptSuperblock {
                field: "s_blocks_per_group",
                value: u64::from(sb.blocks_per_group),
            });
        };
        let groups = sb.groups_count();

        debug!(
            target: "e2r::layout",
            block_size = block_size.get(),
            groups,
            inodes = sb.inodes_count,
            blocks = sb.blocks_count,
            "decoded image layout"
        );

        Ok(Self {
            dev,
            sb,
            block_size,
            groups,
            inode_table_blocks,
            gdt_blocks,
            desc_cache: RefCell::new(vec![None; groups as usize]),
        })
    }

    #[must_use]
    pub fn device(&self) -> &'d dyn ByteDevice {
        self.dev
    }

    #[must_use]
    pub fn superblock(&self) -> &Ext2Superblock {
        &self.sb
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    #[must_use]
    pub fn groups_count(&self) -> u32 {
        self.groups
    }

    #[must_use]
    pub fn inode_count(&self) -> u32 {
        self.sb.inodes_count
    }

    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.sb.blocks_count
    }

    #[must_use]
    pub fn inodes_per_group(&self) -> u32 {
        self.sb.inodes_per_group
    }

    #[must_use]
    pub fn blocks_per_group(&self) -> u32 {
        self.sb.blocks_per_group
    }

    /// Blocks spanned by one group's inode table.
    #[must_use]
    pub fn inode_table_blocks_per_group(&self) -> u32 {
        self.inode_table_blocks
    }

    /// Blocks spanned by the group descriptor table.
    #[must_use]
    pub fn gdt_blocks(&self) -> u32 {
        self.gdt_blocks
    }

    /// Fetch a group descriptor, reading it from the image on first use.
    pub fn group_desc(&self, group: GroupNumber) -> Result<Ext2GroupDesc> {
        let index = group.0 as usize;
        if group.0 >= self.groups {
            return Err(E2rError::Format(format!(
                "group {group} out of range ({} groups)",
                self.groups
            )));
        }

        if let Some(desc) = self.desc_cache.borrow()[index] {
            return Ok(desc);
        }

        let mut raw = [0_u8; EXT2_GROUP_DESC_SIZE as usize];
        let offset = EXT2_GDT_OFFSET + u64::from(group.0) * EXT2_GROUP_DESC_SIZE;
        self.dev.read_exact_at(ByteOffset(offset), &mut raw)?;
        let desc = Ext2GroupDesc::parse_from_bytes(&raw)
            .map_err(|e| E2rError::Format(e.to_string()))?;

        self.desc_cache.borrow_mut()[index] = Some(desc);
        Ok(desc)
    }

    /// Read and decode an inode record by number (1-indexed).
    pub fn read_inode(&self, ino: InodeNumber) -> Result<Ext2Inode> {
        if ino.0 == 0 || ino.0 > self.sb.inodes_count {
            return Err(E2rError::InodeOutOfRange(ino.0));
        }

        let group = inode_to_group(ino, self.sb.inodes_per_group);
        let index = inode_index_in_group(ino, self.sb.inodes_per_group);
        let desc = self.group_desc(group)?;

        let offset = self
            .block_size
            .block_to_byte(desc.inode_table)
            .0
            + u64::from(index) * u64::from(EXT2_INODE_SIZE);

        let mut raw = [0_u8; EXT2_INODE_SIZE as usize];
        self.dev.read_exact_at(ByteOffset(offset), &mut raw)?;
        Ext2Inode::parse_from_bytes(&raw).map_err(|e| E2rError::Format(e.to_string()))
    }

    /// Read a whole block into a fresh buffer.
    pub fn read_block(&self, block: BlockNumber) -> Result<Vec<u8>> {
        let mut buf = vec![0_u8; self.block_size.as_usize()];
        self.dev
            .read_exact_at(self.block_size.block_to_byte(block), &mut buf)?;
        Ok(buf)
    }
}
