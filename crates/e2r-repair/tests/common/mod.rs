//! Synthetic ext2 image builder for the repair tests.
//!
//! Produces a 1 MiB single-group image with 1024-byte blocks and 128
//! inodes, matching a freshly-formatted small ext2 filesystem:
//!
//! ```text
//! block 0      boot padding
//! block 1      superblock
//! block 2      group descriptor table
//! block 3      block bitmap
//! block 4      inode bitmap
//! blocks 5-20  inode table (128 inodes x 128 bytes)
//! blocks 21+   data
//! ```
//!
//! Both bitmaps start zeroed; tests corrupt or populate them explicitly.

#![allow(dead_code)]

use e2r_types::{EXT2_SUPER_MAGIC, S_IFDIR, S_IFREG};

pub const BLOCK_SIZE: usize = 1024;
pub const BLOCK_COUNT: u32 = 1024;
pub const INODE_COUNT: u32 = 128;
pub const BLOCKS_PER_GROUP: u32 = 8192;
pub const INODES_PER_GROUP: u32 = 128;

pub const BLOCK_BITMAP_BLOCK: u32 = 3;
pub const INODE_BITMAP_BLOCK: u32 = 4;
pub const INODE_TABLE_BLOCK: u32 = 5;
pub const INODE_TABLE_BLOCKS: u32 = 16;
/// First block available for file data.
pub const FIRST_DATA_BLOCK: u32 = 21;

pub const ROOT_DIR_BLOCK: u32 = 21;

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub struct ImageBuilder {
    img: Vec<u8>,
    root_entries: Vec<(u32, String, u8)>,
}

impl ImageBuilder {
    /// Formatted image: superblock and group descriptor in place, bitmaps
    /// and inode table zeroed, no files.
    pub fn formatted() -> Self {
        let mut img = vec![0_u8; BLOCK_COUNT as usize * BLOCK_SIZE];

        let sb = 1024;
        put_u32(&mut img, sb, INODE_COUNT);
        put_u32(&mut img, sb + 0x04, BLOCK_COUNT);
        put_u32(&mut img, sb + 0x14, 1); // first_data_block
        put_u32(&mut img, sb + 0x18, 0); // log_block_size -> 1024
        put_u32(&mut img, sb + 0x20, BLOCKS_PER_GROUP);
        put_u32(&mut img, sb + 0x28, INODES_PER_GROUP);
        put_u16(&mut img, sb + 0x38, EXT2_SUPER_MAGIC);
        put_u16(&mut img, sb + 0x3A, 1); // clean state

        let gd = 2048;
        put_u32(&mut img, gd, BLOCK_BITMAP_BLOCK);
        put_u32(&mut img, gd + 4, INODE_BITMAP_BLOCK);
        put_u32(&mut img, gd + 8, INODE_TABLE_BLOCK);

        Self {
            img,
            root_entries: Vec::new(),
        }
    }

    /// Add the root directory (inode 2) with its data at `ROOT_DIR_BLOCK`.
    pub fn with_root(mut self) -> Self {
        self.set_inode(2, S_IFDIR | 0o755, 3, BLOCK_SIZE as u32, &[ROOT_DIR_BLOCK], 0);
        self.root_entries.push((2, ".".to_owned(), 2));
        self.root_entries.push((2, "..".to_owned(), 2));
        self
    }

    /// Write an inode record into the table.
    pub fn set_inode(
        &mut self,
        ino: u32,
        mode: u16,
        links: u16,
        size: u32,
        direct: &[u32],
        single_indirect: u32,
    ) {
        assert!(ino >= 1 && ino <= INODE_COUNT);
        assert!(direct.len() <= 12);
        let base = INODE_TABLE_BLOCK as usize * BLOCK_SIZE + (ino - 1) as usize * 128;
        put_u16(&mut self.img, base, mode);
        put_u32(&mut self.img, base + 0x04, size);
        put_u16(&mut self.img, base + 0x1A, links);
        for (slot, &block) in direct.iter().enumerate() {
            put_u32(&mut self.img, base + 0x28 + slot * 4, block);
        }
        put_u32(&mut self.img, base + 0x58, single_indirect);
    }

    /// Name an inode in the root directory.
    pub fn add_root_entry(&mut self, name: &str, ino: u32, file_type: u8) {
        self.root_entries.push((ino, name.to_owned(), file_type));
    }

    /// Write raw bytes at the start of a block.
    pub fn write_block(&mut self, block: u32, data: &[u8]) {
        let start = block as usize * BLOCK_SIZE;
        self.img[start..start + data.len()].copy_from_slice(data);
    }

    /// Store a pointer inside a single-indirect block.
    pub fn set_indirect_pointer(&mut self, indirect_block: u32, slot: usize, target: u32) {
        let offset = indirect_block as usize * BLOCK_SIZE + slot * 4;
        put_u32(&mut self.img, offset, target);
    }

    pub fn set_inode_bitmap_bit(&mut self, index: u32) {
        let offset = INODE_BITMAP_BLOCK as usize * BLOCK_SIZE + (index / 8) as usize;
        self.img[offset] |= 1 << (index % 8);
    }

    pub fn set_block_bitmap_bit(&mut self, index: u32) {
        let offset = BLOCK_BITMAP_BLOCK as usize * BLOCK_SIZE + (index / 8) as usize;
        self.img[offset] |= 1 << (index % 8);
    }

    /// Materialize the root directory block and return the image.
    pub fn build(mut self) -> Vec<u8> {
        if !self.root_entries.is_empty() {
            let block = make_dir_block(&self.root_entries);
            self.write_block(ROOT_DIR_BLOCK, &block);
        }
        self.img
    }
}

/// Encode directory records; the last record's length covers the block
/// remainder, as ext2 requires.
pub fn make_dir_block(entries: &[(u32, String, u8)]) -> Vec<u8> {
    let mut block = Vec::with_capacity(BLOCK_SIZE);
    for (index, (ino, name, file_type)) in entries.iter().enumerate() {
        let name_bytes = name.as_bytes();
        let rec_len = if index == entries.len() - 1 {
            BLOCK_SIZE - block.len()
        } else {
            (8 + name_bytes.len() + 3) & !3
        };
        let start = block.len();
        block.extend_from_slice(&ino.to_le_bytes());
        block.extend_from_slice(&u16::try_from(rec_len).unwrap().to_le_bytes());
        block.push(u8::try_from(name_bytes.len()).unwrap());
        block.push(*file_type);
        block.extend_from_slice(name_bytes);
        block.resize(start + rec_len, 0);
    }
    block.resize(BLOCK_SIZE, 0);
    block
}

// ── Bitmap inspection helpers ───────────────────────────────────────────────

pub fn inode_bitmap_bit(img: &[u8], index: u32) -> bool {
    let offset = INODE_BITMAP_BLOCK as usize * BLOCK_SIZE + (index / 8) as usize;
    (img[offset] >> (index % 8)) & 1 == 1
}

pub fn block_bitmap_bit(img: &[u8], index: u32) -> bool {
    let offset = BLOCK_BITMAP_BLOCK as usize * BLOCK_SIZE + (index / 8) as usize;
    (img[offset] >> (index % 8)) & 1 == 1
}

/// Regular-file mode used by most tests.
pub fn reg_mode() -> u16 {
    S_IFREG | 0o644
}
