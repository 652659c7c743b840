//! Authoritative allocation map.
//!
//! Builds two in-memory bitmaps, one over inodes and one over blocks, from
//! a full sweep of the image. Three phases, disjoint in what they
//! contribute, composed by set union:
//!
//! 1. reserved inodes 1..=11 are always live;
//! 2. the inode sweep: link counts mark inodes, block trees mark blocks,
//!    and directory contents re-mark inodes whose link count was damaged;
//! 3. structural metadata blocks (superblock, descriptor table, bitmaps,
//!    inode tables) that no inode references.
//!
//! The inode bitmap is exact. The block bitmap is a lower bound: data
//! reachable only through inodes this sweep cannot parse stays invisible,
//! which is why the reconciler never clears block bits.

use crate::bitmap::Bitmap;
use crate::layout::ImageLayout;
use crate::walk::walk_inode;
use e2r_error::Result;
use e2r_ondisk::parse_dir_block;
use e2r_types::{
    BlockNumber, EXT2_GDT_OFFSET, EXT2_GROUP_DESC_SIZE, EXT2_RESERVED_INODES,
    EXT2_SUPERBLOCK_OFFSET, GroupNumber, InodeNumber, group_first_block,
};
use tracing::{debug, info};

/// The reconstructed allocation map for one image.
#[derive(Debug, Clone)]
pub struct AuthorityBitmaps {
    /// Bit `i` set ⇔ inode `i + 1` is live.
    pub inodes: Bitmap,
    /// Bit `b` set ⇔ block `b` is known used.
    pub blocks: Bitmap,
}

/// Counters from the authority sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthorityStats {
    /// Inodes with a non-zero link count.
    pub live_inodes: u32,
    /// Inodes whose block trees were traversed.
    pub walked_inodes: u32,
    /// Directory data blocks scanned.
    pub directory_blocks: u64,
    /// Directory entries that marked an inode live.
    pub directory_entries_marked: u64,
    /// Directory blocks whose record chain was truncated.
    pub truncated_dir_blocks: u64,
    /// Block pointers dropped for exceeding the block count.
    pub skipped_pointers: u64,
}

/// Sweep the image and build the authoritative bitmaps.
pub fn build_authority(layout: &ImageLayout<'_>) -> Result<(AuthorityBitmaps, AuthorityStats)> {
    let mut inodes = Bitmap::new(layout.inode_count());
    let mut blocks = Bitmap::new(layout.block_count());
    let mut stats = AuthorityStats::default();

    // Phase A: reserved inodes.
    for index in 0..EXT2_RESERVED_INODES.min(layout.inode_count()) {
        inodes.set(index);
    }

    // Phase B: inode sweep.
    for n in 1..=layout.inode_count() {
        let inode = layout.read_inode(InodeNumber(n))?;

        if inode.links_count > 0 {
            inodes.set(n - 1);
            stats.live_inodes += 1;
        }
        if !inode.is_live() {
            continue;
        }
        stats.walked_inodes += 1;

        let is_dir = inode.is_dir();
        let inode_count = layout.inode_count();
        let walk_stats = {
            let mut on_block = |block: BlockNumber| {
                blocks.set(block.0);
                Ok(())
            };
            let mut on_dir_block = |block: BlockNumber| {
                stats.directory_blocks += 1;
                let buf = layout.read_block(block)?;
                let scan = parse_dir_block(&buf);
                if scan.truncated {
                    stats.truncated_dir_blocks += 1;
                    debug!(
                        target: "e2r::authority",
                        block = block.0,
                        "truncated directory block"
                    );
                }
                for entry in &scan.entries {
                    if entry.inode.0 >= 1 && entry.inode.0 <= inode_count {
                        inodes.set(entry.inode.0 - 1);
                        stats.directory_entries_marked += 1;
                    }
                }
                Ok(())
            };
            walk_inode(layout, &inode, is_dir, &mut on_block, &mut on_dir_block)?
        };
        stats.skipped_pointers += walk_stats.skipped_pointers;
    }

    // Phase C: structural metadata.
    overlay_metadata(layout, &mut blocks)?;

    info!(
        target: "e2r::authority",
        live_inodes = stats.live_inodes,
        walked_inodes = stats.walked_inodes,
        used_blocks = blocks.count_ones(),
        skipped_pointers = stats.skipped_pointers,
        "authority built"
    );

    Ok((AuthorityBitmaps { inodes, blocks }, stats))
}

/// Mark the blocks no inode references: boot padding, superblock and
/// descriptor table (primary copy plus the replica region at the start of
/// every group; over-marking backups of a sparse-super image only adds
/// bits, which the block side tolerates), and each group's bitmaps and
/// inode table.
fn overlay_metadata(layout: &ImageLayout<'_>, blocks: &mut Bitmap) -> Result<()> {
    let bs = u64::from(layout.block_size().get());

    blocks.set(0);

    let gdt_end = EXT2_GDT_OFFSET + u64::from(layout.groups_count()) * EXT2_GROUP_DESC_SIZE;
    let first = u32::try_from(EXT2_SUPERBLOCK_OFFSET / bs).unwrap_or(u32::MAX);
    let last = u32::try_from((gdt_end - 1) / bs).unwrap_or(u32::MAX);
    for block in first..=last {
        blocks.set(block);
    }

    let replica_span = 1 + layout.gdt_blocks();
    for g in 0..layout.groups_count() {
        let group = GroupNumber(g);
        let desc = layout.group_desc(group)?;

        blocks.set(desc.block_bitmap.0);
        blocks.set(desc.inode_bitmap.0);
        for offset in 0..layout.inode_table_blocks_per_group() {
            blocks.set(desc.inode_table.0.saturating_add(offset));
        }

        let start = group_first_block(group, layout.blocks_per_group()).0;
        for offset in 0..replica_span {
            blocks.set(start.saturating_add(offset));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2r_block::MemByteDevice;
    use e2r_types::EXT2_SUPER_MAGIC;

    fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
        buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// 64-block, 16-inode, single-group skeleton. Inode table at block 5.
    fn sweep_image() -> Vec<u8> {
        let mut img = vec![0_u8; 64 * 1024];
        put_u32(&mut img, 1024, 16);
        put_u32(&mut img, 1024 + 0x04, 64);
        put_u32(&mut img, 1024 + 0x14, 1);
        put_u32(&mut img, 1024 + 0x18, 0);
        put_u32(&mut img, 1024 + 0x20, 8192);
        put_u32(&mut img, 1024 + 0x28, 16);
        put_u16(&mut img, 1024 + 0x38, EXT2_SUPER_MAGIC);
        put_u32(&mut img, 2048, 3);
        put_u32(&mut img, 2048 + 4, 4);
        put_u32(&mut img, 2048 + 8, 5);
        img
    }

    fn put_inode(img: &mut [u8], ino: u32, mode: u16, links: u16, direct0: u32) {
        let base = 5 * 1024 + ((ino - 1) as usize) * 128;
        put_u16(img, base, mode);
        put_u16(img, base + 0x1A, links);
        put_u32(img, base + 0x28, direct0);
    }

    #[test]
    fn reserved_inodes_always_live() {
        let dev = MemByteDevice::from_vec(sweep_image());
        let layout = ImageLayout::open(&dev).unwrap();
        let (auth, stats) = build_authority(&layout).unwrap();

        for index in 0..11 {
            assert!(auth.inodes.is_set(index), "reserved inode bit {index}");
        }
        assert!(!auth.inodes.is_set(11));
        assert_eq!(stats.live_inodes, 0);
    }

    #[test]
    fn metadata_blocks_are_marked() {
        let dev = MemByteDevice::from_vec(sweep_image());
        let layout = ImageLayout::open(&dev).unwrap();
        let (auth, _) = build_authority(&layout).unwrap();

        // Boot padding, superblock, GDT, bitmaps, inode table (2 blocks).
        for block in [0, 1, 2, 3, 4, 5, 6] {
            assert!(auth.blocks.is_set(block), "metadata block {block}");
        }
        assert!(!auth.blocks.is_set(7));
    }

    #[test]
    fn directory_entries_resurrect_zero_link_inodes() {
        let mut img = sweep_image();
        // Root directory (inode 2) with one data block naming inode 13,
        // whose own link count is zeroed.
        put_inode(&mut img, 2, e2r_types::S_IFDIR | 0o755, 2, 21);
        put_inode(&mut img, 13, e2r_types::S_IFREG | 0o644, 0, 22);

        let dir = 21 * 1024;
        put_u32(&mut img, dir, 13); // entry inode
        put_u16(&mut img, dir + 4, 1024); // rec_len spans the block
        img[dir + 6] = 5;
        img[dir + 7] = 1;
        img[dir + 8..dir + 13].copy_from_slice(b"ghost");

        let dev = MemByteDevice::from_vec(img);
        let layout = ImageLayout::open(&dev).unwrap();
        let (auth, stats) = build_authority(&layout).unwrap();

        assert!(auth.inodes.is_set(12), "inode 13 resurrected by dirent");
        assert_eq!(stats.directory_entries_marked, 1);
        assert_eq!(stats.directory_blocks, 1);
        // The zero-link inode's data block stays invisible to the sweep.
        assert!(!auth.blocks.is_set(22));
        // The directory's own data block is marked.
        assert!(auth.blocks.is_set(21));
    }

    #[test]
    fn live_file_blocks_are_marked() {
        let mut img = sweep_image();
        put_inode(&mut img, 12, e2r_types::S_IFREG | 0o644, 1, 30);

        let dev = MemByteDevice::from_vec(img);
        let layout = ImageLayout::open(&dev).unwrap();
        let (auth, stats) = build_authority(&layout).unwrap();

        assert!(auth.inodes.is_set(11));
        assert!(auth.blocks.is_set(30));
        assert_eq!(stats.live_inodes, 1);
        assert_eq!(stats.walked_inodes, 1);
    }
}
