//! Block-tree traversal.
//!
//! Enumerates every block an inode references: the 12 direct slots, then
//! the single/double/triple indirect trees. Indirect blocks themselves are
//! emitted before their contents. Recursion depth is bounded at 3 by
//! construction, so a looping pointer chain in a damaged image cannot
//! recurse unboundedly.
//!
//! Pointers at or past the image's block count are dropped: the image is
//! corrupt by assumption, so a wild pointer is a skip, not a fault. Each
//! skip is counted and logged at debug level.

use crate::layout::ImageLayout;
use e2r_error::Result;
use e2r_ondisk::Ext2Inode;
use e2r_types::BlockNumber;
use tracing::debug;

/// Callback invoked for every referenced block (data and indirect).
pub type BlockSink<'a> = dyn FnMut(BlockNumber) -> Result<()> + 'a;

/// Counters from one inode traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    /// Non-zero pointers dropped because they exceed the block count.
    pub skipped_pointers: u64,
}

/// Walk every block referenced by `inode`.
///
/// `on_block` fires for each in-range referenced block, including each
/// indirect block. When `is_dir` is set, `on_dir_block` additionally fires
/// for each leaf data block, in emission order after `on_block`.
pub fn walk_inode(
    layout: &ImageLayout<'_>,
    inode: &Ext2Inode,
    is_dir: bool,
    on_block: &mut BlockSink<'_>,
    on_dir_block: &mut BlockSink<'_>,
) -> Result<WalkStats> {
    let mut stats = WalkStats::default();

    for &slot in &inode.direct {
        if slot == 0 {
            continue;
        }
        if !in_range(layout, slot, &mut stats) {
            continue;
        }
        emit_leaf(BlockNumber(slot), is_dir, on_block, on_dir_block)?;
    }

    walk_indirect(
        layout,
        inode.single_indirect,
        1,
        is_dir,
        on_block,
        on_dir_block,
        &mut stats,
    )?;
    walk_indirect(
        layout,
        inode.double_indirect,
        2,
        is_dir,
        on_block,
        on_dir_block,
        &mut stats,
    )?;
    walk_indirect(
        layout,
        inode.triple_indirect,
        3,
        is_dir,
        on_block,
        on_dir_block,
        &mut stats,
    )?;

    Ok(stats)
}

fn emit_leaf(
    block: BlockNumber,
    is_dir: bool,
    on_block: &mut BlockSink<'_>,
    on_dir_block: &mut BlockSink<'_>,
) -> Result<()> {
    on_block(block)?;
    if is_dir {
        on_dir_block(block)?;
    }
    Ok(())
}

fn in_range(layout: &ImageLayout<'_>, block: u32, stats: &mut WalkStats) -> bool {
    if block < layout.block_count() {
        return true;
    }
    stats.skipped_pointers += 1;
    debug!(
        target: "e2r::walk",
        block,
        block_count = layout.block_count(),
        "skipped out-of-range block pointer"
    );
    false
}

fn walk_indirect(
    layout: &ImageLayout<'_>,
    pointer: u32,
    level: u8,
    is_dir: bool,
    on_block: &mut BlockSink<'_>,
    on_dir_block: &mut BlockSink<'_>,
    stats: &mut WalkStats,
) -> Result<()> {
    if pointer == 0 {
        return Ok(());
    }
    if !in_range(layout, pointer, stats) {
        return Ok(());
    }

    // The indirect block itself is a used block.
    on_block(BlockNumber(pointer))?;

    let buf = layout.read_block(BlockNumber(pointer))?;
    for chunk in buf.chunks_exact(4) {
        let entry = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if entry == 0 {
            continue;
        }
        if !in_range(layout, entry, stats) {
            continue;
        }
        if level == 1 {
            emit_leaf(BlockNumber(entry), is_dir, on_block, on_dir_block)?;
        } else {
            walk_indirect(
                layout,
                entry,
                level - 1,
                is_dir,
                on_block,
                on_dir_block,
                stats,
            )?;
        }
    }

    Ok(())
}
