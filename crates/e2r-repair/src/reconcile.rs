//! On-disk bitmap reconciliation.
//!
//! Walks the block groups in ascending order and patches each group's
//! bitmaps to agree with the authority. The two sides follow different
//! policies:
//!
//! - **inode bitmap**: forced to equal the authority exactly; bits are
//!   set and cleared, because link counts plus directory entries fully
//!   determine inode liveness;
//! - **block bitmap**: only gains bits. The authority cannot prove a block
//!   free, so a set bit on disk is never cleared.
//!
//! Scratch buffers cover the full `ceil(n / 8)` bytes, so trailing bits of
//! a group whose count is not a byte multiple survive the write-back.

use crate::authority::AuthorityBitmaps;
use crate::bitmap::{clear_bit, get_bit, set_bit};
use crate::layout::ImageLayout;
use e2r_error::Result;
use e2r_types::{BlockNumber, GroupNumber, bitmap_len};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Corrections applied by one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Block groups visited.
    pub groups: u32,
    /// Inode bits turned on.
    pub inode_bits_set: u64,
    /// Inode bits turned off.
    pub inode_bits_cleared: u64,
    /// Block bits turned on (block bits are never turned off).
    pub block_bits_set: u64,
}

impl ReconcileReport {
    /// True when the on-disk bitmaps already agreed with the authority.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.inode_bits_set == 0 && self.inode_bits_cleared == 0 && self.block_bits_set == 0
    }
}

/// Patch every group's bitmaps to agree with `authority`.
///
/// Groups are processed in ascending order; within a group the inode
/// bitmap is reconciled before the block bitmap. Each bitmap is read,
/// patched in memory, and written back to the same offset, so an
/// interrupted run leaves independently-valid groups and a rerun
/// converges.
pub fn reconcile(
    layout: &ImageLayout<'_>,
    authority: &AuthorityBitmaps,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    for g in 0..layout.groups_count() {
        let group = GroupNumber(g);
        let desc = layout.group_desc(group)?;

        reconcile_inode_bitmap(layout, authority, group, desc.inode_bitmap, &mut report)?;
        reconcile_block_bitmap(layout, authority, group, desc.block_bitmap, &mut report)?;
        report.groups += 1;
    }

    info!(
        target: "e2r::reconcile",
        groups = report.groups,
        inode_bits_set = report.inode_bits_set,
        inode_bits_cleared = report.inode_bits_cleared,
        block_bits_set = report.block_bits_set,
        "reconciliation complete"
    );

    Ok(report)
}

fn reconcile_inode_bitmap(
    layout: &ImageLayout<'_>,
    authority: &AuthorityBitmaps,
    group: GroupNumber,
    bitmap_block: BlockNumber,
    report: &mut ReconcileReport,
) -> Result<()> {
    let offset = layout.block_size().block_to_byte(bitmap_block);
    let mut scratch = vec![0_u8; bitmap_len(layout.inodes_per_group())];
    layout.device().read_exact_at(offset, &mut scratch)?;

    let mut dirty = false;
    for k in 0..layout.inodes_per_group() {
        let Some(n) = group
            .0
            .checked_mul(layout.inodes_per_group())
            .and_then(|base| base.checked_add(k))
        else {
            break;
        };
        // Global inode number n + 1 must exist.
        if n >= layout.inode_count() {
            break;
        }

        let want = authority.inodes.is_set(n);
        let have = get_bit(&scratch, k);
        if want == have {
            continue;
        }

        if want {
            set_bit(&mut scratch, k);
            report.inode_bits_set += 1;
        } else {
            clear_bit(&mut scratch, k);
            report.inode_bits_cleared += 1;
        }
        dirty = true;
        debug!(
            target: "e2r::reconcile",
            group = group.0,
            inode = n + 1,
            set = want,
            "inode bitmap correction"
        );
    }

    if dirty {
        layout.device().write_all_at(offset, &scratch)?;
    }
    Ok(())
}

fn reconcile_block_bitmap(
    layout: &ImageLayout<'_>,
    authority: &AuthorityBitmaps,
    group: GroupNumber,
    bitmap_block: BlockNumber,
    report: &mut ReconcileReport,
) -> Result<()> {
    let offset = layout.block_size().block_to_byte(bitmap_block);
    let mut scratch = vec![0_u8; bitmap_len(layout.blocks_per_group())];
    layout.device().read_exact_at(offset, &mut scratch)?;

    let mut dirty = false;
    for k in 0..layout.blocks_per_group() {
        let Some(b) = group
            .0
            .checked_mul(layout.blocks_per_group())
            .and_then(|base| base.checked_add(k))
        else {
            break;
        };
        if b >= layout.block_count() {
            break;
        }

        // Monotone: the authority is a lower bound on usage, so a set bit
        // on disk is never cleared.
        if authority.blocks.is_set(b) && !get_bit(&scratch, k) {
            set_bit(&mut scratch, k);
            report.block_bits_set += 1;
            dirty = true;
            debug!(
                target: "e2r::reconcile",
                group = group.0,
                block = b,
                "block bitmap correction"
            );
        }
    }

    if dirty {
        layout.device().write_all_at(offset, &scratch)?;
    }
    Ok(())
}
