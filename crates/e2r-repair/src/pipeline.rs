//! End-to-end repair pipeline.
//!
//! A straight-line run: decode and validate the layout, build the
//! authority, reconcile every group, sync. Three terminal states: success,
//! corrupt superblock (nothing written), or a fatal I/O error (partial
//! writes possible; the run is a pure function of the image's read-only
//! regions, so a rerun converges).

use crate::authority::build_authority;
use crate::layout::ImageLayout;
use crate::reconcile::reconcile;
use e2r_block::ByteDevice;
use e2r_error::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Summary of one repair run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    // ── Geometry ─────────────────────────────────────────────────────────
    pub block_size: u32,
    pub groups: u32,
    pub inode_count: u32,
    pub block_count: u32,

    // ── Authority sweep ──────────────────────────────────────────────────
    pub live_inodes: u32,
    pub walked_inodes: u32,
    pub directory_entries_marked: u64,
    pub truncated_dir_blocks: u64,
    pub skipped_pointers: u64,

    // ── Corrections ──────────────────────────────────────────────────────
    pub inode_bits_set: u64,
    pub inode_bits_cleared: u64,
    pub block_bits_set: u64,
}

impl RepairReport {
    /// True when the image's bitmaps already agreed with the authority.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.inode_bits_set == 0 && self.inode_bits_cleared == 0 && self.block_bits_set == 0
    }
}

/// Run the full repair against an already-decoded layout.
pub fn run_repair_on_layout(layout: &ImageLayout<'_>) -> Result<RepairReport> {
    info!(
        target: "e2r::pipeline",
        block_size = layout.block_size().get(),
        groups = layout.groups_count(),
        inodes = layout.inode_count(),
        blocks = layout.block_count(),
        "starting bitmap repair"
    );

    let (authority, sweep) = build_authority(layout)?;
    let corrections = reconcile(layout, &authority)?;
    layout.device().sync()?;

    Ok(RepairReport {
        block_size: layout.block_size().get(),
        groups: layout.groups_count(),
        inode_count: layout.inode_count(),
        block_count: layout.block_count(),

        live_inodes: sweep.live_inodes,
        walked_inodes: sweep.walked_inodes,
        directory_entries_marked: sweep.directory_entries_marked,
        truncated_dir_blocks: sweep.truncated_dir_blocks,
        skipped_pointers: sweep.skipped_pointers,

        inode_bits_set: corrections.inode_bits_set,
        inode_bits_cleared: corrections.inode_bits_cleared,
        block_bits_set: corrections.block_bits_set,
    })
}

/// Decode the image and run the full repair.
pub fn run_repair(dev: &dyn ByteDevice) -> Result<RepairReport> {
    let layout = ImageLayout::open(dev)?;
    run_repair_on_layout(&layout)
}
