//! Post-repair directory tree listing.
//!
//! Read-only walk of the directory graph from the root inode, reusing the
//! block-tree walker and the directory decode. Entries whose inode cannot
//! be read are skipped with a debug log; a visited set guards against
//! cyclic `..`-style references in a damaged image.

use crate::layout::ImageLayout;
use crate::walk::walk_inode;
use e2r_error::{E2rError, Result};
use e2r_ondisk::parse_dir_block;
use e2r_types::{BlockNumber, InodeNumber};
use std::collections::BTreeSet;
use tracing::debug;

/// One name in the listing, depth-first order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Nesting depth below the root (root children are depth 0).
    pub depth: usize,
    pub name: String,
    pub inode: InodeNumber,
    pub is_dir: bool,
}

/// List the directory tree rooted at inode 2, depth-first.
pub fn list_tree(layout: &ImageLayout<'_>) -> Result<Vec<TreeEntry>> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    visit_dir(layout, InodeNumber::ROOT, 0, &mut visited, &mut out)?;
    Ok(out)
}

fn visit_dir(
    layout: &ImageLayout<'_>,
    dir: InodeNumber,
    depth: usize,
    visited: &mut BTreeSet<u32>,
    out: &mut Vec<TreeEntry>,
) -> Result<()> {
    if !visited.insert(dir.0) {
        return Ok(());
    }

    let inode = layout.read_inode(dir)?;
    if !inode.is_live() || !inode.is_dir() {
        return Ok(());
    }

    let mut dir_blocks: Vec<BlockNumber> = Vec::new();
    walk_inode(layout, &inode, true, &mut |_| Ok(()), &mut |block| {
        dir_blocks.push(block);
        Ok(())
    })?;

    for block in dir_blocks {
        let buf = layout.read_block(block)?;
        for entry in parse_dir_block(&buf).entries {
            if entry.is_dot_or_dotdot() {
                continue;
            }

            let child = match layout.read_inode(entry.inode) {
                Ok(child) => child,
                Err(err @ E2rError::Io { .. }) => return Err(err),
                Err(err) => {
                    debug!(
                        target: "e2r::tree",
                        inode = entry.inode.0,
                        name = %entry.name_str(),
                        error = %err,
                        "skipping unreadable directory entry"
                    );
                    continue;
                }
            };

            let is_dir = child.is_live() && child.is_dir();
            out.push(TreeEntry {
                depth,
                name: entry.name_str(),
                inode: entry.inode,
                is_dir,
            });
            if is_dir {
                visit_dir(layout, entry.inode, depth + 1, visited, out)?;
            }
        }
    }

    Ok(())
}
