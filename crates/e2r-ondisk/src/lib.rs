#![forbid(unsafe_code)]
//! On-disk format parsing for ext2 structures.
//!
//! Pure parsing crate: no I/O, no side effects. Parses byte slices into
//! typed Rust structures representing the ext2 superblock, group
//! descriptors, inodes, and directory entries.

mod ext2;

pub use ext2::{
    DirBlock, Ext2DirEntry, Ext2GroupDesc, Ext2Inode, Ext2Superblock, parse_dir_block,
};
