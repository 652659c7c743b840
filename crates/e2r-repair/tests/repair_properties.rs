//! Cross-cutting properties of the repair pipeline: idempotence,
//! exactness of the inode side, monotonicity of the block side, and
//! non-destructiveness of everything that is not a bitmap.

mod common;

use common::{
    BLOCK_COUNT, BLOCK_SIZE, ImageBuilder, INODE_TABLE_BLOCK, INODE_TABLE_BLOCKS, ROOT_DIR_BLOCK,
    block_bitmap_bit, inode_bitmap_bit, reg_mode,
};
use e2r_block::{ByteDevice, MemByteDevice};
use e2r_repair::{ImageLayout, build_authority, run_repair};

/// A populated image with a little of everything: a root directory, a
/// small file, a 13-block file through a single-indirect, a ghost inode
/// named in the root with a zeroed link count, and a spurious bit on each
/// bitmap side.
fn populated_image() -> Vec<u8> {
    let mut builder = ImageBuilder::formatted().with_root();
    builder.add_root_entry("hello", 12, 1);
    builder.set_inode(12, reg_mode(), 1, 2, &[22], 0);
    builder.write_block(22, b"hi");

    let direct: Vec<u32> = (23..35).collect();
    builder.add_root_entry("bigfile", 13, 1);
    builder.set_inode(13, reg_mode(), 1, 13 * 1024, &direct, 35);
    builder.set_indirect_pointer(35, 0, 36);

    builder.add_root_entry("ghost", 14, 1);
    builder.set_inode(14, reg_mode(), 0, 2, &[40], 0);

    builder.set_inode_bitmap_bit(120);
    builder.set_block_bitmap_bit(BLOCK_COUNT - 1);
    builder.build()
}

fn run_once(img: Vec<u8>) -> Vec<u8> {
    let dev = MemByteDevice::from_vec(img);
    run_repair(&dev).expect("repair run");
    dev.snapshot()
}

#[test]
fn repair_is_idempotent() {
    let once = run_once(populated_image());
    let twice = run_once(once.clone());
    assert_eq!(once, twice, "second run must be a byte-for-byte no-op");
}

#[test]
fn inode_bitmap_matches_post_run_authority() {
    let out = run_once(populated_image());

    let dev = MemByteDevice::from_vec(out.clone());
    let layout = ImageLayout::open(&dev).expect("layout");
    let (authority, _) = build_authority(&layout).expect("authority");

    for n in 0..128 {
        assert_eq!(
            inode_bitmap_bit(&out, n),
            authority.inodes.is_set(n),
            "inode bitmap exactness at index {n}"
        );
    }
}

#[test]
fn block_bitmap_is_superset_of_post_run_authority() {
    let out = run_once(populated_image());

    let dev = MemByteDevice::from_vec(out.clone());
    let layout = ImageLayout::open(&dev).expect("layout");
    let (authority, _) = build_authority(&layout).expect("authority");

    for b in 0..BLOCK_COUNT {
        if authority.blocks.is_set(b) {
            assert!(
                block_bitmap_bit(&out, b),
                "authority block {b} missing from on-disk bitmap"
            );
        }
    }
}

#[test]
fn repair_never_touches_inode_table_or_data() {
    let img = populated_image();
    let before = img.clone();
    let out = run_once(img);

    // Inode table.
    let table_start = INODE_TABLE_BLOCK as usize * BLOCK_SIZE;
    let table_end = table_start + INODE_TABLE_BLOCKS as usize * BLOCK_SIZE;
    assert_eq!(
        &out[table_start..table_end],
        &before[table_start..table_end],
        "inode table must not change"
    );

    // Every referenced data block, the indirect block included.
    for block in [ROOT_DIR_BLOCK, 22, 23, 35, 36, 40] {
        let start = block as usize * BLOCK_SIZE;
        assert_eq!(
            &out[start..start + BLOCK_SIZE],
            &before[start..start + BLOCK_SIZE],
            "data block {block} must not change"
        );
    }

    // Superblock and group descriptor table.
    assert_eq!(&out[1024..3072], &before[1024..3072]);
}

#[test]
fn reserved_inodes_marked_on_any_image() {
    for img in [ImageBuilder::formatted().build(), populated_image()] {
        let out = run_once(img);
        for index in 0..11 {
            assert!(inode_bitmap_bit(&out, index), "reserved bit {index}");
        }
    }
}

#[test]
fn file_backed_device_round_trip() {
    use std::io::Write;

    let img = populated_image();
    let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
    tmp.write_all(&img).expect("write image");
    tmp.flush().expect("flush");

    let dev = e2r_block::FileByteDevice::open(tmp.path()).expect("open");
    let report = run_repair(&dev).expect("repair run");
    assert!(report.inode_bits_set > 0);
    assert!(dev.stats().writes > 0);

    let repaired = std::fs::read(tmp.path()).expect("read back");
    assert!(inode_bitmap_bit(&repaired, 11), "inode 12 marked");
    assert!(block_bitmap_bit(&repaired, 22), "data block marked");
}
