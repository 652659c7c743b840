#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::Parser;
use clap::error::ErrorKind;
use e2r_block::{ByteDevice, FileByteDevice};
use e2r_ondisk::Ext2Superblock;
use e2r_repair::{ImageLayout, RepairReport, list_tree, run_repair_on_layout};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "e2rescue",
    about = "Rebuild the inode and block allocation bitmaps of an ext2 image in place"
)]
struct Cli {
    /// Path to the ext2 filesystem image (modified in place).
    image: PathBuf,

    /// Opaque data identifier octets (decimal, at least one).
    #[arg(required = true)]
    identifier: Vec<String>,

    /// Suppress the superblock dump printed before any mutation.
    #[arg(long)]
    batch: bool,

    /// Emit the repair report as JSON instead of the human summary.
    #[arg(long)]
    json: bool,

    /// Print the directory tree after reconciliation.
    #[arg(long)]
    tree: bool,
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    // Missing arguments print usage on the error stream and exit 1;
    // --help/--version keep clap's normal success path.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            if matches!(
                error.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) {
                let _ = error.print();
                std::process::exit(0);
            }
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run(cli) {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let identifier = parse_identifier(&cli.identifier)?;
    debug!(
        target: "e2r::cli",
        octets = identifier.len(),
        "parsed data identifier"
    );

    let dev = FileByteDevice::open(&cli.image)
        .with_context(|| format!("failed to open image {}", cli.image.display()))?;
    let layout = ImageLayout::open(&dev)
        .with_context(|| format!("failed to decode ext2 layout of {}", cli.image.display()))?;

    if !cli.batch {
        print_superblock(layout.superblock(), &layout);
    }

    let report = run_repair_on_layout(&layout).context("bitmap repair failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize report")?
        );
    } else {
        print_report(&report);
    }

    if cli.tree {
        print_tree(&layout)?;
    }

    let stats = dev.stats();
    debug!(
        target: "e2r::cli",
        reads = stats.reads,
        writes = stats.writes,
        bytes_read = stats.bytes_read,
        bytes_written = stats.bytes_written,
        "device I/O totals"
    );

    Ok(())
}

/// Parse the trailing identifier arguments into an opaque byte string.
/// The repair core does not consume it; it is part of the invocation
/// contract and is validated here.
fn parse_identifier(args: &[String]) -> Result<Vec<u8>> {
    let mut octets = Vec::with_capacity(args.len());
    for arg in args {
        let Ok(octet) = arg.parse::<u8>() else {
            bail!("invalid data identifier octet: {arg:?} (expected 0-255)");
        };
        octets.push(octet);
    }
    Ok(octets)
}

fn print_superblock(sb: &Ext2Superblock, layout: &ImageLayout<'_>) {
    println!("ext2 superblock");
    println!("  inodes:            {}", sb.inodes_count);
    println!("  blocks:            {}", sb.blocks_count);
    println!("  reserved blocks:   {}", sb.reserved_blocks_count);
    println!("  free blocks:       {}", sb.free_blocks_count);
    println!("  free inodes:       {}", sb.free_inodes_count);
    println!("  first data block:  {}", sb.first_data_block);
    println!("  block size:        {}", layout.block_size());
    println!("  blocks per group:  {}", sb.blocks_per_group);
    println!("  inodes per group:  {}", sb.inodes_per_group);
    println!("  block groups:      {}", layout.groups_count());
    println!("  revision:          {}.{}", sb.rev_level, sb.minor_rev_level);
    println!(
        "  state:             {}",
        if sb.state & 1 == 1 { "clean" } else { "dirty" }
    );
    println!();
}

fn print_report(report: &RepairReport) {
    println!("reconciliation complete");
    println!("  groups:              {}", report.groups);
    println!("  live inodes:         {}", report.live_inodes);
    println!("  inode bits set:      {}", report.inode_bits_set);
    println!("  inode bits cleared:  {}", report.inode_bits_cleared);
    println!("  block bits set:      {}", report.block_bits_set);
    if report.skipped_pointers > 0 {
        println!("  skipped pointers:    {}", report.skipped_pointers);
    }
    if report.truncated_dir_blocks > 0 {
        println!("  truncated dirs:      {}", report.truncated_dir_blocks);
    }
    if report.is_clean() {
        println!("  bitmaps were already consistent");
    }
}

fn print_tree(layout: &ImageLayout<'_>) -> Result<()> {
    let entries = list_tree(layout).context("directory tree listing failed")?;
    println!("/");
    for entry in entries {
        let indent = "  ".repeat(entry.depth + 1);
        let suffix = if entry.is_dir { "/" } else { "" };
        println!("{indent}{}{suffix}", entry.name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_parses_octets() {
        let args: Vec<String> = ["0", "17", "255"].iter().map(|s| (*s).to_owned()).collect();
        assert_eq!(parse_identifier(&args).unwrap(), vec![0, 17, 255]);
    }

    #[test]
    fn identifier_rejects_non_octets() {
        let args = vec!["256".to_owned()];
        assert!(parse_identifier(&args).is_err());
        let args = vec!["abc".to_owned()];
        assert!(parse_identifier(&args).is_err());
    }

    #[test]
    fn cli_requires_image_and_identifier() {
        assert!(Cli::try_parse_from(["e2rescue"]).is_err());
        assert!(Cli::try_parse_from(["e2rescue", "disk.img"]).is_err());
        assert!(Cli::try_parse_from(["e2rescue", "disk.img", "7"]).is_ok());
        assert!(Cli::try_parse_from(["e2rescue", "disk.img", "7", "42", "--batch"]).is_ok());
    }
}
