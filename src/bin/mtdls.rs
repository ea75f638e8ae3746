//! List the partition map of a raw NAND dump, in the manner of `mmls`.
//!
//! Geometry that isn't given on the command line is guessed from the UBI headers in the dump.
//! Space not covered by a declared partition is listed as "Unallocated".

use anyhow::{Context, Result};
use clap::Parser;

use std::fs;
use std::path::PathBuf;

use ubift::util::{parse_int, readable_size};
use ubift::{GeometryHints, Image, PartitionEntry};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// The raw NAND dump to inspect
    image: PathBuf,

    /// Geometry as BLOCKxPAGE or BLOCKxPAGExOOB (e.g. 128Kx2Kx64); 0 means "guess"
    #[clap(long)]
    geometry: Option<GeometryHints>,

    /// Erase block size, excluding OOB
    #[clap(long, value_parser = parse_int)]
    block_size: Option<usize>,

    /// Page size, excluding OOB
    #[clap(long, value_parser = parse_int)]
    page_size: Option<usize>,

    /// Size of the OOB area following every page in the dump
    #[clap(long, value_parser = parse_int)]
    oob_size: Option<usize>,

    /// A declared partition, as NAME:START:END (inclusive byte offsets); may be repeated
    #[clap(short, long = "partition")]
    partitions: Vec<PartitionEntry>,

    /// Print partition bounds in bytes rather than erase blocks
    #[clap(long)]
    bytes: bool,

    /// Increase logging verbosity (-v, -vv)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Combine `--geometry` with the individual overrides
    fn hints(&self) -> GeometryHints {
        let hints = self.geometry.unwrap_or_default();
        GeometryHints {
            block_size: self.block_size.or(hints.block_size),
            page_size: self.page_size.or(hints.page_size),
            oob_size: self.oob_size.or(hints.oob_size),
        }
    }
}

/// The log filter used when `RUST_LOG` isn't set
fn default_log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn render(image: &mut Image, in_bytes: bool) {
    let block_size = image.block_size();

    println!("MTD Image\n");
    println!("Size: {}", readable_size(image.len()));
    println!("Erase Block Size: {}", readable_size(block_size));
    println!("Page Size: {}", readable_size(image.page_size()));
    match image.oob_size() {
        Some(oob_size) => println!("OOB Size: {}\n", readable_size(oob_size)),
        None => println!("OOB Size: -\n"),
    }

    println!("Physical Erase Blocks: {}", image.peb_count());
    println!("Pages per Erase Block: {}\n", image.geometry().pages_per_block());

    let unit = if in_bytes { 1 } else { block_size };
    if in_bytes {
        println!("Units are in bytes");
    } else {
        println!("Units are in {}-Erase Blocks", readable_size(block_size));
    }

    println!("     {:>10}  {:>10}  {:>10}  Description", "Start", "End", "Length");
    for (i, partition) in image.full_partitions().iter().enumerate() {
        println!(
            "{i:03}: {:010}  {:010}  {:010}  {}",
            partition.offset() / unit,
            partition.end() / unit,
            partition.length() / unit,
            partition.name(),
        );
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // RUST_LOG, when set, wins over -v
    let filter = default_log_filter(args.verbose);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
    howudoin::init(howudoin::consumers::TermLine::default());

    let data = fs::read(&args.image)
        .with_context(|| format!("could not read {}", args.image.display()))?;

    let mut image: Image = Image::new(data, args.hints())
        .context("could not determine the geometry; try --geometry")?;
    image
        .set_partitions(args.partitions.iter().cloned())
        .context("invalid partition table")?;

    render(&mut image, args.bytes);

    let warnings = image.diagnostics().len();
    if warnings > 0 {
        eprintln!("\n[-] {warnings} warning(s) raised while reading this image");
    }

    Ok(())
}

#[test]
fn test_default_log_filter() {
    assert_eq!(default_log_filter(0), "warn");
    assert_eq!(default_log_filter(1), "info");
    assert_eq!(default_log_filter(2), "debug");
    assert_eq!(default_log_filter(5), "debug");
}
