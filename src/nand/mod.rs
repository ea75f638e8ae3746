//! NAND geometry and out-of-band handling for raw dumps.
//!
//! A raw dump taken from the chip (rather than through MTD) usually has the OOB area of every page
//! interleaved with the data:
//!
//! ```text
//! | page 0 data | oob 0 | page 1 data | oob 1 | ... |
//! ```
//!
//! UBI offsets only make sense once the OOB bytes are gone, so [strip_oob] must run before
//! anything looks for headers.

use std::str::FromStr;

use crate::error::{Diagnostics, Error, Warning};
use crate::util::parse_int;

pub mod infer;
pub mod sim;

/// How many pages are stripped between progress updates
const STRIP_CHUNK_PAGES: usize = 4096;

/// The resolved geometry of an image
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct Geometry {
    /// Bytes per erase block, excluding OOB
    pub block_size: usize,

    /// Bytes per page, excluding OOB
    pub page_size: usize,

    /// Bytes of OOB following every page in the dump, or `None` if the dump carries no OOB
    pub oob_size: Option<usize>,
}

impl Geometry {
    pub fn pages_per_block(&self) -> usize {
        self.block_size / self.page_size.max(1)
    }
}

/// Geometry as the user knows it. Any of the fields may be unknown (`None`); for the block and
/// page size, `Some(0)` also means unknown.
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone)]
pub struct GeometryHints {
    pub block_size: Option<usize>,
    pub page_size: Option<usize>,
    pub oob_size: Option<usize>,
}

impl GeometryHints {
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn oob_size(mut self, oob_size: usize) -> Self {
        self.oob_size = Some(oob_size);
        self
    }

    pub(crate) fn known_block_size(&self) -> Option<usize> {
        self.block_size.filter(|&x| x > 0)
    }

    pub(crate) fn known_page_size(&self) -> Option<usize> {
        self.page_size.filter(|&x| x > 0)
    }
}

/// Parse strings like "BLOCKxPAGE" or "BLOCKxPAGExOOB", where a 0 means "unknown"
///
/// Sizes are decimal, optionally with a `K`/`M`/`G` suffix; hex would be ambiguous here.
impl FromStr for GeometryHints {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let fields = s
            .split(['x', 'X'])
            .map(parse_int)
            .collect::<Result<Vec<_>, _>>()?;

        let unknown_if_zero = |x: usize| Some(x).filter(|&x| x > 0);
        match fields[..] {
            [block_size, page_size] => Ok(Self {
                block_size: unknown_if_zero(block_size),
                page_size: unknown_if_zero(page_size),
                oob_size: None,
            }),
            [block_size, page_size, oob_size] => Ok(Self {
                block_size: unknown_if_zero(block_size),
                page_size: unknown_if_zero(page_size),
                oob_size: Some(oob_size),
            }),
            _ => Err(Error::Parse {
                input: s.to_string(),
                reason: "expected BLOCKxPAGE or BLOCKxPAGExOOB",
            }),
        }
    }
}

/// Strip the OOB area following every page out of a raw dump.
///
/// The dump is walked in physical pages of `page_size + oob_size` bytes, and only the first
/// `page_size` bytes of each are kept. With an `oob_size` of 0, this returns the data unchanged.
/// A physical page too large to address is longer than any dump, so all of `data` is then one
/// trailing partial page.
pub fn strip_oob(
    data: &[u8],
    page_size: usize,
    oob_size: usize,
    diag: &mut Diagnostics,
) -> Vec<u8> {
    let stride = page_size.saturating_add(oob_size);
    if oob_size == 0 {
        return data.to_vec();
    }

    log::info!("[!] Stripping OOB with size {oob_size} from every page.");

    let chunk_len = stride.saturating_mul(STRIP_CHUNK_PAGES);
    let rpt = howudoin::new()
        .label("Stripping OOB")
        .set_len(data.len().div_ceil(chunk_len) as u64);

    let mut stripped = Vec::with_capacity(data.len());
    for chunk in data.chunks(chunk_len) {
        for page in chunk.chunks(stride) {
            stripped.extend_from_slice(&page[..page.len().min(page_size)]);
        }
        rpt.inc();
    }
    rpt.close();

    let trailing = data.len() % stride;
    if trailing != 0 {
        diag.warn(Warning::TrailingPartialPage {
            len: trailing,
            stride,
        });
    }

    stripped
}

#[test]
fn test_geometry_hints_from_str() -> anyhow::Result<()> {
    assert_eq!(
        "131072x2048".parse::<GeometryHints>()?,
        GeometryHints::default().block_size(0x20000).page_size(2048)
    );
    assert_eq!(
        "128Kx2Kx64".parse::<GeometryHints>()?,
        GeometryHints::default()
            .block_size(128 * 1024)
            .page_size(2048)
            .oob_size(64)
    );
    assert_eq!(
        "0x2048x0".parse::<GeometryHints>()?,
        GeometryHints::default().page_size(2048).oob_size(0)
    );

    assert!("2048".parse::<GeometryHints>().is_err());
    assert!("1x2x3x4".parse::<GeometryHints>().is_err());
    assert!("axb".parse::<GeometryHints>().is_err());

    Ok(())
}

#[test]
fn test_strip_oob_idempotent() {
    let data: Vec<u8> = (0..8 * 528u32).map(|i| (i * 7) as u8).collect();

    let mut diag = Diagnostics::new();
    assert_eq!(strip_oob(&data, 512, 0, &mut diag), data);

    let once = strip_oob(&data, 512, 16, &mut diag);
    let twice = strip_oob(&once, 512, 0, &mut diag);
    assert_eq!(once, twice);
    assert!(diag.is_empty());
}

#[test]
fn test_strip_oob_large_page() {
    // The common 2048+64 layout
    let mut data = Vec::new();
    for page in 0..8u8 {
        data.extend(std::iter::repeat(page).take(2048));
        data.extend(std::iter::repeat(0xA5).take(64));
    }

    let mut diag = Diagnostics::new();
    let stripped = strip_oob(&data, 2048, 64, &mut diag);

    assert_eq!(stripped.len(), 8 * 2048);
    for (page, bytes) in stripped.chunks(2048).enumerate() {
        assert!(bytes.iter().all(|&x| x == page as u8));
    }
    assert!(diag.is_empty());
}

#[test]
fn test_strip_oob_other_geometry() {
    // 512+16 pages: a fixed 2112-byte stride would mangle this
    let mut data = Vec::new();
    for page in 0..12u8 {
        data.extend(std::iter::repeat(page).take(512));
        data.extend(std::iter::repeat(0xA5).take(16));
    }

    let mut diag = Diagnostics::new();
    let stripped = strip_oob(&data, 512, 16, &mut diag);

    assert_eq!(stripped.len(), 12 * 512);
    assert!(!stripped.contains(&0xA5));
    for (page, bytes) in stripped.chunks(512).enumerate() {
        assert!(bytes.iter().all(|&x| x == page as u8));
    }
}

#[test]
fn test_strip_oob_trailing_partial() {
    let mut data = vec![0x11u8; 2 * (256 + 8)];
    data.extend([0x22u8; 100]);

    let mut diag = Diagnostics::new();
    let stripped = strip_oob(&data, 256, 8, &mut diag);

    assert_eq!(stripped.len(), 2 * 256 + 100);
    assert_eq!(
        diag.warnings(),
        [Warning::TrailingPartialPage {
            len: 100,
            stride: 264
        }]
    );
}

#[test]
fn test_strip_oob_huge_page() {
    let data = vec![0x5Au8; 4096];

    let mut diag = Diagnostics::new();
    let stripped = strip_oob(&data, usize::MAX, 64, &mut diag);

    assert_eq!(stripped, data);
    assert_eq!(
        diag.warnings(),
        [Warning::TrailingPartialPage {
            len: 4096,
            stride: usize::MAX
        }]
    );
}
