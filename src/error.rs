//! Error and warning types.
//!
//! There are two severities here. An [Error] stops the operation that raised it. A [Warning] is
//! recorded in [Diagnostics] and processing continues, since forensic dumps are routinely
//! truncated or damaged and we still want to get as much out of them as possible.

use std::fmt;

use thiserror::Error;

/// Which geometry parameter could not be determined
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum GeometryParam {
    PageSize,
    BlockSize,
}

impl fmt::Display for GeometryParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageSize => write!(f, "page size"),
            Self::BlockSize => write!(f, "block size"),
        }
    }
}

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum Error {
    /// Geometry was not supplied and could not be inferred from the image contents. The image
    /// cannot be interpreted without an explicit hint.
    #[error("{0} not specified, and cannot guess it: {1}")]
    GeometryUnknown(GeometryParam, &'static str),

    #[error("page size {page_size} plus OOB size {oob_size} is not a usable page stride")]
    GeometryOverflow { page_size: usize, oob_size: usize },

    #[error("partition {name:?} ({offset:#x}..={end:#x}) does not fit in image of {image_len:#x} bytes")]
    PartitionOutOfBounds {
        name: String,
        offset: usize,
        end: usize,
        image_len: usize,
    },

    #[error("partition {name:?} ends ({end:#x}) before it starts ({offset:#x})")]
    InvalidPartition {
        name: String,
        offset: usize,
        end: usize,
    },

    #[error("cannot parse {input:?}: {reason}")]
    Parse { input: String, reason: &'static str },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Non-fatal inconsistencies found while modeling an image
#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum Warning {
    #[error("invalid block_size (data_len: {data_len} not divisible by block_size {block_size})")]
    DataNotBlockAligned { data_len: usize, block_size: usize },

    #[error("invalid page_size (block_size: {block_size} not divisible by page_size {page_size})")]
    BlockNotPageAligned { block_size: usize, page_size: usize },

    #[error("partition {name:?} at {offset:#x} (len: {length}) is not aligned to erase block size {block_size}")]
    PartitionMisaligned {
        name: String,
        offset: usize,
        length: usize,
        block_size: usize,
    },

    #[error("partition {name:?} overlaps partition {other:?}")]
    OverlappingPartitions { name: String, other: String },

    #[error("EC header at {offset:#x} has a bad version or CRC; using its fields anyway")]
    CorruptEcHeader { offset: usize },

    #[error("image ends with a partial page of {len} bytes (expected {stride}-byte pages incl. OOB)")]
    TrailingPartialPage { len: usize, stride: usize },
}

/// An ordered record of every [Warning] raised, which is also forwarded to the `log` facade
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning
    pub fn warn(&mut self, warning: Warning) {
        log::warn!("[-] {warning}");
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[test]
fn test_diagnostics_order() {
    let mut diag = Diagnostics::new();
    assert!(diag.is_empty());

    diag.warn(Warning::CorruptEcHeader { offset: 0x800 });
    diag.warn(Warning::TrailingPartialPage { len: 3, stride: 2112 });

    assert!(!diag.is_empty());
    assert_eq!(
        diag.warnings(),
        [
            Warning::CorruptEcHeader { offset: 0x800 },
            Warning::TrailingPartialPage { len: 3, stride: 2112 },
        ]
    );
}

#[test]
fn test_geometry_error_message() {
    let err = Error::GeometryUnknown(GeometryParam::BlockSize, "no UBI EC headers found");
    assert_eq!(
        err.to_string(),
        "block size not specified, and cannot guess it: no UBI EC headers found"
    );
}
