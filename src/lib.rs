//! Modeling of raw NAND dumps for UBI/UBIFS forensics.
//!
//! A dump is loaded as an [Image]: the geometry (page and erase block size) is taken from hints
//! or guessed from the UBI headers inside, interleaved OOB is stripped, and the image is split
//! into named [Partition]s. [Image::full_partitions] gives a partition map with no gaps, which
//! the UBI and UBIFS layers walk.

pub mod error;
pub mod image;
pub mod nand;
pub mod signature;
pub mod ubi;
pub mod util;

pub use error::{Diagnostics, Error, GeometryParam, Result, Warning};
pub use image::{Image, MappedPartition, Partition, PartitionEntry, PartitionKind, UNALLOCATED};
pub use nand::{Geometry, GeometryHints};
pub use signature::{find_signature, find_signatures};
