//! MTD partitions within an [Image](super::Image).

use std::ops::Deref;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::Error;
use crate::util::parse_int;

/// Name given to synthesized partitions covering space no declared partition claims
pub const UNALLOCATED: &str = "Unallocated";

/// A partition as declared by a partition table, before it is placed in an image
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct PartitionEntry {
    pub name: String,

    /// First byte of the partition
    pub offset: usize,

    /// Last byte of the partition (inclusive)
    pub end: usize,
}

impl PartitionEntry {
    pub fn new(name: impl Into<String>, offset: usize, end: usize) -> Self {
        Self {
            name: name.into(),
            offset,
            end,
        }
    }
}

/// Parse strings like "NAME:START:END", with START and END as inclusive byte offsets
impl FromStr for PartitionEntry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        // Split from the right, so that names may contain colons
        let mut fields = s.rsplitn(3, ':');
        let (Some(end), Some(offset), Some(name)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(Error::Parse {
                input: s.to_string(),
                reason: "expected NAME:START:END",
            });
        };

        Ok(Self::new(name, parse_int(offset)?, parse_int(end)?))
    }
}

/// Where a [Partition] came from
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum PartitionKind {
    /// Supplied by a partition table
    Declared,

    /// Synthesized to fill a gap in the partition table
    Unallocated,
}

/// A contiguous, named byte range of an image, i.e. an MTD partition.
///
/// `U` is whatever the UBI scanner wants to attach once it has looked at the partition; this
/// crate only stores it.
#[derive(Debug, Clone)]
pub struct Partition<U = ()> {
    data: Bytes,
    offset: usize,
    end: usize,
    name: String,
    kind: PartitionKind,
    block_size: usize,
    ubi_instance: Option<U>,
}

impl<U> Partition<U> {
    /// Carve a partition out of `image_data`. Bounds must already have been checked.
    pub(super) fn new(
        image_data: &Bytes,
        block_size: usize,
        offset: usize,
        end: usize,
        name: String,
        kind: PartitionKind,
    ) -> Self {
        let partition = Self {
            data: image_data.slice(offset..=end),
            offset,
            end,
            name,
            kind,
            block_size,
            ubi_instance: None,
        };

        log::debug!(
            "[!] Initialized Partition {:?} {} to {} (len: {}, blocks: {})",
            partition.name,
            partition.offset,
            partition.end,
            partition.length(),
            partition.peb_count(),
        );

        partition
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The last byte of this partition (inclusive)
    pub fn end(&self) -> usize {
        self.end
    }

    /// Size in bytes
    pub fn length(&self) -> usize {
        self.end - self.offset + 1
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PartitionKind {
        self.kind
    }

    pub fn is_unallocated(&self) -> bool {
        self.kind == PartitionKind::Unallocated
    }

    /// The contents of this partition. This is a view into the image's buffer, not a copy.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Whether both ends of this partition fall on erase block boundaries
    pub fn is_block_aligned(&self) -> bool {
        self.block_size != 0
            && self.offset % self.block_size == 0
            && self.length() % self.block_size == 0
    }

    /// Index of the PEB (within the whole image) that this partition starts in
    pub fn first_peb(&self) -> usize {
        self.offset.checked_div(self.block_size).unwrap_or(0)
    }

    /// Number of whole PEBs in this partition
    pub fn peb_count(&self) -> usize {
        self.length().checked_div(self.block_size).unwrap_or(0)
    }

    /// The contents of the `index`th PEB of this partition, if it is a whole PEB
    pub fn peb(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(self.block_size)?;
        self.data.get(start..start.checked_add(self.block_size)?)
    }

    /// Iterate over every whole PEB in this partition
    pub fn pebs(&self) -> impl Iterator<Item = &[u8]> {
        (0..self.peb_count()).filter_map(|index| self.peb(index))
    }

    pub fn ubi_instance(&self) -> Option<&U> {
        self.ubi_instance.as_ref()
    }

    pub fn ubi_instance_mut(&mut self) -> Option<&mut U> {
        self.ubi_instance.as_mut()
    }

    /// Attach a UBI scan result to this partition, returning any previously attached one
    pub fn set_ubi_instance(&mut self, instance: U) -> Option<U> {
        self.ubi_instance.replace(instance)
    }

    pub fn take_ubi_instance(&mut self) -> Option<U> {
        self.ubi_instance.take()
    }
}

/// One entry of a gap-free partition map, as produced by
/// [Image::full_partitions](super::Image::full_partitions)
#[derive(Debug)]
pub enum MappedPartition<'a, U> {
    /// A partition stored in the image
    Declared(&'a Partition<U>),

    /// A synthesized partition for unclaimed space
    Unallocated(Partition<U>),
}

impl<U> Deref for MappedPartition<'_, U> {
    type Target = Partition<U>;

    fn deref(&self) -> &Partition<U> {
        match self {
            Self::Declared(partition) => partition,
            Self::Unallocated(partition) => partition,
        }
    }
}

#[test]
fn test_partition_entry_from_str() -> anyhow::Result<()> {
    assert_eq!(
        "rootfs:0x40000:0x7ffff".parse::<PartitionEntry>()?,
        PartitionEntry::new("rootfs", 0x40000, 0x7ffff)
    );
    assert_eq!(
        "ubi:1M:2047K".parse::<PartitionEntry>()?,
        PartitionEntry::new("ubi", 1 << 20, 2047 * 1024)
    );

    // Names may contain colons; the bounds are always the last two fields
    assert_eq!(
        "mtd:a:0:1023".parse::<PartitionEntry>()?,
        PartitionEntry::new("mtd:a", 0, 1023)
    );

    assert!("0:1023".parse::<PartitionEntry>().is_err());
    assert!("boot:zero:1023".parse::<PartitionEntry>().is_err());

    Ok(())
}

#[test]
fn test_partition_accessors() {
    let data = Bytes::from((0..4096u32).map(|i| (i / 1024) as u8).collect::<Vec<_>>());
    let part: Partition = Partition::new(
        &data,
        1024,
        1024,
        3071,
        "kernel".to_string(),
        PartitionKind::Declared,
    );

    assert_eq!(part.length(), 2048);
    assert_eq!(part.first_peb(), 1);
    assert_eq!(part.peb_count(), 2);
    assert!(part.is_block_aligned());
    assert!(!part.is_unallocated());

    // Views share the image's buffer
    assert_eq!(part.data().as_ptr(), data[1024..].as_ptr());

    assert!(part.peb(0).is_some_and(|peb| peb.iter().all(|&x| x == 1)));
    assert!(part.peb(1).is_some_and(|peb| peb.iter().all(|&x| x == 2)));
    assert_eq!(part.peb(2), None);
    assert_eq!(part.pebs().count(), 2);
}

#[test]
fn test_partition_ubi_instance() {
    let data = Bytes::from(vec![0u8; 2048]);
    let mut a: Partition<&str> = Partition::new(
        &data,
        1024,
        0,
        1023,
        "a".to_string(),
        PartitionKind::Declared,
    );
    let b = a.clone();

    assert_eq!(a.ubi_instance(), None);
    assert_eq!(a.set_ubi_instance("ubi0"), None);
    assert_eq!(a.set_ubi_instance("ubi1"), Some("ubi0"));
    assert_eq!(a.ubi_instance(), Some(&"ubi1"));
    assert_eq!(b.ubi_instance(), None);

    assert_eq!(a.take_ubi_instance(), Some("ubi1"));
    assert_eq!(a.ubi_instance(), None);
}
