//! The raw image: one MTD device's worth of bytes, its geometry, and its partitions.
//!
//! An [Image] owns the (OOB-stripped) buffer. Every [Partition] holds a reference-counted view
//! into that buffer rather than a copy or a pointer back to the image, so partitions can be handed
//! to per-partition scanners freely once the partition map is settled.
//!
//! Geometry is resolved once, in [Image::new]. Anything not given as a hint is guessed from the
//! UBI headers in the data (see [crate::nand::infer]); failing that, construction fails with
//! [Error::GeometryUnknown]. Inconsistent geometry is only a [Warning].

pub mod partition;

use bytes::Bytes;

use crate::error::{Diagnostics, Error, Result, Warning};
use crate::nand::infer::{guess_block_size, guess_page_size};
use crate::nand::{strip_oob, Geometry, GeometryHints};

pub use partition::{MappedPartition, Partition, PartitionEntry, PartitionKind, UNALLOCATED};

/// A raw dump of a NAND flash, i.e. an MTD device that may hold several MTD partitions.
///
/// `U` is the type the UBI scanner attaches to partitions; see [Partition::set_ubi_instance].
#[derive(Debug)]
pub struct Image<U = ()> {
    data: Bytes,
    geometry: Geometry,
    partitions: Vec<Partition<U>>,
    diagnostics: Diagnostics,
}

impl<U> Image<U> {
    /// Model a raw dump, resolving any geometry not supplied in `hints`.
    ///
    /// If an OOB size is given, the OOB is stripped from `data` before anything else looks at
    /// offsets.
    pub fn new(data: impl Into<Bytes>, hints: GeometryHints) -> Result<Self> {
        let mut diagnostics = Diagnostics::new();
        let mut data: Bytes = data.into();

        let mut page_size = hints.known_page_size();
        if let Some(oob_size) = hints.oob_size.filter(|&x| x > 0) {
            // Stripping needs the page size. The VID header offset is read from inside the EC
            // header, so the guess works on the interleaved data too.
            let known_page_size = match page_size {
                Some(x) => x,
                None => guess_page_size(&data, &mut diagnostics)?,
            };
            if known_page_size.checked_add(oob_size).is_none() {
                return Err(Error::GeometryOverflow {
                    page_size: known_page_size,
                    oob_size,
                });
            }
            data = strip_oob(&data, known_page_size, oob_size, &mut diagnostics).into();
            page_size = Some(known_page_size);
        }

        let page_size = match page_size {
            Some(x) => x,
            None => guess_page_size(&data, &mut diagnostics)?,
        };
        let block_size = match hints.known_block_size() {
            Some(x) => x,
            None => guess_block_size(&data, page_size, None)?,
        };

        if data.len() % block_size != 0 {
            diagnostics.warn(Warning::DataNotBlockAligned {
                data_len: data.len(),
                block_size,
            });
        }
        if block_size % page_size != 0 {
            diagnostics.warn(Warning::BlockNotPageAligned {
                block_size,
                page_size,
            });
        }

        let geometry = Geometry {
            block_size,
            page_size,
            oob_size: hints.oob_size,
        };

        log::info!(
            "[!] Initialized Image (block_size:{}, page_size:{}, oob_size:{:?}, data_len:{})",
            geometry.block_size,
            geometry.page_size,
            geometry.oob_size,
            data.len(),
        );

        Ok(Self {
            data,
            geometry,
            partitions: Vec::new(),
            diagnostics,
        })
    }

    /// The image contents, with any OOB already stripped
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn block_size(&self) -> usize {
        self.geometry.block_size
    }

    pub fn page_size(&self) -> usize {
        self.geometry.page_size
    }

    pub fn oob_size(&self) -> Option<usize> {
        self.geometry.oob_size
    }

    /// Number of whole PEBs in the image
    pub fn peb_count(&self) -> usize {
        self.data.len() / self.geometry.block_size
    }

    /// Every warning raised so far about this image and its partitions
    pub fn diagnostics(&self) -> &[Warning] {
        self.diagnostics.warnings()
    }

    /// The declared partitions, in declaration order unless [Image::full_partitions] has since
    /// sorted them. Empty if no partition table was assigned.
    pub fn partitions(&self) -> &[Partition<U>] {
        &self.partitions
    }

    pub fn partitions_mut(&mut self) -> &mut [Partition<U>] {
        &mut self.partitions
    }

    pub fn partition(&self, index: usize) -> Option<&Partition<U>> {
        self.partitions.get(index)
    }

    pub fn partition_mut(&mut self, index: usize) -> Option<&mut Partition<U>> {
        self.partitions.get_mut(index)
    }

    /// Add a declared partition, returning its index.
    ///
    /// Misalignment and overlap with existing partitions are only warned about; a partition that
    /// doesn't fit in the image is an error.
    pub fn add_partition(&mut self, entry: PartitionEntry) -> Result<usize> {
        let partition = self.declare(entry)?;
        self.check_declared(&partition);
        self.partitions.push(partition);
        Ok(self.partitions.len() - 1)
    }

    /// Replace the partition table.
    ///
    /// If any entry doesn't fit in the image, the existing table is left untouched.
    pub fn set_partitions<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = PartitionEntry>,
    {
        let partitions = entries
            .into_iter()
            .map(|entry| self.declare(entry))
            .collect::<Result<Vec<_>>>()?;

        self.partitions.clear();
        for partition in partitions {
            self.check_declared(&partition);
            self.partitions.push(partition);
        }

        Ok(())
    }

    /// Build a partition map covering the whole image, in offset order.
    ///
    /// The declared partitions are sorted by offset in place, and any space before, between, or
    /// after them is covered by synthesized [UNALLOCATED] partitions. With no declared
    /// partitions, the map is a single [UNALLOCATED] partition spanning the image.
    pub fn full_partitions(&mut self) -> Vec<MappedPartition<'_, U>> {
        self.partitions.sort_by_key(|partition| partition.offset());

        let this = &*self;
        let mut map = Vec::with_capacity(this.partitions.len() * 2 + 1);

        // The first byte not yet covered by the map
        let mut cursor = 0;
        for partition in &this.partitions {
            if partition.offset() > cursor {
                map.push(MappedPartition::Unallocated(
                    this.unallocated(cursor, partition.offset() - 1),
                ));
            }
            map.push(MappedPartition::Declared(partition));
            cursor = cursor.max(partition.end() + 1);
        }

        if cursor < this.len() {
            map.push(MappedPartition::Unallocated(
                this.unallocated(cursor, this.len() - 1),
            ));
        }

        map
    }

    /// Validate the bounds of a declared partition and carve it out of the image
    fn declare(&self, entry: PartitionEntry) -> Result<Partition<U>> {
        let PartitionEntry { name, offset, end } = entry;

        if offset > end {
            return Err(Error::InvalidPartition { name, offset, end });
        }
        if end >= self.len() {
            return Err(Error::PartitionOutOfBounds {
                name,
                offset,
                end,
                image_len: self.len(),
            });
        }

        Ok(Partition::new(
            &self.data,
            self.geometry.block_size,
            offset,
            end,
            name,
            PartitionKind::Declared,
        ))
    }

    /// Warn about a declared partition that is misaligned or overlaps one already in the table
    fn check_declared(&mut self, partition: &Partition<U>) {
        if !partition.is_block_aligned() {
            self.diagnostics.warn(Warning::PartitionMisaligned {
                name: partition.name().to_string(),
                offset: partition.offset(),
                length: partition.length(),
                block_size: self.geometry.block_size,
            });
        }

        for other in &self.partitions {
            if partition.offset() <= other.end() && other.offset() <= partition.end() {
                self.diagnostics.warn(Warning::OverlappingPartitions {
                    name: partition.name().to_string(),
                    other: other.name().to_string(),
                });
            }
        }
    }

    fn unallocated(&self, offset: usize, end: usize) -> Partition<U> {
        Partition::new(
            &self.data,
            self.geometry.block_size,
            offset,
            end,
            UNALLOCATED.to_string(),
            PartitionKind::Unallocated,
        )
    }
}

#[cfg(test)]
fn bounds<'a, U>(map: &'a [MappedPartition<'_, U>]) -> Vec<(&'a str, usize, usize)> {
    map.iter()
        .map(|partition| (partition.name(), partition.offset(), partition.end()))
        .collect()
}

#[cfg(test)]
const TEST_HINTS: GeometryHints = GeometryHints {
    block_size: Some(2048),
    page_size: Some(512),
    oob_size: None,
};

#[test]
fn test_full_partitions_empty_table() -> anyhow::Result<()> {
    let mut image: Image = Image::new(vec![0u8; 8192], TEST_HINTS)?;
    assert!(image.partitions().is_empty());
    assert!(image.diagnostics().is_empty());

    let map = image.full_partitions();
    assert_eq!(bounds(&map), [(UNALLOCATED, 0, 8191)]);
    assert!(map[0].is_unallocated());
    assert_eq!(map[0].data().len(), 8192);

    Ok(())
}

#[test]
fn test_full_partitions_single() -> anyhow::Result<()> {
    let mut image: Image = Image::new(vec![0u8; 8192], TEST_HINTS)?;
    image.add_partition(PartitionEntry::new("root", 2048, 4095))?;

    let map = image.full_partitions();
    assert_eq!(
        bounds(&map),
        [
            (UNALLOCATED, 0, 2047),
            ("root", 2048, 4095),
            (UNALLOCATED, 4096, 8191),
        ]
    );
    assert!(matches!(map[1], MappedPartition::Declared(_)));

    Ok(())
}

#[test]
fn test_full_partitions_minimal() -> anyhow::Result<()> {
    let mut image: Image = Image::new(vec![0u8; 8192], TEST_HINTS)?;

    // Touching partitions covering everything need no filler at all
    image.set_partitions([
        PartitionEntry::new("b", 4096, 8191),
        PartitionEntry::new("a", 0, 4095),
    ])?;
    assert_eq!(bounds(&image.full_partitions()), [("a", 0, 4095), ("b", 4096, 8191)]);

    // The sort is persistent
    assert_eq!(image.partitions()[0].name(), "a");

    image.set_partitions([PartitionEntry::new("all", 0, 8191)])?;
    assert_eq!(bounds(&image.full_partitions()), [("all", 0, 8191)]);

    Ok(())
}

#[test]
fn test_full_partitions_gaps() -> anyhow::Result<()> {
    let mut image: Image = Image::new(vec![0u8; 16384], TEST_HINTS)?;
    image.set_partitions([
        PartitionEntry::new("data", 10240, 16383),
        PartitionEntry::new("boot", 0, 2047),
        PartitionEntry::new("kernel", 2048, 4095),
        PartitionEntry::new("env", 6144, 8191),
    ])?;

    assert_eq!(
        bounds(&image.full_partitions()),
        [
            ("boot", 0, 2047),
            ("kernel", 2048, 4095),
            (UNALLOCATED, 4096, 6143),
            ("env", 6144, 8191),
            (UNALLOCATED, 8192, 10239),
            ("data", 10240, 16383),
        ]
    );

    Ok(())
}

#[test]
fn test_full_partitions_overlap() -> anyhow::Result<()> {
    let mut image: Image = Image::new(vec![0u8; 8192], TEST_HINTS)?;
    image.add_partition(PartitionEntry::new("outer", 0, 6143))?;
    image.add_partition(PartitionEntry::new("inner", 2048, 4095))?;

    assert_eq!(
        image.diagnostics(),
        [Warning::OverlappingPartitions {
            name: "inner".to_string(),
            other: "outer".to_string(),
        }]
    );

    // The map never goes backwards, and only covers what is really unclaimed
    assert_eq!(
        bounds(&image.full_partitions()),
        [
            ("outer", 0, 6143),
            ("inner", 2048, 4095),
            (UNALLOCATED, 6144, 8191),
        ]
    );

    Ok(())
}

#[test]
fn test_partition_bounds() -> anyhow::Result<()> {
    let mut image: Image = Image::new(vec![0u8; 8192], TEST_HINTS)?;
    image.add_partition(PartitionEntry::new("keep", 0, 2047))?;

    assert!(matches!(
        image.add_partition(PartitionEntry::new("past-end", 4096, 8192)),
        Err(Error::PartitionOutOfBounds { .. })
    ));
    assert!(matches!(
        image.add_partition(PartitionEntry::new("backwards", 4096, 4095)),
        Err(Error::InvalidPartition { .. })
    ));

    // A bad entry leaves the existing table alone
    assert!(image
        .set_partitions([
            PartitionEntry::new("fine", 0, 4095),
            PartitionEntry::new("bad", 4096, 10000),
        ])
        .is_err());
    assert_eq!(image.partitions().len(), 1);
    assert_eq!(image.partitions()[0].name(), "keep");

    Ok(())
}

#[test]
fn test_misalignment_warnings() -> anyhow::Result<()> {
    // 9000 bytes is not a whole number of blocks, and 2048 is not a whole number of 768 pages
    let hints = GeometryHints::default().block_size(2048).page_size(768);
    let mut image: Image = Image::new(vec![0u8; 9000], hints)?;
    image.add_partition(PartitionEntry::new("odd", 100, 2147))?;

    assert_eq!(
        image.diagnostics(),
        [
            Warning::DataNotBlockAligned {
                data_len: 9000,
                block_size: 2048,
            },
            Warning::BlockNotPageAligned {
                block_size: 2048,
                page_size: 768,
            },
            Warning::PartitionMisaligned {
                name: "odd".to_string(),
                offset: 100,
                length: 2048,
                block_size: 2048,
            },
        ]
    );

    // Processing carries on regardless
    assert_eq!(image.full_partitions().len(), 3);

    Ok(())
}

#[test]
fn test_ubi_instance_independence() -> anyhow::Result<()> {
    let mut image: Image<u32> = Image::new(vec![0u8; 8192], TEST_HINTS)?;
    image.set_partitions([
        PartitionEntry::new("a", 0, 4095),
        PartitionEntry::new("b", 4096, 8191),
    ])?;

    image
        .partition_mut(1)
        .expect("partition b exists")
        .set_ubi_instance(7);

    assert_eq!(image.partitions()[0].ubi_instance(), None);
    assert_eq!(image.partitions()[1].ubi_instance(), Some(&7));
    assert!(image.diagnostics().is_empty());

    // Fillers never carry one
    image.set_partitions([PartitionEntry::new("a", 0, 4095)])?;
    let map = image.full_partitions();
    assert_eq!(map[1].ubi_instance(), None);

    Ok(())
}

#[test]
fn test_inferred_geometry() -> anyhow::Result<()> {
    use crate::nand::sim::SimDump;

    let geometry = Geometry {
        block_size: 32 * 1024,
        page_size: 1024,
        oob_size: None,
    };
    let data = SimDump::new(geometry, 8).erased(3).build()?;

    let image: Image = Image::new(data, GeometryHints::default())?;
    assert_eq!(image.geometry(), geometry);
    assert_eq!(image.peb_count(), 8);
    assert!(image.diagnostics().is_empty());

    Ok(())
}

#[test]
fn test_inferred_geometry_with_oob() -> anyhow::Result<()> {
    use crate::nand::sim::SimDump;

    let geometry = Geometry {
        block_size: 64 * 2048,
        page_size: 2048,
        oob_size: Some(64),
    };
    let raw = SimDump::new(geometry, 4).build()?;

    let hints = GeometryHints::default().oob_size(64);
    let mut image: Image = Image::new(raw, hints)?;
    assert_eq!(image.geometry(), geometry);
    assert_eq!(image.len(), 4 * 64 * 2048);
    // Page 1 of block 0 follows page 0 directly, with no OOB in between
    assert!(image.data()[2048..4096].iter().all(|&x| x == 0));

    // PEB offsets are in stripped address space
    image.add_partition(PartitionEntry::new("ubi", 64 * 2048, 4 * 64 * 2048 - 1))?;
    let map = image.full_partitions();
    assert_eq!(map[1].first_peb(), 1);
    assert_eq!(map[1].peb_count(), 3);
    assert!(map[1]
        .pebs()
        .all(|peb| peb.starts_with(crate::ubi::UBI_EC_HDR_MAGIC)));

    Ok(())
}

#[test]
fn test_geometry_unknown() {
    let result: Result<Image> = Image::new(vec![0xFFu8; 8192], GeometryHints::default());
    assert!(matches!(result, Err(Error::GeometryUnknown(..))));

    // Knowing the page size isn't enough to find the block size
    let hints = GeometryHints::default().page_size(512);
    let result: Result<Image> = Image::new(vec![0xFFu8; 8192], hints);
    assert!(matches!(result, Err(Error::GeometryUnknown(..))));

    // Zero means unknown
    let hints = GeometryHints::default().block_size(0).page_size(0);
    let result: Result<Image> = Image::new(vec![0xFFu8; 8192], hints);
    assert!(matches!(result, Err(Error::GeometryUnknown(..))));
}

#[test]
fn test_huge_page_hint() {
    let hints = GeometryHints::default().page_size(usize::MAX).oob_size(64);
    let result: Result<Image> = Image::new(vec![0u8; 4096], hints);
    assert_eq!(
        result.err(),
        Some(Error::GeometryOverflow {
            page_size: usize::MAX,
            oob_size: 64
        })
    );

    // Without OOB there is nothing to strip, but the block size search must still give up cleanly
    let hints = GeometryHints::default().page_size(usize::MAX);
    let result: Result<Image> = Image::new(vec![0u8; 4096], hints);
    assert!(matches!(
        result,
        Err(Error::GeometryUnknown(crate::GeometryParam::BlockSize, _))
    ));
}

#[cfg(test)]
proptest::proptest! {
    #[test]
    fn test_full_partitions_tile_image(
        layout in proptest::collection::vec((0usize..3, 1usize..4), 0..8),
        tail in 0usize..3,
        reverse: bool,
    ) {
        const UNIT: usize = 512;

        // Lay out non-overlapping partitions, each preceded by some gap
        let mut entries = Vec::new();
        let mut offset = 0;
        for (i, (gap, len)) in layout.iter().enumerate() {
            offset += gap * UNIT;
            entries.push(PartitionEntry::new(format!("p{i}"), offset, offset + len * UNIT - 1));
            offset += len * UNIT;
        }
        let image_len = offset + tail * UNIT;
        proptest::prop_assume!(image_len > 0);

        if reverse {
            entries.reverse();
        }

        let hints = GeometryHints::default().block_size(UNIT).page_size(UNIT);
        let mut image: Image = Image::new(vec![0u8; image_len], hints).unwrap();
        image.set_partitions(entries).unwrap();
        let map = image.full_partitions();

        proptest::prop_assert_eq!(map.first().map(|p| p.offset()), Some(0));
        proptest::prop_assert_eq!(map.last().map(|p| p.end()), Some(image_len - 1));
        for pair in map.windows(2) {
            proptest::prop_assert_eq!(pair[0].end() + 1, pair[1].offset());

            // Fillers are maximal: never two in a row
            proptest::prop_assert!(!(pair[0].is_unallocated() && pair[1].is_unallocated()));
        }

        let declared = map.iter().filter(|p| !p.is_unallocated()).count();
        proptest::prop_assert_eq!(declared, layout.len());
    }
}
