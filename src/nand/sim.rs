//! A simulated raw NAND dump, for testing purposes

use std::collections::BTreeSet;

use super::Geometry;
use crate::ubi::Ec;

/// Byte pattern written to every OOB area
pub const SIM_OOB_FILL: u8 = 0xA5;

/// Builds the bytes of a raw dump in which every PEB is UBI-formatted, unless marked erased.
#[derive(Debug, Clone)]
pub struct SimDump {
    geometry: Geometry,
    blocks: usize,
    erased: BTreeSet<usize>,
}

impl SimDump {
    /// Describe a dump of `blocks` PEBs with the given geometry. If the geometry has an OOB size,
    /// the OOB is interleaved after every page.
    pub fn new(geometry: Geometry, blocks: usize) -> Self {
        Self {
            geometry,
            blocks,
            erased: BTreeSet::new(),
        }
    }

    /// Leave the given PEB fully erased (no EC header)
    pub fn erased(mut self, block: usize) -> Self {
        self.erased.insert(block);
        self
    }

    /// Produce the dump
    pub fn build(&self) -> anyhow::Result<Vec<u8>> {
        let Geometry {
            block_size,
            page_size,
            oob_size,
        } = self.geometry;
        anyhow::ensure!(
            page_size > 0 && block_size % page_size == 0,
            "block size must be a multiple of page size"
        );

        let ec = Ec {
            vid_hdr_offset: page_size.try_into()?,
            data_offset: (2 * page_size).try_into()?,
            ..Default::default()
        };

        let mut out = Vec::with_capacity(self.blocks * block_size);
        let mut block_buf = vec![0u8; block_size];
        for block in 0..self.blocks {
            if self.erased.contains(&block) {
                block_buf.fill(0xFF);
            } else {
                // Payload: the block index in every byte, which can never spell out a UBI magic
                block_buf.fill(block as u8);
                ec.ec(block as u64).encode(&mut block_buf)?;
            }

            for page in block_buf.chunks(page_size) {
                out.extend_from_slice(page);
                if let Some(oob_size) = oob_size {
                    out.resize(out.len() + oob_size, SIM_OOB_FILL);
                }
            }
        }

        Ok(out)
    }
}

#[test]
fn test_sim_dump() -> anyhow::Result<()> {
    let geometry = Geometry {
        block_size: 4 * 256,
        page_size: 256,
        oob_size: Some(16),
    };
    let data = SimDump::new(geometry, 3).erased(1).build()?;

    let phys_block = 4 * (256 + 16);
    assert_eq!(data.len(), 3 * phys_block);

    assert_eq!(
        Ec::decode(&data),
        Some(Ec {
            ec: 0,
            vid_hdr_offset: 256,
            data_offset: 512,
            image_seq: 0,
        })
    );
    assert!(data[phys_block..2 * phys_block]
        .iter()
        .all(|&x| x == 0xFF || x == SIM_OOB_FILL));
    assert_eq!(Ec::decode(&data[2 * phys_block..]).map(|x| x.ec), Some(2));
    assert!(data[256..272].iter().all(|&x| x == SIM_OOB_FILL));

    Ok(())
}
