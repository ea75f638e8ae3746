//! This module contains the code necessary to read and write UBI EC headers, with CRC
//! verification/computation.
//!
//! A forensic reader can't insist on a good CRC before looking at a header: a single flipped bit
//! would otherwise hide the whole erase block. So besides the strict [Ec::decode], there is
//! [Ec::decode_untrusted], which only requires the magic and reports whether the rest checks out.

use crc::{Crc, CRC_32_JAMCRC};
pub use deku::{DekuContainerRead, DekuContainerWrite};
use income::EcHdr;
pub use income::{UBI_EC_HDR_MAGIC, UBI_VID_HDR_MAGIC};

pub const UBI_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_JAMCRC);
const UBI_VERSION: u8 = 1;

/// Size of an EC header on flash
pub const UBI_EC_HDR_SIZE: usize = 64;

/// A trait missing from the `income` crate: implements parsing UBI headers from byteslices, with
/// magic and CRC verification.
pub trait ParseHeader<'a>: Sized + DekuContainerRead<'a> + ComputeCrc {
    fn get_magic() -> &'static [u8];
    fn get_hdr_magic(&self) -> &[u8];
    fn get_hdr_version(&self) -> u8;

    /// Parse a header that carries the right magic, without looking at version or CRC.
    ///
    /// The second value is `true` only if the version and CRC are also correct.
    fn parse_untrusted(buf: &'a [u8]) -> Option<(Self, bool)> {
        let (_, header) = Self::from_bytes((buf, 0)).ok()?;

        if header.get_hdr_magic() != Self::get_magic() {
            return None;
        }

        let valid = header.get_hdr_version() == UBI_VERSION && header.check_crc();
        Some((header, valid))
    }

    fn parse(buf: &'a [u8]) -> Option<Self> {
        Self::parse_untrusted(buf).and_then(|(header, valid)| valid.then_some(header))
    }
}

impl ParseHeader<'_> for EcHdr {
    fn get_magic() -> &'static [u8] {
        UBI_EC_HDR_MAGIC
    }
    fn get_hdr_magic(&self) -> &[u8] {
        &self.magic
    }
    fn get_hdr_version(&self) -> u8 {
        self.version
    }
}

/// Another trait missing from `income` to compute the correct CRC for some header
pub trait ComputeCrc: DekuContainerWrite {
    fn compute_crc(&self) -> Option<u32> {
        let header_bytes = self.to_bytes().ok()?;
        let header_len = header_bytes.len().checked_sub(std::mem::size_of::<u32>())?;
        Some(UBI_CRC.checksum(&header_bytes[..header_len]))
    }

    fn check_crc(&self) -> bool {
        self.compute_crc() == Some(self.get_crc())
    }

    fn fix_crc(&mut self) {
        if let Some(crc) = self.compute_crc() {
            self.set_crc(crc)
        }
    }

    fn get_crc(&self) -> u32;
    fn set_crc(&mut self, crc: u32);
}

impl ComputeCrc for EcHdr {
    fn get_crc(&self) -> u32 {
        self.hdr_crc
    }
    fn set_crc(&mut self, crc: u32) {
        self.hdr_crc = crc;
    }
}

/// This represents the specific fields we care about in an EC header
///
/// This is meant to be more ergonomic to work with than EcHdr, which represents the raw data
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone)]
pub struct Ec {
    /// The erase counter
    pub ec: u64,

    /// Where the VID header starts within the PEB. Without sub-page writes, this is one page in.
    pub vid_hdr_offset: u32,

    /// Where LEB data starts within the PEB
    pub data_offset: u32,

    pub image_seq: u32,
}

impl Ec {
    /// Change the erase counter of this EC header
    pub fn ec(mut self, ec: u64) -> Self {
        self.ec = ec;
        self
    }

    /// Convert from a byte slice, requiring a valid version and CRC
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        EcHdr::parse(bytes).map(|x| x.into())
    }

    /// Convert from a byte slice that only needs to start with the EC magic.
    ///
    /// Returns the header along with whether its version and CRC were valid.
    pub fn decode_untrusted(bytes: &[u8]) -> Option<(Self, bool)> {
        EcHdr::parse_untrusted(bytes).map(|(x, valid)| (x.into(), valid))
    }

    /// Write into a byte slice
    pub fn encode(self, out_bytes: &mut [u8]) -> anyhow::Result<()> {
        let bytes = EcHdr::from(self).to_bytes()?;
        let out_bytes = out_bytes
            .get_mut(..bytes.len())
            .ok_or(anyhow::anyhow!("out_bytes too small"))?;
        out_bytes.copy_from_slice(&bytes);
        Ok(())
    }
}

impl From<EcHdr> for Ec {
    fn from(value: EcHdr) -> Self {
        let EcHdr {
            ec,
            vid_hdr_offset,
            data_offset,
            image_seq,
            ..
        } = value;

        Self {
            ec,
            vid_hdr_offset,
            data_offset,
            image_seq,
        }
    }
}

impl From<Ec> for EcHdr {
    fn from(value: Ec) -> EcHdr {
        let Ec {
            ec,
            vid_hdr_offset,
            data_offset,
            image_seq,
        } = value;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(UBI_EC_HDR_MAGIC);

        let mut target = Self {
            magic,
            version: UBI_VERSION,

            ec,
            vid_hdr_offset,
            data_offset,
            image_seq,

            hdr_crc: Default::default(),
            padding1: Default::default(),
            padding2: Default::default(),
        };

        target.fix_crc();
        target
    }
}

#[test]
fn test_encode_decode() -> anyhow::Result<()> {
    let ec = Ec {
        ec: 17,
        vid_hdr_offset: 2048,
        data_offset: 4096,
        image_seq: 0x1234,
    };

    let mut buf = vec![0xFFu8; 256];
    ec.encode(&mut buf)?;

    assert!(buf.starts_with(UBI_EC_HDR_MAGIC));
    assert_eq!(Ec::decode(&buf), Some(ec));
    assert_eq!(Ec::decode_untrusted(&buf), Some((ec, true)));

    assert!(ec.encode(&mut [0u8; 8]).is_err());

    Ok(())
}

#[test]
fn test_decode_corrupt() -> anyhow::Result<()> {
    let ec = Ec {
        vid_hdr_offset: 512,
        ..Default::default()
    };

    let mut buf = vec![0u8; UBI_EC_HDR_SIZE];
    ec.encode(&mut buf)?;

    // Flip a bit in the erase counter: the CRC no longer matches
    buf[8] ^= 0x01;
    assert_eq!(Ec::decode(&buf), None);

    let (hdr, valid) = Ec::decode_untrusted(&buf).expect("magic is intact");
    assert!(!valid);
    assert_eq!(hdr.vid_hdr_offset, 512);

    // Without the magic, it isn't an EC header at all
    buf[0] = b'X';
    assert_eq!(Ec::decode_untrusted(&buf), None);

    // Nor is a truncated one
    assert_eq!(Ec::decode_untrusted(UBI_EC_HDR_MAGIC), None);

    Ok(())
}
