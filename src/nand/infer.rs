//! Guessing flash geometry from the contents of a dump.
//!
//! Both guesses anchor on the first UBI EC header in the data:
//! - The page size is the header's `vid_hdr_offset`, since UBI puts the VID header in the page
//!   following the EC header. This fails on flashes with sub-page writes, where UBI fits both
//!   headers in one page.
//! - The block size is the smallest distance at which another EC header appears, since every PEB
//!   begins with one.

use crate::error::{Diagnostics, Error, GeometryParam, Result, Warning};
use crate::signature::find_signature;
use crate::ubi::{Ec, UBI_EC_HDR_MAGIC};

/// The largest number of pages per block that block size guessing will consider
pub const MAX_PAGES_PER_BLOCK: usize = 511;

/// Guess the page size from the first EC header in `data`.
pub fn guess_page_size(data: &[u8], diag: &mut Diagnostics) -> Result<usize> {
    let unknown = |reason| Error::GeometryUnknown(GeometryParam::PageSize, reason);

    let ec_hdr_offset =
        find_signature(data, UBI_EC_HDR_MAGIC, 0).ok_or(unknown("no UBI EC headers found"))?;

    let (ec_hdr, valid) =
        Ec::decode_untrusted(&data[ec_hdr_offset..]).ok_or(unknown("EC header is truncated"))?;
    if !valid {
        diag.warn(Warning::CorruptEcHeader {
            offset: ec_hdr_offset,
        });
    }

    let page_size = ec_hdr.vid_hdr_offset as usize;
    if page_size == 0 {
        return Err(unknown("EC header does not name a VID header offset"));
    }

    log::info!(
        "[+] Guessed page_size: {page_size} ({}KiB)",
        page_size as f64 / 1024.0
    );
    Ok(page_size)
}

/// Guess the (OOB-less) block size from the distance between the first two EC headers in `data`.
///
/// If `data` still has its OOB interleaved, pass the `oob_size`, so that the search steps over
/// whole physical pages. The returned size never includes OOB.
pub fn guess_block_size(data: &[u8], page_size: usize, oob_size: Option<usize>) -> Result<usize> {
    let unknown = |reason| Error::GeometryUnknown(GeometryParam::BlockSize, reason);

    let ec_hdr_offset =
        find_signature(data, UBI_EC_HDR_MAGIC, 0).ok_or(unknown("no UBI EC headers found"))?;

    let stride = page_size
        .checked_add(oob_size.unwrap_or(0))
        .ok_or(unknown("page size plus OOB size overflows"))?;
    if stride == 0 {
        return Err(unknown("page size is zero"));
    }

    let pages = (1..=MAX_PAGES_PER_BLOCK)
        .find(|&pages| {
            pages
                .checked_mul(stride)
                .and_then(|distance| distance.checked_add(ec_hdr_offset))
                .and_then(|offset| data.get(offset..))
                .is_some_and(|rest| rest.starts_with(UBI_EC_HDR_MAGIC))
        })
        .ok_or(unknown("no second EC header found within range"))?;

    let block_size = pages * page_size;
    log::info!(
        "[+] Guessed block_size: {block_size} ({}KiB)",
        block_size as f64 / 1024.0
    );
    Ok(block_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nand::{sim::SimDump, strip_oob, Geometry};

    const GEOMETRY: Geometry = Geometry {
        block_size: 16 * 512,
        page_size: 512,
        oob_size: None,
    };

    #[test]
    fn test_guess_geometry() -> anyhow::Result<()> {
        let data = SimDump::new(GEOMETRY, 6).build()?;

        let mut diag = Diagnostics::new();
        assert_eq!(guess_page_size(&data, &mut diag)?, 512);
        assert_eq!(guess_block_size(&data, 512, None)?, 16 * 512);
        assert!(diag.is_empty());

        Ok(())
    }

    #[test]
    fn test_guess_geometry_leading_erased() -> anyhow::Result<()> {
        // The first EC header isn't at offset 0, which must not matter
        let data = SimDump::new(GEOMETRY, 6).erased(0).erased(1).build()?;

        let mut diag = Diagnostics::new();
        assert_eq!(guess_page_size(&data, &mut diag)?, 512);
        assert_eq!(guess_block_size(&data, 512, None)?, 16 * 512);

        Ok(())
    }

    #[test]
    fn test_guess_block_size_interleaved() -> anyhow::Result<()> {
        let geometry = Geometry {
            block_size: 64 * 2048,
            page_size: 2048,
            oob_size: Some(64),
        };
        let raw = SimDump::new(geometry, 3).build()?;

        // On the raw dump, pages must be stepped over including their OOB...
        assert_eq!(guess_block_size(&raw, 2048, Some(64))?, 64 * 2048);

        // ...and after stripping, without it
        let mut diag = Diagnostics::new();
        let stripped = strip_oob(&raw, 2048, 64, &mut diag);
        assert_eq!(guess_block_size(&stripped, 2048, None)?, 64 * 2048);

        // The VID header offset field sits inside the EC header, so OOB doesn't disturb it
        assert_eq!(guess_page_size(&raw, &mut diag)?, 2048);

        Ok(())
    }

    #[test]
    fn test_guess_without_headers() {
        let data = vec![0xFFu8; 64 * 1024];
        let mut diag = Diagnostics::new();

        assert!(matches!(
            guess_page_size(&data, &mut diag),
            Err(Error::GeometryUnknown(GeometryParam::PageSize, _))
        ));
        assert!(matches!(
            guess_block_size(&data, 512, None),
            Err(Error::GeometryUnknown(GeometryParam::BlockSize, _))
        ));
    }

    #[test]
    fn test_guess_block_size_huge_page() -> anyhow::Result<()> {
        let data = SimDump::new(GEOMETRY, 6).build()?;

        assert!(matches!(
            guess_block_size(&data, usize::MAX, Some(64)),
            Err(Error::GeometryUnknown(GeometryParam::BlockSize, _))
        ));
        assert!(matches!(
            guess_block_size(&data, usize::MAX / 2, None),
            Err(Error::GeometryUnknown(GeometryParam::BlockSize, _))
        ));

        Ok(())
    }

    #[test]
    fn test_guess_single_block() -> anyhow::Result<()> {
        // Only one EC header means no recurrence to measure
        let data = SimDump::new(GEOMETRY, 1).build()?;
        assert!(matches!(
            guess_block_size(&data, 512, None),
            Err(Error::GeometryUnknown(GeometryParam::BlockSize, _))
        ));

        Ok(())
    }

    #[test]
    fn test_guess_page_size_bad_headers() -> anyhow::Result<()> {
        let mut data = vec![0xFFu8; 4096];
        Ec::default().encode(&mut data[1024..])?;

        // No VID header offset recorded
        let mut diag = Diagnostics::new();
        assert!(matches!(
            guess_page_size(&data, &mut diag),
            Err(Error::GeometryUnknown(GeometryParam::PageSize, _))
        ));

        // A corrupt header is still used, but noted
        Ec {
            vid_hdr_offset: 1024,
            ..Default::default()
        }
        .encode(&mut data[1024..])?;
        data[1024 + 8] ^= 0x80;
        assert_eq!(guess_page_size(&data, &mut diag)?, 1024);
        assert_eq!(
            diag.warnings(),
            [Warning::CorruptEcHeader { offset: 1024 }]
        );

        // A magic right at the end of the buffer can't be parsed
        let mut data = vec![0xFFu8; 4096];
        data[4092..].copy_from_slice(UBI_EC_HDR_MAGIC);
        assert!(guess_page_size(&data, &mut diag).is_err());

        Ok(())
    }
}
