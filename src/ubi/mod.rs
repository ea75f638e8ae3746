//! UBI on-flash structures, as far as the image layer needs them.
//!
//! UBI populates the first writable page of every PEB with an "erase counter" ("EC") header, and
//! if the block is in use, a "volume ID" ("VID") header at the offset the EC header names:
//!
//! ```text
//! +------------ PEB ------------+
//! | Page 0: EC header  "UBI#"   |  vid_hdr_offset ---+
//! | Page 1: VID header "UBI!"   | <------------------+
//! | Page 2..: LEB data          |  (data_offset)
//! +-----------------------------+
//! ```
//!
//! Without sub-page writes, `vid_hdr_offset` is exactly one page, and every PEB begins with the EC
//! magic. That makes the EC header a reliable anchor for guessing the flash geometry of a raw dump;
//! see [crate::nand::infer]. Walking volumes and LEBs is left to the UBI scanner built on top.

mod headers;

pub use headers::{Ec, UBI_EC_HDR_MAGIC, UBI_EC_HDR_SIZE, UBI_VID_HDR_MAGIC};
