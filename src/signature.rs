//! Byte signature search over image data.
//!
//! UBI writes its headers with fixed magic values, so locating one is a plain substring search.
//! Everything here works on slices and is bounds-checked, since the input may be damaged or
//! deliberately malformed.

use memchr::memmem;

/// Find the first occurrence of `pattern` in `data`, at or after `start`.
///
/// Returns the absolute offset of the match within `data`, or `None` if there is none (including
/// when `start` lies past the end of `data`).
pub fn find_signature(data: &[u8], pattern: &[u8], start: usize) -> Option<usize> {
    let haystack = data.get(start..)?;
    memmem::find(haystack, pattern).map(|pos| start + pos)
}

/// Iterate over the absolute offsets of every non-overlapping occurrence of `pattern` in `data`,
/// at or after `start`.
pub fn find_signatures<'a>(
    data: &'a [u8],
    pattern: &'a [u8],
    start: usize,
) -> impl Iterator<Item = usize> + 'a {
    let haystack = data.get(start..).unwrap_or_default();
    memmem::find_iter(haystack, pattern).map(move |pos| start + pos)
}

#[test]
fn test_find_signature() {
    let data = b"....UBI#....UBI!....UBI#";

    assert_eq!(find_signature(data, b"UBI#", 0), Some(4));
    assert_eq!(find_signature(data, b"UBI#", 4), Some(4));
    assert_eq!(find_signature(data, b"UBI#", 5), Some(20));
    assert_eq!(find_signature(data, b"UBI!", 0), Some(12));
    assert_eq!(find_signature(data, b"UBI#", 21), None);

    // Out-of-range starts are not an error, just a miss
    assert_eq!(find_signature(data, b"UBI#", data.len()), None);
    assert_eq!(find_signature(data, b"UBI#", usize::MAX), None);

    // A pattern straddling the end of the buffer is never matched
    assert_eq!(find_signature(b"xxUBI", b"UBI#", 0), None);
}

#[test]
fn test_find_signatures() {
    let data = b"UBI#UBI#..UBI#";
    let found: Vec<usize> = find_signatures(data, b"UBI#", 0).collect();
    assert_eq!(found, [0, 4, 10]);

    let found: Vec<usize> = find_signatures(data, b"UBI#", 1).collect();
    assert_eq!(found, [4, 10]);

    assert_eq!(find_signatures(data, b"UBI#", 100).count(), 0);
}
