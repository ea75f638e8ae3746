//! Small helpers for numbers that humans read and write.

use crate::error::{Error, Result};

/// Parse a byte count, as decimal or `0x`-prefixed hex, with an optional binary `K`/`M`/`G`
/// suffix (so `128K` is 131072).
pub fn parse_int(s: &str) -> Result<usize> {
    let err = |reason| Error::Parse {
        input: s.to_string(),
        reason,
    };

    let trimmed = s.trim();
    let (digits, shift) = match trimmed.as_bytes().last() {
        Some(b'k' | b'K') => (&trimmed[..trimmed.len() - 1], 10),
        Some(b'm' | b'M') => (&trimmed[..trimmed.len() - 1], 20),
        Some(b'g' | b'G') => (&trimmed[..trimmed.len() - 1], 30),
        _ => (trimmed, 0),
    };

    let value = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        usize::from_str_radix(hex, 16).map_err(|_| err("invalid hex number"))?
    } else {
        digits.parse::<usize>().map_err(|_| err("invalid number"))?
    };

    value
        .checked_mul(1 << shift)
        .ok_or_else(|| err("number too large"))
}

/// Format a byte count for display, e.g. 336896 becomes `329.0KiB`.
pub fn readable_size(num: usize) -> String {
    const UNITS: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

    let mut value = num as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.1}{unit}B");
        }
        value /= 1024.0;
    }
    format!("{value:.1}ZiB")
}

#[test]
fn test_parse_int() -> anyhow::Result<()> {
    assert_eq!(parse_int("2048")?, 2048);
    assert_eq!(parse_int("0x800")?, 2048);
    assert_eq!(parse_int("0X800")?, 2048);
    assert_eq!(parse_int("128K")?, 128 * 1024);
    assert_eq!(parse_int("0x2m")?, 2 * 1024 * 1024);
    assert_eq!(parse_int(" 1G ")?, 1 << 30);

    assert!(parse_int("").is_err());
    assert!(parse_int("K").is_err());
    assert!(parse_int("0xZZ").is_err());
    assert!(parse_int("-1").is_err());

    Ok(())
}

#[test]
fn test_readable_size() {
    assert_eq!(readable_size(0), "0.0B");
    assert_eq!(readable_size(512), "512.0B");
    assert_eq!(readable_size(336896), "329.0KiB");
    assert_eq!(readable_size(128 * 1024 * 1024), "128.0MiB");
}
