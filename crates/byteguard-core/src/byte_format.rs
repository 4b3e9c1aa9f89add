//! Human-readable byte counts
//!
//! Sizes use 1024-based units and drop trailing zeros, so `1536` renders as
//! `1.5 KB` and `1048576` as `1 MB`.

const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// Format a byte count with up to `decimals` fractional digits
///
/// # Examples
///
/// ```
/// use byteguard_core::byte_format::format_bytes;
///
/// assert_eq!(format_bytes(0, 2), "0 Bytes");
/// assert_eq!(format_bytes(1536, 2), "1.5 KB");
/// assert_eq!(format_bytes(500 * 1024 * 1024, 2), "500 MB");
/// ```
pub fn format_bytes(bytes: u64, decimals: usize) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut scaled = bytes as f64;
    while scaled >= 1024.0 && unit < UNITS.len() - 1 {
        scaled /= 1024.0;
        unit += 1;
    }

    let mut number = format!("{scaled:.decimals$}");
    if number.contains('.') {
        number.truncate(number.trim_end_matches('0').trim_end_matches('.').len());
    }
    format!("{number} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(1, 2), "1 Bytes");
        assert_eq!(format_bytes(1023, 2), "1023 Bytes");
        assert_eq!(format_bytes(1024, 2), "1 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024 * 1024, 2), "10 GB");
        assert_eq!(format_bytes(3 * 1024u64.pow(4), 2), "3 TB");
        // Beyond TB stays in TB
        assert_eq!(format_bytes(2048 * 1024u64.pow(4), 2), "2048 TB");
    }

    #[test]
    fn test_format_bytes_decimals() {
        assert_eq!(format_bytes(1100, 2), "1.07 KB");
        assert_eq!(format_bytes(1100, 0), "1 KB");
        assert_eq!(format_bytes(1126, 1), "1.1 KB");
    }
}
