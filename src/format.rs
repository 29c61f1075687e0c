//! Byte Formatting
//!
//! Human-readable byte counts. Units are base-1024: anything below one MiB is
//! shown in KB, below one GiB in MB, everything else in GB.

const KB: f64 = 1024.0;
const MB: f64 = KB * 1024.0;
const GB: f64 = MB * 1024.0;

/// Render a byte count with two decimals, e.g. `1.50MB`
pub fn format_bytes(bytes: u64) -> String {
    let value = bytes as f64;
    if value >= GB {
        format!("{:.2}GB", value / GB)
    } else if value >= MB {
        format!("{:.2}MB", value / MB)
    } else {
        format!("{:.2}KB", value / KB)
    }
}

/// Render a transfer rate, e.g. `512.00KB/s`
pub fn format_rate(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_bytes() {
        assert_eq!(format_bytes(0), "0.00KB");
    }

    #[test]
    fn test_unit_boundaries() {
        assert_eq!(format_bytes(1024), "1.00KB");
        assert_eq!(format_bytes(1_048_575), "1024.00KB");
        assert_eq!(format_bytes(1_048_576), "1.00MB");
        assert_eq!(format_bytes(1_073_741_824), "1.00GB");
    }

    #[test]
    fn test_fractional_values() {
        assert_eq!(format_bytes(1536), "1.50KB");
        assert_eq!(format_bytes(5 * 1_073_741_824 / 2), "2.50GB");
        assert_eq!(format_rate(524_288), "512.00KB/s");
    }
}
