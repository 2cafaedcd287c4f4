//! Human-readable sizes, speeds, and running times.

use std::time::Duration;

/// Formats a byte count (B, KB, MB, GB).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[must_use]
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Formats a content item's running time, e.g. "45m" or "2h 05m".
#[must_use]
pub fn format_runtime(seconds: u32) -> String {
    let minutes = seconds.div_ceil(60);
    if minutes >= 60 {
        format!("{}h {:02}m", minutes / 60, minutes % 60)
    } else {
        format!("{minutes}m")
    }
}

/// Formats an elapsed transfer time (e.g. "5.0s", "1m 05s").
#[must_use]
pub fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:01}s", secs, d.subsec_millis() / 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
        assert_eq!(format_bytes(1_073_741_824), "1.00 GB");
        assert_eq!(format_speed(2048), "2.00 KB/s");
    }

    #[test]
    fn runtime_rounds_up_to_minutes() {
        assert_eq!(format_runtime(0), "0m");
        assert_eq!(format_runtime(61), "2m");
        assert_eq!(format_runtime(45 * 60), "45m");
        assert_eq!(format_runtime(2 * 3600 + 5 * 60), "2h 05m");
    }

    #[test]
    fn elapsed_units() {
        assert_eq!(format_elapsed(Duration::from_millis(500)), "0.5s");
        assert_eq!(format_elapsed(Duration::from_secs(65)), "1m 05s");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn format_bytes_never_panics(bytes in 0u64..u64::MAX) {
                let _ = format_bytes(bytes);
            }

            #[test]
            fn runtime_never_panics(seconds in 0u32..u32::MAX) {
                let _ = format_runtime(seconds);
            }
        }
    }
}
