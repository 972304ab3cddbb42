//! Compact duration formatting for supervision logs.

use std::time::Duration;

/// Render a [`Duration`] as a short human-readable string.
///
/// * below 1s → `"427ms"`
/// * below 2 minutes → `"3.41s"`
/// * below 2 hours → `"7m 05s"`
/// * otherwise → `"3h 12m"`
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms < 1_000 {
        return format!("{total_ms}ms");
    }

    let total_secs = duration.as_secs();
    if total_secs < 120 {
        return format!("{:.2}s", duration.as_secs_f64());
    }

    if total_secs < 2 * 3_600 {
        return format!("{}m {:02}s", total_secs / 60, total_secs % 60);
    }

    format!("{}h {}m", total_secs / 3_600, (total_secs % 3_600) / 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millisecond_range() {
        assert_eq!(format_duration(Duration::ZERO), "0ms");
        assert_eq!(format_duration(Duration::from_millis(427)), "427ms");
        assert_eq!(format_duration(Duration::from_millis(999)), "999ms");
    }

    #[test]
    fn test_second_range() {
        assert_eq!(format_duration(Duration::from_millis(1_000)), "1.00s");
        assert_eq!(format_duration(Duration::from_millis(3_410)), "3.41s");
        assert_eq!(format_duration(Duration::from_secs(119)), "119.00s");
    }

    #[test]
    fn test_minute_range() {
        assert_eq!(format_duration(Duration::from_secs(120)), "2m 00s");
        assert_eq!(format_duration(Duration::from_secs(425)), "7m 05s");
        assert_eq!(format_duration(Duration::from_secs(2 * 3_600 - 1)), "119m 59s");
    }

    #[test]
    fn test_hour_range() {
        assert_eq!(format_duration(Duration::from_secs(2 * 3_600)), "2h 0m");
        assert_eq!(
            format_duration(Duration::from_secs(3 * 3_600 + 12 * 60 + 40)),
            "3h 12m"
        );
    }
}
