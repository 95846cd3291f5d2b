//! Human-readable duration parsing for command-line options.

use std::time::Duration;

fn parse_amount(num: &str, unit: &str) -> Result<u64, String> {
    num.trim()
        .parse()
        .map_err(|_| format!("invalid {unit}: {num}"))
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use beacon_scan::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("20s").unwrap(), Duration::from_secs(20));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" must be tried before "m" and "s"
    if let Some(num) = src.strip_suffix("ms") {
        return parse_amount(num, "milliseconds").map(Duration::from_millis);
    }
    if let Some(num) = src.strip_suffix('h') {
        let hours = parse_amount(num, "hours")?;
        return hours
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration too large: {src}"));
    }
    if let Some(num) = src.strip_suffix('m') {
        let minutes = parse_amount(num, "minutes")?;
        return minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration too large: {src}"));
    }
    if let Some(num) = src.strip_suffix('s') {
        return parse_amount(num, "seconds").map(Duration::from_secs);
    }

    parse_amount(src, "duration").map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_seconds() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_minutes_and_hours() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn test_parse_duration_milliseconds() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_duration_no_suffix() {
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_duration_with_whitespace() {
        assert_eq!(parse_duration(" 3s ").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("3 s").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("18446744073709551615h").is_err());
    }
}
