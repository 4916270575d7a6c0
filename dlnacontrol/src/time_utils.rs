//! Conversions entre secondes et les durées UPnP (`H+:MM:SS[.F+]`).

/// `3661` → `01:01:01`
pub fn format_hhmmss(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Accepte `HH:MM:SS`, `MM:SS`, `SS` et une partie fractionnaire ignorée.
/// `NOT_IMPLEMENTED` et les valeurs vides donnent `None`.
pub fn parse_upnp_time(input: &str) -> Option<u64> {
    let input = input.trim();
    if input.is_empty() || input.eq_ignore_ascii_case("NOT_IMPLEMENTED") {
        return None;
    }

    let whole = input.split('.').next()?;
    let parts: Vec<&str> = whole.split(':').collect();
    if parts.len() > 3 {
        return None;
    }

    let mut total = 0u64;
    for part in parts {
        let value = part.trim_start_matches('+').parse::<u64>().ok()?;
        total = total * 60 + value;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hhmmss() {
        assert_eq!(format_hhmmss(0), "00:00:00");
        assert_eq!(format_hhmmss(61), "00:01:01");
        assert_eq!(format_hhmmss(3661), "01:01:01");
        assert_eq!(format_hhmmss(360000), "100:00:00");
    }

    #[test]
    fn test_parse_upnp_time() {
        assert_eq!(parse_upnp_time("01:02:03"), Some(3723));
        assert_eq!(parse_upnp_time("0:04:00.000"), Some(240));
        assert_eq!(parse_upnp_time("02:03"), Some(123));
        assert_eq!(parse_upnp_time("42"), Some(42));
        assert_eq!(parse_upnp_time("NOT_IMPLEMENTED"), None);
        assert_eq!(parse_upnp_time(""), None);
        assert_eq!(parse_upnp_time("1:2:3:4"), None);
        assert_eq!(parse_upnp_time("abc"), None);
    }
}
