/// Utility functions and helpers
use std::time::Duration;

const SSL_PREFIX: &str = "SSL://";

/// Strip a case-insensitive `SSL://` prefix, reporting whether it was present
pub fn strip_ssl_prefix(host: &str) -> (&str, bool) {
    match host.get(..SSL_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(SSL_PREFIX) => {
            (&host[SSL_PREFIX.len()..], true)
        }
        _ => (host, false),
    }
}

/// Format duration for human-readable output
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Format byte size for human-readable output
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ssl_prefix() {
        assert_eq!(strip_ssl_prefix("SSL://uda.example.org"), ("uda.example.org", true));
        assert_eq!(strip_ssl_prefix("ssl://uda.example.org"), ("uda.example.org", true));
        assert_eq!(strip_ssl_prefix("uda.example.org"), ("uda.example.org", false));
        assert_eq!(strip_ssl_prefix("SSL:/"), ("SSL:/", false));
        assert_eq!(strip_ssl_prefix(""), ("", false));
    }

    #[test]
    fn test_strip_ssl_prefix_multibyte() {
        assert_eq!(strip_ssl_prefix("aéééé"), ("aéééé", false));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h1m1s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(32768), "32.00 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }
}
