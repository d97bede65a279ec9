//! Input validation for tracking numbers, locations, email addresses
//! and webhook URLs.
//!
//! Everything the public web form or a bot command accepts passes
//! through here before touching the database.

use lazy_regex::{lazy_regex, Lazy, Regex};
use url::Url;

/// Maximum tracking number length (matches the column width)
pub const MAX_TRACKING_NUMBER_LEN: usize = 50;

static TRACKING_NUMBER_RE: Lazy<Regex> = lazy_regex!(r"^[A-Z0-9-]{1,50}$");

static EMAIL_RE: Lazy<Regex> = lazy_regex!(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$");

/// Normalizes and validates a tracking number.
///
/// Trims whitespace, uppercases, and requires 1-50 characters of
/// `[A-Z0-9-]`. Returns `None` for anything else.
pub fn sanitize_tracking_number(raw: &str) -> Option<String> {
    let candidate = raw.trim().to_uppercase();
    if TRACKING_NUMBER_RE.is_match(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

/// Strips everything except word characters, whitespace and dashes.
/// Used on free-text search queries before they reach a LIKE clause.
pub fn sanitize_input(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect()
}

/// Pragmatic email validation. Not a full RFC 5322 parser on purpose.
pub fn validate_email(email: &str) -> bool {
    !email.is_empty() && email.len() <= 120 && EMAIL_RE.is_match(email)
}

/// A location is valid when it is one of the configured route-template
/// keys.
pub fn validate_location(location: &str, known_locations: &[String]) -> bool {
    known_locations.iter().any(|l| l == location)
}

/// Webhook URLs must parse, use http(s) and point at a host.
pub fn validate_webhook_url(raw: &str) -> bool {
    if raw.len() > 200 {
        return false;
    }
    match Url::parse(raw) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sanitize_tracking_number_accepts_valid() {
        assert_eq!(
            sanitize_tracking_number("TRK20250101120000ABC123"),
            Some("TRK20250101120000ABC123".to_string())
        );
        assert_eq!(sanitize_tracking_number("  trk-1  "), Some("TRK-1".to_string()));
    }

    #[test]
    fn test_sanitize_tracking_number_rejects_invalid() {
        assert_eq!(sanitize_tracking_number(""), None);
        assert_eq!(sanitize_tracking_number("   "), None);
        assert_eq!(sanitize_tracking_number("TRK 123"), None);
        assert_eq!(sanitize_tracking_number("TRK;DROP TABLE"), None);
        assert_eq!(sanitize_tracking_number(&"A".repeat(51)), None);
    }

    #[test]
    fn test_sanitize_input_strips_punctuation() {
        assert_eq!(sanitize_input("Lagos, NG"), "Lagos NG");
        assert_eq!(sanitize_input("a'b\"c;d"), "abcd");
        assert_eq!(sanitize_input("TRK-1_2"), "TRK-1_2");
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com"));
        assert!(validate_email("first.last+tag@sub.example.co"));
        assert!(!validate_email(""));
        assert!(!validate_email("not-an-email"));
        assert!(!validate_email("user@"));
        assert!(!validate_email("@example.com"));
    }

    #[test]
    fn test_validate_location() {
        let known = vec!["Lagos, NG".to_string(), "London, UK".to_string()];
        assert!(validate_location("Lagos, NG", &known));
        assert!(!validate_location("Atlantis", &known));
        assert!(!validate_location("lagos, ng", &known));
    }

    #[test]
    fn test_validate_webhook_url() {
        assert!(validate_webhook_url("https://hooks.example.com/shipments"));
        assert!(validate_webhook_url("http://localhost:9000/hook"));
        assert!(!validate_webhook_url("ftp://example.com/x"));
        assert!(!validate_webhook_url("not a url"));
        assert!(!validate_webhook_url(&format!("https://example.com/{}", "a".repeat(200))));
    }
}
