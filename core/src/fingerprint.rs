//! Request fingerprint extraction.
//!
//! Pulls the two client-facing identifiers out of request headers: the
//! idempotency key (optional) and the request id (always resolved, generated
//! when absent). Header names come from [`Config`]; matching is
//! case-insensitive and, when a header repeats, the last value wins.

use crate::config::Config;
use std::fmt::Write as _;

/// Client-facing identity of one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Idempotency key, if the client sent one.
    pub key: Option<String>,
    /// Request id: taken from headers, or freshly generated.
    pub request_id: String,
}

/// Extract the idempotency fingerprint from request headers.
///
/// Accepts any header view that iterates as name/value string pairs, so the
/// host framework's header map can be passed without copying.
pub fn extract<'a, I>(headers: I, config: &Config) -> Fingerprint
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut key = None;
    let mut request_id = None;

    for (name, value) in headers {
        if name.eq_ignore_ascii_case(&config.idempotency_key_header) {
            key = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(&config.request_id_header) {
            request_id = Some(value.to_string());
        }
    }

    Fingerprint {
        key,
        request_id: request_id.unwrap_or_else(generate_request_id),
    }
}

/// Generate a fresh request id: `req_` followed by 32 lowercase hex
/// characters.
#[must_use]
pub fn generate_request_id() -> String {
    let bytes: [u8; 16] = rand::random();
    let mut id = String::with_capacity(4 + 32);
    id.push_str("req_");
    for byte in bytes {
        let _ = write!(id, "{byte:02x}");
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_key_and_request_id() {
        let config = Config::default();
        let headers = vec![
            ("content-type", "application/json"),
            ("idempotency-key", "key-1"),
            ("x-request-id", "req_known"),
        ];

        let fingerprint = extract(headers, &config);
        assert_eq!(fingerprint.key.as_deref(), Some("key-1"));
        assert_eq!(fingerprint.request_id, "req_known");
    }

    #[test]
    fn test_header_names_match_case_insensitively() {
        let config = Config::default();
        let headers = vec![("Idempotency-Key", "key-1"), ("X-Request-Id", "req_a")];

        let fingerprint = extract(headers, &config);
        assert_eq!(fingerprint.key.as_deref(), Some("key-1"));
        assert_eq!(fingerprint.request_id, "req_a");
    }

    #[test]
    fn test_last_repeated_header_wins() {
        let config = Config::default();
        let headers = vec![("idempotency-key", "first"), ("idempotency-key", "second")];

        let fingerprint = extract(headers, &config);
        assert_eq!(fingerprint.key.as_deref(), Some("second"));
    }

    #[test]
    fn test_custom_header_names() {
        let config = Config::new()
            .with_idempotency_key_header("x-dedup-key")
            .with_request_id_header("x-trace-id");
        let headers = vec![
            ("idempotency-key", "ignored"),
            ("x-dedup-key", "key-1"),
            ("x-trace-id", "trace-1"),
        ];

        let fingerprint = extract(headers, &config);
        assert_eq!(fingerprint.key.as_deref(), Some("key-1"));
        assert_eq!(fingerprint.request_id, "trace-1");
    }

    #[test]
    fn test_missing_key_stays_absent() {
        let config = Config::default();
        let fingerprint = extract(Vec::new(), &config);
        assert_eq!(fingerprint.key, None);
    }

    #[test]
    fn test_generated_request_id_shape() {
        let id = generate_request_id();
        assert!(id.starts_with("req_"));
        assert_eq!(id.len(), 36);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
        assert!(id[4..].chars().all(|c| !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_generated_request_ids_differ() {
        assert_ne!(generate_request_id(), generate_request_id());
    }
}
