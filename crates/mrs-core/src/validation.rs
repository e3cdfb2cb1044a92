//! Validation for untrusted service-point URIs
//!
//! Registrations arrive from third-party servers and their service points end
//! up in front of users and agents, so they are held to a strict policy:
//! absolute `https` URI with a host, no userinfo, no fragment, no whitespace
//! or control characters, at most 2048 characters.

use crate::error::{MrsError, Result};
use tracing::debug;
use url::Url;

/// Longest accepted service-point URI, in characters
pub const MAX_URI_LEN: usize = 2048;

const ALLOWED_SCHEMES: &[&str] = &["https"];

/// Validate a service-point URI and return it trimmed
///
/// # Errors
/// Returns `MrsError::Validation` naming the first rule the URI breaks.
pub fn validate_service_point_uri(value: &str) -> Result<String> {
    let uri = value.trim();

    if uri.is_empty() {
        return Err(MrsError::validation("service_point must not be empty"));
    }
    if uri.chars().count() > MAX_URI_LEN {
        return Err(MrsError::validation("service_point is too long"));
    }
    if uri.chars().any(char::is_whitespace) {
        return Err(MrsError::validation(
            "service_point must not contain whitespace",
        ));
    }
    if uri.chars().any(|c| c.is_ascii_control()) {
        return Err(MrsError::validation(
            "service_point contains control characters",
        ));
    }

    let parsed = Url::parse(uri).map_err(|e| match e {
        url::ParseError::RelativeUrlWithoutBase => {
            MrsError::validation("service_point must include a URI scheme")
        }
        url::ParseError::EmptyHost => MrsError::validation("service_point must include a host"),
        other => MrsError::validation(format!("service_point is not a valid URI: {}", other)),
    })?;

    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(MrsError::validation("service_point scheme must be https"));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(MrsError::validation("service_point must include a host")),
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(MrsError::validation(
            "service_point must not include user credentials",
        ));
    }
    if parsed.fragment().is_some() {
        return Err(MrsError::validation(
            "service_point must not include fragments",
        ));
    }

    Ok(uri.to_string())
}

/// Return the validated URI, or `None` if it is unset or fails validation
///
/// Used when parsing registrations from untrusted servers: a bad service
/// point is dropped rather than rejecting the whole registration.
pub fn sanitize_service_point_uri(value: Option<&str>) -> Option<String> {
    let value = value?;
    match validate_service_point_uri(value) {
        Ok(uri) => Some(uri),
        Err(e) => {
            debug!(error = %e, "Dropping invalid service_point");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(err: MrsError) -> String {
        err.to_string()
    }

    #[test]
    fn test_accepts_https_uri() {
        let uri = "https://example.com/spaces/opera-house";
        assert_eq!(validate_service_point_uri(uri).unwrap(), uri);
    }

    #[test]
    fn test_trims_surrounding_whitespace() {
        let uri = validate_service_point_uri("  https://example.com/a?b=c  ").unwrap();
        assert_eq!(uri, "https://example.com/a?b=c");
    }

    #[test]
    fn test_rejects_non_https_scheme() {
        let err = validate_service_point_uri("javascript:alert(1)").unwrap_err();
        assert!(message(err).contains("scheme"));

        let err = validate_service_point_uri("http://example.com/").unwrap_err();
        assert!(message(err).contains("scheme"));
    }

    #[test]
    fn test_rejects_missing_scheme() {
        let err = validate_service_point_uri("example.com/path").unwrap_err();
        assert!(message(err).contains("scheme"));
    }

    #[test]
    fn test_rejects_fragment() {
        let err = validate_service_point_uri("https://example.com/x#prompt").unwrap_err();
        assert!(message(err).contains("fragment"));
    }

    #[test]
    fn test_rejects_whitespace() {
        let err = validate_service_point_uri("https://example.com/ bad").unwrap_err();
        assert!(message(err).contains("whitespace"));
    }

    #[test]
    fn test_rejects_control_characters() {
        let err = validate_service_point_uri("https://example.com/\u{7f}x").unwrap_err();
        assert!(message(err).contains("control"));
    }

    #[test]
    fn test_rejects_userinfo() {
        let err = validate_service_point_uri("https://user:pw@example.com/").unwrap_err();
        assert!(message(err).contains("credentials"));
    }

    #[test]
    fn test_rejects_empty_and_long() {
        assert!(validate_service_point_uri("   ").is_err());

        let long = format!("https://example.com/{}", "a".repeat(MAX_URI_LEN));
        let err = validate_service_point_uri(&long).unwrap_err();
        assert!(message(err).contains("too long"));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_service_point_uri(None), None);
        assert_eq!(sanitize_service_point_uri(Some("javascript:alert(1)")), None);
        assert_eq!(
            sanitize_service_point_uri(Some("https://example.com/x")),
            Some("https://example.com/x".to_string())
        );
    }
}
