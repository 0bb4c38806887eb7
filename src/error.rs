//! Gateway error types and message sanitization
//!
//! Component errors live next to their components; [`GatewayError`] wraps
//! them for the binary. Any error text that leaves the process (health
//! snapshots, logs shipped off-vehicle) goes through
//! [`sanitize_error_message`] first.

use crate::config::ConfigError;
use crate::connection::{ConnectError, SendError};
use crate::publish::PublishError;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Maximum length of a sanitized error message
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Top-level error type for gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

fn secret_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok())
        .as_ref()
}

fn sensitive_path_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|certs?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
                .ok()
        })
        .as_ref()
}

fn pem_block_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"-----BEGIN [A-Z ]+-----[\s\S]*?-----END [A-Z ]+-----").ok())
        .as_ref()
}

/// Sanitize error messages to prevent sensitive data leakage
///
/// Redacts `key=value` secrets, certificate and credential paths and inline
/// PEM blocks, then truncates to [`MAX_ERROR_MESSAGE_LEN`] bytes.
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(pattern) = pem_block_pattern() {
        sanitized = pattern
            .replace_all(&sanitized, "[PEM REDACTED]")
            .to_string();
    }

    if let Some(pattern) = secret_pattern() {
        sanitized = pattern.replace_all(&sanitized, "${1}=***").to_string();
    }

    if let Some(pattern) = sensitive_path_pattern() {
        sanitized = pattern
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();
    }

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;

    #[test]
    fn test_error_display_wraps_source() {
        let error = GatewayError::from(SendError::NotConnected {
            state: ConnectionState::Reconnecting,
        });
        assert_eq!(
            error.to_string(),
            "Send error: Not connected - current state: reconnecting"
        );
    }

    #[test]
    fn test_sanitize_multiple_secrets() {
        let message = "Auth failed: password=pass1 api_key=key123 secret=hidden token=tok456";
        let sanitized = sanitize_error_message(message);

        assert!(!sanitized.contains("pass1"));
        assert!(!sanitized.contains("key123"));
        assert!(!sanitized.contains("hidden"));
        assert!(!sanitized.contains("tok456"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("key=***"));
    }

    #[test]
    fn test_sanitize_case_insensitive() {
        let message = "PASSWORD=secret123 Token=abc Key=xyz";
        let sanitized = sanitize_error_message(message);

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc"));
        assert!(!sanitized.contains("xyz"));
    }

    #[test]
    fn test_sanitize_with_colons() {
        let message = "password: secret123 token: abc456";
        let sanitized = sanitize_error_message(message);

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
    }

    #[test]
    fn test_certificate_path_redaction() {
        let message = "Certificate error for /opt/gateway/certs/private.pem.key: no PEM block";
        let sanitized = sanitize_error_message(message);

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("private.pem.key"));
    }

    #[test]
    fn test_credential_path_redaction() {
        let message = "Failed to read /home/user/.aws/credentials";
        let sanitized = sanitize_error_message(message);

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains(".aws/credentials"));
    }

    #[test]
    fn test_pem_block_redaction() {
        let message =
            "bad input -----BEGIN CERTIFICATE-----\nMIIEvQ\n-----END CERTIFICATE----- rejected";
        let sanitized = sanitize_error_message(message);

        assert!(!sanitized.contains("MIIEvQ"));
        assert!(sanitized.contains("[PEM REDACTED]"));
        assert!(sanitized.ends_with("rejected"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));

        assert!(sanitized.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));

        assert!(sanitized.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_exactly_500_chars() {
        let message = "x".repeat(500);
        let sanitized = sanitize_error_message(&message);
        assert_eq!(sanitized.len(), 500);
        assert!(!sanitized.contains("truncated"));
    }

    #[test]
    fn test_sanitize_empty_message() {
        assert_eq!(sanitize_error_message(""), "");
    }
}
