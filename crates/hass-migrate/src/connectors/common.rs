//! Common utilities shared across connectors.
//!
//! HTTP client creation, URL validation and HTTP error mapping.

use crate::error::{Error, Result};
use reqwest::Client;
use std::time::Duration;

/// Default HTTP timeout for all requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry delay assumed when a 429 carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Creates a configured HTTP client with timeout.
#[must_use]
pub fn create_http_client() -> Client {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Validates an HTTP(S) endpoint URL.
pub fn validate_url(url: &str) -> Result<()> {
    let valid_schemes = ["http://", "https://"];
    let has_valid_scheme = valid_schemes.iter().any(|s| url.starts_with(s));

    if !has_valid_scheme {
        return Err(Error::Config(format!(
            "Invalid URL scheme in '{}'. Allowed: http, https",
            url
        )));
    }

    if url.len() < 10 || url.contains(char::is_whitespace) {
        return Err(Error::Config(format!("Invalid URL format: {}", url)));
    }

    Ok(())
}

/// Maps an unsuccessful HTTP response to an error.
///
/// `retry_after` is the parsed `Retry-After` header, if any.
pub fn handle_http_error(
    status_code: u16,
    body: &str,
    retry_after: Option<u64>,
    operation: &str,
) -> Error {
    match status_code {
        429 => Error::RateLimit(retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS)),
        401 | 403 => Error::Authentication(format!("{} auth failed: {}", operation, body)),
        _ => Error::TargetConnection(format!("{} error {}: {}", operation, status_code, body)),
    }
}

/// Reads `Retry-After` (seconds form) from a response.
#[must_use]
pub fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
