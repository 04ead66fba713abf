//! Tolerant base64 helpers for subscription payloads
//!
//! Subscription providers are sloppy about padding and alphabet. Every
//! decode here tries the standard alphabet first, then URL-safe, both
//! without caring about missing `=` padding.

use crate::{Error, Result};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

/// Decode base64 tolerating missing padding and the URL-safe alphabet.
pub fn decode(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    STANDARD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed.trim_end_matches('=')))
        .or_else(|_| URL_SAFE.decode(trimmed))
        .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed.trim_end_matches('=')))
        .map_err(|e| Error::parse(format!("Invalid base64: {}", e)))
}

/// Decode base64 into a UTF-8 string.
pub fn decode_to_string(input: &str) -> Result<String> {
    let bytes = decode(input)?;
    String::from_utf8(bytes).map_err(|e| Error::parse(format!("Invalid UTF-8: {}", e)))
}

/// Encode with the standard alphabet and padding.
pub fn encode(input: impl AsRef<[u8]>) -> String {
    STANDARD.encode(input)
}

/// Whether the trimmed body consists solely of base64 alphabet characters.
///
/// Whitespace between lines is allowed since providers wrap envelopes.
pub fn looks_like_base64(body: &str) -> bool {
    let trimmed = body.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '-' | '_' | '\n' | '\r'))
}
