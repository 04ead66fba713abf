//! Error types for the pipeline

use std::io;
use thiserror::Error;

/// Pipeline error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Locate error: {0}")]
    Locate(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("System error: {0}")]
    System(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn fetch<S: Into<String>>(msg: S) -> Self {
        Error::Fetch(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse(msg.into())
    }

    /// Parse error that names the offending URI prefix
    pub fn parse_uri(uri: &str, msg: impl std::fmt::Display) -> Self {
        let prefix: String = uri.chars().take(32).collect();
        Error::Parse(format!("{} (at `{}`)", msg, prefix))
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Error::Validation(msg.into())
    }

    pub fn locate<S: Into<String>>(msg: S) -> Self {
        Error::Locate(msg.into())
    }

    pub fn probe<S: Into<String>>(msg: S) -> Self {
        Error::Probe(msg.into())
    }

    pub fn conversion<S: Into<String>>(msg: S) -> Self {
        Error::Conversion(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn system<S: Into<String>>(msg: S) -> Self {
        Error::System(msg.into())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Fetch(e.to_string())
        }
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let e = Error::fetch("test error");
        assert!(matches!(e, Error::Fetch(_)));
    }

    #[test]
    fn test_error_display() {
        let e = Error::parse("bad scheme");
        assert_eq!(e.to_string(), "Parse error: bad scheme");
    }

    #[test]
    fn test_parse_uri_truncates_prefix() {
        let uri = "vmess://".to_string() + &"A".repeat(100);
        let e = Error::parse_uri(&uri, "not base64");
        let msg = e.to_string();
        assert!(msg.contains("vmess://"));
        assert!(msg.len() < 80);
    }
}
