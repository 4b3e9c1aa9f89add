//! Error types for byteguard
//!
//! This module defines the error types used throughout the byteguard crates.
//! All errors are derived from `thiserror` for convenient error handling
//! and automatic `From` implementations.
//!
//! # Example
//!
//! ```
//! use byteguard_core::error::{ByteguardError, Result};
//!
//! fn example_function() -> Result<()> {
//!     // This will automatically convert io::Error to ByteguardError
//!     let _file = std::fs::read_to_string("nonexistent.json")?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::types::RuleId;

/// Main error type for byteguard operations
///
/// Collaborator failures (store, rule engine) carry a message rather than the
/// collaborator's own error type so that any backend can report through them.
#[derive(Error, Debug)]
pub enum ByteguardError {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored value under a key could not be decoded
    #[error("Invalid stored value for key '{key}': {error}")]
    InvalidStoredValue {
        /// The storage key
        key: String,
        /// The decode error message
        error: String,
    },

    /// Key-value store failure
    #[error("Storage error: {0}")]
    Store(String),

    /// The state file could not be parsed
    #[error("Corrupt state file {file}: {error}")]
    CorruptStateFile {
        /// The offending file
        file: PathBuf,
        /// The error message
        error: String,
    },

    /// Rule engine rejected or failed an update
    #[error("Rule engine error: {0}")]
    RuleEngine(String),

    /// A rule with this id already exists in the engine
    #[error("Duplicate rule id: {0}")]
    DuplicateRuleId(RuleId),

    /// Invalid domain name
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    /// Invalid timezone
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenience type alias for Results in byteguard
///
/// # Example
///
/// ```
/// use byteguard_core::Result;
///
/// fn process_data() -> Result<u64> {
///     Ok(1024)
/// }
/// ```
pub type Result<T> = std::result::Result<T, ByteguardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ByteguardError::DuplicateRuleId(RuleId::new(1001));
        assert_eq!(error.to_string(), "Duplicate rule id: 1001");

        let error = ByteguardError::InvalidDomain(String::new());
        assert_eq!(error.to_string(), "Invalid domain: ");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: ByteguardError = io_error.into();
        assert!(matches!(error, ByteguardError::Io(_)));
    }
}
