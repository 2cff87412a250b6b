//! Error types for packet reconstruction and decoding

use thiserror::Error;

/// Error type for the pure packet helpers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Channel secret is too short to key AES-128
    #[error("Channel secret too short: {len} bytes, need at least {min}")]
    SecretTooShort {
        /// Length of the supplied secret
        len: usize,
        /// Minimum accepted length
        min: usize,
    },

    /// Hex input could not be decoded
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    /// Key material rejected by a primitive
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Attempt counter does not fit in the 2-bit field
    #[error("Attempt counter {0} out of range (0-3)")]
    AttemptOutOfRange(u8),
}

impl CoreError {
    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::SecretTooShort { .. } => "SECRET_TOO_SHORT",
            CoreError::InvalidHex(_) => "INVALID_HEX",
            CoreError::InvalidKey(_) => "INVALID_KEY",
            CoreError::AttemptOutOfRange(_) => "ATTEMPT_OUT_OF_RANGE",
        }
    }
}

impl From<hex::FromHexError> for CoreError {
    fn from(err: hex::FromHexError) -> Self {
        CoreError::InvalidHex(err.to_string())
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
