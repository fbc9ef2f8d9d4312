//! Core error types for SPAWNWEAVE.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid encoding
    InvalidEncoding,

    /// Validation error
    Validation {
        /// Offending field
        field: String,
        /// What is wrong with it
        reason: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEncoding => write!(f, "Invalid encoding"),
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<postcard::Error> for CoreError {
    fn from(_: postcard::Error) -> Self {
        Self::InvalidEncoding
    }
}
