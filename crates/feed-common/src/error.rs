//! Error types shared across Feed components

use thiserror::Error;

/// Result type alias for feed-common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared helpers
#[derive(Error, Debug)]
pub enum CommonError {
    /// File system operations failed (read, write, create directory, etc.)
    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// Computed checksum doesn't match the recorded value
    #[error("Checksum verification failed for '{file}': expected '{expected}', got '{actual}'")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },
}

impl CommonError {
    /// Create a checksum mismatch error
    pub fn checksum_mismatch(
        file: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ChecksumMismatch {
            file: file.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
