//! Error types for the storage primitives.

use thiserror::Error;

/// Error returned by storage primitive operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O operation failed.
    #[error("I/O error during {context}: {source}")]
    Io {
        /// Context describing the operation.
        context: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A lock could not be acquired or released.
    #[error("lock error: {0}")]
    Lock(String),

    /// On-disk data is corrupted or malformed.
    #[error("corrupted data: {0}")]
    Corrupted(String),
}

impl StoreError {
    /// Creates an I/O error with context.
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a corrupted data error.
    pub fn corrupted<S: Into<String>>(context: S) -> Self {
        Self::Corrupted(context.into())
    }
}

/// Result type for storage primitive operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::io(
            "reading users file",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(format!("{err}").contains("reading users file"));

        let err = StoreError::Lock("busy".to_string());
        assert!(format!("{err}").contains("lock error"));
    }
}
