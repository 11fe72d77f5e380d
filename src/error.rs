use std::io;

/// Unified error type for the storage engine.
///
/// A missing key is not an error: point reads return `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error from disk operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption detected (CRC mismatch, bad format, etc).
    #[error("Corruption: {0}")]
    Corruption(String),

    /// Conflicting options or a malformed request.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is recognised but not available in this configuration.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The database was created with a different comparator.
    #[error("comparator mismatch: database uses {expected}, options supply {found}")]
    ComparatorMismatch { expected: String, found: String },

    /// The engine is closing and no longer accepts work.
    #[error("database is shutting down")]
    ShutdownInProgress,
}

impl Error {
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Corruption(format!("malformed manifest record: {e}"))
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
