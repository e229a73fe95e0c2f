//! Common error types for SecureShare.

use thiserror::Error;

/// Top-level error type for SecureShare operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Request was malformed (missing file, missing recipient, oversized file).
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Requester is not permitted to perform the operation.
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Cryptographic operation failed.
    ///
    /// The message is for logs only; callers see [`Error::public_message`].
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage backend failed or is inconsistent.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Caller-facing classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected request; the caller can fix it and retry.
    Validation,
    /// Unknown transfer, recipient or user.
    NotFound,
    /// Requester is not the receiver.
    Authorization,
    /// Key or ciphertext could not be used.
    Crypto,
    /// Disk or stream failure.
    Io,
    /// Anything else that is the service's fault.
    Internal,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Unauthorized(_) => ErrorKind::Authorization,
            Error::Crypto(_) => ErrorKind::Crypto,
            Error::Io(_) => ErrorKind::Io,
            Error::Storage(_)
            | Error::Serialization(_)
            | Error::AlreadyExists(_)
            | Error::Config(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-equivalent status code for this error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Authorization => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Crypto | ErrorKind::Io | ErrorKind::Internal => 500,
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Cryptographic failures collapse to one fixed string so that callers
    /// cannot distinguish a wrong key from a corrupted envelope or bad padding.
    pub fn public_message(&self) -> String {
        match self {
            Error::Validation(msg) => msg.clone(),
            Error::NotFound(msg) => msg.clone(),
            Error::Unauthorized(_) => "not authorized to access this transfer".to_string(),
            Error::Crypto(_) => "decryption failed".to_string(),
            Error::Io(_) => "storage I/O failure".to_string(),
            _ => "internal error".to_string(),
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
