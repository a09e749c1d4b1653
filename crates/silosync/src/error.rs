use thiserror::Error;

use crate::graphql::RequestError;
use crate::manifest::ManifestError;

/// Errors that can occur while syncing a resource.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Desired state or options are invalid; nothing was sent.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// The remote snapshot contains the same natural key twice.
    #[error("Duplicate remote key \"{key}\" in {collection}")]
    DuplicateRemoteKey { collection: String, key: String },

    /// A remote request failed after retries.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The remote answered, but not with what we asked for.
    #[error("Unexpected response: {message}")]
    Response { message: String },

    /// Manifest could not be loaded.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Unexpected/internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Create a validation error.
    #[inline]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a response error.
    #[inline]
    pub fn response(message: impl Into<String>) -> Self {
        Self::Response {
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error was caused by the server rate limiting us.
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Request(e) if e.inner().is_rate_limited())
    }
}

/// Extract a short error message suitable for display.
///
/// Takes the first line of an error message, which keeps progress lines
/// and failure tables readable.
///
/// # Example
///
/// ```ignore
/// use silosync::error::short_error_message;
/// let error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
/// assert_eq!(short_error_message(&error), "file not found");
/// ```
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
