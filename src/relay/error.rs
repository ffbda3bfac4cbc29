//! Typed failures of relay operations.

use crate::storage::StorageError;
use thiserror::Error;

/// Coarse classification of a [`RelayError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested file does not exist in the user's namespace
    NotFound,
    /// Network, store or local disk failure; retrying may help
    TransientIo,
    /// The store rejected the credentials or the request
    PermissionDenied,
    /// The request itself is malformed (bad name, file too large)
    InvalidInput,
}

/// Errors surfaced by [`crate::relay::RelayService`]
#[derive(Error, Debug)]
pub enum RelayError {
    /// The requested object does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// Transport, store or disk failure
    #[error("transient I/O failure: {0}")]
    TransientIo(String),
    /// Access to the store was denied
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The request was rejected before any transfer
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl RelayError {
    /// Returns the error classification
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::TransientIo(_) => ErrorKind::TransientIo,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// Whether the same request could succeed if repeated later
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }

    /// Text shown to the requester.
    ///
    /// Input errors are explained; backend errors stay opaque and the
    /// details only go to the log.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(detail) => detail.clone(),
            Self::NotFound(_) => "File not found.".to_string(),
            Self::PermissionDenied(_) => "Storage access denied.".to_string(),
            Self::TransientIo(_) => {
                "Storage is temporarily unavailable. Please try again.".to_string()
            }
        }
    }
}

impl From<StorageError> for RelayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::NotFound(key),
            StorageError::AccessDenied(detail) => Self::PermissionDenied(detail),
            StorageError::Request(_)
            | StorageError::Io(_)
            | StorageError::Presign(_)
            | StorageError::Config(_) => Self::TransientIo(err.to_string()),
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::TransientIo(format!("local file error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_to_kinds() {
        let cases = [
            (StorageError::NotFound("user_1/a".into()), ErrorKind::NotFound),
            (
                StorageError::AccessDenied("403".into()),
                ErrorKind::PermissionDenied,
            ),
            (StorageError::Request("timeout".into()), ErrorKind::TransientIo),
            (
                StorageError::Io(std::io::Error::other("disk full")),
                ErrorKind::TransientIo,
            ),
        ];

        for (storage_err, expected) in cases {
            assert_eq!(RelayError::from(storage_err).kind(), expected);
        }
    }

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(RelayError::TransientIo("reset".into()).is_retryable());
        assert!(!RelayError::NotFound("x".into()).is_retryable());
        assert!(!RelayError::InvalidInput("x".into()).is_retryable());
    }

    #[test]
    fn test_backend_details_stay_out_of_user_message() {
        let err = RelayError::PermissionDenied("SignatureDoesNotMatch for AKID...".into());
        assert_eq!(err.user_message(), "Storage access denied.");

        let err = RelayError::InvalidInput("File name is too long.".into());
        assert_eq!(err.user_message(), "File name is too long.");
    }
}
