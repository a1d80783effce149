//! Error taxonomy shared by the fetch, flatten and load paths.
use std::sync::Arc;

use http::StatusCode;
use thiserror::Error;

use crate::ports::{kv_client::KvClientError, snapshot_store::SnapshotError};

/// Failure of a single read against the store.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum FetchError {
    /// The store could not be reached.
    #[error(transparent)]
    Transport(#[from] KvClientError),

    /// The store answered with an unexpected status.
    #[error("Error loading configuration from consul. Status code: {status}.")]
    Protocol { status: StatusCode },

    /// The read was abandoned because the owner is shutting down.
    #[error("Request was cancelled")]
    Cancelled,
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Failure turning payloads into flat configuration keys.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FlattenError {
    #[error("Key {key} is duplicated in the configuration")]
    DuplicateKey { key: String },

    #[error(
        "The key must not be empty. Ensure that there is at least one key under the root of the config or that the data there contains more than just a single value."
    )]
    EmptyKey,

    #[error("Error parsing payload: {0}")]
    Parse(String),

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,
}

pub type FlattenResult<T> = Result<T, FlattenError>;

/// Any failure surfaced to the load or watch exception hooks.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConsulConfigError {
    #[error("The configuration for key {key} was not found and is not optional.")]
    NotFound { key: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Format(#[from] FlattenError),

    #[error("Snapshot error: {0}")]
    Snapshot(Arc<SnapshotError>),
}

impl ConsulConfigError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Fetch(FetchError::Cancelled))
    }
}

impl From<SnapshotError> for ConsulConfigError {
    fn from(error: SnapshotError) -> Self {
        Self::Snapshot(Arc::new(error))
    }
}

pub type ConsulConfigResult<T> = Result<T, ConsulConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_key() {
        let error = ConsulConfigError::NotFound {
            key: "app/db".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "The configuration for key app/db was not found and is not optional."
        );
    }

    #[test]
    fn test_protocol_message_carries_status() {
        let error = FetchError::Protocol {
            status: StatusCode::BAD_REQUEST,
        };
        assert_eq!(
            error.to_string(),
            "Error loading configuration from consul. Status code: 400 Bad Request."
        );
    }

    #[test]
    fn test_cancelled_is_detected() {
        assert!(ConsulConfigError::from(FetchError::Cancelled).is_cancelled());
        assert!(!ConsulConfigError::from(FlattenError::EmptyKey).is_cancelled());
    }
}
