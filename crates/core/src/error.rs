//! Error model shared by the domain layer and remote adapters.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Remote error code signalling that the caller is being rate limited.
pub const THROTTLING_CODE: &str = "RequestLimitExceeded";

/// Remote error code returned when deleting a snapshot that is still referenced
/// (e.g. by a registered image).
pub const SNAPSHOT_IN_USE_CODE: &str = "InvalidSnapshot.InUse";

/// Remote error code used when a request carries an unsupported parameter.
pub const INVALID_PARAMETER_CODE: &str = "InvalidParameterValue";

/// Domain-level error.
///
/// Deterministic failures only (malformed identifiers). Remote failures are
/// carried by [`RemoteError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Typed failure returned by the remote storage API.
///
/// `code` is the machine-readable error code the retry classifier and the
/// expire path branch on; `message` is free text for logs.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Rate-limit error.
    pub fn throttled() -> Self {
        Self::new(THROTTLING_CODE, "Request limit exceeded.")
    }

    /// Snapshot still referenced elsewhere.
    pub fn snapshot_in_use(snapshot_id: &str) -> Self {
        Self::new(
            SNAPSHOT_IN_USE_CODE,
            format!("The snapshot {snapshot_id} is currently in use"),
        )
    }

    pub fn is_throttling(&self) -> bool {
        self.code == THROTTLING_CODE
    }

    pub fn is_in_use(&self) -> bool {
        self.code == SNAPSHOT_IN_USE_CODE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_codes() {
        assert!(RemoteError::throttled().is_throttling());
        assert!(!RemoteError::throttled().is_in_use());

        let in_use = RemoteError::snapshot_in_use("snap-1");
        assert!(in_use.is_in_use());
        assert!(!in_use.is_throttling());
        assert!(in_use.message.contains("snap-1"));
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = RemoteError::new("UnauthorizedOperation", "nope");
        assert_eq!(err.to_string(), "UnauthorizedOperation: nope");
    }
}
