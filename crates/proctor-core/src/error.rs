//! Persistence error types.
//!
//! Defined in `proctor-core` so the recovery manager can classify storage
//! failures (missing key vs. broken backend) without string matching.

use thiserror::Error;

/// Errors that can occur when reading or writing keyed session storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No entry exists under the requested key.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The stored bytes could not be encoded or decoded.
    #[error("serialization failed for {key}: {message}")]
    Serialization { key: String, message: String },

    /// The backing medium rejected the operation.
    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend is not usable right now (quota, lock, injected failure).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns `true` when the key simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Wrap a serde_json failure for `key`.
    pub fn serialization(key: &str, err: serde_json::Error) -> Self {
        StoreError::Serialization {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_classification() {
        assert!(StoreError::NotFound("k".into()).is_not_found());
        assert!(!StoreError::Unavailable("quota".into()).is_not_found());
    }

    #[test]
    fn display_messages() {
        let err = StoreError::Io {
            key: "exam-session-1".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("exam-session-1"));
        assert_eq!(
            StoreError::Unavailable("full".into()).to_string(),
            "storage unavailable: full"
        );
    }
}
