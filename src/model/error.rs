//! Engine error types
//!
//! Defines all errors that can occur while fragmenting members or resolving
//! fragment identifiers. A member that lacks an extractable property is not an
//! error: it surfaces as an [`ExtractionMiss`] skip result instead. Neither is
//! a member whose monotonic value falls behind the open bucket, reported as a
//! [`LateArrival`].

use super::types::BucketId;
use thiserror::Error;

/// Errors that can occur in the fragmentation engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Request has fewer path segments than the extractor pipeline consumes
    #[error("Not enough path segments: required {required}, found {found}")]
    NotEnoughPathSegments { required: usize, found: usize },

    /// Leaf lookup failed
    #[error("No such bucket: {0}")]
    NoSuchBucket(String),

    /// Fragment identifier could not be parsed or is missing a level value
    #[error("Invalid fragment identifier: {0}")]
    InvalidIdentifier(String),

    /// Connection or query failure from the repository
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persisted data failed an integrity check
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Invalid strategy or repository configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Broken internal invariant
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the caller may retry the same operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::BackendUnavailable(_) | EngineError::Io(_))
    }

    /// Whether the error was caused by the request itself
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::NotEnoughPathSegments { .. } | EngineError::InvalidIdentifier(_)
        )
    }
}

impl From<bincode::Error> for EngineError {
    fn from(err: bincode::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::BackendUnavailable(err.to_string())
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// A member lacked the property an extractor expects.
///
/// Data-quality signal: the member is skipped for bucketization and the
/// write reports it instead of failing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("member {member_id} has no value for {predicate}")]
pub struct ExtractionMiss {
    pub member_id: String,
    pub predicate: String,
}

impl ExtractionMiss {
    pub fn new(member_id: impl Into<String>, predicate: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            predicate: predicate.into(),
        }
    }
}

/// A member sorts before the open bucket of a monotonic level.
///
/// Every sibling before the open one is sealed, so the member is not placed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("member {member_id} is late: '{key}' precedes the open bucket under '{parent}'")]
pub struct LateArrival {
    pub member_id: String,
    /// Bucket whose children the level orders
    pub parent: BucketId,
    /// Key the member would have been placed under
    pub key: String,
}

impl LateArrival {
    pub fn new(member_id: impl Into<String>, parent: BucketId, key: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            parent,
            key: key.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::NotEnoughPathSegments {
            required: 2,
            found: 1,
        };
        assert_eq!(
            err.to_string(),
            "Not enough path segments: required 2, found 1"
        );

        let miss = ExtractionMiss::new("urn:m:1", "http://example.org/x");
        assert_eq!(
            miss.to_string(),
            "member urn:m:1 has no value for http://example.org/x"
        );

        let late = LateArrival::new("urn:m:2", BucketId::from_key("a"), "1000");
        assert_eq!(
            late.to_string(),
            "member urn:m:2 is late: '1000' precedes the open bucket under 'a'"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(EngineError::BackendUnavailable("down".into()).is_retryable());
        assert!(!EngineError::InvalidIdentifier("x".into()).is_retryable());
        assert!(EngineError::InvalidIdentifier("x".into()).is_client_error());
        assert!(!EngineError::NoSuchBucket("a/b".into()).is_client_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EngineError = io_err.into();
        assert!(matches!(err, EngineError::Io(_)));
        assert!(err.is_retryable());
    }
}
