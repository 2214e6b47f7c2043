//! Domain error types
//!
//! Validation failures raised while constructing domain values.
//! These are always rejected before any I/O happens.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid vault-relative path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path is not within the vault root
    #[error("Path not within vault root: {0}")]
    PathNotInVault(String),

    /// Invalid content hash format (expected lowercase hex SHA-256)
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Invalid actor or machine identifier
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Invalid glob pattern in an ignore rule
    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Why it was rejected
        reason: String,
    },

    /// A record mutation's precondition did not hold
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidPath("../escape".to_string());
        assert_eq!(err.to_string(), "Invalid path: ../escape");

        let err = DomainError::InvalidPattern {
            pattern: "[".to_string(),
            reason: "unclosed".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid ignore pattern '[': unclosed");
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::InvalidHash("abc".to_string());
        let err2 = DomainError::InvalidHash("abc".to_string());
        let err3 = DomainError::InvalidHash("def".to_string());

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}
