//! Error types for the ordering engine
//!
//! Every failure of the rebuild engine, the position allocator, the deletion
//! resolver and the ordering service is reported as an [`OrderingError`]. None
//! of them are swallowed inside the engine; the service rolls back its
//! transaction and hands the error to the caller.

use crate::db::DatabaseError;
use crate::models::NodeId;
use thiserror::Error;

/// Errors that can occur while maintaining the nested-set columns
///
/// # Examples
///
/// ```rust
/// use ordering_core::operations::OrderingError;
///
/// let err = OrderingError::not_found(42);
/// assert_eq!(err.to_string(), "Node '42' does not exist");
///
/// let err = OrderingError::structural_integrity("node 3 would become its own ancestor");
/// assert!(!err.is_retriable());
/// ```
#[derive(Error, Debug)]
pub enum OrderingError {
    /// Referenced node (moved node, parent or sibling) does not exist
    #[error("Node '{id}' does not exist")]
    NotFound { id: NodeId },

    /// A cycle would be introduced or already exists in the parent column
    #[error("Structural integrity violated: {reason}")]
    StructuralIntegrity { reason: String },

    /// The store detected contention it could not resolve
    ///
    /// The operation was rolled back completely; callers may retry.
    #[error("Concurrency conflict: {context}")]
    ConcurrencyConflict { context: String },

    /// The backing store rejected a read or write
    #[error("Storage error: {0}")]
    Storage(DatabaseError),

    /// The sibling reference cannot be used for this move
    #[error("Invalid anchor: {reason}")]
    InvalidAnchor { reason: String },

    /// Column mapping or tree configuration is unusable
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl OrderingError {
    /// Create a NotFound error
    pub fn not_found(id: NodeId) -> Self {
        Self::NotFound { id }
    }

    /// Create a StructuralIntegrity error
    pub fn structural_integrity(reason: impl Into<String>) -> Self {
        Self::StructuralIntegrity {
            reason: reason.into(),
        }
    }

    /// Create a ConcurrencyConflict error
    pub fn concurrency_conflict(context: impl Into<String>) -> Self {
        Self::ConcurrencyConflict {
            context: context.into(),
        }
    }

    /// Create an InvalidAnchor error
    pub fn invalid_anchor(reason: impl Into<String>) -> Self {
        Self::InvalidAnchor {
            reason: reason.into(),
        }
    }

    /// Create an InvalidConfig error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a Storage error from a backend message
    pub fn storage(context: impl Into<String>) -> Self {
        Self::Storage(DatabaseError::sql_execution(context))
    }

    /// Whether retrying the whole operation may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<DatabaseError> for OrderingError {
    fn from(err: DatabaseError) -> Self {
        if err.is_busy() {
            Self::ConcurrencyConflict {
                context: err.to_string(),
            }
        } else {
            Self::Storage(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_database_error_becomes_conflict() {
        let err: OrderingError = DatabaseError::Busy {
            context: "BEGIN IMMEDIATE".to_string(),
        }
        .into();
        assert!(err.is_retriable());
    }

    #[test]
    fn test_other_database_errors_stay_storage() {
        let err: OrderingError = DatabaseError::sql_execution("no such column: lft").into();
        assert!(matches!(err, OrderingError::Storage(_)));
        assert!(!err.is_retriable());
    }
}
