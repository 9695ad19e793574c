//! Database Error Types
//!
//! This module defines error types for the libsql backend, covering
//! connection, initialization and statement failures.

use std::path::PathBuf;
use thiserror::Error;

/// Database operation errors
///
/// Backend failures are surfaced verbatim to the ordering layer, which wraps
/// them in `OrderingError::Storage` (or `ConcurrencyConflict` when the
/// database reports lock contention).
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database pragmas or tables
    #[error("Failed to initialize database: {0}")]
    InitializationFailed(String),

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// Database is locked by another writer
    #[error("Database busy: {context}")]
    Busy { context: String },

    /// A row could not be decoded into a node
    #[error("Failed to decode row: {context}")]
    RowDecode { context: String },
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Create a row decode error
    pub fn row_decode(context: impl Into<String>) -> Self {
        Self::RowDecode {
            context: context.into(),
        }
    }

    /// Classify a libsql failure, separating lock contention from other errors
    pub fn from_statement(context: &str, source: libsql::Error) -> Self {
        let message = source.to_string();
        if is_lock_message(&message) {
            Self::Busy {
                context: format!("{}: {}", context, message),
            }
        } else {
            Self::SqlExecutionError {
                context: format!("{}: {}", context, message),
            }
        }
    }

    /// Whether the failure came from lock contention (SQLITE_BUSY / SQLITE_LOCKED)
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Busy { .. } => true,
            Self::LibsqlError(e) => is_lock_message(&e.to_string()),
            _ => false,
        }
    }
}

fn is_lock_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_messages_are_busy() {
        assert!(is_lock_message("SQLite failure: `database is locked`"));
        assert!(is_lock_message("SQLITE_BUSY"));
        assert!(!is_lock_message("UNIQUE constraint failed: tree.id"));
    }

    #[test]
    fn test_busy_classification() {
        let busy = DatabaseError::Busy {
            context: "begin".to_string(),
        };
        assert!(busy.is_busy());
        assert!(!DatabaseError::sql_execution("syntax error").is_busy());
    }
}
