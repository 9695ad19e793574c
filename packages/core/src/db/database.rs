//! Database Connection Management
//!
//! This module provides connection management for the libsql backend.
//!
//! # Architecture
//!
//! - **Path-agnostic**: accepts any valid PathBuf
//! - **WAL mode**: Write-Ahead Logging so display reads do not block writers
//! - **Busy timeout**: connections wait up to 5 seconds for a lock before the
//!   store reports a concurrency conflict
//!
//! # Database Connection Patterns
//!
//! **ALWAYS use `connect_with_timeout()` in async functions.** Every
//! transaction opens its own connection; closing a connection with an open
//! transaction rolls it back.
//!
//! ```no_run
//! # use ordering_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/tree.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::TreeConfig;
use crate::db::error::DatabaseError;
use libsql::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Milliseconds a connection waits on a locked database
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Database service for managing the libsql connection
#[derive(Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,
}

impl std::fmt::Debug for DatabaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseService")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl DatabaseService {
    /// Open (or create) the database file at `db_path`
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Enable WAL mode and the busy timeout
    ///
    /// The tree table itself is expected to exist already; see
    /// [`DatabaseService::ensure_table`] for development setups.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - A pragma cannot be applied
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
        };

        service.initialize().await?;
        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    async fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await
            .map_err(|e| DatabaseError::initialization_failed(e.to_string()))?;

        Ok(())
    }

    /// Create the tree table described by `config` if it does not exist
    ///
    /// Intended for tests and the development CLI. Production tables belong
    /// to the host application and must already carry the mapped columns.
    pub async fn ensure_table(&self, config: &TreeConfig) -> Result<(), DatabaseError> {
        config
            .validate()
            .map_err(|e| DatabaseError::initialization_failed(e.to_string()))?;

        let conn = self.connect_with_timeout().await?;
        let c = &config.columns;

        let mut columns = vec![
            format!("\"{}\" INTEGER PRIMARY KEY", c.id),
            format!("\"{}\" INTEGER", c.parent_id),
            format!("\"{}\" INTEGER NOT NULL DEFAULT 0", c.left),
            format!("\"{}\" INTEGER NOT NULL DEFAULT 0", c.right),
            format!("\"{}\" INTEGER NOT NULL DEFAULT 0", c.level),
            format!("\"{}\" INTEGER NOT NULL DEFAULT 0", c.position),
        ];
        if let Some(root_position) = &c.root_position {
            columns.push(format!("\"{}\" INTEGER", root_position));
        }

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
                config.table,
                columns.join(", ")
            ),
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create table '{}': {}", config.table, e))
        })?;

        // Index on parent (children queries and position shifts)
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS \"idx_{table}_{parent}\" ON \"{table}\"(\"{parent}\", \"{pos}\")",
                table = config.table,
                parent = c.parent_id,
                pos = c.position
            ),
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!(
                "Failed to create parent index on '{}': {}",
                config.table, e
            ))
        })?;

        Ok(())
    }

    /// Get a raw connection
    ///
    /// Use only where the connection does not cross await points; prefer
    /// [`DatabaseService::connect_with_timeout`].
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get an async connection with busy timeout configured
    ///
    /// Sets a 5-second busy timeout so concurrent transactions wait for the
    /// lock instead of failing immediately when the database is locked.
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(&conn, &format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
            .await?;

        Ok(conn)
    }
}
