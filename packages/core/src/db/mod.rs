//! Database Layer
//!
//! This module holds the Node Record Accessor and its backends:
//!
//! - [`NodeAccessor`] / [`TreeTransaction`] / [`TreeStore`] - the storage
//!   abstraction the ordering engine is written against
//! - [`MemoryStore`] - in-memory backend used by tests and host applications
//! - [`TursoStore`] - libsql/SQLite backend with configurable column names
//! - [`TreeEvent`] - notifications emitted after committed changes
//!
//! Every operation reads the table fresh; there is no in-memory tree cache.

mod database;
mod error;
pub mod events;
mod memory_store;
mod node_store;
mod turso_store;

pub use database::{DatabaseService, BUSY_TIMEOUT_MS};
pub use error::DatabaseError;
pub use events::{TreeEvent, EVENT_CHANNEL_CAPACITY};
pub use memory_store::{MemoryStore, MemoryTransaction};
pub use node_store::{NodeAccessor, StoreResult, TreeStore, TreeTransaction};
pub use turso_store::{TursoStore, TursoTransaction};

pub(crate) use node_store::sort_siblings;
