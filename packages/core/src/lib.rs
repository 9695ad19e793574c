//! Ordering Core - Nested-Set Tree Ordering Engine
//!
//! This crate keeps a tree stored in a flat relational table consistent. Each
//! row carries a parent reference and a sibling position maintained by the
//! host application, plus the derived nested-set columns (`left`, `right`,
//! `level`) that this crate owns.
//!
//! # Architecture
//!
//! - **Accessor-only engine**: tree logic talks to a [`db::NodeAccessor`], never to SQL
//! - **libsql/Turso**: embedded SQLite-compatible backend with configurable column names
//! - **One transaction per call**: a move or removal commits fully or not at all
//! - **Explicit traversal**: rebuilds use an explicit stack, so deep trees cannot
//!   overflow the call stack
//!
//! # Modules
//!
//! - [`models`] - Data structures (Node, Anchor, NodeUpdate, etc.)
//! - [`config`] - Table and column mapping
//! - [`db`] - Storage traits, in-memory and libsql backends, tree events
//! - [`operations`] - Rebuild engine, position allocator, deletion resolver
//! - [`services`] - The ordering facade
//!
//! # Example
//!
//! ```rust
//! use ordering_core::db::MemoryStore;
//! use ordering_core::models::{Anchor, Node};
//! use ordering_core::{OrderingService, TreeConfig};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryStore::with_nodes(vec![
//!     Node::new(1, None, 1),
//!     Node::new(2, None, 2),
//!     Node::new(3, Some(1), 1),
//!     Node::new(4, Some(1), 2),
//! ]));
//! let service = OrderingService::new(store, TreeConfig::new("pages")).unwrap();
//!
//! let snapshot = service.move_node(4, Some(1), Anchor::First).await.unwrap();
//! assert_eq!(snapshot.preorder(), vec![1, 4, 3, 2]);
//! # });
//! ```

pub mod config;
pub mod db;
pub mod models;
pub mod operations;
pub mod services;

// Re-export commonly used types
pub use config::{ColumnMap, TreeConfig};
pub use db::TreeEvent;
pub use models::*;
pub use operations::{OrderingError, RetryQueue, TreeSnapshot};
pub use services::*;
