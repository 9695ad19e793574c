//! Node Record Accessor - Storage Abstraction Layer
//!
//! This module defines the traits the ordering engine uses to reach the
//! backing table. The rebuild engine, the position allocator and the deletion
//! resolver depend only on [`NodeAccessor`]; they never see SQL.
//!
//! # Architecture
//!
//! - **`NodeAccessor`**: row reads and writes by id and by parent filter
//! - **`TreeTransaction`**: a `NodeAccessor` bound to one transaction, with
//!   explicit commit and rollback
//! - **`TreeStore`**: opens transactions and serves display reads
//!
//! # Design Decisions
//!
//! 1. **Async-First**: backends may be embedded (libsql) or in-memory; both
//!    expose the same async surface
//! 2. **No caching**: every call reads the table fresh because concurrent
//!    writers may have changed it
//! 3. **Transactions own the read-modify-write**: all reads an operation makes
//!    go through the same transaction as its writes, so a rebuild sees the
//!    shifted positions and nothing else
//!
//! # Examples
//!
//! ```rust
//! use ordering_core::db::{MemoryStore, NodeAccessor, TreeStore};
//! use ordering_core::models::{Node, PositionScope};
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! store.insert(Node::new(1, None, 1));
//! store.insert(Node::new(2, Some(1), 1));
//!
//! let tx = store.begin().await.unwrap();
//! tx.shift_positions(Some(1), PositionScope::Sibling, 1, 1).await.unwrap();
//! tx.commit().await.unwrap();
//!
//! let children = store.children(Some(1)).await.unwrap();
//! assert_eq!(children[0].position, 2);
//! # });
//! ```

use crate::models::{IntervalAssignment, Node, NodeId, NodeUpdate, PositionScope};
use crate::operations::OrderingError;
use async_trait::async_trait;

/// Result type used by every store operation
pub type StoreResult<T> = Result<T, OrderingError>;

/// Row-level access to the backing table
///
/// Implementations must be `Send + Sync` so engine futures can move between
/// threads.
#[async_trait]
pub trait NodeAccessor: Send + Sync {
    /// Get a node by id
    ///
    /// Returns `Ok(None)` when the row does not exist.
    async fn fetch(&self, id: NodeId) -> StoreResult<Option<Node>>;

    /// Children of `parent_id` (`None` = roots) ordered by the scope's column
    ///
    /// Ties are broken by id. Roots without a value in the root ordering
    /// column sort after those with one.
    async fn fetch_children(
        &self,
        parent_id: Option<NodeId>,
        scope: PositionScope,
    ) -> StoreResult<Vec<Node>>;

    /// Every row of the tree, in no particular order
    async fn fetch_all(&self) -> StoreResult<Vec<Node>>;

    /// Apply a sparse update to one row
    ///
    /// # Errors
    ///
    /// `OrderingError::NotFound` if the row does not exist.
    async fn update(&self, id: NodeId, update: NodeUpdate) -> StoreResult<()>;

    /// Add `delta` to the scope column of every child of `parent_id` whose
    /// value is `>= from_inclusive`
    ///
    /// Returns the number of rows shifted.
    async fn shift_positions(
        &self,
        parent_id: Option<NodeId>,
        scope: PositionScope,
        from_inclusive: i64,
        delta: i64,
    ) -> StoreResult<u64>;

    /// Largest scope value among the children of `parent_id`
    async fn max_position(
        &self,
        parent_id: Option<NodeId>,
        scope: PositionScope,
    ) -> StoreResult<Option<i64>>;

    /// Smallest scope value among the children of `parent_id`
    async fn min_position(
        &self,
        parent_id: Option<NodeId>,
        scope: PositionScope,
    ) -> StoreResult<Option<i64>>;

    /// Write rebuild output (left, right, level) for the given rows
    async fn write_intervals(&self, assignments: &[IntervalAssignment]) -> StoreResult<()>;
}

/// A `NodeAccessor` scoped to one transaction
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait TreeTransaction: NodeAccessor {
    /// Publish every write made through this transaction
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard every write made through this transaction
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Entry point to a backing table
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Open a transaction that serialises against other writers of the tree
    ///
    /// # Errors
    ///
    /// `OrderingError::ConcurrencyConflict` when the lock cannot be taken.
    async fn begin(&self) -> StoreResult<Box<dyn TreeTransaction>>;

    /// Display read of one node outside any transaction
    async fn get(&self, id: NodeId) -> StoreResult<Option<Node>>;

    /// Display read of the children of `parent_id`, ordered by position
    ///
    /// Not transactional; may trail very recent writes.
    async fn children(&self, parent_id: Option<NodeId>) -> StoreResult<Vec<Node>>;
}

/// Ordering key used by every backend for `fetch_children`
pub(crate) fn sort_siblings(nodes: &mut [Node], scope: PositionScope) {
    match scope {
        PositionScope::Sibling => nodes.sort_by_key(|n| (n.position, n.id)),
        PositionScope::Root => nodes.sort_by_key(|n| {
            (
                n.root_position.is_none(),
                n.root_position.unwrap_or(0),
                n.position,
                n.id,
            )
        }),
    }
}
