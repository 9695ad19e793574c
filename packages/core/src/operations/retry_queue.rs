//! Retry queue for ordering operations that lose a lock race
//!
//! Every facade call runs inside one store transaction. When another writer
//! holds the tree (SQLite `BUSY`/`LOCKED` after the busy timeout, or a
//! conflicting in-memory writer) the call fails with
//! [`OrderingError::ConcurrencyConflict`] and nothing is written. This queue
//! runs the call again from scratch, re-reading the tree each time.
//!
//! # Example
//!
//! ```rust
//! use ordering_core::db::MemoryStore;
//! use ordering_core::models::{Anchor, Node};
//! use ordering_core::operations::RetryQueue;
//! use ordering_core::{OrderingService, TreeConfig};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryStore::with_nodes(vec![
//!     Node::new(1, None, 1),
//!     Node::new(2, Some(1), 1),
//!     Node::new(3, Some(1), 2),
//! ]));
//! let service = OrderingService::new(store, TreeConfig::new("pages")).unwrap();
//! let queue = RetryQueue::new(Arc::new(service));
//!
//! // Retry up to 3 times with exponential backoff (10ms, 20ms, 40ms)
//! queue.move_with_retry(3, Some(1), Anchor::First, 3).await.unwrap();
//! # });
//! ```

use crate::db::TreeStore;
use crate::models::{Anchor, NodeId};
use crate::operations::rebuild::TreeSnapshot;
use crate::operations::OrderingError;
use crate::services::OrderingService;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Duration;

/// Backoff before the first retry; doubled for each further attempt
const BASE_BACKOFF_MS: u64 = 10;

/// Wraps an [`OrderingService`] and retries calls that hit a concurrency conflict
pub struct RetryQueue<S: TreeStore> {
    service: Arc<OrderingService<S>>,
}

impl<S: TreeStore> Clone for RetryQueue<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

impl<S: TreeStore> RetryQueue<S> {
    pub fn new(service: Arc<OrderingService<S>>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<OrderingService<S>> {
        &self.service
    }

    /// Move a node, retrying on concurrency conflicts
    ///
    /// `max_retries` of 0 means a single attempt.
    ///
    /// # Retry Behavior
    ///
    /// - **Retry on**: `OrderingError::ConcurrencyConflict` only
    /// - **Backoff**: Exponential (10ms, 20ms, 40ms, 80ms, ...)
    /// - **Other errors**: Fail immediately without retry
    pub async fn move_with_retry(
        &self,
        node_id: NodeId,
        target_parent_id: Option<NodeId>,
        anchor: Anchor,
        max_retries: usize,
    ) -> Result<TreeSnapshot, OrderingError> {
        self.run("move", node_id, max_retries, || {
            let service = self.service.clone();
            async move { service.move_node(node_id, target_parent_id, anchor).await }
        })
        .await
    }

    /// Remove a node (pull-up and rebuild), retrying on concurrency conflicts
    pub async fn remove_with_retry(
        &self,
        node_id: NodeId,
        max_retries: usize,
    ) -> Result<TreeSnapshot, OrderingError> {
        self.run("remove", node_id, max_retries, || {
            let service = self.service.clone();
            async move { service.remove(node_id).await }
        })
        .await
    }

    async fn run<F, Fut>(
        &self,
        operation: &str,
        node_id: NodeId,
        max_retries: usize,
        mut attempt_fn: F,
    ) -> Result<TreeSnapshot, OrderingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<TreeSnapshot, OrderingError>>,
    {
        let mut attempt = 0;

        loop {
            match attempt_fn().await {
                Ok(snapshot) => {
                    if attempt > 0 {
                        tracing::debug!(
                            "{} of node {} succeeded after {} retry(ies)",
                            operation,
                            node_id,
                            attempt
                        );
                    }
                    return Ok(snapshot);
                }

                Err(e) if e.is_retriable() && attempt < max_retries => {
                    tracing::debug!(
                        "Conflict on attempt {}/{} to {} node {}: {}. Retrying...",
                        attempt + 1,
                        max_retries + 1,
                        operation,
                        node_id,
                        e
                    );

                    let backoff_ms = BASE_BACKOFF_MS * (1 << attempt.min(16));
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

                    attempt += 1;
                }

                Err(e) => {
                    if e.is_retriable() {
                        tracing::warn!(
                            "Max retries ({}) exceeded for {} of node {}",
                            max_retries,
                            operation,
                            node_id
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::db::MemoryStore;
    use crate::models::Node;

    fn setup() -> (Arc<MemoryStore>, RetryQueue<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_nodes(vec![
            Node::new(1, None, 1),
            Node::new(2, Some(1), 1),
            Node::new(3, Some(1), 2),
            Node::new(4, Some(3), 1),
        ]));
        let service = OrderingService::new(store.clone(), TreeConfig::new("items")).unwrap();
        (store, RetryQueue::new(Arc::new(service)))
    }

    #[tokio::test]
    async fn test_move_succeeds_on_first_attempt() {
        let (store, queue) = setup();
        let start = std::time::Instant::now();

        queue
            .move_with_retry(3, Some(1), Anchor::First, 5)
            .await
            .unwrap();

        assert!(start.elapsed().as_millis() < 50);
        let first = store.children(Some(1)).await.unwrap();
        assert_eq!(first[0].id, 3);
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let (store, queue) = setup();
        store.inject_conflicts(2);

        let snapshot = queue
            .move_with_retry(3, Some(1), Anchor::First, 3)
            .await
            .unwrap();
        assert_eq!(snapshot.preorder(), vec![1, 3, 4, 2]);
    }

    #[tokio::test]
    async fn test_max_retries_exceeded() {
        let (store, queue) = setup();
        store.inject_conflicts(3);

        let err = queue.remove_with_retry(3, 1).await.unwrap_err();
        assert!(matches!(err, OrderingError::ConcurrencyConflict { .. }));

        // Two attempts consumed two conflicts; clear the third
        store.inject_conflicts(0);
        queue.remove_with_retry(3, 0).await.unwrap();
        assert_eq!(store.get(4).await.unwrap().unwrap().parent_id, Some(1));
    }

    #[tokio::test]
    async fn test_other_errors_fail_fast() {
        let (store, queue) = setup();
        let before = store.rows();

        let err = queue
            .move_with_retry(1, Some(4), Anchor::Append, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderingError::StructuralIntegrity { .. }));
        assert_eq!(store.rows(), before);
    }
}
