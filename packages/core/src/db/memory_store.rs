//! MemoryStore - In-Memory TreeStore Implementation
//!
//! Keeps the table in a `BTreeMap` keyed by node id. Transactions are
//! serialised by an async writer lock: `begin` takes the lock and clones the
//! committed table into a working copy, `commit` publishes the copy and
//! releases the lock, `rollback` (or drop) discards it.
//!
//! Display reads (`TreeStore::get`, `TreeStore::children`) read the committed
//! table without waiting for the writer lock.
//!
//! The store also supports fault injection so tests can force a mid-operation
//! storage failure or lock contention and observe the rollback behaviour.

use crate::db::node_store::{sort_siblings, NodeAccessor, StoreResult, TreeStore, TreeTransaction};
use crate::models::{IntervalAssignment, Node, NodeId, NodeUpdate, PositionScope};
use crate::operations::OrderingError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::OwnedMutexGuard;

type Table = BTreeMap<NodeId, Node>;

#[derive(Debug, Default)]
struct Faults {
    /// Remaining `begin` calls that fail with a concurrency conflict
    conflicts: AtomicUsize,
    /// Fail `write_intervals` with a storage error
    interval_writes: AtomicBool,
}

/// In-memory backing table
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    committed: Arc<RwLock<Table>>,
    writer: Arc<tokio::sync::Mutex<()>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `nodes`
    pub fn with_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let store = Self::new();
        for node in nodes {
            store.insert(node);
        }
        store
    }

    /// Insert or replace a row, bypassing the engine (data-entry layer)
    pub fn insert(&self, node: Node) {
        self.write_committed().insert(node.id, node);
    }

    /// Physically delete a row, bypassing the engine
    pub fn delete_row(&self, id: NodeId) -> Option<Node> {
        self.write_committed().remove(&id)
    }

    /// All committed rows ordered by id
    pub fn rows(&self) -> Vec<Node> {
        self.read_committed().values().cloned().collect()
    }

    /// Make the next `count` calls to `begin` fail with a concurrency conflict
    pub fn inject_conflicts(&self, count: usize) {
        self.faults.conflicts.store(count, Ordering::SeqCst);
    }

    /// Make interval writes fail with a storage error until reset
    pub fn fail_interval_writes(&self, fail: bool) {
        self.faults.interval_writes.store(fail, Ordering::SeqCst);
    }

    fn read_committed(&self) -> std::sync::RwLockReadGuard<'_, Table> {
        self.committed.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_committed(&self) -> std::sync::RwLockWriteGuard<'_, Table> {
        self.committed.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_conflict(&self) -> bool {
        self.faults
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TreeStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn TreeTransaction>> {
        if self.take_conflict() {
            return Err(OrderingError::concurrency_conflict(
                "memory store writer lock is held by another transaction",
            ));
        }

        let lock = self.writer.clone().lock_owned().await;
        let working = self.read_committed().clone();

        Ok(Box::new(MemoryTransaction {
            _lock: lock,
            committed: self.committed.clone(),
            faults: self.faults.clone(),
            working: Mutex::new(working),
        }))
    }

    async fn get(&self, id: NodeId) -> StoreResult<Option<Node>> {
        Ok(self.read_committed().get(&id).cloned())
    }

    async fn children(&self, parent_id: Option<NodeId>) -> StoreResult<Vec<Node>> {
        let mut children: Vec<Node> = self
            .read_committed()
            .values()
            .filter(|n| n.parent_id == parent_id)
            .cloned()
            .collect();
        sort_siblings(&mut children, PositionScope::Sibling);
        Ok(children)
    }
}

/// Working copy of the table held for the duration of one transaction
pub struct MemoryTransaction {
    _lock: OwnedMutexGuard<()>,
    committed: Arc<RwLock<Table>>,
    faults: Arc<Faults>,
    working: Mutex<Table>,
}

impl MemoryTransaction {
    fn table(&self) -> MutexGuard<'_, Table> {
        self.working.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn scope_values<'a>(
    table: &'a Table,
    parent_id: Option<NodeId>,
    scope: PositionScope,
) -> impl Iterator<Item = i64> + 'a {
    table
        .values()
        .filter(move |n| n.parent_id == parent_id)
        .filter_map(move |n| n.scope_position(scope))
}

#[async_trait]
impl NodeAccessor for MemoryTransaction {
    async fn fetch(&self, id: NodeId) -> StoreResult<Option<Node>> {
        Ok(self.table().get(&id).cloned())
    }

    async fn fetch_children(
        &self,
        parent_id: Option<NodeId>,
        scope: PositionScope,
    ) -> StoreResult<Vec<Node>> {
        let mut children: Vec<Node> = self
            .table()
            .values()
            .filter(|n| n.parent_id == parent_id)
            .cloned()
            .collect();
        sort_siblings(&mut children, scope);
        Ok(children)
    }

    async fn fetch_all(&self) -> StoreResult<Vec<Node>> {
        Ok(self.table().values().cloned().collect())
    }

    async fn update(&self, id: NodeId, update: NodeUpdate) -> StoreResult<()> {
        let mut table = self.table();
        let node = table.get_mut(&id).ok_or(OrderingError::not_found(id))?;
        update.apply_to(node);
        Ok(())
    }

    async fn shift_positions(
        &self,
        parent_id: Option<NodeId>,
        scope: PositionScope,
        from_inclusive: i64,
        delta: i64,
    ) -> StoreResult<u64> {
        let mut shifted = 0;
        for node in self.table().values_mut() {
            if node.parent_id != parent_id {
                continue;
            }
            match scope {
                PositionScope::Sibling if node.position >= from_inclusive => {
                    node.position += delta;
                    shifted += 1;
                }
                PositionScope::Root => {
                    if let Some(value) = node.root_position.filter(|v| *v >= from_inclusive) {
                        node.root_position = Some(value + delta);
                        shifted += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(shifted)
    }

    async fn max_position(
        &self,
        parent_id: Option<NodeId>,
        scope: PositionScope,
    ) -> StoreResult<Option<i64>> {
        Ok(scope_values(&self.table(), parent_id, scope).max())
    }

    async fn min_position(
        &self,
        parent_id: Option<NodeId>,
        scope: PositionScope,
    ) -> StoreResult<Option<i64>> {
        Ok(scope_values(&self.table(), parent_id, scope).min())
    }

    async fn write_intervals(&self, assignments: &[IntervalAssignment]) -> StoreResult<()> {
        if self.faults.interval_writes.load(Ordering::SeqCst) {
            return Err(OrderingError::storage("interval write rejected by memory store"));
        }

        let mut table = self.table();
        for assignment in assignments {
            let node = table
                .get_mut(&assignment.id)
                .ok_or(OrderingError::not_found(assignment.id))?;
            node.left = assignment.left;
            node.right = assignment.right;
            node.level = assignment.level;
        }
        Ok(())
    }
}

#[async_trait]
impl TreeTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        // The writer lock is released when `_lock` drops, after publishing
        let MemoryTransaction {
            _lock,
            committed,
            working,
            ..
        } = *self;
        let working = working.into_inner().unwrap_or_else(PoisonError::into_inner);
        *committed.write().unwrap_or_else(PoisonError::into_inner) = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryStore {
        MemoryStore::with_nodes(vec![
            Node::new(1, None, 1).with_root_position(1),
            Node::new(2, None, 1).with_root_position(2),
            Node::new(3, Some(1), 1),
            Node::new(4, Some(1), 2),
            Node::new(5, Some(1), 3),
        ])
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = sample();
        let tx = store.begin().await.unwrap();
        tx.update(3, NodeUpdate::scope_position(PositionScope::Sibling, 9))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get(3).await.unwrap().unwrap().position, 9);
    }

    #[tokio::test]
    async fn test_rollback_and_drop_discard_writes() {
        let store = sample();

        let tx = store.begin().await.unwrap();
        tx.shift_positions(Some(1), PositionScope::Sibling, 1, 10)
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        {
            let tx = store.begin().await.unwrap();
            tx.update(4, NodeUpdate::placement(None, PositionScope::Sibling, 3))
                .await
                .unwrap();
        }

        assert_eq!(store.rows(), sample().rows());
    }

    #[tokio::test]
    async fn test_uncommitted_writes_invisible_to_display_reads() {
        let store = sample();
        let tx = store.begin().await.unwrap();
        tx.update(5, NodeUpdate::scope_position(PositionScope::Sibling, 0))
            .await
            .unwrap();

        let children = store.children(Some(1)).await.unwrap();
        assert_eq!(children.last().unwrap().id, 5);

        let inside = tx.fetch_children(Some(1), PositionScope::Sibling).await.unwrap();
        assert_eq!(inside[0].id, 5);
    }

    #[tokio::test]
    async fn test_shift_only_touches_matching_siblings() {
        let store = sample();
        let tx = store.begin().await.unwrap();
        let shifted = tx
            .shift_positions(Some(1), PositionScope::Sibling, 2, 1)
            .await
            .unwrap();
        assert_eq!(shifted, 2);

        let positions: Vec<i64> = tx
            .fetch_children(Some(1), PositionScope::Sibling)
            .await
            .unwrap()
            .iter()
            .map(|n| n.position)
            .collect();
        assert_eq!(positions, vec![1, 3, 4]);

        // Roots share position 1 but only the root column is shifted in root scope
        let shifted = tx
            .shift_positions(None, PositionScope::Root, 2, 1)
            .await
            .unwrap();
        assert_eq!(shifted, 1);
        assert_eq!(tx.fetch(2).await.unwrap().unwrap().root_position, Some(3));
        assert_eq!(tx.fetch(1).await.unwrap().unwrap().root_position, Some(1));
    }

    #[tokio::test]
    async fn test_min_max_positions() {
        let store = sample();
        let tx = store.begin().await.unwrap();
        assert_eq!(
            tx.max_position(Some(1), PositionScope::Sibling).await.unwrap(),
            Some(3)
        );
        assert_eq!(
            tx.min_position(None, PositionScope::Root).await.unwrap(),
            Some(1)
        );
        assert_eq!(
            tx.max_position(Some(3), PositionScope::Sibling).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let store = sample();
        let tx = store.begin().await.unwrap();
        let err = tx
            .update(99, NodeUpdate::scope_position(PositionScope::Sibling, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderingError::NotFound { id: 99 }));
    }

    #[tokio::test]
    async fn test_injected_conflict_is_consumed() {
        let store = sample();
        store.inject_conflicts(1);
        assert!(matches!(
            store.begin().await,
            Err(OrderingError::ConcurrencyConflict { .. })
        ));
        assert!(store.begin().await.is_ok());
    }
}
