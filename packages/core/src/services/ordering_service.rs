//! OrderingService - Entry Point for Tree Mutations
//!
//! The form layer and the tree widget handlers call this service and nothing
//! else. Each mutating call:
//!
//! 1. Takes the in-process gate so calls on one service never interleave
//! 2. Opens one store transaction
//! 3. Runs the allocator or resolver, then the rebuild, through that transaction
//!    (removals leave the removed rows out of the rebuild)
//! 4. Commits, or rolls back and returns the error with the tree untouched
//! 5. Broadcasts a [`TreeEvent`] once the commit has succeeded
//!
//! The gate only covers one process. Between processes the store transaction
//! (`BEGIN IMMEDIATE` on libsql) provides the serialisation.

use crate::config::TreeConfig;
use crate::db::{sort_siblings, TreeEvent, TreeStore, TreeTransaction, EVENT_CHANNEL_CAPACITY};
use crate::models::{Anchor, ChildEntry, Node, NodeId};
use crate::operations::{
    DeletionResolver, OrderingError, Placement, PositionAllocator, Promotion, RebuildEngine,
    TreeSnapshot,
};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Ordering facade over a [`TreeStore`]
pub struct OrderingService<S: TreeStore> {
    store: Arc<S>,
    config: TreeConfig,
    engine: RebuildEngine,
    allocator: PositionAllocator,
    resolver: DeletionResolver,

    /// Serialises mutating calls made through this service
    gate: Mutex<()>,

    /// Broadcast channel for committed changes (128 subscriber capacity)
    event_tx: broadcast::Sender<TreeEvent>,
}

impl<S: TreeStore> OrderingService<S> {
    /// Create a service over `store` using the column mapping in `config`
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the table or a column name is not a plain
    /// identifier, or two semantic fields map to the same column.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ordering_core::db::MemoryStore;
    /// use ordering_core::{OrderingService, TreeConfig};
    /// use std::sync::Arc;
    ///
    /// let store = Arc::new(MemoryStore::new());
    /// let service = OrderingService::new(store, TreeConfig::new("pages")).unwrap();
    /// assert_eq!(service.config().table, "pages");
    /// ```
    pub fn new(store: Arc<S>, config: TreeConfig) -> Result<Self, OrderingError> {
        config.validate()?;

        let engine = RebuildEngine::from_config(&config);
        let allocator = PositionAllocator::new(config.has_root_ordering());
        let resolver = DeletionResolver::new(allocator, engine.clone());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            store,
            config,
            engine,
            allocator,
            resolver,
            gate: Mutex::new(()),
            event_tx,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Subscribe to events for committed changes
    ///
    /// ```rust
    /// # use ordering_core::db::MemoryStore;
    /// # use ordering_core::models::Node;
    /// # use ordering_core::{OrderingService, TreeConfig, TreeEvent};
    /// # use std::sync::Arc;
    /// # tokio_test::block_on(async {
    /// # let store = Arc::new(MemoryStore::with_nodes(vec![Node::new(1, None, 1)]));
    /// # let service = OrderingService::new(store, TreeConfig::new("pages")).unwrap();
    /// let mut rx = service.subscribe();
    /// service.rebuild().await.unwrap();
    /// assert!(matches!(rx.recv().await.unwrap(), TreeEvent::TreeRebuilt { node_count: 1, .. }));
    /// # });
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.event_tx.subscribe()
    }

    /// Emit an event; having no subscribers is not an error
    fn emit_event(&self, event: TreeEvent) {
        tracing::debug!("Emitting {} event", event.event_type());
        let _ = self.event_tx.send(event);
    }

    /// Commit `tx` if `result` is Ok, roll it back otherwise
    async fn finish<T>(
        &self,
        operation: &str,
        tx: Box<dyn TreeTransaction>,
        result: Result<T, OrderingError>,
    ) -> Result<T, OrderingError> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                tracing::warn!("{} failed, rolling back: {}", operation, e);
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!("Rollback after failed {} also failed: {}", operation, rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Move `node_id` under `target_parent_id` at the slot named by `anchor`
    ///
    /// `None` as the target places the node at the root level. Position
    /// allocation and the rebuild run in one transaction.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the node, the target parent or the anchor sibling is missing
    /// - `InvalidAnchor` if the anchor is the node itself, sits under another
    ///   parent, or names the slot the node already holds
    /// - `StructuralIntegrity` if the target is the node or one of its descendants,
    ///   or the stored tree contains a cycle
    /// - `ConcurrencyConflict` / `Storage` from the backend
    pub async fn move_node(
        &self,
        node_id: NodeId,
        target_parent_id: Option<NodeId>,
        anchor: Anchor,
    ) -> Result<TreeSnapshot, OrderingError> {
        let _gate = self.gate.lock().await;
        let tx = self.store.begin().await?;

        let result = self
            .place_and_rebuild(tx.as_ref(), node_id, target_parent_id, anchor)
            .await;
        let (placement, snapshot) = self.finish("move", tx, result).await?;

        tracing::info!(
            "Moved node {} under {:?} at position {} ({} rows rebuilt)",
            node_id,
            target_parent_id,
            placement.position,
            snapshot.changed()
        );
        self.emit_event(TreeEvent::NodeMoved {
            node_id,
            parent_id: placement.parent_id,
            position: placement.position,
            scope: placement.scope,
        });

        Ok(snapshot)
    }

    /// Move using the raw `(node, parent, reference)` triple sent by the tree widget
    ///
    /// See [`Anchor::from_reference`] for how `reference_id` is read.
    pub async fn move_by_reference(
        &self,
        node_id: NodeId,
        target_parent_id: Option<NodeId>,
        reference_id: Option<i64>,
    ) -> Result<TreeSnapshot, OrderingError> {
        self.move_node(node_id, target_parent_id, Anchor::from_reference(reference_id))
            .await
    }

    async fn place_and_rebuild(
        &self,
        tx: &dyn TreeTransaction,
        node_id: NodeId,
        target_parent_id: Option<NodeId>,
        anchor: Anchor,
    ) -> Result<(Placement, TreeSnapshot), OrderingError> {
        let placement = self
            .allocator
            .place(tx, node_id, target_parent_id, anchor)
            .await?;
        let snapshot = self.engine.rebuild(tx).await?;
        Ok((placement, snapshot))
    }

    /// Promote the children of `node_id` to its former parent and rebuild
    ///
    /// The row itself is kept for the caller to delete; the rebuild already
    /// treats it as gone, so no further rebuild is needed after the delete. If
    /// it is already gone its children become roots; use
    /// [`OrderingService::remove_with_parent`] when the former parent is known.
    pub async fn remove(&self, node_id: NodeId) -> Result<TreeSnapshot, OrderingError> {
        self.remove_inner(node_id, None).await
    }

    /// Like [`OrderingService::remove`], naming the former parent for a row
    /// that has already been deleted
    pub async fn remove_with_parent(
        &self,
        node_id: NodeId,
        former_parent_id: Option<NodeId>,
    ) -> Result<TreeSnapshot, OrderingError> {
        self.remove_inner(node_id, Some(former_parent_id)).await
    }

    async fn remove_inner(
        &self,
        node_id: NodeId,
        former_parent: Option<Option<NodeId>>,
    ) -> Result<TreeSnapshot, OrderingError> {
        let _gate = self.gate.lock().await;
        let tx = self.store.begin().await?;

        let result = self.resolver.remove(tx.as_ref(), node_id, former_parent).await;
        let (promotion, snapshot): (Promotion, TreeSnapshot) =
            self.finish("remove", tx, result).await?;

        tracing::info!(
            "Removed node {} from the tree, promoted {} children to {:?}",
            node_id,
            promotion.promoted.len(),
            promotion.former_parent_id
        );
        self.emit_event(TreeEvent::NodeRemoved {
            node_id,
            former_parent_id: promotion.former_parent_id,
            promoted: promotion.promoted,
        });

        Ok(snapshot)
    }

    /// Remove several nodes in one transaction
    ///
    /// Each node is promoted in the given order, so victims nested inside
    /// other victims are handled, and the tree is rebuilt once without any of
    /// them. One `NodeRemoved` event is emitted per node after the commit.
    pub async fn remove_many(&self, node_ids: &[NodeId]) -> Result<TreeSnapshot, OrderingError> {
        let _gate = self.gate.lock().await;
        let tx = self.store.begin().await?;

        let result = self.resolver.remove_many(tx.as_ref(), node_ids).await;
        let (promotions, snapshot) = self.finish("remove_many", tx, result).await?;

        tracing::info!(
            "Removed {} nodes from the tree ({} rows rebuilt)",
            node_ids.len(),
            snapshot.changed()
        );
        for promotion in promotions {
            self.emit_event(TreeEvent::NodeRemoved {
                node_id: promotion.node_id,
                former_parent_id: promotion.former_parent_id,
                promoted: promotion.promoted,
            });
        }

        Ok(snapshot)
    }

    /// Rewrite sibling positions to contiguous ranks, then rebuild
    ///
    /// Tree order is unchanged; only the gaps left by earlier shifts are
    /// closed. The host form layer calls this on save.
    pub async fn renumber(&self) -> Result<TreeSnapshot, OrderingError> {
        let _gate = self.gate.lock().await;
        let tx = self.store.begin().await?;

        let result = self.renumber_and_rebuild(tx.as_ref()).await;
        let (renumbered, snapshot) = self.finish("renumber", tx, result).await?;

        tracing::info!(
            "Renumbered {} of {} nodes",
            renumbered,
            snapshot.len()
        );
        self.emit_event(TreeEvent::PositionsRenumbered {
            node_count: snapshot.len(),
            renumbered,
        });

        Ok(snapshot)
    }

    async fn renumber_and_rebuild(
        &self,
        tx: &dyn TreeTransaction,
    ) -> Result<(usize, TreeSnapshot), OrderingError> {
        let renumbered = self.allocator.renumber(tx).await?;
        let snapshot = self.engine.rebuild(tx).await?;
        Ok((renumbered, snapshot))
    }

    /// Recompute every interval from parent and position data
    ///
    /// Used after bulk imports or when the form layer saves a record.
    pub async fn rebuild(&self) -> Result<TreeSnapshot, OrderingError> {
        let _gate = self.gate.lock().await;
        let tx = self.store.begin().await?;

        let result = self.engine.rebuild(tx.as_ref()).await;
        let snapshot = self.finish("rebuild", tx, result).await?;

        tracing::info!(
            "Rebuilt tree of {} nodes ({} rows changed)",
            snapshot.len(),
            snapshot.changed()
        );
        self.emit_event(TreeEvent::TreeRebuilt {
            node_count: snapshot.len(),
            changed: snapshot.changed(),
        });

        Ok(snapshot)
    }

    /// Check the stored intervals against a fresh computation without writing
    pub async fn validate(&self) -> Result<TreeSnapshot, OrderingError> {
        let tx = self.store.begin().await?;
        let result = self.engine.verify(tx.as_ref()).await;
        if let Err(e) = tx.rollback().await {
            tracing::warn!("Releasing validation transaction failed: {}", e);
        }
        result
    }

    /// Children of `parent_id` in display order, read outside any transaction
    pub async fn children(&self, parent_id: Option<NodeId>) -> Result<Vec<Node>, OrderingError> {
        let mut children = self.store.children(parent_id).await?;
        let scope = self.allocator.scope_for(parent_id);
        sort_siblings(&mut children, scope);
        Ok(children)
    }

    /// Children listing for the tree widget
    ///
    /// A non-empty listing starts with the "first" pseudo entry whose id is
    /// [`Anchor::FIRST_SENTINEL`], so a node can be dropped before every
    /// existing child.
    pub async fn children_with_first(
        &self,
        parent_id: Option<NodeId>,
    ) -> Result<Vec<ChildEntry>, OrderingError> {
        let children = self.children(parent_id).await?;
        if children.is_empty() {
            return Ok(Vec::new());
        }

        let scope = self.allocator.scope_for(parent_id);
        let mut entries = Vec::with_capacity(children.len() + 1);
        entries.push(ChildEntry {
            id: Anchor::FIRST_SENTINEL,
            position: 0,
            has_children: false,
        });
        for child in children {
            let has_children = !self.store.children(Some(child.id)).await?.is_empty();
            entries.push(ChildEntry {
                id: child.id,
                position: child.scope_position(scope).unwrap_or(child.position),
                has_children,
            });
        }
        Ok(entries)
    }
}

// Comprehensive tests in separate module
#[cfg(test)]
#[path = "ordering_service_test.rs"]
mod ordering_service_test;
