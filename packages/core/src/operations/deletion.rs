//! Deletion Resolver
//!
//! Keeps the tree coherent when a node is about to disappear: its direct
//! children are reattached to its former parent ("pull-up"), appended after
//! that parent's existing children in their current order, and the intervals
//! are rebuilt. Grandchildren keep their parent and travel with it.
//!
//! The row itself is left alone; deleting it is the caller's job. The rebuild
//! treats it as already gone, so the intervals of every remaining row are
//! final once the caller deletes it. Until then the row keeps its old values.
//!
//! Several nodes can be removed in one pass. They are promoted one after the
//! other, so a victim that is a child of another victim ends up under the
//! nearest surviving ancestor, and the tree is rebuilt once at the end.

use crate::db::NodeAccessor;
use crate::models::{NodeId, NodeUpdate, PositionScope};
use crate::operations::position::PositionAllocator;
use crate::operations::rebuild::{RebuildEngine, TreeSnapshot};
use crate::operations::OrderingError;

/// Children promoted away from a removed node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub node_id: NodeId,
    pub former_parent_id: Option<NodeId>,
    /// Promoted children in their new sibling order
    pub promoted: Vec<NodeId>,
}

/// Pull-up followed by a rebuild
#[derive(Debug, Clone)]
pub struct DeletionResolver {
    allocator: PositionAllocator,
    engine: RebuildEngine,
}

impl DeletionResolver {
    pub fn new(allocator: PositionAllocator, engine: RebuildEngine) -> Self {
        Self { allocator, engine }
    }

    /// Reattach the direct children of `node_id` to its former parent
    ///
    /// The former parent is read from the node's row. When the row is already
    /// gone, `former_parent` supplies it; `None` promotes the children to the
    /// root level.
    pub async fn pull_up<A>(
        &self,
        accessor: &A,
        node_id: NodeId,
        former_parent: Option<Option<NodeId>>,
    ) -> Result<Promotion, OrderingError>
    where
        A: NodeAccessor + ?Sized,
    {
        let former_parent_id = match accessor.fetch(node_id).await? {
            Some(node) => node.parent_id,
            None => {
                tracing::debug!(
                    "Node {} is already gone, promoting its children to {:?}",
                    node_id,
                    former_parent.flatten()
                );
                former_parent.flatten()
            }
        };

        if let Some(parent_id) = former_parent_id {
            accessor
                .fetch(parent_id)
                .await?
                .ok_or(OrderingError::not_found(parent_id))?;
        }

        let children = accessor
            .fetch_children(Some(node_id), PositionScope::Sibling)
            .await?;

        let scope = self.allocator.scope_for(former_parent_id);
        let mut next = self
            .allocator
            .next_position(accessor, former_parent_id)
            .await?;
        let mut promoted = Vec::with_capacity(children.len());

        for child in children {
            accessor
                .update(child.id, NodeUpdate::placement(former_parent_id, scope, next))
                .await?;
            promoted.push(child.id);
            next += 1;
        }

        tracing::debug!(
            "Promoted {} children of node {} to {:?}",
            promoted.len(),
            node_id,
            former_parent_id
        );

        Ok(Promotion {
            node_id,
            former_parent_id,
            promoted,
        })
    }

    /// Pull-up then rebuild through the same accessor, leaving `node_id` out
    pub async fn remove<A>(
        &self,
        accessor: &A,
        node_id: NodeId,
        former_parent: Option<Option<NodeId>>,
    ) -> Result<(Promotion, TreeSnapshot), OrderingError>
    where
        A: NodeAccessor + ?Sized,
    {
        let promotion = self.pull_up(accessor, node_id, former_parent).await?;
        let snapshot = self.engine.rebuild_excluding(accessor, &[node_id]).await?;
        Ok((promotion, snapshot))
    }

    /// Pull-up each of `node_ids` in order, then rebuild once without them
    pub async fn remove_many<A>(
        &self,
        accessor: &A,
        node_ids: &[NodeId],
    ) -> Result<(Vec<Promotion>, TreeSnapshot), OrderingError>
    where
        A: NodeAccessor + ?Sized,
    {
        let mut promotions = Vec::with_capacity(node_ids.len());
        for &node_id in node_ids {
            promotions.push(self.pull_up(accessor, node_id, None).await?);
        }
        let snapshot = self.engine.rebuild_excluding(accessor, node_ids).await?;
        Ok((promotions, snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, TreeStore, TreeTransaction};
    use crate::models::Node;

    // P { X, A { C, D { G } }, Y }, R2
    fn store() -> MemoryStore {
        MemoryStore::with_nodes(vec![
            Node::new(1, None, 1),
            Node::new(2, None, 2),
            Node::new(10, Some(1), 1),
            Node::new(11, Some(1), 2),
            Node::new(12, Some(1), 3),
            Node::new(20, Some(11), 1),
            Node::new(21, Some(11), 2),
            Node::new(30, Some(21), 1),
        ])
    }

    fn resolver() -> DeletionResolver {
        DeletionResolver::new(PositionAllocator::default(), RebuildEngine::default())
    }

    #[tokio::test]
    async fn test_children_appended_after_former_siblings() {
        let store = store();
        let tx = store.begin().await.unwrap();
        let (promotion, snapshot) = resolver().remove(tx.as_ref(), 11, None).await.unwrap();

        assert_eq!(promotion.former_parent_id, Some(1));
        assert_eq!(promotion.promoted, vec![20, 21]);

        let order: Vec<NodeId> = tx
            .fetch_children(Some(1), PositionScope::Sibling)
            .await
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(order, vec![10, 11, 12, 20, 21]);

        // Grandchild stays under its parent
        assert_eq!(tx.fetch(30).await.unwrap().unwrap().parent_id, Some(21));
        assert!(snapshot.is_ancestor(21, 30));
        assert!(tx
            .fetch_children(Some(11), PositionScope::Sibling)
            .await
            .unwrap()
            .is_empty());

        // Intervals already describe the tree without node 11
        assert!(snapshot.get(11).is_none());
        assert_eq!(snapshot.descendant_count(1), Some(5));
        commit_and_delete(&store, tx, 11).await;
    }

    /// Commit, delete `id` and check the stored intervals need no rebuild
    async fn commit_and_delete(store: &MemoryStore, tx: Box<dyn TreeTransaction>, id: NodeId) {
        tx.commit().await.unwrap();
        store.delete_row(id);
        let tx = store.begin().await.unwrap();
        RebuildEngine::default().verify(tx.as_ref()).await.unwrap();
    }

    #[tokio::test]
    async fn test_root_removal_promotes_to_root_level() {
        let store = store();
        let tx = store.begin().await.unwrap();
        let (promotion, _) = resolver().remove(tx.as_ref(), 1, None).await.unwrap();

        assert_eq!(promotion.former_parent_id, None);
        assert_eq!(promotion.promoted, vec![10, 11, 12]);
        let roots: Vec<NodeId> = tx
            .fetch_children(None, PositionScope::Sibling)
            .await
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(roots, vec![1, 2, 10, 11, 12]);
    }

    #[tokio::test]
    async fn test_missing_row_uses_supplied_parent() {
        let store = store();
        store.delete_row(11);
        let tx = store.begin().await.unwrap();

        let (promotion, snapshot) = resolver()
            .remove(tx.as_ref(), 11, Some(Some(2)))
            .await
            .unwrap();
        assert_eq!(promotion.former_parent_id, Some(2));
        assert!(snapshot.is_ancestor(2, 20));
        assert!(snapshot.is_ancestor(2, 30));
        assert_eq!(snapshot.len(), 7);
    }

    #[tokio::test]
    async fn test_missing_row_without_hint_goes_to_roots() {
        let store = store();
        store.delete_row(11);
        let tx = store.begin().await.unwrap();

        let (promotion, _) = resolver().remove(tx.as_ref(), 11, None).await.unwrap();
        assert_eq!(promotion.former_parent_id, None);
        assert_eq!(tx.fetch(20).await.unwrap().unwrap().parent_id, None);
    }

    #[tokio::test]
    async fn test_unknown_former_parent_is_not_found() {
        let store = store();
        store.delete_row(11);
        let tx = store.begin().await.unwrap();

        let err = resolver()
            .pull_up(tx.as_ref(), 11, Some(Some(404)))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderingError::NotFound { id: 404 }));
    }

    #[tokio::test]
    async fn test_leaf_removal_only_rebuilds() {
        let store = store();
        let tx = store.begin().await.unwrap();
        let (promotion, snapshot) = resolver().remove(tx.as_ref(), 30, None).await.unwrap();
        assert!(promotion.promoted.is_empty());
        assert_eq!(snapshot.len(), 7);
        commit_and_delete(&store, tx, 30).await;
    }

    #[tokio::test]
    async fn test_remove_many_with_nested_victims() {
        // P { X, A { C, D { G } }, Y }: remove D then A
        let store = store();
        let tx = store.begin().await.unwrap();
        let (promotions, snapshot) = resolver()
            .remove_many(tx.as_ref(), &[21, 11])
            .await
            .unwrap();

        assert_eq!(promotions[0].promoted, vec![30]);
        assert_eq!(promotions[0].former_parent_id, Some(11));
        // D was promoted along with its former siblings before A went away
        assert_eq!(promotions[1].promoted, vec![20, 21, 30]);
        assert_eq!(promotions[1].former_parent_id, Some(1));

        assert_eq!(snapshot.preorder(), vec![1, 10, 12, 20, 30, 2]);
        assert_eq!(snapshot.descendant_count(1), Some(4));

        tx.commit().await.unwrap();
        store.delete_row(21);
        store.delete_row(11);
        let tx = store.begin().await.unwrap();
        RebuildEngine::default().verify(tx.as_ref()).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_many_parent_before_child() {
        let store = store();
        let tx = store.begin().await.unwrap();
        let (promotions, snapshot) = resolver()
            .remove_many(tx.as_ref(), &[11, 21])
            .await
            .unwrap();

        assert_eq!(promotions[0].promoted, vec![20, 21]);
        assert_eq!(promotions[1].former_parent_id, Some(1));
        assert_eq!(promotions[1].promoted, vec![30]);
        assert_eq!(snapshot.preorder(), vec![1, 10, 12, 20, 30, 2]);
    }

    #[tokio::test]
    async fn test_root_ordering_scope_used_for_root_promotion() {
        let store = MemoryStore::with_nodes(vec![
            Node::new(1, None, 1).with_root_position(5),
            Node::new(2, Some(1), 1),
            Node::new(3, Some(1), 2),
        ]);
        let resolver = DeletionResolver::new(PositionAllocator::new(true), RebuildEngine::default());
        let tx = store.begin().await.unwrap();
        resolver.pull_up(tx.as_ref(), 1, None).await.unwrap();

        assert_eq!(tx.fetch(2).await.unwrap().unwrap().root_position, Some(6));
        assert_eq!(tx.fetch(3).await.unwrap().unwrap().root_position, Some(7));
    }
}
