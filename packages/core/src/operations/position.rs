//! Position Allocator
//!
//! Computes and commits the ordering value of a node being placed under a
//! target parent, then leaves interval maintenance to the rebuild engine.
//!
//! # Placement rules
//!
//! | Anchor           | New value                                         | Shift |
//! |------------------|---------------------------------------------------|-------|
//! | `First`          | 1 (root scope: current minimum root value, or 1)  | yes   |
//! | `After(sibling)` | sibling's value + 1                               | yes   |
//! | `Append`         | current maximum among the target's children + 1   | no    |
//!
//! Shifting adds 1 to every child of the target whose value is at or above the
//! new value, before the moved node is written. Sibling values therefore stay
//! unique at every step. The moved node's parent is updated in the same write.
//!
//! The allocator works on one ordering column at a time, selected by
//! [`PositionScope`]: sibling ranks under a parent, or the secondary root
//! ordering column when a node is placed at the root level and that column is
//! configured.
//!
//! A move that would leave the node in the slot it already holds is rejected
//! with `InvalidAnchor` before anything is written.
//!
//! # Renumbering
//!
//! Shifts leave gaps. [`PositionAllocator::renumber`] rewrites every group of
//! siblings to the ranks `1..=n` in their current order (and the root
//! ordering column of roots, when configured), so the tree order is unchanged.

use crate::db::{sort_siblings, NodeAccessor};
use crate::models::{Anchor, Node, NodeId, NodeUpdate, PositionScope};
use crate::operations::OrderingError;
use std::collections::{HashMap, HashSet};

/// Outcome of a committed placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub node_id: NodeId,
    pub parent_id: Option<NodeId>,
    pub position: i64,
    pub scope: PositionScope,
    /// Number of siblings shifted to make room
    pub shifted: u64,
}

/// Computes positions for moved nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionAllocator {
    root_ordering: bool,
}

impl PositionAllocator {
    /// `root_ordering` selects the root ordering column for root-level placements
    pub fn new(root_ordering: bool) -> Self {
        Self { root_ordering }
    }

    /// Ordering column used for children of `parent_id`
    pub fn scope_for(&self, parent_id: Option<NodeId>) -> PositionScope {
        if parent_id.is_none() && self.root_ordering {
            PositionScope::Root
        } else {
            PositionScope::Sibling
        }
    }

    /// Next value for appending under `parent_id`
    pub async fn next_position<A>(
        &self,
        accessor: &A,
        parent_id: Option<NodeId>,
    ) -> Result<i64, OrderingError>
    where
        A: NodeAccessor + ?Sized,
    {
        let scope = self.scope_for(parent_id);
        Ok(accessor
            .max_position(parent_id, scope)
            .await?
            .map_or(1, |max| max + 1))
    }

    /// Reject placing `node_id` under itself or one of its descendants
    ///
    /// Walks the ancestor chain of `target_parent`. A chain that loops back
    /// on itself is reported as well, since the stored tree is already broken.
    pub async fn ensure_not_descendant<A>(
        &self,
        accessor: &A,
        node_id: NodeId,
        target_parent: Option<NodeId>,
    ) -> Result<(), OrderingError>
    where
        A: NodeAccessor + ?Sized,
    {
        let mut seen = HashSet::new();
        let mut cursor = target_parent;

        while let Some(current) = cursor {
            if current == node_id {
                return Err(OrderingError::structural_integrity(format!(
                    "node {} cannot be moved under itself or its descendant {}",
                    node_id,
                    target_parent.unwrap_or(current)
                )));
            }
            if !seen.insert(current) {
                return Err(OrderingError::structural_integrity(format!(
                    "parent chain of node {} loops at node {}",
                    target_parent.unwrap_or(current),
                    current
                )));
            }
            cursor = accessor
                .fetch(current)
                .await?
                .ok_or(OrderingError::not_found(current))?
                .parent_id;
        }
        Ok(())
    }

    /// Reject a move that keeps `node` in the slot it already holds
    async fn ensure_moves<A>(
        &self,
        accessor: &A,
        node: &Node,
        target_parent: Option<NodeId>,
        anchor: Anchor,
        scope: PositionScope,
    ) -> Result<(), OrderingError>
    where
        A: NodeAccessor + ?Sized,
    {
        if node.parent_id != target_parent {
            return Ok(());
        }

        let siblings = accessor.fetch_children(target_parent, scope).await?;
        let Some(index) = siblings.iter().position(|n| n.id == node.id) else {
            return Ok(());
        };

        let unchanged = match anchor {
            Anchor::First => index == 0,
            Anchor::After(sibling_id) => index > 0 && siblings[index - 1].id == sibling_id,
            Anchor::Append => index + 1 == siblings.len(),
        };
        if unchanged {
            return Err(OrderingError::invalid_anchor(format!(
                "node {} already holds that slot under {:?}",
                node.id, target_parent
            )));
        }
        Ok(())
    }

    /// Compute the value `anchor` resolves to under `target_parent`
    ///
    /// Returns the value and whether competitors must be shifted.
    async fn resolve<A>(
        &self,
        accessor: &A,
        node_id: NodeId,
        target_parent: Option<NodeId>,
        anchor: Anchor,
        scope: PositionScope,
    ) -> Result<(i64, bool), OrderingError>
    where
        A: NodeAccessor + ?Sized,
    {
        match anchor {
            Anchor::First => {
                let position = match scope {
                    PositionScope::Sibling => 1,
                    PositionScope::Root => accessor
                        .min_position(target_parent, scope)
                        .await?
                        .unwrap_or(1),
                };
                Ok((position, true))
            }
            Anchor::After(sibling_id) => {
                if sibling_id == node_id {
                    return Err(OrderingError::invalid_anchor(format!(
                        "node {} cannot be placed after itself",
                        node_id
                    )));
                }
                let sibling = accessor
                    .fetch(sibling_id)
                    .await?
                    .ok_or(OrderingError::not_found(sibling_id))?;
                if sibling.parent_id != target_parent {
                    return Err(OrderingError::invalid_anchor(format!(
                        "node {} is not a child of {}",
                        sibling_id,
                        target_parent.map_or_else(|| "the root level".to_string(), |p| p.to_string())
                    )));
                }
                // A sibling without a root ordering value counts as 0
                let position = sibling.scope_position(scope).unwrap_or(0) + 1;
                Ok((position, true))
            }
            Anchor::Append => Ok((self.next_position(accessor, target_parent).await?, false)),
        }
    }

    /// Place `node_id` under `target_parent` according to `anchor`
    ///
    /// Validates before writing: the node and target exist, the target is not
    /// the node or one of its descendants, and the anchor is a sibling under
    /// the target. Never touches `left`, `right` or `level`.
    pub async fn place<A>(
        &self,
        accessor: &A,
        node_id: NodeId,
        target_parent: Option<NodeId>,
        anchor: Anchor,
    ) -> Result<Placement, OrderingError>
    where
        A: NodeAccessor + ?Sized,
    {
        let node = accessor
            .fetch(node_id)
            .await?
            .ok_or(OrderingError::not_found(node_id))?;
        if let Some(parent_id) = target_parent {
            accessor
                .fetch(parent_id)
                .await?
                .ok_or(OrderingError::not_found(parent_id))?;
        }
        self.ensure_not_descendant(accessor, node_id, target_parent)
            .await?;

        let scope = self.scope_for(target_parent);
        self.ensure_moves(accessor, &node, target_parent, anchor, scope)
            .await?;
        let (position, needs_shift) = self
            .resolve(accessor, node_id, target_parent, anchor, scope)
            .await?;

        let shifted = if needs_shift {
            accessor
                .shift_positions(target_parent, scope, position, 1)
                .await?
        } else {
            0
        };

        accessor
            .update(node_id, NodeUpdate::placement(target_parent, scope, position))
            .await?;

        tracing::debug!(
            "Placed node {} under {:?} at {:?} position {} ({} siblings shifted)",
            node_id,
            target_parent,
            scope,
            position,
            shifted
        );

        Ok(Placement {
            node_id,
            parent_id: target_parent,
            position,
            scope,
            shifted,
        })
    }

    /// Rewrite every sibling group to contiguous ranks starting at 1
    ///
    /// Order inside each group is preserved, including roots ordered by the
    /// root column. Roots get the same rank in `position` and, when root
    /// ordering is configured, in `root_position`. Returns the number of rows
    /// written; a second call returns 0.
    pub async fn renumber<A>(&self, accessor: &A) -> Result<usize, OrderingError>
    where
        A: NodeAccessor + ?Sized,
    {
        let mut groups: HashMap<Option<NodeId>, Vec<Node>> = HashMap::new();
        for node in accessor.fetch_all().await? {
            groups.entry(node.parent_id).or_default().push(node);
        }

        let mut written = 0;
        for (parent_id, mut siblings) in groups {
            let scope = self.scope_for(parent_id);
            sort_siblings(&mut siblings, scope);

            for (rank, node) in (1i64..).zip(&siblings) {
                let mut update = NodeUpdate::default();
                if node.position != rank {
                    update.position = Some(rank);
                }
                if scope == PositionScope::Root && node.root_position != Some(rank) {
                    update.root_position = Some(rank);
                }
                if !update.is_empty() {
                    accessor.update(node.id, update).await?;
                    written += 1;
                }
            }
        }

        tracing::debug!("Renumbered {} rows", written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, TreeStore};
    use crate::models::Node;

    fn store() -> MemoryStore {
        // R1(1) { A(1), B(2), C(3) }, R2(2) { D(1) }
        MemoryStore::with_nodes(vec![
            Node::new(1, None, 1).with_root_position(1),
            Node::new(2, None, 2).with_root_position(2),
            Node::new(11, Some(1), 1),
            Node::new(12, Some(1), 2),
            Node::new(13, Some(1), 3),
            Node::new(21, Some(2), 1),
        ])
    }

    async fn order<A: NodeAccessor + ?Sized>(accessor: &A, parent: Option<NodeId>) -> Vec<(NodeId, i64)> {
        accessor
            .fetch_children(parent, PositionScope::Sibling)
            .await
            .unwrap()
            .iter()
            .map(|n| (n.id, n.position))
            .collect()
    }

    #[tokio::test]
    async fn test_first_shifts_existing_children() {
        let store = store();
        let tx = store.begin().await.unwrap();
        let placement = PositionAllocator::default()
            .place(tx.as_ref(), 12, Some(1), Anchor::First)
            .await
            .unwrap();

        assert_eq!(placement.position, 1);
        assert_eq!(placement.shifted, 3);
        assert_eq!(
            order(tx.as_ref(), Some(1)).await,
            vec![(12, 1), (11, 2), (13, 4)]
        );
    }

    #[tokio::test]
    async fn test_after_sibling_from_other_parent() {
        let store = store();
        let tx = store.begin().await.unwrap();
        PositionAllocator::default()
            .place(tx.as_ref(), 21, Some(1), Anchor::After(11))
            .await
            .unwrap();

        assert_eq!(
            order(tx.as_ref(), Some(1)).await,
            vec![(11, 1), (21, 2), (12, 3), (13, 4)]
        );
        assert!(order(tx.as_ref(), Some(2)).await.is_empty());
    }

    #[tokio::test]
    async fn test_append_uses_next_position() {
        let store = store();
        let tx = store.begin().await.unwrap();
        let placement = PositionAllocator::default()
            .place(tx.as_ref(), 21, Some(1), Anchor::Append)
            .await
            .unwrap();

        assert_eq!(placement.position, 4);
        assert_eq!(placement.shifted, 0);
    }

    #[tokio::test]
    async fn test_append_to_empty_parent_starts_at_one() {
        let store = store();
        let tx = store.begin().await.unwrap();
        let placement = PositionAllocator::default()
            .place(tx.as_ref(), 12, Some(11), Anchor::Append)
            .await
            .unwrap();
        assert_eq!(placement.position, 1);
    }

    #[tokio::test]
    async fn test_root_scope_first_uses_minimum() {
        let store = store();
        let tx = store.begin().await.unwrap();
        let placement = PositionAllocator::new(true)
            .place(tx.as_ref(), 11, None, Anchor::First)
            .await
            .unwrap();

        assert_eq!(placement.scope, PositionScope::Root);
        assert_eq!(placement.position, 1);
        let roots: Vec<(NodeId, Option<i64>)> = tx
            .fetch_children(None, PositionScope::Root)
            .await
            .unwrap()
            .iter()
            .map(|n| (n.id, n.root_position))
            .collect();
        assert_eq!(roots, vec![(11, Some(1)), (1, Some(2)), (2, Some(3))]);
    }

    #[tokio::test]
    async fn test_move_under_descendant_rejected_before_write() {
        let store = store();
        let tx = store.begin().await.unwrap();
        tx.update(12, NodeUpdate::placement(Some(11), PositionScope::Sibling, 1))
            .await
            .unwrap();
        let before = tx.fetch_all().await.unwrap();

        let err = PositionAllocator::default()
            .place(tx.as_ref(), 1, Some(12), Anchor::First)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderingError::StructuralIntegrity { .. }));
        assert_eq!(tx.fetch_all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_move_under_itself_rejected() {
        let store = store();
        let tx = store.begin().await.unwrap();
        let err = PositionAllocator::default()
            .place(tx.as_ref(), 11, Some(11), Anchor::Append)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderingError::StructuralIntegrity { .. }));
    }

    #[tokio::test]
    async fn test_move_into_current_slot_rejected() {
        let store = store();
        let tx = store.begin().await.unwrap();
        let allocator = PositionAllocator::default();
        let before = tx.fetch_all().await.unwrap();

        for (node_id, anchor) in [
            (11, Anchor::First),
            (12, Anchor::After(11)),
            (13, Anchor::Append),
            (21, Anchor::First),
        ] {
            let parent = tx.fetch(node_id).await.unwrap().unwrap().parent_id;
            let err = allocator
                .place(tx.as_ref(), node_id, parent, anchor)
                .await
                .unwrap_err();
            assert!(matches!(err, OrderingError::InvalidAnchor { .. }));
        }
        assert_eq!(tx.fetch_all().await.unwrap(), before);

        // Same parent, different slot is a real move
        allocator
            .place(tx.as_ref(), 13, Some(1), Anchor::After(11))
            .await
            .unwrap();
        assert_eq!(
            order(tx.as_ref(), Some(1)).await,
            vec![(11, 1), (13, 2), (12, 3)]
        );
    }

    #[tokio::test]
    async fn test_renumber_closes_gaps_and_keeps_order() {
        let store = MemoryStore::with_nodes(vec![
            Node::new(1, None, 4).with_root_position(7),
            Node::new(2, None, 1).with_root_position(3),
            Node::new(11, Some(1), 2),
            Node::new(12, Some(1), 9),
            Node::new(13, Some(1), 5),
        ]);
        let allocator = PositionAllocator::new(true);
        let tx = store.begin().await.unwrap();

        assert_eq!(allocator.renumber(tx.as_ref()).await.unwrap(), 5);
        assert_eq!(
            order(tx.as_ref(), Some(1)).await,
            vec![(11, 1), (13, 2), (12, 3)]
        );
        let roots: Vec<(NodeId, i64, Option<i64>)> = tx
            .fetch_children(None, PositionScope::Root)
            .await
            .unwrap()
            .iter()
            .map(|n| (n.id, n.position, n.root_position))
            .collect();
        assert_eq!(roots, vec![(2, 1, Some(1)), (1, 2, Some(2))]);

        assert_eq!(allocator.renumber(tx.as_ref()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_anchor_validation() {
        let store = store();
        let tx = store.begin().await.unwrap();
        let allocator = PositionAllocator::default();

        let err = allocator
            .place(tx.as_ref(), 11, Some(1), Anchor::After(21))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderingError::InvalidAnchor { .. }));

        let err = allocator
            .place(tx.as_ref(), 11, Some(1), Anchor::After(11))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderingError::InvalidAnchor { .. }));

        let err = allocator
            .place(tx.as_ref(), 11, Some(1), Anchor::After(404))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderingError::NotFound { id: 404 }));

        let err = allocator
            .place(tx.as_ref(), 11, Some(404), Anchor::First)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderingError::NotFound { id: 404 }));
    }
}
