//! Rebuild Engine
//!
//! Recomputes `left`, `right` and `level` for every node of a tree from the
//! `parent_id` and `position` columns alone.
//!
//! # Algorithm
//!
//! Depth-first from the roots, children visited in ascending position (ties
//! broken by id). A running counter starts at the configured base:
//!
//! - entering a node assigns `left = counter` and the node's level, then
//!   increments the counter
//! - leaving a node (after all children) assigns `right = counter`, then
//!   increments the counter
//!
//! Afterwards every node satisfies `right - left == 2 * descendants + 1` and
//! ancestry is exactly interval containment. Several roots receive disjoint
//! ranges in root order.
//!
//! The traversal uses an explicit stack over an id-indexed arena, so deep
//! trees never exhaust the call stack. `max_depth` bounds how deep the engine
//! goes before it reports a structural error.
//!
//! # Failure modes
//!
//! The whole assignment is computed before anything is written. A dangling
//! parent reference yields `NotFound`; a node unreachable from any root (it
//! sits on a parent cycle) or a traversal deeper than `max_depth` yields
//! `StructuralIntegrity`. In both cases nothing is written.

use crate::config::TreeConfig;
use crate::db::NodeAccessor;
use crate::models::{IntervalAssignment, Node, NodeId};
use crate::operations::OrderingError;
use std::collections::HashMap;

/// Result of a rebuild: one assignment per node, in preorder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSnapshot {
    assignments: Vec<IntervalAssignment>,
    index: HashMap<NodeId, usize>,
    changed: usize,
}

impl TreeSnapshot {
    fn new(assignments: Vec<IntervalAssignment>) -> Self {
        let index = assignments
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id, i))
            .collect();
        Self {
            assignments,
            index,
            changed: 0,
        }
    }

    /// Assignments in preorder (ascending `left`)
    pub fn assignments(&self) -> &[IntervalAssignment] {
        &self.assignments
    }

    pub fn get(&self, id: NodeId) -> Option<&IntervalAssignment> {
        self.index.get(&id).map(|&i| &self.assignments[i])
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Number of rows whose stored values differed from the computed ones
    pub fn changed(&self) -> usize {
        self.changed
    }

    /// Whether `ancestor` strictly contains `descendant`
    pub fn is_ancestor(&self, ancestor: NodeId, descendant: NodeId) -> bool {
        match (self.get(ancestor), self.get(descendant)) {
            (Some(a), Some(d)) => a.left < d.left && d.right < a.right,
            _ => false,
        }
    }

    /// Number of descendants encoded by the node's interval
    pub fn descendant_count(&self, id: NodeId) -> Option<i64> {
        self.get(id).map(|a| (a.right - a.left - 1) / 2)
    }

    /// Node ids in preorder
    pub fn preorder(&self) -> Vec<NodeId> {
        self.assignments.iter().map(|a| a.id).collect()
    }
}

struct Frame {
    slot: usize,
    next_child: usize,
}

/// Recomputes nested-set intervals from parent and position data
#[derive(Debug, Clone)]
pub struct RebuildEngine {
    counter_base: i64,
    root_level: i64,
    max_depth: usize,
    root_ordering: bool,
}

impl Default for RebuildEngine {
    fn default() -> Self {
        Self::from_config(&TreeConfig::default())
    }
}

impl RebuildEngine {
    pub fn from_config(config: &TreeConfig) -> Self {
        Self {
            counter_base: config.counter_base,
            root_level: config.root_level,
            max_depth: config.max_depth,
            root_ordering: config.has_root_ordering(),
        }
    }

    /// Override the depth guard
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Compute the assignment for `nodes` without touching any store
    pub fn compute(&self, nodes: &[Node]) -> Result<TreeSnapshot, OrderingError> {
        let slots: HashMap<NodeId, usize> =
            nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut roots: Vec<usize> = Vec::new();

        for (slot, node) in nodes.iter().enumerate() {
            match node.parent_id {
                None => roots.push(slot),
                Some(parent_id) if parent_id == node.id => {
                    return Err(OrderingError::structural_integrity(format!(
                        "node {} is its own parent",
                        node.id
                    )));
                }
                Some(parent_id) => {
                    let parent_slot = slots
                        .get(&parent_id)
                        .ok_or(OrderingError::not_found(parent_id))?;
                    children[*parent_slot].push(slot);
                }
            }
        }

        for siblings in children.iter_mut() {
            siblings.sort_by_key(|&s| (nodes[s].position, nodes[s].id));
        }
        if self.root_ordering {
            roots.sort_by_key(|&s| {
                let n = &nodes[s];
                (n.root_position.is_none(), n.root_position.unwrap_or(0), n.position, n.id)
            });
        } else {
            roots.sort_by_key(|&s| (nodes[s].position, nodes[s].id));
        }

        let mut visited = vec![false; nodes.len()];
        let mut lefts = vec![0i64; nodes.len()];
        let mut levels = vec![0i64; nodes.len()];
        let mut assignments = Vec::with_capacity(nodes.len());
        let mut counter = self.counter_base;
        let mut stack: Vec<Frame> = Vec::new();

        for &root in &roots {
            visited[root] = true;
            lefts[root] = counter;
            levels[root] = self.root_level;
            counter += 1;
            stack.push(Frame {
                slot: root,
                next_child: 0,
            });

            while let Some(frame) = stack.last_mut() {
                let slot = frame.slot;
                if let Some(&child) = children[slot].get(frame.next_child) {
                    frame.next_child += 1;

                    if visited[child] {
                        return Err(OrderingError::structural_integrity(format!(
                            "node {} reached twice during traversal",
                            nodes[child].id
                        )));
                    }
                    if stack.len() >= self.max_depth {
                        return Err(OrderingError::structural_integrity(format!(
                            "tree deeper than {} levels below node {}",
                            self.max_depth, nodes[root].id
                        )));
                    }

                    visited[child] = true;
                    lefts[child] = counter;
                    levels[child] = levels[slot] + 1;
                    counter += 1;
                    stack.push(Frame {
                        slot: child,
                        next_child: 0,
                    });
                } else {
                    assignments.push(IntervalAssignment {
                        id: nodes[slot].id,
                        left: lefts[slot],
                        right: counter,
                        level: levels[slot],
                    });
                    counter += 1;
                    stack.pop();
                }
            }
        }

        if let Some(slot) = visited.iter().position(|v| !v) {
            return Err(OrderingError::structural_integrity(format!(
                "node {} is not reachable from any root (parent cycle)",
                nodes[slot].id
            )));
        }

        // Assignments were collected in postorder; present them in preorder
        assignments.sort_by_key(|a| a.left);
        Ok(TreeSnapshot::new(assignments))
    }

    /// Recompute intervals for every node reachable through `accessor` and
    /// write the rows whose values changed
    pub async fn rebuild<A>(&self, accessor: &A) -> Result<TreeSnapshot, OrderingError>
    where
        A: NodeAccessor + ?Sized,
    {
        self.rebuild_excluding(accessor, &[]).await
    }

    /// Rebuild as if the rows in `excluded` were already deleted
    ///
    /// Excluded rows are neither numbered nor written; their stored values go
    /// stale until the caller deletes them. Any remaining row that still names
    /// an excluded node as parent is reported as `NotFound`.
    pub async fn rebuild_excluding<A>(
        &self,
        accessor: &A,
        excluded: &[NodeId],
    ) -> Result<TreeSnapshot, OrderingError>
    where
        A: NodeAccessor + ?Sized,
    {
        let mut nodes = accessor.fetch_all().await?;
        if !excluded.is_empty() {
            nodes.retain(|n| !excluded.contains(&n.id));
        }
        let mut snapshot = self.compute(&nodes)?;

        let stored: HashMap<NodeId, &Node> = nodes.iter().map(|n| (n.id, n)).collect();
        let changed: Vec<IntervalAssignment> = snapshot
            .assignments
            .iter()
            .filter(|a| stored.get(&a.id).map_or(true, |n| !a.matches(n)))
            .copied()
            .collect();

        if !changed.is_empty() {
            accessor.write_intervals(&changed).await?;
        }
        snapshot.changed = changed.len();

        tracing::debug!(
            "Rebuilt {} nodes ({} rows changed, {} excluded)",
            snapshot.len(),
            snapshot.changed,
            excluded.len()
        );

        Ok(snapshot)
    }

    /// Compare the stored intervals with a fresh computation
    ///
    /// # Errors
    ///
    /// `StructuralIntegrity` naming the first node whose stored values are stale,
    /// or whatever [`RebuildEngine::compute`] reports.
    pub async fn verify<A>(&self, accessor: &A) -> Result<TreeSnapshot, OrderingError>
    where
        A: NodeAccessor + ?Sized,
    {
        let nodes = accessor.fetch_all().await?;
        let snapshot = self.compute(&nodes)?;

        for node in &nodes {
            if let Some(expected) = snapshot.get(node.id) {
                if !expected.matches(node) {
                    return Err(OrderingError::structural_integrity(format!(
                        "node {} stores ({}, {}, level {}) but the tree requires ({}, {}, level {})",
                        node.id,
                        node.left,
                        node.right,
                        node.level,
                        expected.left,
                        expected.right,
                        expected.level
                    )));
                }
            }
        }
        Ok(snapshot)
    }
}
