//! Node Data Structures
//!
//! This module defines the `Node` row model for the nested-set ordering engine
//! together with the small value types that describe how a node is placed.
//!
//! # Columns
//!
//! - **parent_id**: adjacency reference, `None` for roots
//! - **left / right**: preorder interval owned by the node and its descendants
//! - **level**: depth from the root level
//! - **position**: rank among siblings sharing a parent
//! - **root_position**: optional secondary rank used to order roots
//!
//! Only the rebuild engine writes `left`, `right` and `level`.
//!
//! # Examples
//!
//! ```rust
//! use ordering_core::models::{Anchor, Node};
//!
//! let root = Node::new(1, None, 1);
//! let child = Node::new(2, Some(1), 1);
//! assert!(root.is_root());
//! assert!(!child.is_root());
//!
//! assert_eq!(Anchor::from_reference(Some(-1)), Anchor::First);
//! assert_eq!(Anchor::from_reference(Some(7)), Anchor::After(7));
//! assert_eq!(Anchor::from_reference(None), Anchor::Append);
//! ```

use serde::{Deserialize, Serialize};

/// Primary key of a row in the backing table
pub type NodeId = i64;

/// One row of the backing table participating in the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Primary key, immutable once created
    pub id: NodeId,

    /// Parent node, `None` for roots
    pub parent_id: Option<NodeId>,

    /// Left bound of the preorder interval (0 until the first rebuild)
    #[serde(default)]
    pub left: i64,

    /// Right bound of the preorder interval (0 until the first rebuild)
    #[serde(default)]
    pub right: i64,

    /// Depth from the configured root level
    #[serde(default)]
    pub level: i64,

    /// Rank among siblings sharing `parent_id`
    pub position: i64,

    /// Rank among roots when a root ordering column is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_position: Option<i64>,
}

impl Node {
    /// Create a node the way the data-entry layer does: parent and position only
    pub fn new(id: NodeId, parent_id: Option<NodeId>, position: i64) -> Self {
        Self {
            id,
            parent_id,
            left: 0,
            right: 0,
            level: 0,
            position,
            root_position: None,
        }
    }

    /// Builder-style setter for the root ordering column
    pub fn with_root_position(mut self, root_position: i64) -> Self {
        self.root_position = Some(root_position);
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether `other` lies strictly inside this node's interval
    pub fn contains(&self, other: &Node) -> bool {
        self.left < other.left && other.right < self.right
    }

    /// Number of descendants encoded by the interval width
    pub fn descendant_count(&self) -> i64 {
        (self.right - self.left - 1) / 2
    }

    /// Value of the ordering column selected by `scope`
    pub fn scope_position(&self, scope: PositionScope) -> Option<i64> {
        match scope {
            PositionScope::Sibling => Some(self.position),
            PositionScope::Root => self.root_position,
        }
    }
}

/// Sparse update for a node row; only `Some` fields are written
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeUpdate {
    /// `Some(None)` moves the node to the root level
    pub parent_id: Option<Option<NodeId>>,
    pub position: Option<i64>,
    pub root_position: Option<i64>,
    pub left: Option<i64>,
    pub right: Option<i64>,
    pub level: Option<i64>,
}

impl NodeUpdate {
    /// Update that reparents a node and sets the ordering column of `scope`
    pub fn placement(parent_id: Option<NodeId>, scope: PositionScope, position: i64) -> Self {
        let mut update = Self {
            parent_id: Some(parent_id),
            ..Default::default()
        };
        update.set_scope_position(scope, position);
        update
    }

    /// Update that only sets the ordering column of `scope`
    pub fn scope_position(scope: PositionScope, position: i64) -> Self {
        let mut update = Self::default();
        update.set_scope_position(scope, position);
        update
    }

    fn set_scope_position(&mut self, scope: PositionScope, position: i64) {
        match scope {
            PositionScope::Sibling => self.position = Some(position),
            PositionScope::Root => self.root_position = Some(position),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the present fields to an in-memory row
    pub fn apply_to(&self, node: &mut Node) {
        if let Some(parent_id) = self.parent_id {
            node.parent_id = parent_id;
        }
        if let Some(position) = self.position {
            node.position = position;
        }
        if let Some(root_position) = self.root_position {
            node.root_position = Some(root_position);
        }
        if let Some(left) = self.left {
            node.left = left;
        }
        if let Some(right) = self.right {
            node.right = right;
        }
        if let Some(level) = self.level {
            node.level = level;
        }
    }
}

/// Which ordering column a placement operates on
///
/// `Sibling` ranks children under one parent (`position`). `Root` ranks the
/// top-level nodes through the secondary root ordering column and is only used
/// when that column is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionScope {
    Sibling,
    Root,
}

/// Where a moved node lands relative to its new siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum Anchor {
    /// Become the first child of the target parent
    First,
    /// Insert immediately after the given sibling
    After(NodeId),
    /// Append after the current last child
    Append,
}

impl Anchor {
    /// Reference value the tree widget sends for "first"
    pub const FIRST_SENTINEL: i64 = -1;

    /// Interpret the raw reference id of a `(node, parent, reference)` triple
    ///
    /// `-1` means first, an absent or zero reference means append, anything
    /// else names the sibling to insert after.
    pub fn from_reference(reference: Option<i64>) -> Self {
        match reference {
            Some(Self::FIRST_SENTINEL) => Anchor::First,
            None | Some(0) => Anchor::Append,
            Some(id) => Anchor::After(id),
        }
    }
}

/// Interval and depth computed for one node by a rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalAssignment {
    pub id: NodeId,
    pub left: i64,
    pub right: i64,
    pub level: i64,
}

impl IntervalAssignment {
    /// Whether the stored row already carries these values
    pub fn matches(&self, node: &Node) -> bool {
        node.left == self.left && node.right == self.right && node.level == self.level
    }
}

/// Entry of the children listing served to the tree widget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildEntry {
    /// Node id, or [`Anchor::FIRST_SENTINEL`] for the "first" pseudo entry
    pub id: NodeId,
    pub position: i64,
    pub has_children: bool,
}
