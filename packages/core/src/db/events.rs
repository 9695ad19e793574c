//! Tree Events
//!
//! This module defines the events the ordering service emits after a
//! transaction commits. Other parts of a host application (a live tree view,
//! a cache invalidator) subscribe to them without coupling to the store.
//!
//! # Architecture
//!
//! Events are emitted using tokio's broadcast channel, allowing multiple
//! subscribers to receive notifications asynchronously. Nothing is emitted for
//! an operation that rolled back.

use crate::models::{NodeId, PositionScope};
use serde::{Deserialize, Serialize};

/// Capacity of the broadcast channel used by the ordering service
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Events emitted by the ordering service once a change is committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TreeEvent {
    /// A node was placed under a new (or the same) parent
    #[serde(rename_all = "camelCase")]
    NodeMoved {
        node_id: NodeId,
        parent_id: Option<NodeId>,
        position: i64,
        scope: PositionScope,
    },

    /// A node had its children promoted to its former parent
    #[serde(rename_all = "camelCase")]
    NodeRemoved {
        node_id: NodeId,
        former_parent_id: Option<NodeId>,
        promoted: Vec<NodeId>,
    },

    /// Intervals were recomputed for the whole tree
    #[serde(rename_all = "camelCase")]
    TreeRebuilt { node_count: usize, changed: usize },

    /// Sibling positions were rewritten to contiguous ranks
    #[serde(rename_all = "camelCase")]
    PositionsRenumbered { node_count: usize, renumbered: usize },
}

impl TreeEvent {
    /// Get a string representation of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            TreeEvent::NodeMoved { .. } => "node_moved",
            TreeEvent::NodeRemoved { .. } => "node_removed",
            TreeEvent::TreeRebuilt { .. } => "tree_rebuilt",
            TreeEvent::PositionsRenumbered { .. } => "positions_renumbered",
        }
    }
}
