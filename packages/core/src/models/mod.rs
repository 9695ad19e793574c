//! Data Models
//!
//! This module contains the data structures shared by the ordering engine:
//!
//! - `Node` - One row of the backing table with its five ordering columns
//! - `NodeUpdate` - Sparse field update applied through a store
//! - `Anchor` / `PositionScope` - Placement instructions for moves
//! - `IntervalAssignment` - Rebuild output for a single node

mod node;

pub use node::{
    Anchor, ChildEntry, IntervalAssignment, Node, NodeId, NodeUpdate, PositionScope,
};
