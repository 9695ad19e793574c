//! Tree Operations
//!
//! The tree-consistency engine. Each component depends only on the
//! [`NodeAccessor`](crate::db::NodeAccessor) it is handed, so the same code
//! runs against the in-memory store and the libsql store:
//!
//! - [`RebuildEngine`]: recomputes `left`, `right` and `level` for every row
//! - [`PositionAllocator`]: places a node first, after a sibling, or at the end
//! - [`DeletionResolver`]: promotes a removed node's children, then rebuilds
//! - [`RetryQueue`]: re-runs facade calls that hit a concurrency conflict

pub mod deletion;
pub mod error;
pub mod position;
pub mod rebuild;
pub mod retry_queue;

// Re-export types for convenience
pub use deletion::{DeletionResolver, Promotion};
pub use error::OrderingError;
pub use position::{Placement, PositionAllocator};
pub use rebuild::{RebuildEngine, TreeSnapshot};
pub use retry_queue::RetryQueue;
