//! Business Services
//!
//! - `OrderingService` - the single entry point for move, remove and rebuild
//!   requests, running each inside one store transaction
//!
//! Services coordinate between the database layer and the tree operations,
//! owning transaction boundaries and event emission.

pub mod ordering_service;

pub use ordering_service::OrderingService;
