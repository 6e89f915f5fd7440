//! Veristate Core Aggregation Engine
//!
//! This crate provides reactive hierarchical state aggregation: graphs of
//! typed nodes whose validity, busyness, and modification state stay
//! queryable in O(1) while edits, rules, and child mutations flow through.
//!
//! # Architecture
//!
//! - **Blueprints**: immutable per-type property and rule declarations,
//!   shared by every node instance
//! - **Incremental meta-state**: worsening transitions apply O(1),
//!   improving ones rescan only stale caches with early exit
//! - **Serialized rule chains**: per-node pipeline runs sync rule prefixes
//!   inline and moves each chain to a task at its first async rule
//! - **Position-free events**: changes bubble to the root as dotted paths
//!   that name relations, never list positions
//!
//! # Modules
//!
//! - [`models`] - Values, blueprints, messages, events
//! - [`rules`] - Rule traits, closure adapters, trigger registry
//! - [`engine`] - Model nodes, lists, containers, trackers, batching
//! - [`error`] - Error taxonomy shared across the crate

pub mod engine;
pub mod error;
pub mod models;
pub mod rules;

// Re-export commonly used types
pub use engine::*;
pub use error::*;
pub use models::*;
pub use rules::*;

pub use tokio_util::sync::CancellationToken;
