//! Engine
//!
//! The runtime half of the crate: property containers with their
//! incremental meta-state caches, the per-node rule pipeline, task
//! tracking, the parent-link cascade, lists, and batch pausing.
//!
//! ## Architecture
//!
//! ```text
//! Model ──┬── PropertyContainer   values, messages, busy marks, caches
//!         ├── RuleSet (blueprint) trigger-indexed chains
//!         ├── TaskTracker         chain completion + forwarded failures
//!         ├── ParentLink          event bubbling + stat cascade
//!         └── broadcast channel   ChangeEvent fan-out
//! ```
//!
//! [`Model`] and [`ModelList`] are the public handles; everything else
//! backs them.

mod batch;
mod cascade;
mod container;
mod list;
mod model;
mod tracker;

#[cfg(test)]
mod batch_test;
#[cfg(test)]
mod container_test;

pub use batch::PausedActions;
pub use list::ModelList;
pub use model::Model;
