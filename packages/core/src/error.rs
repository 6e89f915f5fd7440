//! Engine Error Types
//!
//! This module defines the error taxonomy for the state-aggregation engine.
//! Structural misuse (unknown property names, read-only writes, illegal
//! attachments) fails fast with a specific variant; validation-shaped
//! failures (rule errors, cancelled waits) are recorded into node state and
//! surface through [`EngineError::TasksFailed`] and
//! [`EngineError::WaitCancelled`] when callers wait on them.

use crate::models::{RuleId, ValueKind};
use thiserror::Error;
use uuid::Uuid;

/// A single failed rule execution, captured when a rule body returns an error.
///
/// Failures are stashed in every task tracker the failing chain was
/// registered with and re-raised, aggregated, by `wait_for_tasks`.
#[derive(Clone, Debug)]
pub struct RuleFailure {
    /// Node the failing chain ran on
    pub node: Uuid,
    /// Property the chain originated from
    pub property: String,
    /// Rule that returned the error
    pub rule: RuleId,
    /// Rendered error text, also applied as a property message
    pub error: String,
}

/// Engine operation errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Property name not registered in the node's blueprint
    #[error("Property not found: {name}")]
    PropertyNotFound { name: String },

    /// Write attempted on a read-only property
    #[error("Property is read-only: {name}")]
    PropertyReadOnly { name: String },

    /// Value kind does not match the property definition
    #[error("Kind mismatch for property '{name}': expected {expected:?}, got {actual:?}")]
    KindMismatch {
        name: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    /// Duplicate property name during blueprint construction
    #[error("Duplicate property: {name}")]
    DuplicateProperty { name: String },

    /// Child with the same id is already a member of the list
    #[error("Duplicate child: {id}")]
    DuplicateChild { id: Uuid },

    /// Child is not a member of the list
    #[error("Child not found: {id}")]
    ChildNotFound { id: Uuid },

    /// Child has in-flight async work and cannot be attached or detached
    #[error("Child is busy: {id}")]
    ChildBusy { id: Uuid },

    /// Child already belongs to a different parent
    #[error("Child {id} already belongs to a different aggregate")]
    CrossAggregateMove { id: Uuid },

    /// Attachment would create a parent/child cycle
    #[error("Circular attachment: {context}")]
    CircularAttachment { context: String },

    /// Waiting for in-flight tasks was cancelled; the tasks keep running
    #[error("Waiting for running tasks was cancelled")]
    WaitCancelled,

    /// An explicit rule sweep was cancelled before all rules ran
    #[error("Rule run was cancelled")]
    Cancelled,

    /// One or more tracked rule chains failed
    #[error("{} rule task(s) failed", .failures.len())]
    TasksFailed { failures: Vec<RuleFailure> },
}

impl EngineError {
    /// Create a property not found error
    pub fn property_not_found(name: impl Into<String>) -> Self {
        Self::PropertyNotFound { name: name.into() }
    }

    /// Create a read-only violation error
    pub fn property_read_only(name: impl Into<String>) -> Self {
        Self::PropertyReadOnly { name: name.into() }
    }

    /// Create a kind mismatch error
    pub fn kind_mismatch(name: impl Into<String>, expected: ValueKind, actual: ValueKind) -> Self {
        Self::KindMismatch {
            name: name.into(),
            expected,
            actual,
        }
    }

    /// Create a duplicate property error
    pub fn duplicate_property(name: impl Into<String>) -> Self {
        Self::DuplicateProperty { name: name.into() }
    }

    /// Create a duplicate child error
    pub fn duplicate_child(id: Uuid) -> Self {
        Self::DuplicateChild { id }
    }

    /// Create a child not found error
    pub fn child_not_found(id: Uuid) -> Self {
        Self::ChildNotFound { id }
    }

    /// Create a child busy error
    pub fn child_busy(id: Uuid) -> Self {
        Self::ChildBusy { id }
    }

    /// Create a cross-aggregate move error
    pub fn cross_aggregate_move(id: Uuid) -> Self {
        Self::CrossAggregateMove { id }
    }

    /// Create a circular attachment error
    pub fn circular_attachment(context: impl Into<String>) -> Self {
        Self::CircularAttachment {
            context: context.into(),
        }
    }

    /// Create an aggregated task failure error
    pub fn tasks_failed(failures: Vec<RuleFailure>) -> Self {
        Self::TasksFailed { failures }
    }
}
