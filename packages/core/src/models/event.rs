//! Change Events and Meta-State Snapshots
//!
//! This module defines the events emitted when property values change and the
//! compact snapshot used by the meta-state cascade.
//!
//! # Event Flow
//!
//! 1. A property write succeeds on some node
//! 2. The node broadcasts a [`ChangeEvent`] on its own channel
//! 3. The event bubbles to each ancestor, which prepends the relation name it
//!    knows the child under and re-broadcasts on its own channel
//! 4. Subscribers at any level observe the event with the path as seen from
//!    that level
//!
//! List items contribute no path segment: an edit to `Amount` on any item of
//! the `Lines` list bubbles to the owning node as `Lines.Amount`, regardless
//! of the item's position. Breadcrumbs are position-free.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a property changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeReason {
    /// Changed through the editing surface; triggers rules and marks modified
    UserEdit,
    /// Written by persistence or by a rule outcome; never triggers rules and
    /// never marks modified
    Load,
}

/// A property change, as observed at one node of the graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Name of the property that changed, on the node it changed on
    pub property: String,
    /// Dot-joined breadcrumb from the observing node down to the property
    pub path: String,
    /// Why the change happened
    pub reason: ChangeReason,
    /// Id of the node the change originated on
    pub source: Uuid,
    /// When the change was applied
    pub occurred_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Create an event as seen at its source node (path equals property).
    pub fn new(property: impl Into<String>, reason: ChangeReason, source: Uuid) -> Self {
        let property = property.into();
        Self {
            path: property.clone(),
            property,
            reason,
            source,
            occurred_at: Utc::now(),
        }
    }

    /// The same event as seen one level up, under `relation`.
    pub fn through(&self, relation: &str) -> Self {
        let mut up = self.clone();
        up.path = format!("{}.{}", relation, self.path);
        up
    }
}

/// Combined meta-state of a node or list: the triple every parent caches per
/// child and recomputes its own aggregates from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaSnapshot {
    pub valid: bool,
    pub busy: bool,
    pub modified: bool,
}

impl MetaSnapshot {
    /// Snapshot of a freshly created, untouched node.
    pub fn pristine() -> Self {
        Self {
            valid: true,
            busy: false,
            modified: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_extends_through_relations() {
        let event = ChangeEvent::new("City", ChangeReason::UserEdit, Uuid::new_v4());
        assert_eq!(event.path, "City");

        let at_parent = event.through("Address");
        assert_eq!(at_parent.path, "Address.City");
        assert_eq!(at_parent.property, "City");

        let at_root = at_parent.through("Customer");
        assert_eq!(at_root.path, "Customer.Address.City");
        assert_eq!(at_root.reason, ChangeReason::UserEdit);
    }

    #[test]
    fn test_event_serialization_contract() {
        let source = Uuid::new_v4();
        let event = ChangeEvent::new("Amount", ChangeReason::Load, source);
        let json = serde_json::to_string(&event).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.get("property").unwrap(), "Amount");
        assert_eq!(parsed.get("path").unwrap(), "Amount");
        assert_eq!(parsed.get("reason").unwrap(), "load");
        assert!(parsed.get("occurredAt").is_some());
    }
}
