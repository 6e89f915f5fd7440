//! Property Container
//!
//! Exclusive per-node storage for property slots, plus the incrementally
//! maintained self-level meta-state caches. The caches follow one
//! discipline throughout:
//!
//! - a transition that can only make the aggregate worse (a message added, a
//!   busy mark placed, a modified flag set) updates the cache directly, O(1),
//!   no scan
//! - a transition that might make the aggregate better (messages removed)
//!   triggers a rescan only when the cache is currently bad, and the scan
//!   stops at the first still-bad slot
//!
//! Busy never scans at all: every busy mark belongs to exactly one
//! execution id, and the node is busy exactly while the execution-id map is
//! non-empty. Clearing removes one id's marks and nothing else, so two
//! overlapping invocations cannot corrupt each other's accounting.

use crate::error::EngineError;
use crate::models::{Blueprint, PropertyDef, PropertyMessage, RuleId, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Identifies one async rule invocation. All busy marks placed under an id
/// are cleared together when the invocation settles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug)]
struct Slot {
    value: Value,
    modified: bool,
    busy: u32,
    messages: Vec<PropertyMessage>,
}

impl Slot {
    fn new(value: Value) -> Self {
        Self {
            value,
            modified: false,
            busy: 0,
            messages: Vec::new(),
        }
    }
}

pub(crate) struct PropertyContainer {
    blueprint: Arc<Blueprint>,
    slots: Vec<Slot>,
    busy_marks: HashMap<ExecutionId, Vec<usize>>,
    /// Engine-raised messages attached to the node itself, not a slot.
    /// Currently only the wait-cancelled message lives here.
    node_messages: Vec<PropertyMessage>,
    /// Modified marker with no owning slot, raised when a pending deletion
    /// is taken back.
    forced_modified: bool,
    self_valid: bool,
    self_busy: bool,
    self_modified: bool,
}

impl PropertyContainer {
    pub fn new(blueprint: Arc<Blueprint>) -> Self {
        let slots = blueprint
            .properties()
            .iter()
            .map(|def| Slot::new(def.default_value().clone()))
            .collect();
        Self {
            blueprint,
            slots,
            busy_marks: HashMap::new(),
            node_messages: Vec::new(),
            forced_modified: false,
            self_valid: true,
            self_busy: false,
            self_modified: false,
        }
    }

    pub fn blueprint(&self) -> &Arc<Blueprint> {
        &self.blueprint
    }

    pub fn slot_index(&self, name: &str) -> Result<usize, EngineError> {
        self.blueprint
            .property_index(name)
            .ok_or_else(|| EngineError::property_not_found(name))
    }

    pub fn try_slot_index(&self, name: &str) -> Option<usize> {
        self.blueprint.property_index(name)
    }

    pub fn def(&self, idx: usize) -> &PropertyDef {
        &self.blueprint.properties()[idx]
    }

    pub fn value(&self, idx: usize) -> &Value {
        &self.slots[idx].value
    }

    pub fn check_writable(&self, idx: usize) -> Result<(), EngineError> {
        let def = self.def(idx);
        if def.is_read_only() {
            return Err(EngineError::property_read_only(def.name()));
        }
        Ok(())
    }

    pub fn check_kind(&self, idx: usize, value: &Value) -> Result<(), EngineError> {
        let def = self.def(idx);
        if !value.fits(def.kind()) {
            return Err(EngineError::kind_mismatch(
                def.name(),
                def.kind(),
                value.kind(),
            ));
        }
        Ok(())
    }

    /// Write a value. Returns whether the stored value actually changed;
    /// flags are the caller's business.
    pub fn write(&mut self, idx: usize, value: Value) -> bool {
        if self.slots[idx].value == value {
            return false;
        }
        self.slots[idx].value = value;
        true
    }

    /// Construction-time placement, bypassing kind and read-only checks.
    pub fn put_raw(&mut self, idx: usize, value: Value) {
        self.slots[idx].value = value;
    }

    // ---- modified ----

    pub fn mark_modified(&mut self, idx: usize) {
        self.slots[idx].modified = true;
        self.self_modified = true;
    }

    /// Raise the modified aggregate without an owning slot.
    pub fn force_modified(&mut self) {
        self.forced_modified = true;
        self.self_modified = true;
    }

    /// Clear every modified flag, slot-level and forced.
    pub fn clear_modified(&mut self) {
        for slot in &mut self.slots {
            slot.modified = false;
        }
        self.forced_modified = false;
        self.self_modified = false;
    }

    pub fn is_property_modified(&self, idx: usize) -> bool {
        self.slots[idx].modified
    }

    // ---- messages / validity ----

    /// Replace `rule`'s messages: every message the rule raised before, on
    /// any slot, is dropped, then the new ones are inserted. Returns whether
    /// anything was removed; when the insertion list is empty and something
    /// was removed, the caller decides whether to rescan.
    pub fn replace_messages(&mut self, rule: RuleId, items: &[(usize, String)]) -> bool {
        let mut removed = false;
        for slot in &mut self.slots {
            let before = slot.messages.len();
            slot.messages.retain(|m| m.rule != rule);
            removed |= slot.messages.len() != before;
        }
        for (idx, text) in items {
            self.slots[*idx]
                .messages
                .push(PropertyMessage::new(rule, text.clone()));
        }
        if !items.is_empty() {
            self.self_valid = false;
        }
        removed
    }

    /// Attach an engine-raised message to the node itself. Deduplicated by
    /// rule id.
    pub fn apply_node_message(&mut self, msg: PropertyMessage) {
        if !self.node_messages.iter().any(|m| m.rule == msg.rule) {
            self.node_messages.push(msg);
        }
        self.self_valid = false;
    }

    /// Drop every message, slot-level and node-level. This is how a full
    /// sweep starts; the rules it runs re-raise whatever still holds.
    pub fn clear_all_messages(&mut self) {
        for slot in &mut self.slots {
            slot.messages.clear();
        }
        self.node_messages.clear();
        self.self_valid = true;
    }

    /// Recompute the validity cache by scanning. The scan stops at the first
    /// slot that still carries a message, so calling this after a
    /// clearing-direction change is bounded by the first still-bad slot.
    pub fn recompute_validity(&mut self) {
        self.self_valid =
            self.node_messages.is_empty() && self.slots.iter().all(|s| s.messages.is_empty());
    }

    pub fn property_messages(&self, idx: usize) -> Vec<PropertyMessage> {
        self.slots[idx].messages.clone()
    }

    pub fn node_messages(&self) -> &[PropertyMessage] {
        &self.node_messages
    }

    /// Every message on this node: `(property name, message)`, node-level
    /// messages under an empty name.
    pub fn all_messages(&self) -> Vec<(String, PropertyMessage)> {
        let mut out = Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            for msg in &slot.messages {
                out.push((self.def(i).name().to_string(), msg.clone()));
            }
        }
        for msg in &self.node_messages {
            out.push((String::new(), msg.clone()));
        }
        out
    }

    // ---- busy ----

    /// Place busy marks for one invocation. An empty slot list still makes
    /// the node busy; the invocation is in flight even if no local slot is
    /// named.
    pub fn mark_busy(&mut self, exec: ExecutionId, idxs: &[usize]) {
        for &idx in idxs {
            self.slots[idx].busy += 1;
        }
        self.busy_marks.insert(exec, idxs.to_vec());
        self.self_busy = true;
    }

    /// Remove exactly one invocation's marks.
    pub fn clear_busy(&mut self, exec: ExecutionId) {
        if let Some(idxs) = self.busy_marks.remove(&exec) {
            for idx in idxs {
                self.slots[idx].busy = self.slots[idx].busy.saturating_sub(1);
            }
        }
        self.self_busy = !self.busy_marks.is_empty();
    }

    pub fn is_property_busy(&self, idx: usize) -> bool {
        self.slots[idx].busy > 0
    }

    // ---- cached aggregates ----

    pub fn is_self_valid(&self) -> bool {
        self.self_valid
    }

    pub fn is_self_busy(&self) -> bool {
        self.self_busy
    }

    pub fn is_self_modified(&self) -> bool {
        self.self_modified
    }

    /// Iterate `(name, value)` pairs in registration order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.blueprint
            .properties()
            .iter()
            .zip(self.slots.iter())
            .map(|(def, slot)| (def.name(), &slot.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PropertyDef, ValueKind};

    fn container() -> PropertyContainer {
        let blueprint = Blueprint::builder("Test")
            .property(PropertyDef::new("A", ValueKind::Int).with_default(1i64))
            .property(PropertyDef::new("B", ValueKind::Text))
            .property(PropertyDef::new("C", ValueKind::Bool).read_only())
            .build()
            .unwrap();
        PropertyContainer::new(blueprint)
    }

    #[test]
    fn test_defaults_and_lookup() {
        let c = container();
        assert_eq!(c.value(0), &Value::Int(1));
        assert_eq!(c.value(1), &Value::Null);
        assert!(c.slot_index("Missing").is_err());
        assert!(c.is_self_valid());
        assert!(!c.is_self_busy());
        assert!(!c.is_self_modified());
    }

    #[test]
    fn test_write_skips_equal_value() {
        let mut c = container();
        assert!(!c.write(0, Value::Int(1)));
        assert!(c.write(0, Value::Int(2)));
        assert!(!c.write(0, Value::Int(2)));
    }

    #[test]
    fn test_read_only_and_kind_checks() {
        let c = container();
        assert!(c.check_writable(2).is_err());
        assert!(c.check_writable(0).is_ok());
        assert!(c.check_kind(0, &Value::Text("x".into())).is_err());
        assert!(c.check_kind(0, &Value::Null).is_ok());
    }

    #[test]
    fn test_message_replacement_is_per_rule() {
        let mut c = container();
        let rule_a = RuleId(0);
        let rule_b = RuleId(1);

        c.replace_messages(rule_a, &[(0, "first".into())]);
        c.replace_messages(rule_b, &[(0, "other".into())]);
        assert!(!c.is_self_valid());
        assert_eq!(c.property_messages(0).len(), 2);

        // rule A satisfied now; rule B's message must survive
        let removed = c.replace_messages(rule_a, &[]);
        assert!(removed);
        c.recompute_validity();
        assert!(!c.is_self_valid());
        assert_eq!(c.property_messages(0).len(), 1);
        assert_eq!(c.property_messages(0)[0].rule, rule_b);

        c.replace_messages(rule_b, &[]);
        c.recompute_validity();
        assert!(c.is_self_valid());
    }

    #[test]
    fn test_busy_marks_clear_exactly_their_own() {
        let mut c = container();
        let first = ExecutionId::new();
        let second = ExecutionId::new();

        c.mark_busy(first, &[0, 1]);
        c.mark_busy(second, &[0]);
        assert!(c.is_self_busy());
        assert!(c.is_property_busy(0));
        assert!(c.is_property_busy(1));

        c.clear_busy(first);
        assert!(c.is_self_busy());
        assert!(c.is_property_busy(0));
        assert!(!c.is_property_busy(1));

        c.clear_busy(second);
        assert!(!c.is_self_busy());
        assert!(!c.is_property_busy(0));
    }

    #[test]
    fn test_busy_with_no_local_slots_still_marks_node() {
        let mut c = container();
        let exec = ExecutionId::new();
        c.mark_busy(exec, &[]);
        assert!(c.is_self_busy());
        c.clear_busy(exec);
        assert!(!c.is_self_busy());
    }

    #[test]
    fn test_node_message_dedupe_and_sweep_clear() {
        let mut c = container();
        c.apply_node_message(PropertyMessage::wait_cancelled());
        c.apply_node_message(PropertyMessage::wait_cancelled());
        assert_eq!(c.node_messages().len(), 1);
        assert!(!c.is_self_valid());

        c.clear_all_messages();
        assert!(c.is_self_valid());
        assert!(c.node_messages().is_empty());
    }

    #[test]
    fn test_modified_forced_and_cleared() {
        let mut c = container();
        c.mark_modified(0);
        assert!(c.is_self_modified());
        assert!(c.is_property_modified(0));

        c.clear_modified();
        assert!(!c.is_self_modified());

        c.force_modified();
        assert!(c.is_self_modified());
        c.clear_modified();
        assert!(!c.is_self_modified());
    }
}
