//! Rule Registry
//!
//! Per-blueprint rule storage. Rules are registered once while the blueprint
//! is built and frozen afterwards. Registration order assigns the stable
//! [`RuleId`] sequence; execution order within a trigger group is
//! (order ascending, then registration sequence), which makes rule runs
//! deterministic for a given registration order.

use super::rule::{AsyncRule, SyncRule};
use crate::models::RuleId;
use std::collections::HashMap;
use std::sync::Arc;

/// Which rules an explicit sweep re-runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleScope {
    /// This node's rules and, recursively, every child's
    All,
    /// Only this node's rules
    SelfOnly,
    /// Only the children, recursively
    ChildrenOnly,
    /// Only the rules triggered by one property
    Property(String),
}

pub(crate) enum RuleBody {
    Sync(Box<dyn SyncRule>),
    Async(Box<dyn AsyncRule>),
}

/// A rule as stored in the registry, with its trigger list and order sampled
/// at registration so later lookups never consult the body again.
pub(crate) struct RegisteredRule {
    pub id: RuleId,
    pub order: i32,
    pub triggers: Vec<String>,
    pub body: RuleBody,
}

impl RegisteredRule {
    pub fn is_async(&self) -> bool {
        matches!(self.body, RuleBody::Async(_))
    }

    /// The first trigger, used as the invocation trigger during sweeps and
    /// as the origin for failure messages when the chain has no better one.
    pub fn primary_trigger(&self) -> &str {
        self.triggers.first().map(String::as_str).unwrap_or("")
    }
}

#[derive(Default)]
pub(crate) struct RuleSet {
    rules: Vec<Arc<RegisteredRule>>,
    by_trigger: HashMap<String, Vec<Arc<RegisteredRule>>>,
}

impl RuleSet {
    pub fn register_sync(&mut self, rule: Box<dyn SyncRule>) -> RuleId {
        let order = rule.order();
        let triggers = rule.triggers().to_vec();
        self.insert(order, triggers, RuleBody::Sync(rule))
    }

    pub fn register_async(&mut self, rule: Box<dyn AsyncRule>) -> RuleId {
        let order = rule.order();
        let triggers = rule.triggers().to_vec();
        self.insert(order, triggers, RuleBody::Async(rule))
    }

    fn insert(&mut self, order: i32, triggers: Vec<String>, body: RuleBody) -> RuleId {
        let id = RuleId(self.rules.len() as u32);
        let rule = Arc::new(RegisteredRule {
            id,
            order,
            triggers,
            body,
        });
        for trigger in &rule.triggers {
            let group = self.by_trigger.entry(trigger.clone()).or_default();
            group.push(Arc::clone(&rule));
            group.sort_by_key(|r| (r.order, r.id));
        }
        self.rules.push(rule);
        id
    }

    /// Rules triggered by `trigger`, in execution order.
    pub fn triggered_by(&self, trigger: &str) -> &[Arc<RegisteredRule>] {
        self.by_trigger
            .get(trigger)
            .map(|group| group.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_trigger(&self, trigger: &str) -> bool {
        self.by_trigger.contains_key(trigger)
    }

    /// Every rule exactly once, in execution order. Used by sweeps.
    pub fn all(&self) -> Vec<Arc<RegisteredRule>> {
        let mut all = self.rules.clone();
        all.sort_by_key(|r| (r.order, r.id));
        all
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::rule::{RuleOutcome, SyncFn};

    #[test]
    fn test_ids_follow_registration_sequence() {
        let mut set = RuleSet::default();
        let a = set.register_sync(Box::new(SyncFn::new(["A"], |_| Ok(RuleOutcome::ok()))));
        let b = set.register_sync(Box::new(SyncFn::new(["A"], |_| Ok(RuleOutcome::ok()))));
        assert_eq!(a, RuleId(0));
        assert_eq!(b, RuleId(1));
    }

    #[test]
    fn test_trigger_group_sorted_by_order_then_sequence() {
        let mut set = RuleSet::default();
        let later =
            set.register_sync(Box::new(SyncFn::new(["A"], |_| Ok(RuleOutcome::ok())).with_order(7)));
        let early =
            set.register_sync(Box::new(SyncFn::new(["A"], |_| Ok(RuleOutcome::ok())).with_order(1)));
        let tied =
            set.register_sync(Box::new(SyncFn::new(["A"], |_| Ok(RuleOutcome::ok())).with_order(1)));

        let order: Vec<RuleId> = set.triggered_by("A").iter().map(|r| r.id).collect();
        assert_eq!(order, vec![early, tied, later]);
    }

    #[test]
    fn test_multi_trigger_rule_indexed_under_each_trigger() {
        let mut set = RuleSet::default();
        let id = set.register_sync(Box::new(SyncFn::new(["A", "B"], |_| Ok(RuleOutcome::ok()))));
        assert_eq!(set.triggered_by("A")[0].id, id);
        assert_eq!(set.triggered_by("B")[0].id, id);
        assert!(set.triggered_by("C").is_empty());
        // sweeps still see it once
        assert_eq!(set.all().len(), 1);
    }
}
