//! Container Cache Invariant Tests
//!
//! Property-based checks that the container's incremental caches track a
//! brute-force recomputation across arbitrary operation sequences:
//! - the busy and modified caches are exact after every operation
//! - the validity cache is never optimistically true, and is exact right
//!   after any recompute or full message clear

#[cfg(test)]
mod tests {
    use super::super::container::{ExecutionId, PropertyContainer};
    use crate::models::{Blueprint, PropertyDef, RuleId, ValueKind};
    use proptest::prelude::*;
    use std::sync::Arc;

    const SLOTS: usize = 4;
    const RULES: u32 = 3;
    const EXECS: usize = 3;

    #[derive(Clone, Debug)]
    enum Op {
        Replace { rule: u32, slots: Vec<usize> },
        NodeMessage { rule: u32 },
        ClearAllMessages,
        RecomputeValidity,
        MarkBusy { exec: usize, slots: Vec<usize> },
        ClearBusy { exec: usize },
        MarkModified { slot: usize },
        ForceModified,
        ClearModified,
    }

    fn slot_subset() -> impl Strategy<Value = Vec<usize>> {
        proptest::collection::vec(0..SLOTS, 0..=SLOTS).prop_map(|mut v| {
            v.sort_unstable();
            v.dedup();
            v
        })
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..RULES, slot_subset()).prop_map(|(rule, slots)| Op::Replace { rule, slots }),
            (0..RULES).prop_map(|rule| Op::NodeMessage { rule }),
            Just(Op::ClearAllMessages),
            Just(Op::RecomputeValidity),
            (0..EXECS, slot_subset()).prop_map(|(exec, slots)| Op::MarkBusy { exec, slots }),
            (0..EXECS).prop_map(|exec| Op::ClearBusy { exec }),
            (0..SLOTS).prop_map(|slot| Op::MarkModified { slot }),
            Just(Op::ForceModified),
            Just(Op::ClearModified),
        ]
    }

    /// Brute-force shadow of the message, busy, and modified state.
    struct Oracle {
        slot_rules: Vec<Vec<u32>>,
        node_rules: Vec<u32>,
        slot_busy: Vec<u32>,
        active: Vec<Option<Vec<usize>>>,
        modified: Vec<bool>,
        forced: bool,
    }

    impl Oracle {
        fn new() -> Self {
            Self {
                slot_rules: vec![Vec::new(); SLOTS],
                node_rules: Vec::new(),
                slot_busy: vec![0; SLOTS],
                active: vec![None; EXECS],
                modified: vec![false; SLOTS],
                forced: false,
            }
        }

        fn is_valid(&self) -> bool {
            self.node_rules.is_empty() && self.slot_rules.iter().all(|r| r.is_empty())
        }

        fn is_busy(&self) -> bool {
            self.active.iter().any(|a| a.is_some())
        }

        fn is_modified(&self) -> bool {
            self.forced || self.modified.iter().any(|m| *m)
        }
    }

    fn test_blueprint() -> Arc<Blueprint> {
        let mut builder = Blueprint::builder("Probe");
        for i in 0..SLOTS {
            builder = builder.property(PropertyDef::new(format!("P{i}"), ValueKind::Int));
        }
        builder.build().unwrap()
    }

    fn apply(
        op: &Op,
        container: &mut PropertyContainer,
        oracle: &mut Oracle,
        execs: &mut [Option<ExecutionId>],
    ) {
        match op {
            Op::Replace { rule, slots } => {
                let items: Vec<(usize, String)> =
                    slots.iter().map(|&i| (i, format!("bad {i}"))).collect();
                container.replace_messages(RuleId(*rule), &items);
                for rules in &mut oracle.slot_rules {
                    rules.retain(|r| r != rule);
                }
                for &i in slots {
                    oracle.slot_rules[i].push(*rule);
                }
            }
            Op::NodeMessage { rule } => {
                container.apply_node_message(crate::models::PropertyMessage::new(
                    RuleId(*rule),
                    "node broke",
                ));
                if !oracle.node_rules.contains(rule) {
                    oracle.node_rules.push(*rule);
                }
            }
            Op::ClearAllMessages => {
                container.clear_all_messages();
                for rules in &mut oracle.slot_rules {
                    rules.clear();
                }
                oracle.node_rules.clear();
            }
            Op::RecomputeValidity => {
                container.recompute_validity();
            }
            Op::MarkBusy { exec, slots } => {
                // invocation ids are unique in the engine; mirror that here
                if execs[*exec].is_none() {
                    let id = ExecutionId::new();
                    container.mark_busy(id, slots);
                    execs[*exec] = Some(id);
                    for &i in slots {
                        oracle.slot_busy[i] += 1;
                    }
                    oracle.active[*exec] = Some(slots.clone());
                }
            }
            Op::ClearBusy { exec } => {
                if let Some(id) = execs[*exec].take() {
                    container.clear_busy(id);
                    if let Some(slots) = oracle.active[*exec].take() {
                        for i in slots {
                            oracle.slot_busy[i] -= 1;
                        }
                    }
                }
            }
            Op::MarkModified { slot } => {
                container.mark_modified(*slot);
                oracle.modified[*slot] = true;
            }
            Op::ForceModified => {
                container.force_modified();
                oracle.forced = true;
            }
            Op::ClearModified => {
                container.clear_modified();
                oracle.modified.iter_mut().for_each(|m| *m = false);
                oracle.forced = false;
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, ..ProptestConfig::default() })]

        #[test]
        fn caches_track_brute_force(ops in proptest::collection::vec(op_strategy(), 1..60)) {
            let mut container = PropertyContainer::new(test_blueprint());
            let mut oracle = Oracle::new();
            let mut execs: Vec<Option<ExecutionId>> = vec![None; EXECS];

            for op in &ops {
                apply(op, &mut container, &mut oracle, &mut execs);

                // busy and modified are exact accounting
                prop_assert_eq!(container.is_self_busy(), oracle.is_busy());
                prop_assert_eq!(container.is_self_modified(), oracle.is_modified());
                for i in 0..SLOTS {
                    prop_assert_eq!(container.is_property_busy(i), oracle.slot_busy[i] > 0);
                    prop_assert_eq!(container.is_property_modified(i), oracle.modified[i]);
                    prop_assert_eq!(
                        container.property_messages(i).len(),
                        oracle.slot_rules[i].len()
                    );
                }

                // validity may lag in the improving direction, never the other
                if container.is_self_valid() {
                    prop_assert!(oracle.is_valid());
                }
                if matches!(op, Op::ClearAllMessages | Op::RecomputeValidity) {
                    prop_assert_eq!(container.is_self_valid(), oracle.is_valid());
                }
            }

            container.recompute_validity();
            prop_assert_eq!(container.is_self_valid(), oracle.is_valid());
        }
    }
}
