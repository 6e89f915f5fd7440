//! Declarative Rules
//!
//! This module contains the rule system:
//!
//! - `SyncRule` / `AsyncRule` - the two rule traits
//! - `SyncFn` / `AsyncFn` - closure adapters for quick registration
//! - `RuleContext` / `RuleOutcome` - what a rule sees and what it reports
//! - `RuleScope` - what an explicit sweep re-runs
//!
//! Rules are registered on a blueprint while it is built and are immutable
//! afterwards; every node instantiated from the blueprint shares them.

mod registry;
mod rule;

pub use registry::RuleScope;
pub use rule::{
    AsyncFn, AsyncRule, RuleContext, RuleOutcome, SyncFn, SyncRule, DEFAULT_RULE_ORDER,
};

pub(crate) use registry::{RegisteredRule, RuleBody, RuleSet};
