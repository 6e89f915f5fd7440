//! Property Messages
//!
//! A property is self-valid exactly when it carries no messages. Messages are
//! tagged with the id of the rule that produced them so a later execution of
//! the same rule replaces its earlier output instead of piling up.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a registered rule.
///
/// Ids are assigned by registration sequence within a blueprint, so two
/// processes that register the same rules in the same order agree on every
/// id without negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub u32);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// Reserved id tagging the engine-raised message applied when a wait on
/// running tasks is cancelled. No registered rule can claim it.
pub const WAIT_CANCELLED_RULE: RuleId = RuleId(u32::MAX);

/// Fixed text of the wait-cancelled message.
pub const WAIT_CANCELLED_TEXT: &str = "Waiting for running tasks was cancelled";

/// A validation message attached to a property (or, for the wait-cancelled
/// case, to the node itself).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyMessage {
    /// Rule that produced this message
    pub rule: RuleId,
    /// Human-readable message text
    pub text: String,
}

impl PropertyMessage {
    pub fn new(rule: RuleId, text: impl Into<String>) -> Self {
        Self {
            rule,
            text: text.into(),
        }
    }

    /// The engine-raised message recorded when a wait is cancelled.
    pub fn wait_cancelled() -> Self {
        Self::new(WAIT_CANCELLED_RULE, WAIT_CANCELLED_TEXT)
    }

    /// Whether this is the engine-raised wait-cancelled message.
    pub fn is_wait_cancelled(&self) -> bool {
        self.rule == WAIT_CANCELLED_RULE
    }
}

impl fmt::Display for PropertyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.rule, self.text)
    }
}
