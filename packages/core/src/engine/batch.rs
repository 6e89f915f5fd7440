//! Batched Edits
//!
//! [`PausedActions`] is the RAII guard behind [`Model::pause_all_actions`].
//! While at least one guard is alive the node applies values silently: no
//! rules, no events, no upward cascade, and no improving-direction cache
//! rescans. Dropping the last guard resumes the node without replaying
//! anything; the caller runs a rule sweep to validate the batch as a whole.

use super::model::Model;

/// Guard holding one pause on a node. Dropping it resumes the node.
#[must_use = "the node resumes as soon as this guard drops"]
#[derive(Debug)]
pub struct PausedActions {
    model: Model,
}

impl PausedActions {
    pub(crate) fn new(model: Model) -> Self {
        PausedActions { model }
    }

    /// The node this guard pauses.
    pub fn model(&self) -> &Model {
        &self.model
    }
}

impl Drop for PausedActions {
    fn drop(&mut self) {
        self.model.resume();
    }
}
