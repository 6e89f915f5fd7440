//! Task Tracking
//!
//! Every spawned rule chain registers itself with the tracker of the node it
//! runs on and with every ancestor tracker captured at spawn time, so waiting
//! at any level covers the whole subtree below it. Completion is signaled
//! through a watch channel per chain; settled chains remove themselves.
//!
//! Cancelling a wait only abandons the waiting. The chains keep running and
//! still apply their results when they settle; the caller that was refused
//! its wait finds the node marked with the wait-cancelled message instead.

use crate::error::{EngineError, RuleFailure};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifies one tracked rule chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Default)]
struct TrackerInner {
    inflight: HashMap<TaskId, watch::Receiver<bool>>,
    failures: Vec<RuleFailure>,
}

/// Registry of in-flight rule chains for one node or list.
#[derive(Clone, Default)]
pub(crate) struct TaskTracker {
    inner: Arc<Mutex<TrackerInner>>,
}

impl TaskTracker {
    fn lock(&self) -> MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a chain. `done` flips to true when the chain settles.
    pub fn track(&self, id: TaskId, done: watch::Receiver<bool>) {
        self.lock().inflight.insert(id, done);
    }

    /// Remove a settled chain.
    pub fn finish(&self, id: TaskId) {
        self.lock().inflight.remove(&id);
    }

    /// Stash a failure for the next wait to re-raise.
    pub fn record_failure(&self, failure: RuleFailure) {
        self.lock().failures.push(failure);
    }

    pub fn is_idle(&self) -> bool {
        let inner = self.lock();
        inner.inflight.values().all(|rx| *rx.borrow())
    }

    pub fn pending_count(&self) -> usize {
        let inner = self.lock();
        inner.inflight.values().filter(|rx| !*rx.borrow()).count()
    }

    /// Drain the failure stash.
    pub fn take_failures(&self) -> Vec<RuleFailure> {
        std::mem::take(&mut self.lock().failures)
    }

    /// Wait until every tracked chain has settled, then re-raise any stashed
    /// failures aggregated.
    ///
    /// Chains that spawn while the wait is in progress are picked up by the
    /// next round; the wait returns only when a snapshot comes back empty.
    ///
    /// # Errors
    ///
    /// [`EngineError::WaitCancelled`] when `cancel` fires first; the chains
    /// keep running. [`EngineError::TasksFailed`] when all chains settled but
    /// some failed.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        loop {
            let pending: Vec<(TaskId, watch::Receiver<bool>)> = {
                let inner = self.lock();
                inner
                    .inflight
                    .iter()
                    .filter(|(_, rx)| !*rx.borrow())
                    .map(|(id, rx)| (*id, rx.clone()))
                    .collect()
            };
            if pending.is_empty() {
                break;
            }
            for (id, mut rx) in pending {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(EngineError::WaitCancelled),
                    res = rx.wait_for(|done| *done) => {
                        if res.is_err() {
                            // sender gone without settling; drop the orphan
                            // so the next snapshot cannot see it again
                            self.finish(id);
                        }
                    }
                }
            }
        }

        let failures = self.take_failures();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::tasks_failed(failures))
        }
    }
}
