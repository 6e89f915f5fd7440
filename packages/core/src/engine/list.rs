//! Model Lists
//!
//! [`ModelList`] holds an ordered collection of child nodes under one
//! owner. Removal of an already-persisted child does not drop it: the child
//! is marked for deletion and parked in a pending set that persistence
//! drains, and re-adding such a child restores it instead of attaching a
//! stranger. Lists carry their own tracker and event channel so waiting and
//! subscribing work at the collection level.

use super::cascade::{propagate_stat, ChildStats, ParentLink, SlotParent};
use super::model::{combined, Model};
use super::tracker::TaskTracker;
use crate::error::EngineError;
use crate::models::{ChangeEvent, MetaSnapshot};
use crate::rules::RuleScope;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CHANGE_EVENT_CHANNEL_CAPACITY: usize = 128;

pub(crate) struct ListInner {
    pub(crate) id: Uuid,
    pub(crate) state: Mutex<ListState>,
    pub(crate) tracker: TaskTracker,
    pub(crate) events: broadcast::Sender<ChangeEvent>,
}

pub(crate) struct ListState {
    pub(crate) items: Vec<Model>,
    pub(crate) pending: Vec<Model>,
    pub(crate) parent: Option<SlotParent>,
    pub(crate) children: ChildStats,
    pub(crate) last_stat: MetaSnapshot,
}

fn list_stat(st: &ListState) -> MetaSnapshot {
    MetaSnapshot {
        valid: st.children.all_valid(),
        busy: st.children.any_busy(),
        modified: st.children.any_modified() || !st.pending.is_empty(),
    }
}

/// Handle to an ordered collection of child nodes.
#[derive(Clone)]
pub struct ModelList {
    inner: Arc<ListInner>,
}

impl PartialEq for ModelList {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ModelList {}

impl fmt::Debug for ModelList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelList")
            .field("id", &self.inner.id)
            .field("len", &self.len())
            .finish()
    }
}

impl Default for ModelList {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelList {
    /// A standalone list, usable as the root of an aggregate.
    pub fn new() -> Self {
        Self::build(None)
    }

    pub(crate) fn new_attached(parent: SlotParent) -> Self {
        Self::build(Some(parent))
    }

    fn build(parent: Option<SlotParent>) -> Self {
        let (events, _) = broadcast::channel(CHANGE_EVENT_CHANNEL_CAPACITY);
        ModelList {
            inner: Arc::new(ListInner {
                id: Uuid::new_v4(),
                state: Mutex::new(ListState {
                    items: Vec::new(),
                    pending: Vec::new(),
                    parent,
                    children: ChildStats::new(),
                    last_stat: MetaSnapshot::pristine(),
                }),
                tracker: TaskTracker::default(),
                events,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ListInner>) -> Self {
        ModelList { inner }
    }

    fn state(&self) -> MutexGuard<'_, ListState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The node whose slot holds this list, when attached.
    pub fn owner(&self) -> Option<Model> {
        let sp = self.state().parent.clone()?;
        sp.parent.upgrade().map(Model::from_inner)
    }

    pub(crate) fn slot_parent(&self) -> Option<SlotParent> {
        self.state().parent.clone()
    }

    // ---- membership ----

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Model> {
        self.state().items.get(index).cloned()
    }

    pub fn find(&self, id: Uuid) -> Option<Model> {
        self.state().items.iter().find(|m| m.id() == id).cloned()
    }

    /// Snapshot of the current items, in order.
    pub fn items(&self) -> Vec<Model> {
        self.state().items.clone()
    }

    /// Append a child node.
    ///
    /// A child sitting in this list's pending-deletion set is restored in
    /// place of a fresh attach: its deletion mark clears and it rejoins the
    /// items, still counting as modified.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateChild`] when the node is already an item,
    /// [`EngineError::ChildBusy`] while it has running chains,
    /// [`EngineError::CrossAggregateMove`] when it belongs elsewhere, and
    /// [`EngineError::CircularAttachment`] when it sits above this list's
    /// owner.
    pub fn add(&self, child: Model) -> Result<(), EngineError> {
        if let Some(owner) = self.owner() {
            if child.id() == owner.id() || owner.has_ancestor(child.id()) {
                return Err(EngineError::circular_attachment(format!(
                    "list {} cannot take the ancestor node {}",
                    self.inner.id,
                    child.id()
                )));
            }
        }

        {
            let mut st = self.state();
            if st.items.iter().any(|m| m.id() == child.id()) {
                return Err(EngineError::duplicate_child(child.id()));
            }
            if let Some(pos) = st.pending.iter().position(|m| m.id() == child.id()) {
                let restored = st.pending.remove(pos);
                restored.set_deleted(false);
                restored.force_modified();
                let snap = restored.meta();
                st.children.insert(restored.id(), snap);
                st.items.push(restored);
                drop(st);
                self.push_stat();
                return Ok(());
            }
            if child.is_busy() {
                return Err(EngineError::child_busy(child.id()));
            }
            // list lock is held; child lock nests inside
            let snap = {
                let mut child_st = child.state();
                if child_st.parent.is_some() {
                    return Err(EngineError::cross_aggregate_move(child.id()));
                }
                child_st.parent = Some(ParentLink::List {
                    list: Arc::downgrade(&self.inner),
                });
                combined(&child_st)
            };
            st.children.insert(child.id(), snap);
            st.items.push(child);
        }
        self.push_stat();
        Ok(())
    }

    /// Remove a child by id.
    ///
    /// A never-persisted child detaches and is gone. A persisted one is
    /// marked for deletion and parked in the pending set, which keeps the
    /// list modified until [`ModelList::drain_pending_deletions`] runs.
    ///
    /// # Errors
    ///
    /// [`EngineError::ChildNotFound`] when no item has this id.
    pub fn remove(&self, id: Uuid) -> Result<(), EngineError> {
        {
            let mut st = self.state();
            let Some(pos) = st.items.iter().position(|m| m.id() == id) else {
                return Err(EngineError::child_not_found(id));
            };
            let child = st.items.remove(pos);
            st.children.remove(id, true);
            if child.is_new() {
                let mut child_st = child.state();
                child_st.parent = None;
            } else {
                child.set_deleted(true);
                st.pending.push(child);
            }
        }
        self.push_stat();
        Ok(())
    }

    /// Children awaiting deletion, in removal order.
    pub fn pending_deletions(&self) -> Vec<Model> {
        self.state().pending.clone()
    }

    /// Hand the pending deletions to persistence. The drained nodes detach
    /// from the list and keep their deletion mark.
    pub fn drain_pending_deletions(&self) -> Vec<Model> {
        let drained = {
            let mut st = self.state();
            std::mem::take(&mut st.pending)
        };
        for child in &drained {
            let mut child_st = child.state();
            child_st.parent = None;
        }
        self.push_stat();
        drained
    }

    // ---- meta-state ----

    pub fn is_valid(&self) -> bool {
        self.state().children.all_valid()
    }

    pub fn is_busy(&self) -> bool {
        self.state().children.any_busy()
    }

    /// Modified when any item is, or while deletions are pending.
    pub fn is_modified(&self) -> bool {
        let st = self.state();
        st.children.any_modified() || !st.pending.is_empty()
    }

    pub fn meta(&self) -> MetaSnapshot {
        list_stat(&self.state())
    }

    pub(crate) fn absorb_child_stat(
        &self,
        child_id: Uuid,
        snap: MetaSnapshot,
    ) -> Option<(ParentLink, Uuid, MetaSnapshot)> {
        let mut st = self.state();
        if !st.children.update(child_id, snap, true) {
            return None;
        }
        let now = list_stat(&st);
        if now == st.last_stat {
            return None;
        }
        st.last_stat = now;
        st.parent.clone().map(|sp| {
            (
                ParentLink::Slot {
                    parent: sp.parent,
                    relation: sp.relation,
                },
                self.inner.id,
                now,
            )
        })
    }

    fn push_stat(&self) {
        let hop = {
            let mut st = self.state();
            let now = list_stat(&st);
            if now == st.last_stat {
                return;
            }
            st.last_stat = now;
            st.parent.clone().map(|sp| {
                (
                    ParentLink::Slot {
                        parent: sp.parent,
                        relation: sp.relation,
                    },
                    self.inner.id,
                    now,
                )
            })
        };
        propagate_stat(hop);
    }

    // ---- events, waiting, sweeping ----

    /// Subscribe to change events bubbling out of the items.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit_event(&self, event: ChangeEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Chains tracked at this list that have not settled yet.
    pub fn inflight_tasks(&self) -> usize {
        self.inner.tracker.pending_count()
    }

    /// Wait until every chain tracked at this list has settled.
    ///
    /// # Errors
    ///
    /// [`EngineError::WaitCancelled`] when `cancel` fires first; unlike a
    /// node wait, no validation mark is left behind.
    /// [`EngineError::TasksFailed`] when settled chains failed.
    pub async fn wait_for_tasks(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        self.inner.tracker.wait(cancel).await
    }

    /// Run a full rule sweep on every item, then recompute the list
    /// aggregates.
    ///
    /// # Errors
    ///
    /// [`EngineError::Cancelled`] when `cancel` fires between items;
    /// [`EngineError::TasksFailed`] collecting every failure the item
    /// sweeps reported.
    pub async fn run_rules(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        let mut failures = Vec::new();
        for item in self.items() {
            match item.run_rules(RuleScope::All, cancel).await {
                Ok(()) => {}
                Err(EngineError::TasksFailed { failures: mut f }) => failures.append(&mut f),
                Err(other) => return Err(other),
            }
        }
        {
            let mut st = self.state();
            st.children.recompute();
        }
        self.push_stat();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::tasks_failed(failures))
        }
    }
}
