//! Model Nodes
//!
//! [`Model`] is the handle to one node of the graph: a property container,
//! the rule pipeline that reacts to edits, the task tracker covering the
//! node's subtree, and a broadcast channel for change events. Handles are
//! cheap to clone and share; all state sits behind the handle.
//!
//! # Concurrency
//!
//! Rule chains are serialized per node by an async pipeline mutex. A chain
//! whose next rule is synchronous runs it inline inside the edit call; the
//! first asynchronous rule moves the rest of the chain onto a spawned task
//! that carries the pipeline guard with it, so a second edit arriving
//! meanwhile queues its whole chain behind the first. Rules never run
//! concurrently on one node.
//!
//! The state mutex is short-lived and never held across an await. Two state
//! locks nest only while attaching or detaching a child, always in
//! parent-then-child order; every upward walk (event bubbling, stat pushes,
//! tracker collection) locks one node at a time.

use super::batch::PausedActions;
use super::cascade::{ChildStats, ParentLink, SlotParent};
use super::container::{ExecutionId, PropertyContainer};
use super::list::ModelList;
use super::tracker::{TaskId, TaskTracker};
use crate::error::{EngineError, RuleFailure};
use crate::models::{
    Blueprint, ChangeEvent, ChangeReason, FromValue, MetaSnapshot, PropertyMessage, Value,
    ValueKind,
};
use crate::rules::{RegisteredRule, RuleBody, RuleContext, RuleOutcome, RuleScope};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CHANGE_EVENT_CHANNEL_CAPACITY: usize = 128;

pub(crate) struct ModelInner {
    pub(crate) id: Uuid,
    pub(crate) blueprint: Arc<Blueprint>,
    pub(crate) state: Mutex<ModelState>,
    pub(crate) pipeline: Arc<tokio::sync::Mutex<()>>,
    pub(crate) tracker: TaskTracker,
    pub(crate) events: broadcast::Sender<ChangeEvent>,
}

pub(crate) struct ModelState {
    pub(crate) container: PropertyContainer,
    pub(crate) parent: Option<ParentLink>,
    pub(crate) children: ChildStats,
    pub(crate) paused: u32,
    pub(crate) last_stat: MetaSnapshot,
    pub(crate) is_new: bool,
    pub(crate) deleted: bool,
}

/// Combined meta-state of a node: its own container caches folded with the
/// cached child aggregates.
pub(crate) fn combined(st: &ModelState) -> MetaSnapshot {
    MetaSnapshot {
        valid: st.container.is_self_valid() && st.children.all_valid(),
        busy: st.container.is_self_busy() || st.children.any_busy(),
        modified: st.container.is_self_modified() || st.children.any_modified() || st.deleted,
    }
}

/// A child handle found in a node's slots.
pub(crate) enum ChildHandle {
    Node(Model),
    List(ModelList),
}

/// Handle to one node of the graph.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Model {}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.inner.id)
            .field("type", &self.inner.blueprint.type_name())
            .finish()
    }
}

impl Model {
    /// Instantiate a node from its blueprint.
    ///
    /// Scalar slots start at their declared defaults, node slots start null,
    /// and every list slot gets its own empty list owned by this node.
    pub fn new(blueprint: Arc<Blueprint>) -> Self {
        let (events, _) = broadcast::channel(CHANGE_EVENT_CHANNEL_CAPACITY);
        let container = PropertyContainer::new(Arc::clone(&blueprint));
        let model = Model {
            inner: Arc::new(ModelInner {
                id: Uuid::new_v4(),
                blueprint,
                state: Mutex::new(ModelState {
                    container,
                    parent: None,
                    children: ChildStats::new(),
                    paused: 0,
                    last_stat: MetaSnapshot::pristine(),
                    is_new: true,
                    deleted: false,
                }),
                pipeline: Arc::new(tokio::sync::Mutex::new(())),
                tracker: TaskTracker::default(),
                events,
            }),
        };
        model.install_lists();
        model
    }

    pub(crate) fn from_inner(inner: Arc<ModelInner>) -> Self {
        Model { inner }
    }

    fn install_lists(&self) {
        let list_slots: Vec<(usize, String)> = self
            .inner
            .blueprint
            .properties()
            .iter()
            .enumerate()
            .filter(|(_, def)| def.kind() == ValueKind::List)
            .map(|(idx, def)| (idx, def.name().to_string()))
            .collect();
        for (idx, relation) in list_slots {
            let list = ModelList::new_attached(SlotParent {
                parent: Arc::downgrade(&self.inner),
                relation,
            });
            let mut st = self.state();
            st.children.insert(list.id(), MetaSnapshot::pristine());
            st.container.put_raw(idx, Value::List(list));
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ModelState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ---- identity and navigation ----

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn type_name(&self) -> &str {
        self.inner.blueprint.type_name()
    }

    pub fn blueprint(&self) -> &Arc<Blueprint> {
        &self.inner.blueprint
    }

    /// The node holding this one, through a slot or through a list.
    pub fn parent(&self) -> Option<Model> {
        let link = self.state().parent.clone()?;
        match link {
            ParentLink::Slot { parent, .. } => parent.upgrade().map(Model::from_inner),
            ParentLink::List { list } => list
                .upgrade()
                .and_then(|inner| ModelList::from_inner(inner).owner()),
        }
    }

    /// The top of the aggregate this node belongs to (itself when detached).
    pub fn root(&self) -> Model {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub(crate) fn has_ancestor(&self, id: Uuid) -> bool {
        let mut current = self.parent();
        while let Some(node) = current {
            if node.id() == id {
                return true;
            }
            current = node.parent();
        }
        false
    }

    // ---- meta-state ----

    /// Valid for itself and for every attached child, recursively.
    pub fn is_valid(&self) -> bool {
        let st = self.state();
        st.container.is_self_valid() && st.children.all_valid()
    }

    /// Valid at this node alone: no property or node-level messages.
    pub fn is_self_valid(&self) -> bool {
        self.state().container.is_self_valid()
    }

    /// Busy here or anywhere below.
    pub fn is_busy(&self) -> bool {
        let st = self.state();
        st.container.is_self_busy() || st.children.any_busy()
    }

    /// Modified here or anywhere below, including a pending deletion mark.
    pub fn is_modified(&self) -> bool {
        let st = self.state();
        st.container.is_self_modified() || st.children.any_modified() || st.deleted
    }

    /// Modified at this node alone.
    pub fn is_self_modified(&self) -> bool {
        self.state().container.is_self_modified()
    }

    /// Never persisted yet.
    pub fn is_new(&self) -> bool {
        self.state().is_new
    }

    /// Marked for deletion by its list, awaiting a persistence drain.
    pub fn is_deleted(&self) -> bool {
        self.state().deleted
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused > 0
    }

    /// The combined triple the cascade pushes upward.
    pub fn meta(&self) -> MetaSnapshot {
        combined(&self.state())
    }

    /// Chains tracked at this node (its own and forwarded ones) that have
    /// not settled yet.
    pub fn inflight_tasks(&self) -> usize {
        self.inner.tracker.pending_count()
    }

    // ---- property access ----

    pub fn get(&self, name: &str) -> Result<Value, EngineError> {
        let st = self.state();
        let idx = st.container.slot_index(name)?;
        Ok(st.container.value(idx).clone())
    }

    pub fn try_get(&self, name: &str) -> Option<Value> {
        let st = self.state();
        let idx = st.container.try_slot_index(name)?;
        Some(st.container.value(idx).clone())
    }

    /// Read a property with a compile-time-known kind.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T, EngineError> {
        T::from_value(name, self.get(name)?)
    }

    pub fn property_names(&self) -> Vec<String> {
        self.state()
            .container
            .entries()
            .map(|(name, _)| name.to_string())
            .collect()
    }

    pub fn property_messages(&self, name: &str) -> Result<Vec<PropertyMessage>, EngineError> {
        let st = self.state();
        let idx = st.container.slot_index(name)?;
        Ok(st.container.property_messages(idx))
    }

    /// Every message on this node, as `(property, message)` pairs;
    /// node-level messages carry an empty property name.
    pub fn all_messages(&self) -> Vec<(String, PropertyMessage)> {
        self.state().container.all_messages()
    }

    pub fn is_property_busy(&self, name: &str) -> Result<bool, EngineError> {
        let st = self.state();
        let idx = st.container.slot_index(name)?;
        Ok(st.container.is_property_busy(idx))
    }

    pub fn is_property_modified(&self, name: &str) -> Result<bool, EngineError> {
        let st = self.state();
        let idx = st.container.slot_index(name)?;
        Ok(st.container.is_property_modified(idx))
    }

    /// Edit a property: marks it modified, emits a change event, and runs
    /// the rules it triggers. Must be called from within a Tokio runtime
    /// when the blueprint registers async rules.
    ///
    /// Writing the value a slot already holds is a complete no-op.
    ///
    /// Assigning a node to a node slot attaches it; assigning null detaches
    /// the current occupant. The incoming child must be parentless, not
    /// busy, and not an ancestor of this node.
    ///
    /// # Errors
    ///
    /// [`EngineError::PropertyNotFound`], [`EngineError::PropertyReadOnly`],
    /// [`EngineError::KindMismatch`], and the attachment errors
    /// [`EngineError::ChildBusy`], [`EngineError::CrossAggregateMove`],
    /// [`EngineError::CircularAttachment`].
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<(), EngineError> {
        self.write(name, value.into(), ChangeReason::UserEdit)
    }

    /// Write a property the way persistence does: no modified marking, no
    /// rules, read-only slots accepted. Emits a change event with the load
    /// reason.
    pub fn load(&self, name: &str, value: impl Into<Value>) -> Result<(), EngineError> {
        self.write(name, value.into(), ChangeReason::Load)
    }

    fn write(&self, name: &str, value: Value, reason: ChangeReason) -> Result<(), EngineError> {
        let incoming_child = match &value {
            Value::Node(child) => {
                self.check_attachable(child, name)?;
                Some(child.clone())
            }
            _ => None,
        };

        {
            let mut st = self.state();
            let idx = st.container.slot_index(name)?;
            if st.container.def(idx).kind() == ValueKind::List {
                // list slots are installed at construction and never move
                return Err(EngineError::property_read_only(name));
            }
            if reason == ChangeReason::UserEdit {
                st.container.check_writable(idx)?;
            }
            st.container.check_kind(idx, &value)?;
            if *st.container.value(idx) == value {
                return Ok(());
            }

            let outgoing = match st.container.value(idx) {
                Value::Node(old) => Some(old.clone()),
                _ => None,
            };
            if let Some(child) = &incoming_child {
                // parent lock is held; child lock nests inside
                let snap = {
                    let mut child_st = child.state();
                    if child_st.parent.is_some() {
                        return Err(EngineError::cross_aggregate_move(child.id()));
                    }
                    child_st.parent = Some(ParentLink::Slot {
                        parent: Arc::downgrade(&self.inner),
                        relation: name.to_string(),
                    });
                    combined(&child_st)
                };
                st.children.insert(child.id(), snap);
            }
            if let Some(old) = outgoing {
                {
                    let mut old_st = old.state();
                    old_st.parent = None;
                }
                let allow_rescan = st.paused == 0;
                st.children.remove(old.id(), allow_rescan);
            }

            st.container.write(idx, value);
            if reason == ChangeReason::UserEdit {
                st.container.mark_modified(idx);
            }
            if st.paused > 0 {
                return Ok(());
            }
        }

        self.emit_and_bubble(ChangeEvent::new(name, reason, self.inner.id));
        self.push_stat();
        if reason == ChangeReason::UserEdit {
            self.start_chain(name.to_string());
        }
        Ok(())
    }

    fn check_attachable(&self, child: &Model, relation: &str) -> Result<(), EngineError> {
        {
            let child_st = child.state();
            if let Some(ParentLink::Slot {
                parent,
                relation: existing,
            }) = &child_st.parent
            {
                if existing == relation && parent.as_ptr() == Arc::as_ptr(&self.inner) {
                    // already in this very slot; the write will no-op
                    return Ok(());
                }
            }
            if child_st.parent.is_some() {
                return Err(EngineError::cross_aggregate_move(child.id()));
            }
        }
        if child.is_busy() {
            return Err(EngineError::child_busy(child.id()));
        }
        if child.id() == self.id() || self.has_ancestor(child.id()) {
            return Err(EngineError::circular_attachment(format!(
                "node {} cannot hold its ancestor {} under '{}'",
                self.inner.id,
                child.id(),
                relation
            )));
        }
        Ok(())
    }

    // ---- persistence-facing marks ----

    /// Clear the modified flags at this node. Typically called together
    /// with [`Model::mark_old`] after a successful save.
    pub fn mark_unmodified(&self) {
        {
            let mut st = self.state();
            st.container.clear_modified();
        }
        self.push_stat();
    }

    /// The node now exists in storage; list removal will mark it for
    /// deletion instead of dropping it.
    pub fn mark_old(&self) {
        let mut st = self.state();
        st.is_new = false;
    }

    pub(crate) fn set_deleted(&self, deleted: bool) {
        let mut st = self.state();
        st.deleted = deleted;
    }

    pub(crate) fn force_modified(&self) {
        let mut st = self.state();
        st.container.force_modified();
    }

    // ---- events ----

    /// Subscribe to change events as observed at this node. Events from
    /// descendants arrive with their path extended hop by hop.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit_event(&self, event: ChangeEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Broadcast locally, then walk the ancestry: each slot hop prepends its
    /// relation and re-broadcasts, list hops re-broadcast unchanged. A
    /// paused ancestor stops the walk. User edits additionally run any
    /// ancestor rules triggered by the bubbled path.
    fn emit_and_bubble(&self, event: ChangeEvent) {
        self.emit_event(event.clone());
        let mut current = event;
        let mut link = self.state().parent.clone();
        loop {
            match link {
                Some(ParentLink::Slot { parent, relation }) => {
                    let Some(inner) = parent.upgrade() else { break };
                    let node = Model::from_inner(inner);
                    if node.is_paused() {
                        break;
                    }
                    current = current.through(&relation);
                    node.emit_event(current.clone());
                    if current.reason == ChangeReason::UserEdit
                        && node.inner.blueprint.rules().has_trigger(&current.path)
                    {
                        node.start_chain(current.path.clone());
                    }
                    link = node.state().parent.clone();
                }
                Some(ParentLink::List { list }) => {
                    let Some(inner) = list.upgrade() else { break };
                    let list = ModelList::from_inner(inner);
                    list.emit_event(current.clone());
                    link = list
                        .slot_parent()
                        .map(|sp| ParentLink::Slot {
                            parent: sp.parent,
                            relation: sp.relation,
                        });
                }
                None => break,
            }
        }
    }

    // ---- meta-state cascade ----

    /// Push this node's combined snapshot upward if it flipped. Each hop
    /// folds the snapshot into its cached child aggregates and continues
    /// only while its own combined snapshot keeps flipping.
    pub(crate) fn push_stat(&self) {
        let hop = {
            let mut st = self.state();
            if st.paused > 0 {
                return;
            }
            let snap = combined(&st);
            if snap == st.last_stat {
                return;
            }
            st.last_stat = snap;
            st.parent.clone().map(|link| (link, self.inner.id, snap))
        };
        super::cascade::propagate_stat(hop);
    }

    /// Fold a child snapshot in; returns the next hop when this node's own
    /// combined snapshot flipped as a result.
    pub(crate) fn absorb_child_stat(
        &self,
        child_id: Uuid,
        snap: MetaSnapshot,
    ) -> Option<(ParentLink, Uuid, MetaSnapshot)> {
        let mut st = self.state();
        let allow_rescan = st.paused == 0;
        if !st.children.update(child_id, snap, allow_rescan) {
            // stale push from a detached or pending child
            return None;
        }
        if st.paused > 0 {
            return None;
        }
        let now = combined(&st);
        if now == st.last_stat {
            return None;
        }
        st.last_stat = now;
        st.parent.clone().map(|link| (link, self.inner.id, now))
    }

    // ---- rule execution ----

    fn local_trigger_slots(&self, rule: &RegisteredRule) -> Vec<usize> {
        let st = self.state();
        rule.triggers
            .iter()
            .filter_map(|t| st.container.try_slot_index(t))
            .collect()
    }

    fn mark_invocation_busy(&self, rule: &RegisteredRule) -> ExecutionId {
        let exec = ExecutionId::new();
        let slots = self.local_trigger_slots(rule);
        {
            let mut st = self.state();
            st.container.mark_busy(exec, &slots);
        }
        self.push_stat();
        exec
    }

    fn clear_invocation_busy(&self, exec: ExecutionId) {
        {
            let mut st = self.state();
            st.container.clear_busy(exec);
        }
        self.push_stat();
    }

    /// Start the rule chain for `trigger`. With the pipeline free, the sync
    /// prefix runs inline; otherwise the whole chain queues behind whatever
    /// holds the pipeline.
    fn start_chain(&self, trigger: String) {
        let rules = self
            .inner
            .blueprint
            .rules()
            .triggered_by(&trigger)
            .to_vec();
        if rules.is_empty() {
            return;
        }
        let ctx = RuleContext::new(self.clone(), trigger, ChangeReason::UserEdit);
        match Arc::clone(&self.inner.pipeline).try_lock_owned() {
            Ok(guard) => self.run_chain_inline(guard, ctx, rules),
            Err(_) => self.spawn_queued_chain(ctx, rules),
        }
    }

    /// Run sync rules inline until the chain ends, fails, or reaches its
    /// first async rule; from there the remainder moves onto a spawned task
    /// carrying the pipeline guard.
    fn run_chain_inline(
        &self,
        guard: OwnedMutexGuard<()>,
        ctx: RuleContext,
        rules: Vec<Arc<RegisteredRule>>,
    ) {
        let mut idx = 0;
        while idx < rules.len() {
            let rule = Arc::clone(&rules[idx]);
            match &rule.body {
                RuleBody::Sync(body) => {
                    let result = body.execute(&ctx);
                    if !self.apply_chain_result(&ctx, &rule, result, None) {
                        return;
                    }
                    idx += 1;
                }
                RuleBody::Async(_) => {
                    // marked before the edit call returns, so callers
                    // observe busy immediately
                    let exec = self.mark_invocation_busy(&rule);
                    self.spawn_chain_remainder(guard, ctx, rules, idx, exec);
                    return;
                }
            }
        }
    }

    /// Continue a chain from its first async rule, holding the pipeline
    /// guard until the chain settles.
    fn spawn_chain_remainder(
        &self,
        guard: OwnedMutexGuard<()>,
        ctx: RuleContext,
        rules: Vec<Arc<RegisteredRule>>,
        start: usize,
        first_exec: ExecutionId,
    ) {
        let model = self.clone();
        let task = TaskId::new();
        let trackers = self.collect_trackers();
        let (done_tx, done_rx) = watch::channel(false);
        for tracker in &trackers {
            tracker.track(task, done_rx.clone());
        }
        tokio::spawn(async move {
            let _guard = guard;
            let chain_cancel = CancellationToken::new();
            let mut first_exec = Some(first_exec);
            let mut idx = start;
            while idx < rules.len() {
                let rule = Arc::clone(&rules[idx]);
                let result = match &rule.body {
                    RuleBody::Sync(body) => body.execute(&ctx),
                    RuleBody::Async(body) => {
                        let exec = match first_exec.take() {
                            Some(exec) => exec,
                            None => model.mark_invocation_busy(&rule),
                        };
                        let result = body.execute(&ctx, &chain_cancel).await;
                        model.clear_invocation_busy(exec);
                        result
                    }
                };
                if !model.apply_chain_result(&ctx, &rule, result, Some(&trackers)) {
                    break;
                }
                idx += 1;
            }
            let _ = done_tx.send(true);
            for tracker in &trackers {
                tracker.finish(task);
            }
        });
    }

    /// Queue a whole chain behind the current pipeline holder. The chain's
    /// origin slot stays busy until the chain settles.
    fn spawn_queued_chain(&self, ctx: RuleContext, rules: Vec<Arc<RegisteredRule>>) {
        tracing::debug!(
            "queueing rule chain for '{}' on node {}",
            ctx.trigger(),
            self.inner.id
        );
        let model = self.clone();
        let task = TaskId::new();
        let trackers = self.collect_trackers();
        let (done_tx, done_rx) = watch::channel(false);
        for tracker in &trackers {
            tracker.track(task, done_rx.clone());
        }
        let chain_exec = ExecutionId::new();
        {
            let mut st = self.state();
            let slots: Vec<usize> = st
                .container
                .try_slot_index(ctx.trigger())
                .into_iter()
                .collect();
            st.container.mark_busy(chain_exec, &slots);
        }
        self.push_stat();

        let pipeline = Arc::clone(&self.inner.pipeline);
        tokio::spawn(async move {
            let _guard = pipeline.lock_owned().await;
            let chain_cancel = CancellationToken::new();
            for rule in &rules {
                let result = match &rule.body {
                    RuleBody::Sync(body) => body.execute(&ctx),
                    RuleBody::Async(body) => {
                        let exec = model.mark_invocation_busy(rule);
                        let result = body.execute(&ctx, &chain_cancel).await;
                        model.clear_invocation_busy(exec);
                        result
                    }
                };
                if !model.apply_chain_result(&ctx, rule, result, Some(&trackers)) {
                    break;
                }
            }
            model.clear_invocation_busy(chain_exec);
            let _ = done_tx.send(true);
            for tracker in &trackers {
                tracker.finish(task);
            }
        });
    }

    /// Apply a rule result. Returns whether the chain continues; a failing
    /// rule ends its chain after its failure is recorded.
    fn apply_chain_result(
        &self,
        ctx: &RuleContext,
        rule: &RegisteredRule,
        result: anyhow::Result<RuleOutcome>,
        trackers: Option<&[TaskTracker]>,
    ) -> bool {
        match result {
            Ok(outcome) => {
                self.apply_outcome(rule.id, outcome);
                true
            }
            Err(err) => {
                let failure = self.record_failure_message(ctx, rule, &err);
                match trackers {
                    Some(trackers) => {
                        for tracker in trackers {
                            tracker.record_failure(failure.clone());
                        }
                    }
                    None => {
                        for tracker in self.collect_trackers() {
                            tracker.record_failure(failure.clone());
                        }
                    }
                }
                false
            }
        }
    }

    /// Replace the rule's messages and apply its staged writes. Staged
    /// writes are scalar and load-style: no modified marking, no
    /// re-triggering, load-reason events.
    fn apply_outcome(&self, rule: crate::models::RuleId, outcome: RuleOutcome) {
        let mut write_events = Vec::new();
        {
            let mut st = self.state();
            let mut items = Vec::new();
            for (name, text) in outcome.messages {
                match st.container.try_slot_index(&name) {
                    Some(idx) => items.push((idx, text)),
                    None => tracing::warn!(
                        "{} names unknown property '{}' in a message",
                        rule,
                        name
                    ),
                }
            }
            let removed = st.container.replace_messages(rule, &items);
            if removed && items.is_empty() && !st.container.is_self_valid() && st.paused == 0 {
                st.container.recompute_validity();
            }

            for (name, value) in outcome.writes {
                let Some(idx) = st.container.try_slot_index(&name) else {
                    tracing::warn!("{} stages a write to unknown property '{}'", rule, name);
                    continue;
                };
                if matches!(value, Value::Node(_) | Value::List(_)) {
                    tracing::warn!(
                        "{} stages a structural write to '{}'; only scalar writes apply",
                        rule,
                        name
                    );
                    continue;
                }
                if st.container.check_kind(idx, &value).is_err() {
                    tracing::warn!(
                        "{} stages a {:?} write to '{}'; dropped",
                        rule,
                        value.kind(),
                        name
                    );
                    continue;
                }
                if st.container.write(idx, value) && st.paused == 0 {
                    write_events.push(ChangeEvent::new(
                        name,
                        ChangeReason::Load,
                        self.inner.id,
                    ));
                }
            }
        }
        for event in write_events {
            self.emit_and_bubble(event);
        }
        self.push_stat();
    }

    /// Attach the failure text as a message on the chain's origin property
    /// and return the failure record.
    fn record_failure_message(
        &self,
        ctx: &RuleContext,
        rule: &RegisteredRule,
        err: &anyhow::Error,
    ) -> RuleFailure {
        let text = err.to_string();
        tracing::warn!("{} failed on node {}: {}", rule.id, self.inner.id, text);
        let property = {
            let mut st = self.state();
            let idx = match st.container.try_slot_index(ctx.trigger()) {
                Some(idx) => Some(idx),
                None => rule
                    .triggers
                    .iter()
                    .find_map(|t| st.container.try_slot_index(t)),
            };
            match idx {
                Some(idx) => {
                    let name = st.container.def(idx).name().to_string();
                    st.container.replace_messages(rule.id, &[(idx, text.clone())]);
                    name
                }
                None => String::new(),
            }
        };
        self.push_stat();
        RuleFailure {
            node: self.inner.id,
            property,
            rule: rule.id,
            error: text,
        }
    }

    /// Trackers covering this node: its own plus every ancestor's, captured
    /// at one instant. Safe to capture at spawn time because busy nodes are
    /// refused attachment elsewhere.
    fn collect_trackers(&self) -> Vec<TaskTracker> {
        let mut trackers = vec![self.inner.tracker.clone()];
        let mut link = self.state().parent.clone();
        loop {
            match link {
                Some(ParentLink::Slot { parent, .. }) => match parent.upgrade() {
                    Some(inner) => {
                        trackers.push(inner.tracker.clone());
                        link = Model::from_inner(inner).state().parent.clone();
                    }
                    None => break,
                },
                Some(ParentLink::List { list }) => match list.upgrade() {
                    Some(inner) => {
                        trackers.push(inner.tracker.clone());
                        link = ModelList::from_inner(inner).slot_parent().map(|sp| {
                            ParentLink::Slot {
                                parent: sp.parent,
                                relation: sp.relation,
                            }
                        });
                    }
                    None => break,
                },
                None => break,
            }
        }
        trackers
    }

    // ---- waiting and sweeping ----

    /// Wait until every chain tracked at this node has settled, covering
    /// the whole subtree through tracker forwarding.
    ///
    /// # Errors
    ///
    /// [`EngineError::WaitCancelled`] when `cancel` fires first: the chains
    /// keep running, and the node is marked invalid with the fixed
    /// wait-cancelled message until a full rule sweep clears it.
    /// [`EngineError::TasksFailed`] when everything settled but some chains
    /// failed.
    pub async fn wait_for_tasks(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        match self.inner.tracker.wait(cancel).await {
            Err(EngineError::WaitCancelled) => {
                tracing::debug!("wait for tasks cancelled on node {}", self.inner.id);
                {
                    let mut st = self.state();
                    st.container.apply_node_message(PropertyMessage::wait_cancelled());
                }
                self.push_stat();
                Err(EngineError::WaitCancelled)
            }
            other => other,
        }
    }

    /// Re-run rules explicitly: after a batch, after loading, or to clear a
    /// wait-cancelled mark.
    ///
    /// A full self sweep ([`RuleScope::All`] or [`RuleScope::SelfOnly`])
    /// first clears every message on the node, including the wait-cancelled
    /// one, then runs every rule exactly once in execution order, inline.
    /// [`RuleScope::All`] and [`RuleScope::ChildrenOnly`] recurse into slot
    /// children and list items. The sweep ends with an unconditional
    /// aggregate recompute and cascade, which restores any coherence a
    /// paused batch deferred.
    ///
    /// # Errors
    ///
    /// [`EngineError::Cancelled`] when `cancel` fires between rules; rules
    /// already started are not interrupted, and no further rule starts.
    /// [`EngineError::TasksFailed`] carrying every rule failure the sweep
    /// saw; the sweep itself keeps going past failing rules.
    pub async fn run_rules(
        &self,
        scope: RuleScope,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        self.run_rules_scoped(scope, cancel).await
    }

    fn run_rules_scoped<'a>(
        &'a self,
        scope: RuleScope,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            let _guard = Arc::clone(&self.inner.pipeline).lock_owned().await;
            tracing::debug!("rule sweep ({:?}) on node {}", scope, self.inner.id);
            let mut failures: Vec<RuleFailure> = Vec::new();

            if !matches!(scope, RuleScope::ChildrenOnly) {
                let rules = match &scope {
                    RuleScope::Property(name) => {
                        self.inner.blueprint.rules().triggered_by(name).to_vec()
                    }
                    _ => {
                        {
                            let mut st = self.state();
                            st.container.clear_all_messages();
                        }
                        self.inner.blueprint.rules().all()
                    }
                };
                for rule in rules {
                    if cancel.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    let trigger = match &scope {
                        RuleScope::Property(name) => name.clone(),
                        _ => rule.primary_trigger().to_string(),
                    };
                    let ctx = RuleContext::new(self.clone(), trigger, ChangeReason::UserEdit);
                    let result = match &rule.body {
                        RuleBody::Sync(body) => body.execute(&ctx),
                        RuleBody::Async(body) => {
                            let exec = self.mark_invocation_busy(&rule);
                            let result = body.execute(&ctx, cancel).await;
                            self.clear_invocation_busy(exec);
                            result
                        }
                    };
                    match result {
                        Ok(outcome) => self.apply_outcome(rule.id, outcome),
                        Err(err) => {
                            failures.push(self.record_failure_message(&ctx, &rule, &err));
                        }
                    }
                }
            }

            if matches!(scope, RuleScope::All | RuleScope::ChildrenOnly) {
                for child in self.child_handles() {
                    if cancel.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    match child {
                        ChildHandle::Node(node) => {
                            match node.run_rules_scoped(RuleScope::All, cancel).await {
                                Ok(()) => {}
                                Err(EngineError::TasksFailed { failures: mut f }) => {
                                    failures.append(&mut f)
                                }
                                Err(other) => return Err(other),
                            }
                        }
                        ChildHandle::List(list) => {
                            for item in list.items() {
                                match item.run_rules_scoped(RuleScope::All, cancel).await {
                                    Ok(()) => {}
                                    Err(EngineError::TasksFailed { failures: mut f }) => {
                                        failures.append(&mut f)
                                    }
                                    Err(other) => return Err(other),
                                }
                            }
                        }
                    }
                }
            }

            self.refresh_aggregates();

            if failures.is_empty() {
                Ok(())
            } else {
                Err(EngineError::tasks_failed(failures))
            }
        })
    }

    fn child_handles(&self) -> Vec<ChildHandle> {
        let st = self.state();
        st.container
            .entries()
            .filter_map(|(_, value)| match value {
                Value::Node(node) => Some(ChildHandle::Node(node.clone())),
                Value::List(list) => Some(ChildHandle::List(list.clone())),
                _ => None,
            })
            .collect()
    }

    /// Full recompute of every cached aggregate, then a cascade push.
    fn refresh_aggregates(&self) {
        {
            let mut st = self.state();
            st.container.recompute_validity();
            st.children.recompute();
        }
        self.push_stat();
    }

    // ---- batching ----

    /// Pause rules, events, and the upward cascade on this node until the
    /// returned guard drops. Values written meanwhile still apply, and
    /// worsening cache transitions still land; nothing is replayed on
    /// resume. Run a full sweep afterwards to validate the batch.
    ///
    /// Pauses nest; the node resumes when the last guard drops.
    #[must_use]
    pub fn pause_all_actions(&self) -> PausedActions {
        {
            let mut st = self.state();
            st.paused += 1;
        }
        PausedActions::new(self.clone())
    }

    pub(crate) fn resume(&self) {
        let mut st = self.state();
        st.paused = st.paused.saturating_sub(1);
    }
}
