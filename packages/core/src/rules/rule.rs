//! Rule Traits and Execution Context
//!
//! Rules are the declarative validation and transformation units of the
//! engine. A rule names the properties that trigger it, an order within its
//! trigger group, and a body. Sync rule bodies run inline inside the edit
//! call; async rule bodies run on the node's serialized pipeline and are
//! tracked as in-flight tasks until they settle.
//!
//! Rule bodies report through [`RuleOutcome`]: messages break validity until
//! the same rule runs again and replaces them, staged writes apply load-style
//! (no re-triggering, no modified marking).

use crate::engine::Model;
use crate::models::{ChangeReason, FromValue, Value};
use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// Order assigned to rules that do not specify one. Lower runs earlier.
pub const DEFAULT_RULE_ORDER: i32 = 1;

/// What a rule invocation gets to look at.
///
/// The context carries a handle to the node the rule runs on and the trigger
/// that caused the invocation. For rules triggered by a bubbled child change
/// the trigger is the dotted path as seen from this node (for example
/// `Address.City`).
#[derive(Clone)]
pub struct RuleContext {
    model: Model,
    trigger: String,
    reason: ChangeReason,
}

impl RuleContext {
    pub(crate) fn new(model: Model, trigger: impl Into<String>, reason: ChangeReason) -> Self {
        Self {
            model,
            trigger: trigger.into(),
            reason,
        }
    }

    /// The node this invocation runs on.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// The trigger that caused this invocation.
    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    pub fn reason(&self) -> ChangeReason {
        self.reason
    }

    /// Read a property of the node this rule runs on.
    pub fn get(&self, name: &str) -> Result<Value, crate::error::EngineError> {
        self.model.get(name)
    }

    /// Read a property with a compile-time-known kind.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T, crate::error::EngineError> {
        self.model.get_as(name)
    }
}

/// What a rule invocation produced.
///
/// An empty outcome means the rule is satisfied; because message application
/// replaces the rule's previous messages everywhere, a satisfied re-run also
/// clears whatever the rule raised before.
#[derive(Debug, Default)]
pub struct RuleOutcome {
    pub(crate) messages: Vec<(String, String)>,
    pub(crate) writes: Vec<(String, Value)>,
}

impl RuleOutcome {
    /// Satisfied: no messages, no writes.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Broken: a single message on `property`.
    pub fn broken(property: impl Into<String>, text: impl Into<String>) -> Self {
        Self::ok().with_message(property, text)
    }

    /// Add a message on `property`.
    pub fn with_message(mut self, property: impl Into<String>, text: impl Into<String>) -> Self {
        self.messages.push((property.into(), text.into()));
        self
    }

    /// Stage a load-style write to `property`, applied after the body returns.
    pub fn with_write(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.writes.push((property.into(), value.into()));
        self
    }
}

/// A rule whose body completes without suspension.
///
/// Sync rules run inline inside `Model::set`, so their messages are already
/// applied when the edit call returns.
pub trait SyncRule: Send + Sync {
    /// Property names (or dotted child paths) that trigger this rule.
    fn triggers(&self) -> &[String];

    /// Execution order within one change; lower runs earlier, ties run in
    /// registration order.
    fn order(&self) -> i32 {
        DEFAULT_RULE_ORDER
    }

    fn execute(&self, ctx: &RuleContext) -> anyhow::Result<RuleOutcome>;
}

/// A rule whose body may suspend.
///
/// Async rules run on the node's serialized pipeline. The token is the wait
/// cancellation surface: cancelling a wait never aborts the body, but a body
/// may observe the token and finish early.
#[async_trait]
pub trait AsyncRule: Send + Sync {
    /// Property names (or dotted child paths) that trigger this rule.
    fn triggers(&self) -> &[String];

    /// Execution order within one change; lower runs earlier, ties run in
    /// registration order.
    fn order(&self) -> i32 {
        DEFAULT_RULE_ORDER
    }

    async fn execute(
        &self,
        ctx: &RuleContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RuleOutcome>;
}

/// Closure adapter for [`SyncRule`].
///
/// # Examples
///
/// ```
/// use veristate_core::{RuleOutcome, SyncFn};
///
/// let rule = SyncFn::new(["Amount"], |ctx| {
///     let amount: i64 = ctx.get_as("Amount")?;
///     if amount < 0 {
///         Ok(RuleOutcome::broken("Amount", "Amount must not be negative"))
///     } else {
///         Ok(RuleOutcome::ok())
///     }
/// });
/// ```
pub struct SyncFn<F> {
    triggers: Vec<String>,
    order: i32,
    f: F,
}

impl<F> SyncFn<F>
where
    F: Fn(&RuleContext) -> anyhow::Result<RuleOutcome> + Send + Sync,
{
    pub fn new<I, S>(triggers: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            triggers: triggers.into_iter().map(Into::into).collect(),
            order: DEFAULT_RULE_ORDER,
            f,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl<F> SyncRule for SyncFn<F>
where
    F: Fn(&RuleContext) -> anyhow::Result<RuleOutcome> + Send + Sync,
{
    fn triggers(&self) -> &[String] {
        &self.triggers
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn execute(&self, ctx: &RuleContext) -> anyhow::Result<RuleOutcome> {
        (self.f)(ctx)
    }
}

/// Closure adapter for [`AsyncRule`].
///
/// The closure returns a boxed future; `futures::FutureExt::boxed` is the
/// usual way to produce one:
///
/// ```
/// use futures::FutureExt;
/// use veristate_core::{AsyncFn, RuleOutcome};
///
/// let rule = AsyncFn::new(["Code"], |ctx, _cancel| {
///     async move {
///         let code: String = ctx.get_as("Code")?;
///         if code.is_empty() {
///             Ok(RuleOutcome::broken("Code", "Code is required"))
///         } else {
///             Ok(RuleOutcome::ok())
///         }
///     }
///     .boxed()
/// });
/// ```
pub struct AsyncFn<F> {
    triggers: Vec<String>,
    order: i32,
    f: F,
}

impl<F> AsyncFn<F>
where
    F: for<'a> Fn(&'a RuleContext, &'a CancellationToken) -> BoxFuture<'a, anyhow::Result<RuleOutcome>>
        + Send
        + Sync,
{
    pub fn new<I, S>(triggers: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            triggers: triggers.into_iter().map(Into::into).collect(),
            order: DEFAULT_RULE_ORDER,
            f,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

#[async_trait]
impl<F> AsyncRule for AsyncFn<F>
where
    F: for<'a> Fn(&'a RuleContext, &'a CancellationToken) -> BoxFuture<'a, anyhow::Result<RuleOutcome>>
        + Send
        + Sync,
{
    fn triggers(&self) -> &[String] {
        &self.triggers
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn execute(
        &self,
        ctx: &RuleContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RuleOutcome> {
        (self.f)(ctx, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_fn_carries_triggers_and_order() {
        let rule = SyncFn::new(["A", "B"], |_ctx| Ok(RuleOutcome::ok())).with_order(5);
        assert_eq!(rule.triggers(), &["A".to_string(), "B".to_string()]);
        assert_eq!(rule.order(), 5);
    }

    #[test]
    fn test_outcome_builder() {
        let outcome = RuleOutcome::broken("A", "bad")
            .with_message("B", "also bad")
            .with_write("C", 3i64);
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.writes.len(), 1);
    }
}
