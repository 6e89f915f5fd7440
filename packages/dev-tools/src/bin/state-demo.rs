//! Veristate State Demo Binary
//!
//! Scripted walkthrough of the aggregation engine. Builds an invoice
//! aggregate (invoice, customer, line items), streams its change events,
//! and drives user edits, async verification, batch loads, and list
//! membership through the public API.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p veristate-dev-tools --bin state-demo
//!
//! # With engine tracing
//! RUST_LOG=debug cargo run -p veristate-dev-tools --bin state-demo
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Logging level (e.g., "info", "debug", "trace")

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use veristate_core::{
    AsyncFn, Blueprint, CancellationToken, Model, ModelList, PropertyDef, RuleOutcome, RuleScope,
    SyncFn, ValueKind,
};

fn customer_blueprint() -> anyhow::Result<Arc<Blueprint>> {
    Ok(Blueprint::builder("Customer")
        .property(PropertyDef::new("Name", ValueKind::Text))
        .property(PropertyDef::new("Email", ValueKind::Text))
        .sync_rule(SyncFn::new(["Name"], |ctx| {
            let name: Option<String> = ctx.get_as("Name")?;
            match name {
                Some(n) if !n.trim().is_empty() => Ok(RuleOutcome::ok()),
                _ => Ok(RuleOutcome::broken("Name", "Name is required")),
            }
        }))
        .async_rule(AsyncFn::new(["Email"], |ctx, _cancel| {
            async move {
                let email: Option<String> = ctx.get_as("Email")?;
                // stand-in for a mail provider round trip
                tokio::time::sleep(Duration::from_millis(150)).await;
                match email {
                    Some(e) if e.contains('@') => Ok(RuleOutcome::ok()),
                    Some(_) => Ok(RuleOutcome::broken("Email", "Email address is malformed")),
                    None => Ok(RuleOutcome::ok()),
                }
            }
            .boxed()
        }))
        .build()?)
}

fn line_blueprint() -> anyhow::Result<Arc<Blueprint>> {
    Ok(Blueprint::builder("InvoiceLine")
        .property(PropertyDef::new("Description", ValueKind::Text))
        .property(PropertyDef::new("Amount", ValueKind::Int).with_default(0i64))
        .sync_rule(SyncFn::new(["Amount"], |ctx| {
            let amount: i64 = ctx.get_as("Amount")?;
            if amount < 0 {
                Ok(RuleOutcome::broken("Amount", "Amount must not be negative"))
            } else {
                Ok(RuleOutcome::ok())
            }
        }))
        .build()?)
}

fn invoice_blueprint() -> anyhow::Result<Arc<Blueprint>> {
    Ok(Blueprint::builder("Invoice")
        .property(PropertyDef::new("Number", ValueKind::Text))
        .property(PropertyDef::new("Total", ValueKind::Int).read_only().with_default(0i64))
        .property(PropertyDef::node("Customer"))
        .property(PropertyDef::list("Lines"))
        .sync_rule(SyncFn::new(["Number"], |ctx| {
            let number: Option<String> = ctx.get_as("Number")?;
            match number {
                Some(n) if !n.is_empty() => Ok(RuleOutcome::ok()),
                _ => Ok(RuleOutcome::broken("Number", "Invoice number is required")),
            }
        }))
        .sync_rule(SyncFn::new(["Lines.Amount"], |ctx| {
            let lines: ModelList = ctx.model().get_as("Lines")?;
            let mut total = 0i64;
            for line in lines.items() {
                total += line.get_as::<i64>("Amount")?;
            }
            Ok(RuleOutcome::ok().with_write("Total", total))
        }))
        .build()?)
}

/// Print the node's meta triple on one line.
fn report(label: &str, model: &Model) {
    let meta = model.meta();
    tracing::info!(
        "{label}: valid={} busy={} modified={}",
        meta.valid,
        meta.busy,
        meta.modified
    );
    for (property, message) in model.all_messages() {
        if property.is_empty() {
            tracing::info!("  message on node: {message}");
        } else {
            tracing::info!("  message on {property}: {message}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("🚀 Veristate state demo");
    tracing::info!("=======================");

    let invoice = Model::new(invoice_blueprint()?);
    let customer = Model::new(customer_blueprint()?);
    let cancel = CancellationToken::new();

    // Stream the root's change events as JSON lines; child changes arrive
    // here with dotted paths.
    let mut events = BroadcastStream::new(invoice.subscribe());
    let feed = tokio::spawn(async move {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!("event: {json}"),
                    Err(err) => tracing::warn!("event feed serialization failed: {err}"),
                },
                Err(err) => tracing::warn!("event feed lagged: {err}"),
            }
        }
    });

    // -- user edits ------------------------------------------------------

    tracing::info!("-- editing the invoice");
    invoice.set("Number", "INV-0042")?;
    invoice.set("Customer", customer.clone())?;
    customer.set("Name", "Ada Lovelace")?;
    report("invoice", &invoice);

    // -- async verification ----------------------------------------------

    tracing::info!("-- triggering async email verification");
    customer.set("Email", "ada@example.com")?;
    tracing::info!(
        "invoice sees the in-flight chain: busy={}",
        invoice.is_busy()
    );
    invoice.wait_for_tasks(&cancel).await?;
    report("invoice after settle", &invoice);

    // -- line items ------------------------------------------------------

    tracing::info!("-- adding line items");
    let lines: ModelList = invoice.get_as("Lines")?;
    for (description, amount) in [("Design", 1200i64), ("Implementation", 5400), ("Review", 800)] {
        let line = Model::new(line_blueprint()?);
        lines.add(line.clone())?;
        line.set("Description", description)?;
        line.set("Amount", amount)?;
    }
    tracing::info!("computed total: {:?}", invoice.get("Total")?);

    tracing::info!("-- breaking a line");
    let bad = lines.get(1).ok_or_else(|| anyhow::anyhow!("line missing"))?;
    bad.set("Amount", -1i64)?;
    report("invoice with a bad line", &invoice);
    report("offending line", &bad);
    bad.set("Amount", 5400i64)?;
    report("invoice after the fix", &invoice);

    // -- batch load ------------------------------------------------------

    tracing::info!("-- loading persisted values under a pause guard");
    let restored = Model::new(customer_blueprint()?);
    {
        let _guard = restored.pause_all_actions();
        restored.load("Name", "Grace Hopper")?;
        restored.load("Email", "grace@example.com")?;
    }
    restored.run_rules(RuleScope::All, &cancel).await?;
    restored.mark_old();
    report("restored customer", &restored);

    // -- pending deletions -----------------------------------------------

    tracing::info!("-- removing a persisted line");
    // pretend the whole aggregate was just saved
    for line in lines.items() {
        line.mark_old();
        line.mark_unmodified();
    }
    customer.mark_old();
    customer.mark_unmodified();
    invoice.mark_old();
    invoice.mark_unmodified();
    tracing::info!("after save: invoice modified={}", invoice.is_modified());

    let parked = lines.get(2).ok_or_else(|| anyhow::anyhow!("line missing"))?;
    lines.remove(parked.id())?;
    tracing::info!(
        "parked for deletion: {} line(s), invoice modified={}",
        lines.pending_deletions().len(),
        invoice.is_modified()
    );
    for gone in lines.drain_pending_deletions() {
        tracing::info!("persistence would delete line {}", gone.id());
    }
    invoice.run_rules(RuleScope::All, &cancel).await?;
    tracing::info!("total after removal: {:?}", invoice.get("Total")?);
    report("final invoice", &invoice);

    drop(invoice);
    drop(lines);
    feed.abort();
    let _ = feed.await;

    tracing::info!("✅ demo complete");
    Ok(())
}
