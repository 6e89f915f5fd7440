//! Batch Pause Tests
//!
//! These tests validate `pause_all_actions`:
//! - Values apply immediately while rules, events, and the cascade stay quiet
//! - Worsening child transitions still land in the paused node's caches
//! - Resume replays nothing; the explicit sweep restores coherence
//! - Pauses nest and release on the last guard

#[cfg(test)]
mod tests {
    use crate::engine::Model;
    use crate::models::{Blueprint, PropertyDef, ValueKind};
    use crate::rules::{RuleOutcome, RuleScope, SyncFn};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn form_blueprint(runs: Arc<AtomicUsize>) -> Arc<Blueprint> {
        Blueprint::builder("Form")
            .property(PropertyDef::new("A", ValueKind::Int).with_default(0i64))
            .property(PropertyDef::new("B", ValueKind::Int).with_default(0i64))
            .sync_rule(SyncFn::new(["A"], move |ctx| {
                runs.fetch_add(1, Ordering::SeqCst);
                let a: i64 = ctx.get_as("A")?;
                if a < 0 {
                    Ok(RuleOutcome::broken("A", "A must not be negative"))
                } else {
                    Ok(RuleOutcome::ok())
                }
            }))
            .build()
            .unwrap()
    }

    fn holder_blueprint() -> Arc<Blueprint> {
        Blueprint::builder("Holder")
            .property(PropertyDef::node("Form"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_pause_applies_values_silently() {
        let runs = Arc::new(AtomicUsize::new(0));
        let form = Model::new(form_blueprint(Arc::clone(&runs)));
        let mut events = form.subscribe();

        let guard = form.pause_all_actions();
        assert!(form.is_paused());
        form.set("A", -1i64).unwrap();
        form.set("B", 7i64).unwrap();

        // values landed, everything else stayed quiet
        assert_eq!(form.get_as::<i64>("A").unwrap(), -1);
        assert_eq!(form.get_as::<i64>("B").unwrap(), 7);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(events.try_recv().is_err());
        // no rule ran, so the bad value went unflagged
        assert!(form.is_valid());
        // modified marks are values too; they apply
        assert!(form.is_modified());

        drop(guard);
        assert!(!form.is_paused());
        // resume replays nothing
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_post_batch_sweep_restores_coherence() {
        let runs = Arc::new(AtomicUsize::new(0));
        let form = Model::new(form_blueprint(Arc::clone(&runs)));

        {
            let _guard = form.pause_all_actions();
            form.set("A", -1i64).unwrap();
        }
        assert!(form.is_valid());

        form.run_rules(RuleScope::All, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!form.is_valid());
        assert_eq!(
            form.property_messages("A").unwrap()[0].text,
            "A must not be negative"
        );
    }

    #[test]
    fn test_paused_parent_still_collects_worsening_child_state() {
        let runs = Arc::new(AtomicUsize::new(0));
        let holder = Model::new(holder_blueprint());
        let form = Model::new(form_blueprint(Arc::clone(&runs)));
        holder.set("Form", form.clone()).unwrap();
        holder.mark_unmodified();
        form.mark_unmodified();
        let mut events = holder.subscribe();

        let guard = holder.pause_all_actions();
        // the child is not paused; its rules run and its state worsens
        form.set("A", -1i64).unwrap();
        assert!(!form.is_valid());

        // the worsening raise landed in the paused parent's caches
        assert!(!holder.is_valid());
        assert!(holder.is_modified());
        // but nothing bubbled out of it
        assert!(events.try_recv().is_err());

        drop(guard);
        // the improving direction was deferred; it needs the sweep
        form.set("A", 3i64).unwrap();
        assert!(form.is_valid());
        assert!(holder.is_valid());
    }

    #[tokio::test]
    async fn test_improving_transitions_defer_until_sweep() {
        let runs = Arc::new(AtomicUsize::new(0));
        let holder = Model::new(holder_blueprint());
        let form = Model::new(form_blueprint(Arc::clone(&runs)));
        holder.set("Form", form.clone()).unwrap();
        form.set("A", -1i64).unwrap();
        assert!(!holder.is_valid());

        let guard = holder.pause_all_actions();
        // the child recovers while the parent is paused
        form.set("A", 3i64).unwrap();
        assert!(form.is_valid());
        // the paused parent kept its stale bad cache: improving rescans
        // are deferred, not tracked
        assert!(!holder.is_valid());
        drop(guard);

        holder
            .run_rules(RuleScope::All, &CancellationToken::new())
            .await
            .unwrap();
        assert!(holder.is_valid());
    }

    #[test]
    fn test_pauses_nest() {
        let runs = Arc::new(AtomicUsize::new(0));
        let form = Model::new(form_blueprint(Arc::clone(&runs)));

        let outer = form.pause_all_actions();
        let inner = form.pause_all_actions();
        drop(inner);
        assert!(form.is_paused());
        form.set("A", 1i64).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        drop(outer);
        assert!(!form.is_paused());
        form.set("A", 2i64).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
