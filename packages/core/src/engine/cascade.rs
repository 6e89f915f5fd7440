//! Parent Links and the Meta-State Cascade
//!
//! Nodes reference their parents through non-owning links: ownership always
//! points down (parents own children through slots and lists), notification
//! always points up. Two independent flows ride these links:
//!
//! - change events bubble up hop by hop, each slot hop prepending its
//!   relation name to the path; list hops add nothing, which keeps
//!   breadcrumbs position-free
//! - meta-state snapshots push up whenever a node's combined triple flips,
//!   and every parent folds them into its own cached aggregates with the
//!   same raise-then-bounded-rescan discipline the property container uses
//!
//! [`ChildStats`] is that fold, shared between nodes (slot children) and
//! lists (items).

use super::list::ListInner;
use super::model::ModelInner;
use crate::models::MetaSnapshot;
use std::collections::HashMap;
use std::sync::Weak;
use uuid::Uuid;

/// Walk a snapshot up the ancestry until a hop absorbs it without its own
/// combined snapshot flipping. One lock at a time; dead links end the walk.
pub(crate) fn propagate_stat(mut hop: Option<(ParentLink, Uuid, MetaSnapshot)>) {
    while let Some((link, child_id, snap)) = hop {
        hop = match link {
            ParentLink::Slot { parent, .. } => parent.upgrade().and_then(|inner| {
                super::model::Model::from_inner(inner).absorb_child_stat(child_id, snap)
            }),
            ParentLink::List { list } => list.upgrade().and_then(|inner| {
                super::list::ModelList::from_inner(inner).absorb_child_stat(child_id, snap)
            }),
        };
    }
}

/// Non-owning back-reference from a node to whatever holds it.
#[derive(Clone)]
pub(crate) enum ParentLink {
    /// Held by a node's child slot under `relation`
    Slot {
        parent: Weak<ModelInner>,
        relation: String,
    },
    /// Held as an item of a list
    List { list: Weak<ListInner> },
}

/// Non-owning back-reference from a list to the node slot that holds it.
#[derive(Clone)]
pub(crate) struct SlotParent {
    pub parent: Weak<ModelInner>,
    pub relation: String,
}

/// Cached aggregates over a set of children, keyed by child id.
///
/// Worsening updates apply O(1); improving updates rescan only the caches
/// that are currently bad, early-exiting at the first still-bad child. The
/// `allow_rescan` flag is how paused nodes defer the improving direction
/// until their post-batch sweep.
pub(crate) struct ChildStats {
    stats: HashMap<Uuid, MetaSnapshot>,
    valid: bool,
    busy: bool,
    modified: bool,
}

impl ChildStats {
    pub fn new() -> Self {
        Self {
            stats: HashMap::new(),
            valid: true,
            busy: false,
            modified: false,
        }
    }

    pub fn all_valid(&self) -> bool {
        self.valid
    }

    pub fn any_busy(&self) -> bool {
        self.busy
    }

    pub fn any_modified(&self) -> bool {
        self.modified
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.stats.contains_key(&id)
    }

    /// Seed a newly attached child. Only raises; attaching a clean child
    /// never improves an aggregate.
    pub fn insert(&mut self, id: Uuid, snap: MetaSnapshot) {
        self.raise(snap);
        self.stats.insert(id, snap);
    }

    /// Drop a detached child and, when allowed, rescan whichever caches were
    /// bad.
    pub fn remove(&mut self, id: Uuid, allow_rescan: bool) {
        if self.stats.remove(&id).is_none() {
            return;
        }
        if allow_rescan {
            self.rescan_bad();
        }
    }

    /// Fold an updated child snapshot in. Unknown ids are ignored; a child
    /// that was detached (or moved to a pending-deletion set) may still push
    /// a stale update. Returns whether the id was known.
    pub fn update(&mut self, id: Uuid, snap: MetaSnapshot, allow_rescan: bool) -> bool {
        let old = match self.stats.get_mut(&id) {
            Some(slot) => std::mem::replace(slot, snap),
            None => return false,
        };
        self.raise(snap);
        if allow_rescan {
            if !old.valid && snap.valid && !self.valid {
                self.valid = self.stats.values().all(|s| s.valid);
            }
            if old.busy && !snap.busy && self.busy {
                self.busy = self.stats.values().any(|s| s.busy);
            }
            if old.modified && !snap.modified && self.modified {
                self.modified = self.stats.values().any(|s| s.modified);
            }
        }
        true
    }

    /// Unconditional full recompute, the sweep-end coherence restore.
    pub fn recompute(&mut self) {
        self.valid = self.stats.values().all(|s| s.valid);
        self.busy = self.stats.values().any(|s| s.busy);
        self.modified = self.stats.values().any(|s| s.modified);
    }

    fn raise(&mut self, snap: MetaSnapshot) {
        if !snap.valid {
            self.valid = false;
        }
        if snap.busy {
            self.busy = true;
        }
        if snap.modified {
            self.modified = true;
        }
    }

    fn rescan_bad(&mut self) {
        if !self.valid {
            self.valid = self.stats.values().all(|s| s.valid);
        }
        if self.busy {
            self.busy = self.stats.values().any(|s| s.busy);
        }
        if self.modified {
            self.modified = self.stats.values().any(|s| s.modified);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(valid: bool, busy: bool, modified: bool) -> MetaSnapshot {
        MetaSnapshot {
            valid,
            busy,
            modified,
        }
    }

    #[test]
    fn test_empty_stats_are_clean() {
        let stats = ChildStats::new();
        assert!(stats.all_valid());
        assert!(!stats.any_busy());
        assert!(!stats.any_modified());
    }

    #[test]
    fn test_raise_and_rescan() {
        let mut stats = ChildStats::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        stats.insert(a, MetaSnapshot::pristine());
        stats.insert(b, snap(false, true, true));
        assert!(!stats.all_valid());
        assert!(stats.any_busy());
        assert!(stats.any_modified());

        // b recovers; caches rescan back to clean
        assert!(stats.update(b, MetaSnapshot::pristine(), true));
        assert!(stats.all_valid());
        assert!(!stats.any_busy());
        assert!(!stats.any_modified());
    }

    #[test]
    fn test_deferred_rescan_keeps_caches_bad() {
        let mut stats = ChildStats::new();
        let a = Uuid::new_v4();
        stats.insert(a, snap(false, false, false));
        assert!(!stats.all_valid());

        // paused parent: improving update folds in without rescanning
        stats.update(a, MetaSnapshot::pristine(), false);
        assert!(!stats.all_valid());

        // the sweep-end recompute restores coherence
        stats.recompute();
        assert!(stats.all_valid());
    }

    #[test]
    fn test_unknown_child_update_is_ignored() {
        let mut stats = ChildStats::new();
        assert!(!stats.update(Uuid::new_v4(), snap(false, true, true), true));
        assert!(stats.all_valid());
        assert!(!stats.any_busy());
    }

    #[test]
    fn test_remove_rescans_bad_caches() {
        let mut stats = ChildStats::new();
        let bad = Uuid::new_v4();
        let good = Uuid::new_v4();
        stats.insert(bad, snap(false, true, true));
        stats.insert(good, MetaSnapshot::pristine());

        stats.remove(bad, true);
        assert!(stats.all_valid());
        assert!(!stats.any_busy());
        assert!(!stats.any_modified());
    }
}
