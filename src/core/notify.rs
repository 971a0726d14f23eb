//! Purpose: Report committed feature changes and schema replacements to registered listeners.
//! Exports: `ChangeSet`, `ChangeListener`, `Listeners`.
//! Role: Minimal contract for outer layers that mirror or index a store.
//! Invariants: Listeners run only after the change is visible on disk.
//! Invariants: Empty change sets are never broadcast.
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::core::schema::FeatureType;

/// Identifiers touched by one committed write session.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ChangeSet {
    pub added: BTreeSet<u64>,
    pub updated: BTreeSet<u64>,
    pub deleted: BTreeSet<u64>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

pub trait ChangeListener: Send + Sync {
    fn features_changed(&self, changes: &ChangeSet);

    fn schema_replaced(&self, _feature_type: &FeatureType) {}
}

#[derive(Default)]
pub struct Listeners {
    inner: Mutex<Vec<Arc<dyn ChangeListener>>>,
}

impl Listeners {
    pub fn add(&self, listener: Arc<dyn ChangeListener>) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.push(listener);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|guard| guard.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn features_changed(&self, changes: &ChangeSet) {
        if changes.is_empty() {
            return;
        }
        for listener in self.snapshot() {
            listener.features_changed(changes);
        }
    }

    pub(crate) fn schema_replaced(&self, feature_type: &FeatureType) {
        for listener in self.snapshot() {
            listener.schema_replaced(feature_type);
        }
    }

    // Listeners run without the registry lock held so they may register others.
    fn snapshot(&self) -> Vec<Arc<dyn ChangeListener>> {
        self.inner
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}
