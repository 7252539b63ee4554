//! Dirty tracking against a save baseline.
//!
//! Each tracked field keeps the value it had when it was created, last
//! saved, or last reset. A field is dirty iff its current value differs from
//! that baseline by deep comparison, so changing a field and changing it
//! back leaves it clean. Computed fields are never tracked.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde_json::Value;

use reflex_core::{Observable, SubscriptionId};

/// Baselines and the set of fields that currently differ from them.
#[derive(Debug)]
pub struct DirtyTracker {
    baselines: IndexMap<String, Value>,
    fields: Observable<BTreeSet<String>>,
    dirty: Observable<bool>,
}

impl Default for DirtyTracker {
    fn default() -> Self {
        DirtyTracker {
            baselines: IndexMap::new(),
            fields: Observable::new(BTreeSet::new()),
            dirty: Observable::new(false),
        }
    }
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `field` with `baseline`, unless it is tracked already.
    pub fn track(&mut self, field: &str, baseline: Value) {
        if !self.baselines.contains_key(field) {
            self.baselines.insert(field.to_string(), baseline);
        }
    }

    pub fn baseline(&self, field: &str) -> Option<&Value> {
        self.baselines.get(field)
    }

    /// Recomputes the dirty flag of `field` from its current value.
    ///
    /// Returns the new flag. Untracked fields are never dirty.
    pub fn mark_checked(&mut self, field: &str, current: &Value) -> bool {
        let is_dirty = self
            .baselines
            .get(field)
            .is_some_and(|baseline| baseline != current);
        if is_dirty != self.fields.get().contains(field) {
            let mut fields = self.fields.get().clone();
            if is_dirty {
                fields.insert(field.to_string());
            } else {
                fields.remove(field);
            }
            self.publish(fields);
        }
        is_dirty
    }

    /// True if any tracked field differs from its baseline.
    pub fn is_dirty(&self) -> bool {
        *self.dirty.get()
    }

    pub fn is_field_dirty(&self, field: &str) -> bool {
        self.fields.get().contains(field)
    }

    /// Dirty field names, sorted.
    pub fn dirty_fields(&self) -> Vec<String> {
        self.fields.get().iter().cloned().collect()
    }

    /// Makes `current` the new baseline of `field`.
    pub fn reset(&mut self, field: &str, current: Value) {
        if let Some(baseline) = self.baselines.get_mut(field) {
            *baseline = current;
        }
        if self.fields.get().contains(field) {
            let mut fields = self.fields.get().clone();
            fields.remove(field);
            self.publish(fields);
        }
    }

    /// Rebaselines every field in `current` and clears all dirty flags.
    pub fn reset_all(&mut self, current: impl IntoIterator<Item = (String, Value)>) {
        for (field, value) in current {
            if let Some(baseline) = self.baselines.get_mut(&field) {
                *baseline = value;
            }
        }
        self.publish(BTreeSet::new());
    }

    /// Subscribes to the aggregate dirty flag.
    pub fn watch_dirty(&mut self, callback: impl FnMut(&bool) + 'static) -> SubscriptionId {
        self.dirty.on_change(callback)
    }

    /// Subscribes to the dirty field set.
    pub fn watch_dirty_fields(
        &mut self,
        callback: impl FnMut(&BTreeSet<String>) + 'static,
    ) -> SubscriptionId {
        self.fields.on_change(callback)
    }

    fn publish(&mut self, fields: BTreeSet<String>) {
        let dirty = !fields.is_empty();
        self.fields.set_if_changed(fields);
        self.dirty.set_if_changed(dirty);
    }
}
