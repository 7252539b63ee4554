//! Per-field undo/redo history.
//!
//! Every field has its own pair of stacks; undoing one field never touches
//! another. Recording follows the usual linear-history rule: a new change
//! clears the redo stack. Changes closer together than the field's debounce
//! window collapse into the entry opened by the first change of the burst,
//! so one undo returns to the value from before the burst.
//!
//! The engine only keeps history. Applying a restored value is the
//! coordinator's job, which runs it through the normal mutation pipeline
//! with recording suppressed.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

use reflex_core::{Observable, SubscriptionId};

use crate::config::UndoConfig;

/// One undo (or redo) step: the value to go back to.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub previous_value: Value,
    pub timestamp: Duration,
}

#[derive(Debug)]
struct FieldHistory {
    undo: VecDeque<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    /// True while later changes may still merge into the newest undo entry.
    open_burst: bool,
    can_undo: Observable<bool>,
    can_redo: Observable<bool>,
}

impl FieldHistory {
    fn new() -> Self {
        FieldHistory {
            undo: VecDeque::new(),
            redo: Vec::new(),
            open_burst: false,
            can_undo: Observable::new(false),
            can_redo: Observable::new(false),
        }
    }

    fn trim(&mut self, max_depth: usize) {
        while self.undo.len() > max_depth {
            self.undo.pop_front();
        }
    }

    fn publish(&mut self) {
        self.can_undo.set_if_changed(!self.undo.is_empty());
        self.can_redo.set_if_changed(!self.redo.is_empty());
    }
}

/// Undo/redo stacks for every field.
#[derive(Debug, Default)]
pub struct UndoEngine {
    defaults: UndoConfig,
    overrides: HashMap<String, UndoConfig>,
    histories: IndexMap<String, FieldHistory>,
}

impl UndoEngine {
    pub fn new(defaults: UndoConfig) -> Self {
        UndoEngine {
            defaults,
            overrides: HashMap::new(),
            histories: IndexMap::new(),
        }
    }

    /// The effective config of a field.
    pub fn config_for(&self, field: &str) -> &UndoConfig {
        self.overrides.get(field).unwrap_or(&self.defaults)
    }

    pub fn is_enabled(&self, field: &str) -> bool {
        self.config_for(field).enabled
    }

    /// Overrides the config of one field. Shrinking `max_depth` drops the
    /// oldest entries right away.
    pub fn set_config(&mut self, field: &str, config: UndoConfig) {
        if let Some(history) = self.histories.get_mut(field) {
            history.trim(config.max_depth);
            history.open_burst = false;
            history.publish();
        }
        self.overrides.insert(field.to_string(), config);
    }

    /// Records that `field` changed away from `previous` at `now`.
    ///
    /// Returns false when recording is disabled for the field.
    pub fn record_change(&mut self, field: &str, previous: Value, now: Duration) -> bool {
        let config = self.config_for(field).clone();
        if !config.enabled {
            return false;
        }
        let history = self
            .histories
            .entry(field.to_string())
            .or_insert_with(FieldHistory::new);
        history.redo.clear();

        let merged = match (config.debounce_window, history.undo.back_mut()) {
            (Some(window), Some(last)) if history.open_burst && now.saturating_sub(last.timestamp) < window => {
                last.timestamp = now;
                true
            }
            _ => false,
        };
        if !merged {
            history.undo.push_back(HistoryEntry {
                previous_value: previous,
                timestamp: now,
            });
            history.trim(config.max_depth);
            history.open_burst = true;
        }
        history.publish();
        true
    }

    /// Pops the newest undo entry, pushing `current` onto the redo stack.
    /// Returns the value to restore, or `None` if there is nothing to undo.
    ///
    /// Entries that would restore `current` itself (a burst that ended where
    /// it started) are dropped without producing a redo step.
    pub fn take_undo(&mut self, field: &str, current: Value, now: Duration) -> Option<Value> {
        let history = self.histories.get_mut(field)?;
        history.open_burst = false;
        let entry = pop_differing(|| history.undo.pop_back(), &current);
        if entry.is_some() {
            history.redo.push(HistoryEntry {
                previous_value: current,
                timestamp: now,
            });
        }
        history.publish();
        entry.map(|e| e.previous_value)
    }

    /// Pops the newest redo entry, pushing `current` onto the undo stack.
    pub fn take_redo(&mut self, field: &str, current: Value, now: Duration) -> Option<Value> {
        let max_depth = self.config_for(field).max_depth;
        let history = self.histories.get_mut(field)?;
        history.open_burst = false;
        let entry = pop_differing(|| history.redo.pop(), &current);
        if entry.is_some() {
            history.undo.push_back(HistoryEntry {
                previous_value: current,
                timestamp: now,
            });
            history.trim(max_depth);
        }
        history.publish();
        entry.map(|e| e.previous_value)
    }

    pub fn can_undo(&self, field: &str) -> bool {
        self.histories
            .get(field)
            .is_some_and(|h| !h.undo.is_empty())
    }

    pub fn can_redo(&self, field: &str) -> bool {
        self.histories
            .get(field)
            .is_some_and(|h| !h.redo.is_empty())
    }

    pub fn undo_depth(&self, field: &str) -> usize {
        self.histories.get(field).map_or(0, |h| h.undo.len())
    }

    pub fn redo_depth(&self, field: &str) -> usize {
        self.histories.get(field).map_or(0, |h| h.redo.len())
    }

    /// Subscribes to the field's can-undo flag.
    pub fn watch_can_undo(&mut self, field: &str, callback: impl FnMut(&bool) + 'static) -> SubscriptionId {
        self.history_mut(field).can_undo.on_change(callback)
    }

    /// Subscribes to the field's can-redo flag.
    pub fn watch_can_redo(&mut self, field: &str, callback: impl FnMut(&bool) + 'static) -> SubscriptionId {
        self.history_mut(field).can_redo.on_change(callback)
    }

    fn history_mut(&mut self, field: &str) -> &mut FieldHistory {
        self.histories
            .entry(field.to_string())
            .or_insert_with(FieldHistory::new)
    }
}

/// Pops entries until one differs from `current`.
fn pop_differing(
    mut pop: impl FnMut() -> Option<HistoryEntry>,
    current: &Value,
) -> Option<HistoryEntry> {
    loop {
        let entry = pop()?;
        if entry.previous_value != *current {
            return Some(entry);
        }
    }
}
