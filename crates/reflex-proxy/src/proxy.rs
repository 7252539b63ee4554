//! The proxy coordinator.
//!
//! [`ObservableProxy`] borrows a host record and owns everything else: the
//! field registry, the computed-field graph, undo history, validators and
//! dirty baselines. Every mutation runs one pipeline, in this order:
//!
//! 1. read the previous value and preview the new one; equal means no-op
//! 2. commit to the leaf cell
//! 3. record undo history (not for undo/redo themselves)
//! 4. recheck the dirty flag
//! 5. revalidate the field
//! 6. mark dependent computed fields stale and recompute them, unless a
//!    batch is open
//! 7. write back to the host (sync mode) and fire field listeners
//!
//! Listeners receive `&mut ObservableProxy` and may mutate re-entrantly. A
//! nested mutation runs the whole pipeline before the outer one continues;
//! nesting is bounded by [`ProxyConfig::max_reentrancy_depth`].

use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use reflex_core::{decode, encode, FieldPath, HostRecord, SubscriptionId, ValueType};

use crate::clock::{Clock, MonotonicClock};
use crate::config::{ProxyConfig, UndoConfig};
use crate::dirty::DirtyTracker;
use crate::error::ProxyError;
use crate::graph::{ComputeScope, ComputedSpec, DependencyGraph, FieldSource};
use crate::registry::{CollectionEvent, Field, FieldRegistry, Mutation};
use crate::undo::UndoEngine;
use crate::validation::{FaultSource, ValidationEngine, ValidatorFn};

/// A change listener. May mutate the proxy it is handed.
pub type Listener<'h> =
    Rc<dyn Fn(&mut ObservableProxy<'h>, &FieldChange) -> Result<(), ProxyError> + 'h>;

/// What a listener is told about a change.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub value: Value,
    /// `None` for the first evaluation of a computed field.
    pub previous: Option<Value>,
    /// Set for element-level changes of sequence and mapping fields.
    pub collection: Option<CollectionEvent>,
    /// True when `field` names a computed field.
    pub computed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    User,
    Undo,
    Redo,
}

type ListenerTable<'h> = IndexMap<String, Vec<(SubscriptionId, Listener<'h>)>>;

/// A reactive view over a host record.
pub struct ObservableProxy<'h> {
    host: &'h mut dyn HostRecord,
    config: ProxyConfig,
    clock: Rc<dyn Clock>,
    registry: FieldRegistry,
    graph: DependencyGraph,
    undo: UndoEngine,
    validation: ValidationEngine,
    dirty: DirtyTracker,
    field_listeners: ListenerTable<'h>,
    computed_listeners: ListenerTable<'h>,
    next_listener: SubscriptionId,
    depth: usize,
    batch_depth: usize,
    /// Computed fields invalidated since the last refresh.
    pending: IndexSet<String>,
}

impl<'h> ObservableProxy<'h> {
    pub fn new(host: &'h mut dyn HostRecord, config: ProxyConfig) -> Self {
        Self::with_clock(host, config, Rc::new(MonotonicClock::new()))
    }

    /// Creates a proxy that measures undo debounce windows with `clock`.
    pub fn with_clock(host: &'h mut dyn HostRecord, config: ProxyConfig, clock: Rc<dyn Clock>) -> Self {
        if config.sync && config.undo.enabled {
            warn!("sync mode with undo enabled: undo will also rewrite the host record");
        }
        ObservableProxy {
            host,
            undo: UndoEngine::new(config.undo.clone()),
            config,
            clock,
            registry: FieldRegistry::new(),
            graph: DependencyGraph::new(),
            validation: ValidationEngine::new(),
            dirty: DirtyTracker::new(),
            field_listeners: IndexMap::new(),
            computed_listeners: IndexMap::new(),
            next_listener: SubscriptionId(0),
            depth: 0,
            batch_depth: 0,
            pending: IndexSet::new(),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// The borrowed host record.
    pub fn host(&self) -> &dyn HostRecord {
        &*self.host
    }

    // -----------------------------------------------------------------------
    // Fields
    // -----------------------------------------------------------------------

    /// Returns the field, creating it from the host on first access.
    pub fn field(&mut self, name: &str, ty: ValueType) -> Result<&Field, ProxyError> {
        ensure_field(&mut self.registry, &mut self.dirty, &*self.host, name, ty)?;
        self.registry.get(name).ok_or_else(|| unknown_field(name))
    }

    /// The raw value of a field.
    pub fn get(&mut self, name: &str) -> Result<Value, ProxyError> {
        ensure_field(&mut self.registry, &mut self.dirty, &*self.host, name, ValueType::Any)
    }

    pub fn get_as<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, ProxyError> {
        let value = self.get(name)?;
        Ok(decode(name, &value)?)
    }

    /// Registered field names in creation order.
    pub fn field_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Sets a field and notifies. Returns false if the value was unchanged.
    pub fn set(&mut self, name: &str, value: Value) -> Result<bool, ProxyError> {
        self.set_with(name, value, true)
    }

    /// Sets a field. With `notify` false neither listeners nor sync
    /// write-back run; history, validation, dirtiness and computed fields
    /// are still updated.
    pub fn set_with(&mut self, name: &str, value: Value, notify: bool) -> Result<bool, ProxyError> {
        self.apply(name, Mutation::Replace(value), notify, Origin::User)
    }

    /// Sets a field from any serializable value.
    pub fn set_value<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<bool, ProxyError> {
        let value = encode(name, value)?;
        self.set(name, value)
    }

    /// Runs an arbitrary [`Mutation`] through the pipeline.
    pub fn mutate(&mut self, name: &str, mutation: Mutation, notify: bool) -> Result<bool, ProxyError> {
        self.apply(name, mutation, notify, Origin::User)
    }

    pub fn push(&mut self, name: &str, item: Value) -> Result<bool, ProxyError> {
        self.mutate(name, Mutation::Push(item), true)
    }

    pub fn insert_at(&mut self, name: &str, index: usize, item: Value) -> Result<bool, ProxyError> {
        self.mutate(name, Mutation::InsertAt(index, item), true)
    }

    pub fn remove_at(&mut self, name: &str, index: usize) -> Result<bool, ProxyError> {
        self.mutate(name, Mutation::RemoveAt(index), true)
    }

    pub fn set_at(&mut self, name: &str, index: usize, item: Value) -> Result<bool, ProxyError> {
        self.mutate(name, Mutation::SetAt(index, item), true)
    }

    pub fn insert_entry(&mut self, name: &str, key: &str, value: Value) -> Result<bool, ProxyError> {
        self.mutate(name, Mutation::InsertEntry(key.to_string(), value), true)
    }

    pub fn remove_entry(&mut self, name: &str, key: &str) -> Result<bool, ProxyError> {
        self.mutate(name, Mutation::RemoveEntry(key.to_string()), true)
    }

    pub fn clear(&mut self, name: &str) -> Result<bool, ProxyError> {
        self.mutate(name, Mutation::Clear, true)
    }

    fn apply(
        &mut self,
        name: &str,
        mutation: Mutation,
        notify: bool,
        origin: Origin,
    ) -> Result<bool, ProxyError> {
        if self.depth >= self.config.max_reentrancy_depth {
            return Err(ProxyError::ReentrantMutation {
                field: name.to_string(),
                limit: self.config.max_reentrancy_depth,
            });
        }
        self.depth += 1;
        let result = self.apply_inner(name, mutation, notify, origin);
        self.depth -= 1;
        result
    }

    fn apply_inner(
        &mut self,
        name: &str,
        mutation: Mutation,
        notify: bool,
        origin: Origin,
    ) -> Result<bool, ProxyError> {
        let previous = ensure_field(&mut self.registry, &mut self.dirty, &*self.host, name, ValueType::Any)?;
        let next = self.registry.preview(name, &mutation)?;
        if next == previous {
            trace!(field = name, "value unchanged, skipping");
            return Ok(false);
        }

        let collection = self.registry.apply(name, mutation, notify)?;
        debug!(field = name, ?origin, depth = self.depth, "field changed");

        if origin == Origin::User {
            self.undo.record_change(name, previous.clone(), self.clock.now());
        }
        self.dirty.mark_checked(name, &next);
        if !self.graph.is_computed(name) {
            self.validation.revalidate(name, &next);
        }
        let stale = self.graph.mark_dirty(name);
        self.pending.extend(stale);
        let refreshed = if self.batch_depth == 0 {
            self.refresh_computed()
        } else {
            Ok(())
        };

        if notify {
            if self.config.sync {
                self.host.set_field(name, next.clone())?;
            }
            let change = FieldChange {
                field: name.to_string(),
                value: next,
                previous: Some(previous),
                collection,
                computed: false,
            };
            self.notify(false, &change)?;
        }
        refreshed?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Computed fields
    // -----------------------------------------------------------------------

    /// Registers a computed field and evaluates it right away.
    ///
    /// A failing first evaluation (e.g. a dependency that does not exist
    /// yet) is not an error; the field stays stale until read.
    pub fn register_computed<I, S, F>(&mut self, name: &str, dependencies: I, compute: F) -> Result<(), ProxyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&mut ComputeScope<'_>) -> Result<Value, ProxyError> + 'static,
    {
        self.register_computed_many([ComputedSpec::new(name, dependencies, compute)])
    }

    /// Registers several computed fields atomically.
    pub fn register_computed_many(
        &mut self,
        specs: impl IntoIterator<Item = ComputedSpec>,
    ) -> Result<(), ProxyError> {
        let specs: Vec<ComputedSpec> = specs.into_iter().collect();
        let names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
        self.graph.register_many(specs)?;
        for name in &names {
            let stale = self.graph.mark_dirty(name);
            self.pending.insert(name.clone());
            self.pending.extend(stale);
        }
        if self.batch_depth == 0 {
            if let Err(err) = self.refresh_computed() {
                debug!(computed = ?names, %err, "initial evaluation deferred");
            }
        }
        Ok(())
    }

    /// The value of a computed field, recomputed if stale.
    pub fn computed(&mut self, name: &str) -> Result<Value, ProxyError> {
        if !self.graph.is_computed(name) {
            return Err(unknown_field(name));
        }
        self.evaluate_computed(name)
    }

    pub fn computed_as<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, ProxyError> {
        let value = self.computed(name)?;
        Ok(decode(name, &value)?)
    }

    pub fn is_computed(&self, name: &str) -> bool {
        self.graph.is_computed(name)
    }

    /// How many times a computed field has been evaluated.
    pub fn evaluation_count(&self, name: &str) -> usize {
        self.graph.evaluation_count(name)
    }

    fn evaluate_computed(&mut self, name: &str) -> Result<Value, ProxyError> {
        let mut source = FieldAccess {
            registry: &mut self.registry,
            dirty: &mut self.dirty,
            host: &*self.host,
        };
        let result = self.graph.evaluate(name, &mut source);
        let dispatched = self.dispatch_evaluations();
        let value = result?;
        dispatched?;
        Ok(value)
    }

    /// Recomputes every pending stale computed field in dependency order.
    ///
    /// All of them are attempted; the first error is returned.
    fn refresh_computed(&mut self) -> Result<(), ProxyError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let order = self.graph.topological_order()?;
        let mut first_error = None;
        for name in order.iter().filter(|n| pending.contains(*n)) {
            if !self.graph.is_stale(name) {
                continue;
            }
            if let Err(err) = self.evaluate_computed(name) {
                debug!(computed = %name, %err, "refresh failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn dispatch_evaluations(&mut self) -> Result<(), ProxyError> {
        let mut first_error = None;
        for evaluation in self.graph.take_evaluations() {
            self.validation.revalidate(&evaluation.name, &evaluation.value);
            if !evaluation.changed {
                continue;
            }
            let change = FieldChange {
                field: evaluation.name,
                value: evaluation.value,
                previous: evaluation.previous,
                collection: None,
                computed: true,
            };
            if let Err(err) = self.notify(true, &change) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    /// Listens to changes of a raw field.
    pub fn on_change<F>(&mut self, name: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&mut ObservableProxy<'h>, &FieldChange) -> Result<(), ProxyError> + 'h,
    {
        let id = self.next_listener_id();
        self.field_listeners
            .entry(name.to_string())
            .or_default()
            .push((id, Rc::new(listener)));
        id
    }

    /// Listens to value changes of a computed field.
    pub fn on_computed_change<F>(&mut self, name: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&mut ObservableProxy<'h>, &FieldChange) -> Result<(), ProxyError> + 'h,
    {
        let id = self.next_listener_id();
        self.computed_listeners
            .entry(name.to_string())
            .or_default()
            .push((id, Rc::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn remove_listener(&mut self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for table in [&mut self.field_listeners, &mut self.computed_listeners] {
            for entries in table.values_mut() {
                let before = entries.len();
                entries.retain(|(lid, _)| *lid != id);
                removed |= entries.len() != before;
            }
        }
        removed
    }

    fn next_listener_id(&mut self) -> SubscriptionId {
        let id = self.next_listener;
        self.next_listener = id.next();
        id
    }

    fn notify(&mut self, computed: bool, change: &FieldChange) -> Result<(), ProxyError> {
        let table = if computed {
            &self.computed_listeners
        } else {
            &self.field_listeners
        };
        let listeners: Vec<Listener<'h>> = table
            .get(&change.field)
            .map(|entries| entries.iter().map(|(_, l)| Rc::clone(l)).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(self, change)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Undo
    // -----------------------------------------------------------------------

    /// Reverts the newest undo step of a field. Returns false if there was
    /// nothing to undo or the step left the value unchanged.
    pub fn undo(&mut self, name: &str) -> Result<bool, ProxyError> {
        let Some(current) = self.registry.value(name) else {
            return Ok(false);
        };
        let Some(value) = self.undo.take_undo(name, current, self.clock.now()) else {
            return Ok(false);
        };
        debug!(field = name, "undo");
        self.apply(name, Mutation::Replace(value), true, Origin::Undo)
    }

    /// Re-applies the newest undone step of a field.
    pub fn redo(&mut self, name: &str) -> Result<bool, ProxyError> {
        let Some(current) = self.registry.value(name) else {
            return Ok(false);
        };
        let Some(value) = self.undo.take_redo(name, current, self.clock.now()) else {
            return Ok(false);
        };
        debug!(field = name, "redo");
        self.apply(name, Mutation::Replace(value), true, Origin::Redo)
    }

    pub fn can_undo(&self, name: &str) -> bool {
        self.undo.can_undo(name)
    }

    pub fn can_redo(&self, name: &str) -> bool {
        self.undo.can_redo(name)
    }

    pub fn undo_depth(&self, name: &str) -> usize {
        self.undo.undo_depth(name)
    }

    /// Overrides undo behaviour for one field, before or after it exists.
    pub fn set_undo_config(&mut self, name: &str, config: UndoConfig) {
        if self.config.sync && config.enabled {
            warn!(field = name, "undo enabled in sync mode: undo will also rewrite the host record");
        }
        self.undo.set_config(name, config);
    }

    pub fn undo_config(&self, name: &str) -> &UndoConfig {
        self.undo.config_for(name)
    }

    pub fn watch_can_undo(&mut self, name: &str, callback: impl FnMut(&bool) + 'static) -> SubscriptionId {
        self.undo.watch_can_undo(name, callback)
    }

    pub fn watch_can_redo(&mut self, name: &str, callback: impl FnMut(&bool) + 'static) -> SubscriptionId {
        self.undo.watch_can_redo(name, callback)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Adds a validator returning `Some(message)` for invalid values, then
    /// validates the field immediately.
    pub fn add_validator(
        &mut self,
        name: &str,
        validator: impl Fn(&Value) -> Option<String> + 'static,
    ) -> Result<(), ProxyError> {
        self.add_fallible_validator(name, move |value| Ok(validator(value)))
    }

    /// Adds a validator that may itself fail. Failures and panics show up
    /// as validation messages.
    pub fn add_fallible_validator(
        &mut self,
        name: &str,
        validator: impl Fn(&Value) -> Result<Option<String>, FaultSource> + 'static,
    ) -> Result<(), ProxyError> {
        let value = self.validation_value(name)?;
        let validator: ValidatorFn = Rc::new(validator);
        self.validation.add(name, validator);
        self.validation.revalidate(name, &value);
        Ok(())
    }

    /// Current errors of a field.
    pub fn validation_for(&self, name: &str) -> &[String] {
        self.validation.errors_for(name)
    }

    /// Every field with errors.
    pub fn validation_errors(&self) -> IndexMap<String, Vec<String>> {
        self.validation.errors()
    }

    pub fn is_valid(&self) -> bool {
        self.validation.is_valid()
    }

    /// Clears stored errors of one field or all fields, optionally
    /// re-running the validators right away.
    pub fn reset_validation(&mut self, name: Option<&str>, revalidate: bool) -> Result<(), ProxyError> {
        let names = self.validation.reset(name);
        if revalidate {
            for name in names {
                let value = self.validation_value(&name)?;
                self.validation.revalidate(&name, &value);
            }
        }
        Ok(())
    }

    pub fn watch_validation(
        &mut self,
        name: &str,
        callback: impl FnMut(&Vec<String>) + 'static,
    ) -> SubscriptionId {
        self.validation.watch_errors(name, callback)
    }

    pub fn watch_valid(&mut self, callback: impl FnMut(&bool) + 'static) -> SubscriptionId {
        self.validation.watch_valid(callback)
    }

    /// The value validators of `name` see: computed if one exists, raw
    /// otherwise.
    fn validation_value(&mut self, name: &str) -> Result<Value, ProxyError> {
        if self.graph.is_computed(name) {
            self.computed(name)
        } else {
            self.get(name)
        }
    }

    // -----------------------------------------------------------------------
    // Dirty tracking
    // -----------------------------------------------------------------------

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_dirty()
    }

    pub fn is_field_dirty(&self, name: &str) -> bool {
        self.dirty.is_field_dirty(name)
    }

    pub fn dirty_fields(&self) -> Vec<String> {
        self.dirty.dirty_fields()
    }

    /// Makes the current values the new baseline of one field or all.
    pub fn reset_dirty(&mut self, name: Option<&str>) {
        match name {
            Some(name) => {
                if let Some(value) = self.registry.value(name) {
                    self.dirty.reset(name, value);
                }
            }
            None => self.dirty.reset_all(current_values(&self.registry)),
        }
    }

    pub fn watch_dirty(&mut self, callback: impl FnMut(&bool) + 'static) -> SubscriptionId {
        self.dirty.watch_dirty(callback)
    }

    pub fn watch_dirty_fields(
        &mut self,
        callback: impl FnMut(&std::collections::BTreeSet<String>) + 'static,
    ) -> SubscriptionId {
        self.dirty.watch_dirty_fields(callback)
    }

    // -----------------------------------------------------------------------
    // Save and load
    // -----------------------------------------------------------------------

    /// Writes every field into `target` where it has a matching attribute,
    /// then clears all dirty flags.
    ///
    /// A computed field that shadows an attribute of `target` is written in
    /// place of the raw value.
    pub fn save_to(&mut self, target: &mut dyn HostRecord) -> Result<(), ProxyError> {
        let shadowed = self.shadowed_by(&*target);
        let values = self.saved_values(shadowed)?;
        let written = write_fields(values, target)?;
        debug!(written, "saved to target");
        self.dirty.reset_all(current_values(&self.registry));
        Ok(())
    }

    /// Writes every field back into the proxy's own host.
    pub fn save(&mut self) -> Result<(), ProxyError> {
        let shadowed = self.shadowed_by(&*self.host);
        let values = self.saved_values(shadowed)?;
        let written = write_fields(values, &mut *self.host)?;
        debug!(written, "saved to host");
        self.dirty.reset_all(current_values(&self.registry));
        Ok(())
    }

    /// Computed names that are also attributes of `target`.
    fn shadowed_by(&self, target: &dyn HostRecord) -> Vec<String> {
        self.graph
            .computed_names()
            .into_iter()
            .filter(|name| target.has_field(name))
            .collect()
    }

    /// Raw field values, with the `shadowed` computed values taking their
    /// place.
    fn saved_values(&mut self, shadowed: Vec<String>) -> Result<IndexMap<String, Value>, ProxyError> {
        let mut values: IndexMap<String, Value> = current_values(&self.registry).into_iter().collect();
        for name in shadowed {
            let value = self.computed(&name)?;
            values.insert(name, value);
        }
        Ok(values)
    }

    /// Sets every declared field present in `data` in one batch.
    ///
    /// Declared means registered or present on the host; other keys are
    /// ignored. With `reset_missing`, declared fields absent from `data`
    /// are set to the zero value of their type.
    pub fn load_dict(&mut self, data: &Map<String, Value>, reset_missing: bool) -> Result<(), ProxyError> {
        self.batch(|proxy| {
            for (key, value) in data {
                if !proxy.is_declared(key) {
                    warn!(field = %key, "ignoring unknown field in load_dict");
                    continue;
                }
                proxy.set(key, value.clone())?;
            }
            if reset_missing {
                for name in proxy.declared_fields() {
                    if data.contains_key(&name) {
                        continue;
                    }
                    let ty = proxy.field(&name, ValueType::Any)?.value_type();
                    proxy.set(&name, ty.zero_value())?;
                }
            }
            debug!(keys = data.len(), reset_missing, "loaded dict");
            Ok(())
        })
    }

    /// Sets the declared fields present in `partial`.
    pub fn update(&mut self, partial: &Map<String, Value>) -> Result<(), ProxyError> {
        self.load_dict(partial, false)
    }

    /// Runs `f` with computed refresh deferred until the outermost batch
    /// ends, so each affected computed field is evaluated once.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R, ProxyError>) -> Result<R, ProxyError> {
        self.batch_depth += 1;
        let result = f(self);
        self.batch_depth -= 1;
        if self.batch_depth > 0 {
            return result;
        }
        let refreshed = self.refresh_computed();
        let value = result?;
        refreshed?;
        Ok(value)
    }

    fn is_declared(&self, name: &str) -> bool {
        self.registry.contains(name) || self.host.has_field(name)
    }

    fn declared_fields(&self) -> Vec<String> {
        let mut names: IndexSet<String> = self.registry.names().into_iter().collect();
        names.extend(self.host.field_names());
        names.into_iter().collect()
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    /// Reads a nested value, e.g. `habitat?.location?.city`.
    ///
    /// Returns `None` when an optional segment breaks the chain.
    pub fn get_path(&mut self, path: &str) -> Result<Option<Value>, ProxyError> {
        let path = FieldPath::parse(path)?;
        let root = self.get(path.root())?;
        Ok(path.resolve(&root)?)
    }

    /// Listens to changes of the value at a nested path.
    ///
    /// The listener fires on changes of the root field that alter the
    /// resolved leaf; the change it receives names the path and carries the
    /// leaf values. A broken chain resolves to `null`.
    pub fn on_path_change<F>(&mut self, path: &str, listener: F) -> Result<SubscriptionId, ProxyError>
    where
        F: Fn(&mut ObservableProxy<'h>, &FieldChange) -> Result<(), ProxyError> + 'h,
    {
        let path = FieldPath::parse(path)?;
        let root = path.root().to_string();
        Ok(self.on_change(&root, move |proxy, change| {
            let value = leaf_value(&path, &change.value);
            let previous = change.previous.as_ref().map(|v| leaf_value(&path, v));
            if previous.as_ref() == Some(&value) {
                return Ok(());
            }
            let leaf = FieldChange {
                field: path.as_str().to_string(),
                value,
                previous,
                collection: None,
                computed: false,
            };
            listener(proxy, &leaf)
        }))
    }

    /// Writes a nested value by rebuilding the root field.
    ///
    /// A broken optional chain makes this a no-op returning false.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<bool, ProxyError> {
        let path = FieldPath::parse(path)?;
        let root = self.get(path.root())?;
        match path.replace(&root, value)? {
            Some(updated) => self.set(path.root(), updated),
            None => Ok(false),
        }
    }
}

impl fmt::Debug for ObservableProxy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableProxy")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("graph", &self.graph)
            .field("undo", &self.undo)
            .field("validation", &self.validation)
            .field("dirty", &self.dirty)
            .field("depth", &self.depth)
            .field("batch_depth", &self.batch_depth)
            .finish_non_exhaustive()
    }
}

/// Raw field reads for compute functions.
struct FieldAccess<'a> {
    registry: &'a mut FieldRegistry,
    dirty: &'a mut DirtyTracker,
    host: &'a dyn HostRecord,
}

impl FieldSource for FieldAccess<'_> {
    fn raw_value(&mut self, name: &str) -> Result<Value, ProxyError> {
        ensure_field(self.registry, self.dirty, self.host, name, ValueType::Any)
    }
}

/// Creates the field on first access, recording its dirty baseline.
/// Returns a copy of its value.
fn ensure_field(
    registry: &mut FieldRegistry,
    dirty: &mut DirtyTracker,
    host: &dyn HostRecord,
    name: &str,
    ty: ValueType,
) -> Result<Value, ProxyError> {
    let created = !registry.contains(name);
    let value = registry.get_or_create(name, ty, host)?.value();
    if created {
        trace!(field = name, "field created");
        dirty.track(name, value.clone());
    }
    Ok(value)
}

fn write_fields(
    values: IndexMap<String, Value>,
    target: &mut dyn HostRecord,
) -> Result<usize, ProxyError> {
    let mut written = 0;
    for (name, value) in values {
        if target.has_field(&name) {
            target.set_field(&name, value)?;
            written += 1;
        }
    }
    Ok(written)
}

fn leaf_value(path: &FieldPath, root: &Value) -> Value {
    path.resolve(root).ok().flatten().unwrap_or(Value::Null)
}

fn current_values(registry: &FieldRegistry) -> Vec<(String, Value)> {
    registry
        .names()
        .into_iter()
        .filter_map(|name| registry.value(&name).map(|value| (name, value)))
        .collect()
}

fn unknown_field(name: &str) -> ProxyError {
    ProxyError::UnknownField {
        name: name.to_string(),
    }
}
