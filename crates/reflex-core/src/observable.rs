//! Leaf observable containers.
//!
//! [`Observable`] holds a single value, [`ObservableList`] an ordered sequence
//! and [`ObservableMap`] an insertion-ordered mapping. Each one notifies its
//! subscribers synchronously, in registration order, once per accepted
//! change. None of them knows about other cells; wiring cells together is the
//! proxy's job.
//!
//! Mutators return the change they applied so a caller can forward it even
//! while notifications are disabled.

use std::fmt;
use std::hash::Hash;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::id::SubscriptionId;

/// What happened to a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Add,
    Remove,
    Clear,
    /// An existing slot was overwritten, or the whole collection replaced
    /// when `key` is `None`.
    Set,
}

/// A single change emitted by a collection observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionChange<K, T> {
    pub kind: ChangeKind,
    pub key: Option<K>,
    pub item: Option<T>,
    pub previous: Option<T>,
}

impl<K, T> CollectionChange<K, T> {
    fn new(kind: ChangeKind, key: Option<K>, item: Option<T>, previous: Option<T>) -> Self {
        CollectionChange {
            kind,
            key,
            item,
            previous,
        }
    }
}

/// Change emitted by an [`ObservableList`]; the key is the index.
pub type ListChange<T> = CollectionChange<usize, T>;

/// Change emitted by an [`ObservableMap`].
pub type MapChange<K, V> = CollectionChange<K, V>;

type Callback<E> = Box<dyn FnMut(&E)>;

struct Subscribers<E> {
    next: SubscriptionId,
    entries: Vec<(SubscriptionId, Callback<E>)>,
    enabled: bool,
}

impl<E> Subscribers<E> {
    fn new() -> Self {
        Subscribers {
            next: SubscriptionId(0),
            entries: Vec::new(),
            enabled: true,
        }
    }

    fn add(&mut self, callback: Callback<E>) -> SubscriptionId {
        let id = self.next;
        self.next = id.next();
        self.entries.push((id, callback));
        id
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(sid, _)| *sid != id);
        self.entries.len() != before
    }

    fn emit(&mut self, event: &E) {
        if !self.enabled {
            return;
        }
        for (_, callback) in self.entries.iter_mut() {
            callback(event);
        }
    }
}

macro_rules! subscription_methods {
    ($event:ty) => {
        /// Registers a callback invoked after every accepted change.
        pub fn on_change(&mut self, callback: impl FnMut(&$event) + 'static) -> SubscriptionId {
            self.subscribers.add(Box::new(callback))
        }

        /// Removes a callback. Returns false if the id was not registered.
        pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
            self.subscribers.remove(id)
        }

        /// Resumes notifications.
        pub fn enable(&mut self) {
            self.subscribers.enabled = true;
        }

        /// Suppresses notifications until [`enable`](Self::enable) is called.
        /// Changes are still applied.
        pub fn disable(&mut self) {
            self.subscribers.enabled = false;
        }

        pub fn is_enabled(&self) -> bool {
            self.subscribers.enabled
        }

        /// Number of registered callbacks.
        pub fn subscriber_count(&self) -> usize {
            self.subscribers.entries.len()
        }
    };
}

// ---------------------------------------------------------------------------
// Observable
// ---------------------------------------------------------------------------

/// A single observable value.
pub struct Observable<T> {
    value: T,
    subscribers: Subscribers<T>,
}

impl<T> Observable<T> {
    pub fn new(value: T) -> Self {
        Observable {
            value,
            subscribers: Subscribers::new(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Replaces the value. Subscribers are called with the new value when
    /// `notify` is true and notifications are enabled.
    pub fn set(&mut self, value: T, notify: bool) {
        self.value = value;
        if notify {
            self.subscribers.emit(&self.value);
        }
    }

    /// Applies `f` to the value in place and notifies.
    pub fn update(&mut self, f: impl FnOnce(&mut T)) {
        f(&mut self.value);
        self.subscribers.emit(&self.value);
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    subscription_methods!(T);
}

impl<T: PartialEq> Observable<T> {
    /// Sets and notifies only when the value actually differs.
    /// Returns true if the value changed.
    pub fn set_if_changed(&mut self, value: T) -> bool {
        if self.value == value {
            return false;
        }
        self.set(value, true);
        true
    }
}

impl<T: Default> Default for Observable<T> {
    fn default() -> Self {
        Observable::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &self.value)
            .field("subscribers", &self.subscribers.entries.len())
            .field("enabled", &self.subscribers.enabled)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ObservableList
// ---------------------------------------------------------------------------

/// An observable ordered sequence.
pub struct ObservableList<T> {
    items: Vec<T>,
    subscribers: Subscribers<ListChange<T>>,
}

impl<T: Clone> ObservableList<T> {
    pub fn new(items: Vec<T>) -> Self {
        ObservableList {
            items,
            subscribers: Subscribers::new(),
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: T) -> ListChange<T> {
        let index = self.items.len();
        self.items.push(item.clone());
        self.emit(CollectionChange::new(ChangeKind::Add, Some(index), Some(item), None))
    }

    /// Inserts at `index`. Returns `None` if `index > len`.
    pub fn insert(&mut self, index: usize, item: T) -> Option<ListChange<T>> {
        if index > self.items.len() {
            return None;
        }
        self.items.insert(index, item.clone());
        Some(self.emit(CollectionChange::new(ChangeKind::Add, Some(index), Some(item), None)))
    }

    /// Removes the item at `index`. Returns `None` if out of range.
    pub fn remove(&mut self, index: usize) -> Option<ListChange<T>> {
        if index >= self.items.len() {
            return None;
        }
        let removed = self.items.remove(index);
        Some(self.emit(CollectionChange::new(ChangeKind::Remove, Some(index), None, Some(removed))))
    }

    /// Overwrites the item at `index`. Returns `None` if out of range.
    pub fn set(&mut self, index: usize, item: T) -> Option<ListChange<T>> {
        let slot = self.items.get_mut(index)?;
        let previous = std::mem::replace(slot, item.clone());
        Some(self.emit(CollectionChange::new(
            ChangeKind::Set,
            Some(index),
            Some(item),
            Some(previous),
        )))
    }

    pub fn clear(&mut self) -> ListChange<T> {
        self.items.clear();
        self.emit(CollectionChange::new(ChangeKind::Clear, None, None, None))
    }

    /// Replaces the entire contents.
    pub fn replace(&mut self, items: Vec<T>) -> ListChange<T> {
        self.items = items;
        self.emit(CollectionChange::new(ChangeKind::Set, None, None, None))
    }

    fn emit(&mut self, change: ListChange<T>) -> ListChange<T> {
        self.subscribers.emit(&change);
        change
    }

    subscription_methods!(ListChange<T>);
}

impl<T: fmt::Debug> fmt::Debug for ObservableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableList")
            .field("items", &self.items)
            .field("subscribers", &self.subscribers.entries.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ObservableMap
// ---------------------------------------------------------------------------

/// An observable mapping that preserves insertion order.
pub struct ObservableMap<K, V> {
    entries: IndexMap<K, V>,
    subscribers: Subscribers<MapChange<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> ObservableMap<K, V> {
    pub fn new(entries: IndexMap<K, V>) -> Self {
        ObservableMap {
            entries,
            subscribers: Subscribers::new(),
        }
    }

    pub fn entries(&self) -> &IndexMap<K, V> {
        &self.entries
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or overwrites `key`. New keys emit `Add`, existing ones `Set`
    /// with the previous value.
    pub fn insert(&mut self, key: K, value: V) -> MapChange<K, V> {
        let previous = self.entries.insert(key.clone(), value.clone());
        let kind = if previous.is_some() {
            ChangeKind::Set
        } else {
            ChangeKind::Add
        };
        self.emit(CollectionChange::new(kind, Some(key), Some(value), previous))
    }

    /// Removes `key`, keeping the order of the remaining entries.
    /// Returns `None` if the key was absent.
    pub fn remove(&mut self, key: &K) -> Option<MapChange<K, V>> {
        let previous = self.entries.shift_remove(key)?;
        Some(self.emit(CollectionChange::new(
            ChangeKind::Remove,
            Some(key.clone()),
            None,
            Some(previous),
        )))
    }

    pub fn clear(&mut self) -> MapChange<K, V> {
        self.entries.clear();
        self.emit(CollectionChange::new(ChangeKind::Clear, None, None, None))
    }

    pub fn replace(&mut self, entries: IndexMap<K, V>) -> MapChange<K, V> {
        self.entries = entries;
        self.emit(CollectionChange::new(ChangeKind::Set, None, None, None))
    }

    fn emit(&mut self, change: MapChange<K, V>) -> MapChange<K, V> {
        self.subscribers.emit(&change);
        change
    }

    subscription_methods!(MapChange<K, V>);
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for ObservableMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableMap")
            .field("entries", &self.entries)
            .field("subscribers", &self.subscribers.entries.len())
            .finish()
    }
}
