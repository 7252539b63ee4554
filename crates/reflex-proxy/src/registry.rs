//! Field registry: one leaf cell per proxied field.
//!
//! Fields are created lazily from the host record the first time they are
//! requested, seeded with a copy of the host's value. A field's declared
//! [`ValueType`] fixes the type of every later value; requests that disagree
//! with it fail with [`ProxyError::TypeMismatch`].
//!
//! Mutations are two-phase: [`FieldRegistry::preview`] computes the value a
//! [`Mutation`] would produce without touching the cell, and
//! [`FieldRegistry::apply`] commits it. The coordinator compares the preview
//! against the current value before deciding to commit.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use reflex_core::{
    describe, FieldKind, HostRecord, ListChange, MapChange, Observable, ObservableList,
    ObservableMap, ValueType,
};

use crate::error::ProxyError;

/// A mutation of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Replace the whole value.
    Replace(Value),
    Push(Value),
    InsertAt(usize, Value),
    RemoveAt(usize),
    SetAt(usize, Value),
    InsertEntry(String, Value),
    /// Removing an absent key leaves the value unchanged.
    RemoveEntry(String),
    /// Empty a sequence or mapping.
    Clear,
}

/// Change emitted by a collection field's leaf cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEvent {
    List(ListChange<Value>),
    Map(MapChange<String, Value>),
}

/// The leaf cell backing a field.
#[derive(Debug)]
pub enum FieldCell {
    Scalar(Observable<Value>),
    Sequence(ObservableList<Value>),
    Mapping(ObservableMap<String, Value>),
}

impl FieldCell {
    fn new(kind: FieldKind, value: Value) -> FieldCell {
        match (kind, value) {
            (FieldKind::Sequence, Value::Array(items)) => {
                FieldCell::Sequence(ObservableList::new(items))
            }
            (FieldKind::Mapping, Value::Object(map)) => {
                FieldCell::Mapping(ObservableMap::new(map.into_iter().collect()))
            }
            (_, value) => FieldCell::Scalar(Observable::new(value)),
        }
    }

    /// An empty cell of the given shape.
    fn empty(kind: FieldKind) -> FieldCell {
        match kind {
            FieldKind::Sequence => FieldCell::Sequence(ObservableList::new(Vec::new())),
            FieldKind::Mapping => FieldCell::Mapping(ObservableMap::new(IndexMap::new())),
            FieldKind::Scalar => FieldCell::Scalar(Observable::new(Value::Null)),
        }
    }

    /// A copy of the cell's current value.
    pub fn value(&self) -> Value {
        match self {
            FieldCell::Scalar(cell) => cell.get().clone(),
            FieldCell::Sequence(list) => Value::Array(list.items().to_vec()),
            FieldCell::Mapping(map) => Value::Object(
                map.entries()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldCell::Scalar(_) => FieldKind::Scalar,
            FieldCell::Sequence(_) => FieldKind::Sequence,
            FieldCell::Mapping(_) => FieldKind::Mapping,
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            FieldCell::Scalar(cell) => cell.is_enabled(),
            FieldCell::Sequence(list) => list.is_enabled(),
            FieldCell::Mapping(map) => map.is_enabled(),
        }
    }

    pub fn enable(&mut self) {
        match self {
            FieldCell::Scalar(cell) => cell.enable(),
            FieldCell::Sequence(list) => list.enable(),
            FieldCell::Mapping(map) => map.enable(),
        }
    }

    pub fn disable(&mut self) {
        match self {
            FieldCell::Scalar(cell) => cell.disable(),
            FieldCell::Sequence(list) => list.disable(),
            FieldCell::Mapping(map) => map.disable(),
        }
    }
}

/// A proxied field: name, declared type and leaf cell.
#[derive(Debug)]
pub struct Field {
    name: String,
    ty: ValueType,
    cell: FieldCell,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    /// The shape of the backing cell. For concrete types this is the
    /// type's kind; an `Any` field takes the shape of its current value.
    pub fn kind(&self) -> FieldKind {
        self.cell.kind()
    }

    pub fn value(&self) -> Value {
        self.cell.value()
    }

    pub fn cell(&self) -> &FieldCell {
        &self.cell
    }

    pub fn cell_mut(&mut self) -> &mut FieldCell {
        &mut self.cell
    }
}

/// Name → field map in creation order.
#[derive(Debug, Default)]
pub struct FieldRegistry {
    fields: IndexMap<String, Field>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the field, creating it from `host` on first request.
    ///
    /// Requesting [`ValueType::Any`] accepts whatever the field holds; on
    /// creation the type is inferred from the host value. An `Any` field is
    /// narrowed when requested with a concrete type its value conforms to.
    pub fn get_or_create(
        &mut self,
        name: &str,
        ty: ValueType,
        host: &dyn HostRecord,
    ) -> Result<&Field, ProxyError> {
        if self.fields.contains_key(name) {
            let field = self
                .fields
                .get_mut(name)
                .ok_or_else(|| unknown_field(name))?;
            reconcile(field, ty)?;
            return Ok(field);
        }

        let value = host.get_field(name).ok_or_else(|| unknown_field(name))?;
        let ty = match ty {
            ValueType::Any => ValueType::of(&value),
            declared if declared.accepts(&value) => declared,
            declared => return Err(mismatch(name, declared.name(), &value)),
        };
        let field = Field {
            name: name.to_string(),
            ty,
            cell: FieldCell::new(ty.kind(), value),
        };
        Ok(self.fields.entry(name.to_string()).or_insert(field))
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// A copy of a registered field's value.
    pub fn value(&self, name: &str) -> Option<Value> {
        self.fields.get(name).map(Field::value)
    }

    /// Registered field names in creation order.
    pub fn names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Computes the value `mutation` would leave in the field.
    pub fn preview(&self, name: &str, mutation: &Mutation) -> Result<Value, ProxyError> {
        let field = self.fields.get(name).ok_or_else(|| unknown_field(name))?;
        preview_value(name, field.ty, &field.cell.value(), mutation)
    }

    /// Commits `mutation` to the field's cell.
    ///
    /// When `notify` is false the cell's own subscribers are not called.
    /// Returns the collection change for sequence and mapping cells.
    pub fn apply(
        &mut self,
        name: &str,
        mutation: Mutation,
        notify: bool,
    ) -> Result<Option<CollectionEvent>, ProxyError> {
        let field = self
            .fields
            .get_mut(name)
            .ok_or_else(|| unknown_field(name))?;
        let was_enabled = field.cell.is_enabled();
        if !notify {
            field.cell.disable();
        }
        let result = apply_to_cell(field, mutation);
        if !notify && was_enabled {
            field.cell.enable();
        }
        result
    }
}

fn reconcile(field: &mut Field, requested: ValueType) -> Result<(), ProxyError> {
    if requested == ValueType::Any || requested == field.ty {
        return Ok(());
    }
    let value = field.cell.value();
    if field.ty == ValueType::Any && requested.accepts(&value) {
        field.ty = requested;
        if field.cell.kind() != requested.kind() {
            reshape(field, FieldCell::new(requested.kind(), value));
        }
        return Ok(());
    }
    Err(ProxyError::TypeMismatch {
        field: field.name.clone(),
        expected: requested.name().to_string(),
        found: field.ty.name().to_string(),
    })
}

/// Swaps the field's cell, keeping its enabled state.
fn reshape(field: &mut Field, cell: FieldCell) {
    let enabled = field.cell.is_enabled();
    field.cell = cell;
    if !enabled {
        field.cell.disable();
    }
}

fn apply_to_cell(field: &mut Field, mutation: Mutation) -> Result<Option<CollectionEvent>, ProxyError> {
    if field.ty == ValueType::Any {
        if let Mutation::Replace(value) = &mutation {
            let shape = ValueType::of(value).kind();
            // an untyped field's cell follows the shape of its value
            if shape != field.cell.kind() {
                reshape(field, FieldCell::empty(shape));
            }
        }
    }
    let name = field.name.as_str();
    let out_of_range = |index: usize, len: usize| ProxyError::IndexOutOfRange {
        field: name.to_string(),
        index,
        len,
    };
    match (&mut field.cell, mutation) {
        (FieldCell::Scalar(cell), mutation) => {
            let next = preview_value(name, field.ty, cell.get(), &mutation)?;
            cell.set(next, true);
            Ok(None)
        }
        (FieldCell::Sequence(list), Mutation::Replace(Value::Array(items))) => {
            Ok(Some(CollectionEvent::List(list.replace(items))))
        }
        (FieldCell::Sequence(list), Mutation::Push(item)) => {
            Ok(Some(CollectionEvent::List(list.push(item))))
        }
        (FieldCell::Sequence(list), Mutation::InsertAt(index, item)) => {
            let len = list.len();
            list.insert(index, item)
                .map(|c| Some(CollectionEvent::List(c)))
                .ok_or_else(|| out_of_range(index, len))
        }
        (FieldCell::Sequence(list), Mutation::RemoveAt(index)) => {
            let len = list.len();
            list.remove(index)
                .map(|c| Some(CollectionEvent::List(c)))
                .ok_or_else(|| out_of_range(index, len))
        }
        (FieldCell::Sequence(list), Mutation::SetAt(index, item)) => {
            let len = list.len();
            list.set(index, item)
                .map(|c| Some(CollectionEvent::List(c)))
                .ok_or_else(|| out_of_range(index, len))
        }
        (FieldCell::Sequence(list), Mutation::Clear) => {
            Ok(Some(CollectionEvent::List(list.clear())))
        }
        (FieldCell::Mapping(map), Mutation::Replace(Value::Object(entries))) => Ok(Some(
            CollectionEvent::Map(map.replace(entries.into_iter().collect())),
        )),
        (FieldCell::Mapping(map), Mutation::InsertEntry(key, value)) => {
            Ok(Some(CollectionEvent::Map(map.insert(key, value))))
        }
        (FieldCell::Mapping(map), Mutation::RemoveEntry(key)) => {
            Ok(map.remove(&key).map(CollectionEvent::Map))
        }
        (FieldCell::Mapping(map), Mutation::Clear) => Ok(Some(CollectionEvent::Map(map.clear()))),
        (cell, mutation) => {
            let current = cell.value();
            // surfaces the precise mismatch for the cell's shape
            preview_value(name, field.ty, &current, &mutation)?;
            Err(mismatch(name, field.ty.name(), &current))
        }
    }
}

/// Pure evaluation of a mutation against `current`.
fn preview_value(
    name: &str,
    ty: ValueType,
    current: &Value,
    mutation: &Mutation,
) -> Result<Value, ProxyError> {
    let out_of_range = |index: usize, len: usize| ProxyError::IndexOutOfRange {
        field: name.to_string(),
        index,
        len,
    };
    match mutation {
        Mutation::Replace(value) => {
            if !ty.accepts(value) {
                return Err(mismatch(name, ty.name(), value));
            }
            Ok(value.clone())
        }
        Mutation::Push(item) => {
            let mut items = sequence_of(name, current)?;
            items.push(item.clone());
            Ok(Value::Array(items))
        }
        Mutation::InsertAt(index, item) => {
            let mut items = sequence_of(name, current)?;
            if *index > items.len() {
                return Err(out_of_range(*index, items.len()));
            }
            items.insert(*index, item.clone());
            Ok(Value::Array(items))
        }
        Mutation::RemoveAt(index) => {
            let mut items = sequence_of(name, current)?;
            if *index >= items.len() {
                return Err(out_of_range(*index, items.len()));
            }
            items.remove(*index);
            Ok(Value::Array(items))
        }
        Mutation::SetAt(index, item) => {
            let mut items = sequence_of(name, current)?;
            let len = items.len();
            let slot = items.get_mut(*index).ok_or_else(|| out_of_range(*index, len))?;
            *slot = item.clone();
            Ok(Value::Array(items))
        }
        Mutation::InsertEntry(key, value) => {
            let mut map = mapping_of(name, current)?;
            map.insert(key.clone(), value.clone());
            Ok(Value::Object(map))
        }
        Mutation::RemoveEntry(key) => {
            let mut map = mapping_of(name, current)?;
            map.shift_remove(key);
            Ok(Value::Object(map))
        }
        Mutation::Clear => match current {
            Value::Array(_) => Ok(Value::Array(Vec::new())),
            Value::Object(_) => Ok(Value::Object(Map::new())),
            other => Err(mismatch(name, "sequence or mapping", other)),
        },
    }
}

fn sequence_of(name: &str, current: &Value) -> Result<Vec<Value>, ProxyError> {
    match current {
        Value::Array(items) => Ok(items.clone()),
        other => Err(mismatch(name, "sequence", other)),
    }
}

fn mapping_of(name: &str, current: &Value) -> Result<Map<String, Value>, ProxyError> {
    match current {
        Value::Object(map) => Ok(map.clone()),
        other => Err(mismatch(name, "mapping", other)),
    }
}

fn mismatch(name: &str, expected: &str, found: &Value) -> ProxyError {
    ProxyError::TypeMismatch {
        field: name.to_string(),
        expected: expected.to_string(),
        found: describe(found).to_string(),
    }
}

fn unknown_field(name: &str) -> ProxyError {
    ProxyError::UnknownField {
        name: name.to_string(),
    }
}
