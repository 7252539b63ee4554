//! Host records: the objects a proxy wraps.
//!
//! A [`HostRecord`] exposes named attributes as [`Value`]s. The proxy only
//! ever reads copies out of a record and writes whole values back, so any
//! object that can enumerate and round-trip its fields through JSON works.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Attribute introspection over a host object.
pub trait HostRecord {
    /// Returns a copy of the attribute, or `None` if the record lacks it.
    fn get_field(&self, name: &str) -> Option<Value>;

    /// Overwrites an existing attribute.
    fn set_field(&mut self, name: &str, value: Value) -> Result<(), CoreError>;

    fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    /// All attribute names, in declaration order.
    fn field_names(&self) -> Vec<String>;
}

impl HostRecord for Map<String, Value> {
    fn get_field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<(), CoreError> {
        match self.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(CoreError::UnknownField {
                name: name.to_string(),
            }),
        }
    }

    fn has_field(&self, name: &str) -> bool {
        self.contains_key(name)
    }

    fn field_names(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }
}

/// A host record backed by a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonRecord {
    fields: Map<String, Value>,
}

impl JsonRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        JsonRecord { fields }
    }

    /// Builds a record from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(fields) => Ok(JsonRecord { fields }),
            other => Err(CoreError::TypeMismatch {
                field: "<record>".to_string(),
                expected: "mapping".to_string(),
                found: crate::value::describe(&other).to_string(),
            }),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl HostRecord for JsonRecord {
    fn get_field(&self, name: &str) -> Option<Value> {
        self.fields.get_field(name)
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<(), CoreError> {
        self.fields.set_field(name, value)
    }

    fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.field_names()
    }
}

/// A host record over any serde struct.
///
/// Reads serialize the struct; writes serialize it, patch the attribute and
/// deserialize the result. A write the struct cannot represent fails with
/// [`CoreError::Record`] and leaves the struct untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedRecord<T> {
    inner: T,
}

impl<T: Serialize + DeserializeOwned> TypedRecord<T> {
    pub fn new(inner: T) -> Self {
        TypedRecord { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn snapshot(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.inner) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

impl<T: Serialize + DeserializeOwned> HostRecord for TypedRecord<T> {
    fn get_field(&self, name: &str) -> Option<Value> {
        self.snapshot().remove(name)
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<(), CoreError> {
        let mut map = self.snapshot();
        map.set_field(name, value)?;
        let updated = serde_json::from_value(Value::Object(map)).map_err(|e| CoreError::Record {
            field: name.to_string(),
            reason: e.to_string(),
        })?;
        self.inner = updated;
        Ok(())
    }

    fn field_names(&self) -> Vec<String> {
        self.snapshot().keys().cloned().collect()
    }
}
