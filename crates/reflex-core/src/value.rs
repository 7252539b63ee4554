//! The field value model.
//!
//! Every field value is a [`serde_json::Value`]: a type-erased box with deep
//! equality and deep-copy-on-clone. [`ValueType`] is the declared type of a
//! field and [`FieldKind`] the container shape derived from it. Typed access
//! goes through serde with a checked conversion ([`decode`], [`encode`]) that
//! fails fast with [`CoreError::TypeMismatch`] rather than coercing.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Container shape of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Scalar,
    Sequence,
    Mapping,
}

/// Declared type of a field.
///
/// `Null` conforms to every scalar type so optional attributes can be
/// proxied. `Any` accepts everything and is what a field gets when its type
/// cannot be inferred (its host value is `null`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Any,
    Bool,
    Int,
    Float,
    String,
    Sequence,
    Mapping,
}

impl ValueType {
    /// Infers the type of a concrete value.
    pub fn of(value: &Value) -> ValueType {
        match value {
            Value::Null => ValueType::Any,
            Value::Bool(_) => ValueType::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => ValueType::Int,
            Value::Number(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Array(_) => ValueType::Sequence,
            Value::Object(_) => ValueType::Mapping,
        }
    }

    /// Returns the container shape cells of this type use.
    pub fn kind(self) -> FieldKind {
        match self {
            ValueType::Sequence => FieldKind::Sequence,
            ValueType::Mapping => FieldKind::Mapping,
            _ => FieldKind::Scalar,
        }
    }

    /// Returns true if `value` may be stored in a field of this type.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::Any, _) => true,
            (ValueType::Sequence, v) => v.is_array(),
            (ValueType::Mapping, v) => v.is_object(),
            (_, Value::Null) => true,
            (ValueType::Bool, v) => v.is_boolean(),
            (ValueType::Int, v) => v.is_i64() || v.is_u64(),
            (ValueType::Float, v) => v.is_number(),
            (ValueType::String, v) => v.is_string(),
        }
    }

    /// The value a field of this type is reset to when it has no data.
    pub fn zero_value(self) -> Value {
        match self {
            ValueType::Any => Value::Null,
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::from(0),
            ValueType::Float => Value::from(0.0),
            ValueType::String => Value::String(String::new()),
            ValueType::Sequence => Value::Array(Vec::new()),
            ValueType::Mapping => Value::Object(serde_json::Map::new()),
        }
    }

    /// Returns a human-readable name for the type.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Any => "any",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Sequence => "sequence",
            ValueType::Mapping => "mapping",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Describes the runtime shape of a value for error messages.
pub fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        other => ValueType::of(other).name(),
    }
}

/// Converts a field value into a Rust type.
pub fn decode<T: DeserializeOwned>(field: &str, value: &Value) -> Result<T, CoreError> {
    T::deserialize(value).map_err(|_| CoreError::TypeMismatch {
        field: field.to_string(),
        expected: std::any::type_name::<T>().to_string(),
        found: describe(value).to_string(),
    })
}

/// Converts a Rust value into a field value.
pub fn encode<T: Serialize + ?Sized>(field: &str, value: &T) -> Result<Value, CoreError> {
    serde_json::to_value(value).map_err(|e| CoreError::Conversion {
        field: field.to_string(),
        reason: e.to_string(),
    })
}
