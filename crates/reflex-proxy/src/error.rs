//! Error type of the proxy API.
//!
//! [`ProxyError`] is the one error every public proxy operation returns.
//! Validator faults are not part of it: they are caught and reported as
//! validation messages instead.

use reflex_core::CoreError;

/// Errors produced by proxy operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProxyError {
    /// A value or field request does not match the field's declared type.
    #[error("type mismatch for '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// Computed fields depend on each other in a loop.
    #[error("circular dependency: {}", path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    /// Neither the proxy nor its host record knows this field.
    #[error("unknown field: '{name}'")]
    UnknownField { name: String },

    /// Listeners re-entered the mutation pipeline too deeply.
    #[error("re-entrant mutation of '{field}' exceeded depth {limit}")]
    ReentrantMutation { field: String, limit: usize },

    /// A computed field of this name is already registered.
    #[error("computed field '{name}' is already registered")]
    DuplicateComputed { name: String },

    /// A collection index outside the current length.
    #[error("index {index} out of range for '{field}' (len {len})")]
    IndexOutOfRange {
        field: String,
        index: usize,
        len: usize,
    },

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The host record rejected a write.
    #[error("record rejected write to '{field}': {reason}")]
    Record { field: String, reason: String },

    /// A compute function failed for a reason of its own.
    #[error("computing '{field}' failed: {reason}")]
    Compute { field: String, reason: String },
}

impl ProxyError {
    /// Convenience constructor for compute functions.
    pub fn compute(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ProxyError::Compute {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<CoreError> for ProxyError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::TypeMismatch {
                field,
                expected,
                found,
            } => ProxyError::TypeMismatch {
                field,
                expected,
                found,
            },
            CoreError::UnknownField { name } => ProxyError::UnknownField { name },
            CoreError::InvalidPath { path, reason } => ProxyError::InvalidPath { path, reason },
            CoreError::Record { field, reason } => ProxyError::Record { field, reason },
            CoreError::Conversion { field, reason } => ProxyError::TypeMismatch {
                field,
                expected: "a JSON-representable value".to_string(),
                found: reason,
            },
        }
    }
}
