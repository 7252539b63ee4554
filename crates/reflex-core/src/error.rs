//! Core error types for reflex-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! value layer, host records and field paths.

use thiserror::Error;

/// Errors produced by the reflex-core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A value does not conform to the type its field (or caller) expects.
    #[error("type mismatch for '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// The host record has no attribute with this name.
    #[error("unknown field: '{name}'")]
    UnknownField { name: String },

    /// A field path could not be parsed or does not fit the value shape.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The host record refused a write.
    #[error("record rejected write to '{field}': {reason}")]
    Record { field: String, reason: String },

    /// A Rust value could not be represented as a field value.
    #[error("cannot convert value for '{field}': {reason}")]
    Conversion { field: String, reason: String },
}
