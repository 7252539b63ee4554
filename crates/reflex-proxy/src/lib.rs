//! Reactive proxy over a host record.
//!
//! [`ObservableProxy`] exposes each attribute of a borrowed [`HostRecord`]
//! as an observable field and keeps four kinds of derived state consistent
//! with every mutation:
//!
//! - computed fields ([`graph`]): a dependency DAG, invalidated lazily and
//!   recomputed eagerly before a mutation returns
//! - undo/redo history ([`undo`]): per field, bounded, with debounce
//! - validation ([`validation`]): ordered validators per field, fault-safe
//! - dirty state ([`dirty`]): per-field comparison against a save baseline
//!
//! # Modules
//!
//! - [`config`]: ProxyConfig and UndoConfig, with environment overrides
//! - [`clock`]: monotonic time source for debouncing
//! - [`error`]: ProxyError
//! - [`registry`]: lazily created, type-checked leaf cells
//! - [`proxy`]: the coordinator
//!
//! [`HostRecord`]: reflex_core::HostRecord

pub mod clock;
pub mod config;
pub mod dirty;
pub mod error;
pub mod graph;
pub mod proxy;
pub mod registry;
pub mod undo;
pub mod validation;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ProxyConfig, UndoConfig};
pub use error::ProxyError;
pub use graph::{ComputeScope, ComputedSpec};
pub use proxy::{FieldChange, Listener, ObservableProxy};
pub use registry::{CollectionEvent, Field, FieldCell, Mutation};
pub use validation::ValidatorFault;

pub use reflex_core::{
    ChangeKind, CoreError, FieldKind, FieldPath, HostRecord, JsonRecord, SubscriptionId,
    TypedRecord, ValueType,
};
