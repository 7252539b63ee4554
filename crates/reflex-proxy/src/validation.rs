//! Per-field validation pipelines.
//!
//! A field's validators run in registration order and all of them always
//! run; the field's error list is re-derived from scratch each time. A
//! validator that returns an error or panics does not abort the pipeline:
//! the fault becomes one more message in the list.

use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use reflex_core::{Observable, SubscriptionId};

/// Error a fallible validator may return.
pub type FaultSource = Box<dyn Error + Send + Sync>;

/// A validator: `Ok(None)` accepts, `Ok(Some(msg))` rejects with a message.
pub type ValidatorFn = Rc<dyn Fn(&Value) -> Result<Option<String>, FaultSource>>;

/// A validator failure, reported as a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidatorFault {
    #[error("validator fault: {0}")]
    Failed(String),
    #[error("validator panicked: {0}")]
    Panicked(String),
}

struct FieldValidation {
    validators: Vec<ValidatorFn>,
    errors: Observable<Vec<String>>,
}

impl std::fmt::Debug for FieldValidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldValidation")
            .field("validators", &self.validators.len())
            .field("errors", self.errors.get())
            .finish()
    }
}

impl FieldValidation {
    fn new() -> Self {
        FieldValidation {
            validators: Vec::new(),
            errors: Observable::new(Vec::new()),
        }
    }
}

/// Validators and current errors for every field.
#[derive(Debug)]
pub struct ValidationEngine {
    fields: IndexMap<String, FieldValidation>,
    valid: Observable<bool>,
}

impl Default for ValidationEngine {
    fn default() -> Self {
        ValidationEngine {
            fields: IndexMap::new(),
            valid: Observable::new(true),
        }
    }
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a validator. The caller revalidates the field afterwards.
    pub fn add(&mut self, field: &str, validator: ValidatorFn) {
        self.entry(field).validators.push(validator);
    }

    pub fn has_validators(&self, field: &str) -> bool {
        self.fields
            .get(field)
            .is_some_and(|f| !f.validators.is_empty())
    }

    /// Fields with at least one validator.
    pub fn validated_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, f)| !f.validators.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Runs every validator of `field` against `value`. Never fails.
    pub fn validate(&self, field: &str, value: &Value) -> Vec<String> {
        let Some(entry) = self.fields.get(field) else {
            return Vec::new();
        };
        entry
            .validators
            .iter()
            .filter_map(|validator| run_validator(field, validator, value))
            .collect()
    }

    /// Re-runs the validators and stores the result.
    ///
    /// Returns true if the field's error list changed.
    pub fn revalidate(&mut self, field: &str, value: &Value) -> bool {
        if !self.has_validators(field) {
            return false;
        }
        let errors = self.validate(field, value);
        let changed = self.entry(field).errors.set_if_changed(errors);
        self.publish_validity();
        changed
    }

    /// Current errors of a field; empty when valid or never validated.
    pub fn errors_for(&self, field: &str) -> &[String] {
        self.fields
            .get(field)
            .map(|f| f.errors.get().as_slice())
            .unwrap_or(&[])
    }

    /// Every field that currently has errors.
    pub fn errors(&self) -> IndexMap<String, Vec<String>> {
        self.fields
            .iter()
            .filter(|(_, f)| !f.errors.get().is_empty())
            .map(|(name, f)| (name.clone(), f.errors.get().clone()))
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        *self.valid.get()
    }

    /// Clears the stored errors of one field, or of all fields.
    ///
    /// Returns the validated fields that were reset.
    pub fn reset(&mut self, field: Option<&str>) -> Vec<String> {
        let names = match field {
            Some(name) if self.has_validators(name) => vec![name.to_string()],
            Some(_) => Vec::new(),
            None => self.validated_fields(),
        };
        for name in &names {
            self.entry(name).errors.set_if_changed(Vec::new());
        }
        self.publish_validity();
        names
    }

    /// Subscribes to a field's error list.
    pub fn watch_errors(
        &mut self,
        field: &str,
        callback: impl FnMut(&Vec<String>) + 'static,
    ) -> SubscriptionId {
        self.entry(field).errors.on_change(callback)
    }

    /// Subscribes to overall validity.
    pub fn watch_valid(&mut self, callback: impl FnMut(&bool) + 'static) -> SubscriptionId {
        self.valid.on_change(callback)
    }

    fn entry(&mut self, field: &str) -> &mut FieldValidation {
        self.fields
            .entry(field.to_string())
            .or_insert_with(FieldValidation::new)
    }

    fn publish_validity(&mut self) {
        let valid = self.fields.values().all(|f| f.errors.get().is_empty());
        self.valid.set_if_changed(valid);
    }
}

fn run_validator(field: &str, validator: &ValidatorFn, value: &Value) -> Option<String> {
    let fault = match catch_unwind(AssertUnwindSafe(|| validator(value))) {
        Ok(Ok(message)) => return message,
        Ok(Err(err)) => ValidatorFault::Failed(err.to_string()),
        Err(payload) => ValidatorFault::Panicked(panic_message(payload.as_ref())),
    };
    debug!(field, %fault, "validator faulted");
    Some(fault.to_string())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
