//! Stable ID newtypes for subscriptions.
//!
//! Subscription handles are distinct newtype wrappers over `u32` so that an
//! observable's subscription cannot be confused with a plain counter.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle returned when a callback is registered on an observable.
///
/// Passing it back to `unsubscribe` removes that callback and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u32);

impl SubscriptionId {
    /// Returns the id following this one.
    pub fn next(self) -> SubscriptionId {
        SubscriptionId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}
