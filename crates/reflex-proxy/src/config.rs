//! Proxy configuration.
//!
//! [`ProxyConfig`] carries the global switches; [`UndoConfig`] is used both
//! globally and as a per-field override. Both are serde types so embedding
//! applications can load them from JSON, and [`ProxyConfig::from_env`]
//! layers `REFLEX_*` environment variables over the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default undo stack capacity per field.
pub const DEFAULT_UNDO_MAX: usize = 50;

/// Default bound on nested listener-triggered mutations.
pub const DEFAULT_MAX_REENTRANCY_DEPTH: usize = 64;

/// Undo behaviour for one field, or the default for all fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// Whether changes are recorded at all. Default: false.
    pub enabled: bool,
    /// Maximum number of undo steps kept. Default: 50.
    pub max_depth: usize,
    /// Successive changes closer together than this collapse into one step.
    pub debounce_window: Option<Duration>,
}

impl Default for UndoConfig {
    fn default() -> Self {
        UndoConfig {
            enabled: false,
            max_depth: DEFAULT_UNDO_MAX,
            debounce_window: None,
        }
    }
}

impl UndoConfig {
    /// An enabled config with default capacity and no debounce.
    pub fn enabled() -> Self {
        UndoConfig {
            enabled: true,
            ..UndoConfig::default()
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce_window = Some(window);
        self
    }
}

/// Configuration for an [`ObservableProxy`](crate::ObservableProxy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Write every notified mutation straight back into the host record.
    pub sync: bool,
    /// Undo defaults for every field without an override.
    pub undo: UndoConfig,
    /// Maximum nesting of mutations triggered from listeners. Default: 64.
    pub max_reentrancy_depth: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            sync: false,
            undo: UndoConfig::default(),
            max_reentrancy_depth: DEFAULT_MAX_REENTRANCY_DEPTH,
        }
    }
}

impl ProxyConfig {
    /// Defaults overridden by `REFLEX_SYNC`, `REFLEX_UNDO`,
    /// `REFLEX_UNDO_MAX`, `REFLEX_UNDO_DEBOUNCE_MS` and `REFLEX_MAX_DEPTH`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = ProxyConfig::default();
        if let Some(sync) = parse_var(&lookup, "REFLEX_SYNC", parse_bool) {
            config.sync = sync;
        }
        if let Some(enabled) = parse_var(&lookup, "REFLEX_UNDO", parse_bool) {
            config.undo.enabled = enabled;
        }
        if let Some(max) = parse_var(&lookup, "REFLEX_UNDO_MAX", |s| s.parse::<usize>().ok()) {
            config.undo.max_depth = max;
        }
        if let Some(ms) = parse_var(&lookup, "REFLEX_UNDO_DEBOUNCE_MS", |s| s.parse::<u64>().ok()) {
            config.undo.debounce_window = Some(Duration::from_millis(ms));
        }
        if let Some(depth) = parse_var(&lookup, "REFLEX_MAX_DEPTH", |s| s.parse::<usize>().ok()) {
            config.max_reentrancy_depth = depth;
        }
        config
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_undo(mut self, undo: UndoConfig) -> Self {
        self.undo = undo;
        self
    }

    pub fn with_max_reentrancy_depth(mut self, depth: usize) -> Self {
        self.max_reentrancy_depth = depth;
        self
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!(key, value = %raw, "ignoring unparseable configuration value");
    }
    parsed
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
