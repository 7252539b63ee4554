//! Dotted field paths with optional chaining.
//!
//! `habitat?.location?.city` names the `city` key inside `location` inside
//! the root field `habitat`. A `?` after a segment marks it optional: when
//! its value is null or missing, resolution stops and yields `None` instead
//! of failing.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use smallvec::SmallVec;

use crate::error::CoreError;

/// One segment of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    pub name: String,
    pub optional: bool,
}

/// A parsed field path. The first segment is the root field name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    raw: String,
    segments: SmallVec<[PathSegment; 4]>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<FieldPath, CoreError> {
        let mut segments = SmallVec::new();
        for part in raw.split('.') {
            let (name, optional) = match part.strip_suffix('?') {
                Some(name) => (name, true),
                None => (part, false),
            };
            if name.is_empty() {
                return Err(CoreError::InvalidPath {
                    path: raw.to_string(),
                    reason: "empty segment".to_string(),
                });
            }
            segments.push(PathSegment {
                name: name.to_string(),
                optional,
            });
        }
        Ok(FieldPath {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The root field name.
    pub fn root(&self) -> &str {
        // parse guarantees at least one segment
        self.segments.first().map(|s| s.name.as_str()).unwrap_or("")
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True if the path names a field directly, with no nested keys.
    pub fn is_root(&self) -> bool {
        self.segments.len() == 1
    }

    /// Resolves the path against the root field's value.
    ///
    /// Returns `Ok(None)` when an optional segment's value is null or
    /// missing.
    pub fn resolve(&self, root_value: &Value) -> Result<Option<Value>, CoreError> {
        let mut current = root_value;
        for (prev, seg) in self.segments.iter().zip(self.segments.iter().skip(1)) {
            if current.is_null() && prev.optional {
                return Ok(None);
            }
            let Value::Object(map) = current else {
                return Err(self.not_a_mapping(&prev.name, current));
            };
            match map.get(&seg.name) {
                Some(Value::Null) | None if seg.optional => return Ok(None),
                Some(next) => current = next,
                None => {
                    return Err(CoreError::UnknownField {
                        name: seg.name.clone(),
                    })
                }
            }
        }
        if matches!(current, Value::Null) && self.segments.last().is_some_and(|s| s.optional) {
            return Ok(None);
        }
        Ok(Some(current.clone()))
    }

    /// Returns a copy of `root_value` with the leaf replaced by `leaf`.
    ///
    /// Returns `Ok(None)` when an optional segment on the way to the leaf is
    /// null or missing. The leaf key itself may be absent; it is inserted.
    pub fn replace(&self, root_value: &Value, leaf: Value) -> Result<Option<Value>, CoreError> {
        if self.is_root() {
            return Ok(Some(leaf));
        }
        let mut updated = root_value.clone();
        let mut current = &mut updated;
        let last = self.segments.len() - 1;
        for (i, seg) in self.segments.iter().enumerate().skip(1) {
            let prev = &self.segments[i - 1];
            if current.is_null() && prev.optional {
                return Ok(None);
            }
            let found = crate::value::describe(current);
            let Value::Object(map) = current else {
                return Err(self.invalid_segment(&prev.name, found));
            };
            if i == last {
                map.insert(seg.name.clone(), leaf);
                return Ok(Some(updated));
            }
            current = match map.get_mut(&seg.name) {
                Some(next) if !(next.is_null() && seg.optional) => next,
                _ if seg.optional => return Ok(None),
                _ => {
                    return Err(CoreError::UnknownField {
                        name: seg.name.clone(),
                    })
                }
            };
        }
        Ok(Some(updated))
    }

    fn not_a_mapping(&self, segment: &str, found: &Value) -> CoreError {
        self.invalid_segment(segment, crate::value::describe(found))
    }

    fn invalid_segment(&self, segment: &str, found: &str) -> CoreError {
        CoreError::InvalidPath {
            path: self.raw.clone(),
            reason: format!("'{segment}' is {found}, not a mapping"),
        }
    }
}

impl FromStr for FieldPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
