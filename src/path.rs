//! Path Accessor - Dotted/Bracket Paths Into JSON
//!
//! Parses expressions such as `data.d.results[0].Status` into an explicit list of
//! [`PathStep`]s and reads or writes a [`serde_json::Value`] through them.
//!
//! Grammar: `ident ('.' ident | '[' integer ']')*` (a leading `[n]` is also accepted
//! so array payloads can be addressed directly).
//!
//! Writes are copy-on-write: [`FieldPath::set`] never touches its input and returns a
//! new value, so readers holding the previous value never observe a half-applied
//! update. A write fails (returns `None`) when any intermediate segment is missing
//! or is not the container kind the step expects; only the final field of an object
//! may be created.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::CacheError;

/// One navigation step
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathStep {
    /// Object member
    Field(String),
    /// Array element
    Index(usize),
}

/// A parsed path expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    steps: Vec<PathStep>,
}

impl FieldPath {
    /// Parse a path expression
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPath`] on empty names, unclosed brackets or
    /// non-numeric indices.
    pub fn parse(expr: &str) -> Result<Self, CacheError> {
        let err = |reason: &str| CacheError::InvalidPath {
            path: expr.to_string(),
            reason: reason.to_string(),
        };

        let mut rest = expr.trim();
        if rest.is_empty() {
            return Err(err("empty path"));
        }

        let mut steps = Vec::new();
        while !rest.is_empty() {
            if let Some(after_open) = rest.strip_prefix('[') {
                let close = after_open.find(']').ok_or_else(|| err("unclosed '['"))?;
                let (digits, tail) = after_open.split_at(close);
                let index = digits
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| err("array index must be a non-negative integer"))?;
                steps.push(PathStep::Index(index));
                rest = tail.strip_prefix(']').unwrap_or(tail);
            } else {
                if !steps.is_empty() {
                    rest = rest
                        .strip_prefix('.')
                        .ok_or_else(|| err("expected '.' or '[' between segments"))?;
                }
                let end = rest.find(['.', '[', ']']).unwrap_or(rest.len());
                let (name, tail) = rest.split_at(end);
                if name.is_empty() {
                    return Err(err("empty field name"));
                }
                steps.push(PathStep::Field(name.to_string()));
                rest = tail;
            }
        }

        Ok(Self { steps })
    }

    /// The parsed steps
    #[must_use]
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Read the value at this path
    #[must_use]
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.steps.iter().try_fold(value, |cursor, step| match (step, cursor) {
            (PathStep::Field(name), Value::Object(map)) => map.get(name),
            (PathStep::Index(i), Value::Array(items)) => items.get(*i),
            _ => None,
        })
    }

    /// Mutable access to an existing value at this path
    pub fn get_mut<'a>(&self, value: &'a mut Value) -> Option<&'a mut Value> {
        let mut cursor = value;
        for step in &self.steps {
            cursor = match (step, cursor) {
                (PathStep::Field(name), Value::Object(map)) => map.get_mut(name)?,
                (PathStep::Index(i), Value::Array(items)) => items.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(cursor)
    }

    /// Copy-on-write update: a new value with `new_value` written at this path
    ///
    /// Returns `None` (and leaves `value` untouched) if the path cannot be applied.
    #[must_use]
    pub fn set(&self, value: &Value, new_value: Value) -> Option<Value> {
        let mut copy = value.clone();
        self.set_in_place(&mut copy, new_value).then_some(copy)
    }

    /// In-place update of a value the caller owns exclusively
    ///
    /// On failure `target` is left unchanged.
    pub fn set_in_place(&self, target: &mut Value, new_value: Value) -> bool {
        let Some((last, parents)) = self.steps.split_last() else {
            *target = new_value;
            return true;
        };

        let mut cursor = target;
        for step in parents {
            cursor = match (step, cursor) {
                (PathStep::Field(name), Value::Object(map)) => match map.get_mut(name) {
                    Some(next) => next,
                    None => return false,
                },
                (PathStep::Index(i), Value::Array(items)) => match items.get_mut(*i) {
                    Some(next) => next,
                    None => return false,
                },
                _ => return false,
            };
        }

        match (last, cursor) {
            (PathStep::Field(name), Value::Object(map)) => {
                map.insert(name.clone(), new_value);
                true
            }
            (PathStep::Index(i), Value::Array(items)) => match items.get_mut(*i) {
                Some(slot) => {
                    *slot = new_value;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

impl FromStr for FieldPath {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                PathStep::Field(name) if i == 0 => write!(f, "{name}")?,
                PathStep::Field(name) => write!(f, ".{name}")?,
                PathStep::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

/// String-path convenience API
///
/// Unparseable paths behave like missing ones: `get` yields `None`, `set` yields `None`.
pub struct PathAccessor;

impl PathAccessor {
    /// Read `path` from `value`
    #[must_use]
    pub fn get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
        FieldPath::parse(path).ok()?.get(value)
    }

    /// Write `new_value` at `path`, returning the updated copy
    #[must_use]
    pub fn set(value: &Value, path: &str, new_value: Value) -> Option<Value> {
        FieldPath::parse(path).ok()?.set(value, new_value)
    }
}
