//! Path-addressable JSON document.
//!
//! Paths are dot separated (`output.items.0.name`); `items[0]` is accepted as
//! sugar for `items.0` and `["a.b"]` addresses a key containing dots. Reads
//! never fail: a missing path is simply `None`. Writes create whatever
//! intermediate containers the path needs.

use crate::PathError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;

/// How far past the end of an array a write may reach. The gap is filled
/// with nulls.
pub const MAX_INDEX_GAP: usize = 1024;

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        let quoted = raw.len() >= 2
            && ((raw.starts_with('"') && raw.ends_with('"'))
                || (raw.starts_with('\'') && raw.ends_with('\'')));
        if quoted {
            return Segment::Key(raw[1..raw.len() - 1].to_string());
        }
        // Only canonical integers are indices, so "007" stays an object key.
        match raw.parse::<usize>() {
            Ok(index) if index.to_string() == raw => Segment::Index(index),
            _ => Segment::Key(raw.to_string()),
        }
    }

    fn as_key(&self) -> Cow<'_, str> {
        match self {
            Segment::Key(key) => Cow::Borrowed(key),
            Segment::Index(index) => Cow::Owned(index.to_string()),
        }
    }
}

/// Split a path into segments.
pub fn parse_path(path: &str) -> Result<Vec<Segment>, PathError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }

    let mut segments = Vec::new();
    for part in split_top_level(trimmed) {
        let part = part.trim();
        let (head, mut rest) = match part.find('[') {
            Some(open) => (&part[..open], &part[open..]),
            None => (part, ""),
        };
        if head.is_empty() && rest.is_empty() {
            return Err(PathError::EmptySegment(path.to_string()));
        }
        if !head.is_empty() {
            segments.push(Segment::parse(head));
        }
        while !rest.is_empty() {
            if !rest.starts_with('[') {
                return Err(PathError::UnterminatedIndex(path.to_string()));
            }
            let close = rest
                .find(']')
                .ok_or_else(|| PathError::UnterminatedIndex(path.to_string()))?;
            let inner = rest[1..close].trim();
            if inner.is_empty() {
                return Err(PathError::EmptySegment(path.to_string()));
            }
            segments.push(Segment::parse(inner));
            rest = &rest[close + 1..];
        }
    }
    Ok(segments)
}

/// Split on dots that are not inside a bracketed segment.
fn split_top_level(path: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => {
                parts.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&path[start..]);
    parts
}

/// Look up `path` inside any JSON value.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse_path(path).ok()?;
    lookup_segments(root, &segments)
}

fn lookup_segments<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = match (current, segment) {
            (Value::Object(map), segment) => map.get(segment.as_key().as_ref())?,
            (Value::Array(items), Segment::Index(index)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Reject writes whose array indices would allocate an unbounded gap,
/// before anything is mutated.
fn check_indices(root: &Value, segments: &[Segment], path: &str) -> Result<(), PathError> {
    let mut current = Some(root);
    for segment in segments {
        current = match (current, segment) {
            (Some(Value::Object(map)), segment) => map.get(segment.as_key().as_ref()),
            (Some(Value::Array(items)), Segment::Index(index)) => {
                check_gap(*index, items.len(), path)?;
                items.get(*index)
            }
            (_, Segment::Index(index)) => {
                check_gap(*index, 0, path)?;
                None
            }
            (_, Segment::Key(_)) => None,
        };
    }
    Ok(())
}

fn check_gap(index: usize, len: usize, path: &str) -> Result<(), PathError> {
    if index > len.saturating_add(MAX_INDEX_GAP) {
        return Err(PathError::IndexOutOfRange {
            path: path.to_string(),
            index,
        });
    }
    Ok(())
}

fn child_mut<'a>(current: &'a mut Value, segment: &Segment) -> &'a mut Value {
    match segment {
        Segment::Key(key) => {
            if !current.is_object() {
                if !current.is_null() {
                    tracing::trace!(key = %key, "overwriting non-object value on path write");
                }
                *current = Value::Object(Map::new());
            }
            &mut current[key.as_str()]
        }
        Segment::Index(index) => match current {
            Value::Object(map) => map.entry(index.to_string()).or_insert(Value::Null),
            Value::Array(items) => {
                if items.len() <= *index {
                    items.resize(index.saturating_add(1), Value::Null);
                }
                &mut items[*index]
            }
            other => {
                if !other.is_null() {
                    tracing::trace!(index, "overwriting scalar value on path write");
                }
                *other = Value::Array(vec![Value::Null; index.saturating_add(1)]);
                &mut other[*index]
            }
        },
    }
}

fn merge_values(target: &mut Value, source: &Value) {
    match (&mut *target, source) {
        (Value::Object(into), Value::Object(from)) => {
            for (key, value) in from {
                match into.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        into.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(into), Value::Array(from)) => {
            for (index, value) in from.iter().enumerate() {
                match into.get_mut(index) {
                    Some(existing) => merge_values(existing, value),
                    None => into.push(value.clone()),
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

/// Hierarchical key/value document used for node inputs, node results and
/// the run-wide shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    root: Value,
}

impl Document {
    /// An empty object document.
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.root, path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Write `value` at `path`, creating intermediate containers. A numeric
    /// segment creates an array unless the existing container is an object,
    /// in which case it is used as a key. A key segment on top of an array or
    /// scalar replaces it with an object. An index more than
    /// [`MAX_INDEX_GAP`] past the end of its array is rejected.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<&mut Self, PathError> {
        let segments = parse_path(path)?;
        check_indices(&self.root, &segments, path)?;
        let mut slot = &mut self.root;
        for segment in &segments {
            slot = child_mut(slot, segment);
        }
        *slot = value.into();
        Ok(self)
    }

    /// Remove and return the value at `path`.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let segments = parse_path(path).ok()?;
        let (last, parents) = segments.split_last()?;
        let mut current = &mut self.root;
        for segment in parents {
            current = match (current, segment) {
                (Value::Object(map), segment) => map.get_mut(segment.as_key().as_ref())?,
                (Value::Array(items), Segment::Index(index)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        match (current, last) {
            (Value::Object(map), segment) => map.remove(segment.as_key().as_ref()),
            (Value::Array(items), Segment::Index(index)) if *index < items.len() => {
                Some(items.remove(*index))
            }
            _ => None,
        }
    }

    /// Deep-merge `other` into `self`. Containers of the same kind merge
    /// recursively; anything else is overwritten by a copy of `other`'s value.
    pub fn merge(&mut self, other: &Document) -> &mut Self {
        merge_values(&mut self.root, &other.root);
        self
    }

    /// Plain nested value handed to the template evaluator.
    pub fn to_flat_model(&self) -> Value {
        self.root.clone()
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        match &self.root {
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Null => true,
            _ => false,
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Value> for Document {
    fn from(root: Value) -> Self {
        Self::from_value(root)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}
