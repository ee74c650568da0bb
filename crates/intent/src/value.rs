//! Attribute values and field paths
//!
//! Resource configuration is an arbitrary tree. [`Value`] is the single
//! tagged representation of that tree so equality, path lookup and
//! reference scanning are each one recursive function.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unordered string-keyed attribute map of a resource
pub type Attributes = BTreeMap<String, Value>;

/// A node in a resource attribute tree
///
/// No coercion happens between variants: `Int(1)`, `Float(1.0)` and
/// `String("1")` are three different values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Look up the value at `path` below this node
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| child(node, segment))
    }

    /// Replace the value at `path` below this node
    ///
    /// Returns false if an intermediate node does not exist.
    pub fn set_path(&mut self, path: &FieldPath, value: Value) -> bool {
        let Some((last, parents)) = path.segments().split_last() else {
            *self = value;
            return true;
        };
        let mut node = self;
        for segment in parents {
            match child_mut(node, segment) {
                Some(next) => node = next,
                None => return false,
            }
        }
        match node {
            Self::Map(map) => {
                map.insert(last.clone(), value);
                true
            }
            Self::Sequence(items) => match last.parse::<usize>().ok() {
                Some(index) if index < items.len() => {
                    items[index] = value;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Remove the value at `path` below this node, returning it
    pub fn remove_path(&mut self, path: &FieldPath) -> Option<Value> {
        let (last, parents) = path.segments().split_last()?;
        let mut node = self;
        for segment in parents {
            node = child_mut(node, segment)?;
        }
        match node {
            Self::Map(map) => map.remove(last),
            // Removing from a sequence would shift later indices; blank the slot instead
            Self::Sequence(items) => {
                let index = last.parse::<usize>().ok()?;
                items.get_mut(index).map(std::mem::take)
            }
            _ => None,
        }
    }
}

fn child<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
    match node {
        Value::Map(map) => map.get(segment),
        Value::Sequence(items) => items.get(segment.parse::<usize>().ok()?),
        _ => None,
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match node {
        Value::Map(map) => map.get_mut(segment),
        Value::Sequence(items) => items.get_mut(segment.parse::<usize>().ok()?),
        _ => None,
    }
}

/// Look up `path` in an attribute map
pub fn get_attribute<'a>(attributes: &'a Attributes, path: &FieldPath) -> Option<&'a Value> {
    let (first, rest) = path.segments().split_first()?;
    let mut node = attributes.get(first)?;
    for segment in rest {
        node = child(node, segment)?;
    }
    Some(node)
}

/// Remove `path` (and everything below it) from an attribute map
pub fn remove_attribute(attributes: &mut Attributes, path: &FieldPath) -> Option<Value> {
    let (first, rest) = path.segments().split_first()?;
    if rest.is_empty() {
        return attributes.remove(first);
    }
    let node = attributes.get_mut(first)?;
    node.remove_path(&FieldPath::from_segments(rest.to_vec()))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Sequence(items)
    }
}

impl From<Attributes> for Value {
    fn from(map: Attributes) -> Self {
        Self::Map(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Sequence(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Int(i) => Self::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f).map_or(Self::Null, Self::Number),
            Value::String(s) => Self::String(s),
            Value::Sequence(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Map(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

/// Build an attribute map from a JSON object
///
/// Non-object JSON yields an empty map.
pub fn attributes_from_json(json: serde_json::Value) -> Attributes {
    match Value::from(json) {
        Value::Map(map) => map,
        _ => Attributes::new(),
    }
}

/// Dot-separated location inside an attribute tree
///
/// Segments made only of ASCII digits index into sequences, so
/// `spec.ports.0.port` reaches the `port` of the first entry of `ports`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// The empty path (the attribute map itself)
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse dot notation; empty input or empty segments are rejected
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::InvalidPath(path.to_string()));
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(Error::InvalidPath(path.to_string()));
        }
        Ok(Self(segments))
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// A new path with `segment` appended
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Whether `prefix` is this path or one of its ancestors
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

impl TryFrom<String> for FieldPath {
    type Error = Error;

    fn try_from(path: String) -> Result<Self> {
        if path.is_empty() {
            return Ok(Self::root());
        }
        Self::parse(&path)
    }
}

impl std::str::FromStr for FieldPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(path("spec.replicas").segments(), ["spec", "replicas"]);
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse("a.").is_err());
        assert_eq!(path("a.0.b").to_string(), "a.0.b");
    }

    #[test]
    fn test_json_shape_round_trips_untagged() {
        let raw = json!({"size": 10, "ratio": 0.5, "name": "db", "tags": ["a", null], "tls": true});
        let value = Value::from(raw.clone());
        assert_eq!(serde_json::to_value(&value).unwrap(), raw);

        let parsed: Value = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_no_coercion_between_variants() {
        assert_ne!(Value::from(1), Value::from("1"));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn test_get_path_through_maps_and_sequences() {
        let value = Value::from(json!({"spec": {"ports": [{"port": 80}, {"port": 443}]}}));
        assert_eq!(value.get_path(&path("spec.ports.1.port")), Some(&Value::Int(443)));
        assert_eq!(value.get_path(&path("spec.ports.2.port")), None);
        assert_eq!(value.get_path(&path("spec.ports.x")), None);
        assert_eq!(value.get_path(&FieldPath::root()), Some(&value));
    }

    #[test]
    fn test_set_path() {
        let mut value = Value::from(json!({"data": {"password": "old"}, "list": [1, 2]}));
        assert!(value.set_path(&path("data.password"), Value::from("new")));
        assert!(value.set_path(&path("list.1"), Value::from(3)));
        assert!(!value.set_path(&path("missing.key"), Value::Null));
        assert_eq!(
            value,
            Value::from(json!({"data": {"password": "new"}, "list": [1, 3]}))
        );
    }

    #[test]
    fn test_remove_attribute() {
        let mut attrs = attributes_from_json(json!({
            "metadata": {"labels": {"app": "web"}, "resourceVersion": "42"},
            "status": {"phase": "Ready"}
        }));
        assert_eq!(
            remove_attribute(&mut attrs, &path("metadata.resourceVersion")),
            Some(Value::from("42"))
        );
        assert!(remove_attribute(&mut attrs, &path("status")).is_some());
        assert!(remove_attribute(&mut attrs, &path("nope.deeper")).is_none());
        assert_eq!(
            Value::Map(attrs),
            Value::from(json!({"metadata": {"labels": {"app": "web"}}}))
        );
    }

    #[test]
    fn test_path_prefix() {
        assert!(path("metadata.labels.app").starts_with(&path("metadata")));
        assert!(!path("metadata").starts_with(&path("metadata.labels")));
        assert_eq!(path("a").child("b"), path("a.b"));
    }

    #[test]
    fn test_field_path_serializes_as_string() {
        let p = path("spec.replicas");
        assert_eq!(serde_json::to_value(&p).unwrap(), json!("spec.replicas"));
        let back: FieldPath = serde_json::from_value(json!("spec.replicas")).unwrap();
        assert_eq!(back, p);
    }
}
