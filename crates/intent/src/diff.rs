//! Field-level attribute diffs
//!
//! Comparison is deep: map keys are matched regardless of order, sequences
//! are compared index by index. Values of different variants are never
//! equal, so `"1"` and `1` differ.

use crate::value::{Attributes, FieldPath, Value, remove_attribute};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Kind of a single leaf change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldDiffKind {
    Added,
    Removed,
    Changed,
}

/// One changed path between two attribute trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub path: FieldPath,
    pub kind: FieldDiffKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

impl FieldDiff {
    fn added(path: FieldPath, after: &Value) -> Self {
        Self {
            path,
            kind: FieldDiffKind::Added,
            before: None,
            after: Some(after.clone()),
        }
    }

    fn removed(path: FieldPath, before: &Value) -> Self {
        Self {
            path,
            kind: FieldDiffKind::Removed,
            before: Some(before.clone()),
            after: None,
        }
    }

    fn changed(path: FieldPath, before: &Value, after: &Value) -> Self {
        Self {
            path,
            kind: FieldDiffKind::Changed,
            before: Some(before.clone()),
            after: Some(after.clone()),
        }
    }
}

/// Copy of `attributes` with every ignored path removed
pub fn strip_ignored(attributes: &Attributes, ignored: &[FieldPath]) -> Attributes {
    let mut stripped = attributes.clone();
    for path in ignored {
        remove_attribute(&mut stripped, path);
    }
    stripped
}

/// Leaf-level differences from `before` to `after`, in tree order
pub fn diff_attributes(before: &Attributes, after: &Attributes) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();
    diff_maps(&FieldPath::root(), before, after, &mut diffs);
    diffs
}

fn diff_maps(
    at: &FieldPath,
    before: &BTreeMap<String, Value>,
    after: &BTreeMap<String, Value>,
    diffs: &mut Vec<FieldDiff>,
) {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    for key in keys {
        let path = at.child(key.as_str());
        match (before.get(key), after.get(key)) {
            (Some(b), Some(a)) => diff_values(path, b, a, diffs),
            (Some(b), None) => diffs.push(FieldDiff::removed(path, b)),
            (None, Some(a)) => diffs.push(FieldDiff::added(path, a)),
            (None, None) => {}
        }
    }
}

fn diff_values(path: FieldPath, before: &Value, after: &Value, diffs: &mut Vec<FieldDiff>) {
    match (before, after) {
        (Value::Map(b), Value::Map(a)) => diff_maps(&path, b, a, diffs),
        (Value::Sequence(b), Value::Sequence(a)) => {
            for index in 0..b.len().max(a.len()) {
                let item = path.child(index.to_string());
                match (b.get(index), a.get(index)) {
                    (Some(bv), Some(av)) => diff_values(item, bv, av, diffs),
                    (Some(bv), None) => diffs.push(FieldDiff::removed(item, bv)),
                    (None, Some(av)) => diffs.push(FieldDiff::added(item, av)),
                    (None, None) => {}
                }
            }
        }
        (b, a) if b != a => diffs.push(FieldDiff::changed(path, b, a)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::attributes_from_json;
    use serde_json::json;

    fn attrs(v: serde_json::Value) -> Attributes {
        attributes_from_json(v)
    }

    fn path(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn test_identical_trees_have_no_diff() {
        let a = attrs(json!({"spec": {"replicas": 2, "ports": [80, 443]}, "name": "web"}));
        assert!(diff_attributes(&a, &a.clone()).is_empty());
    }

    #[test]
    fn test_changed_leaf() {
        let diffs = diff_attributes(&attrs(json!({"size": 10})), &attrs(json!({"size": 20})));
        assert_eq!(
            diffs,
            vec![FieldDiff {
                path: path("size"),
                kind: FieldDiffKind::Changed,
                before: Some(Value::Int(10)),
                after: Some(Value::Int(20)),
            }]
        );
    }

    #[test]
    fn test_added_and_removed_nested_keys() {
        let before = attrs(json!({"metadata": {"labels": {"app": "web", "tier": "fe"}}}));
        let after = attrs(json!({"metadata": {"labels": {"app": "web", "team": "core"}}}));
        let diffs = diff_attributes(&before, &after);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].path, path("metadata.labels.team"));
        assert_eq!(diffs[0].kind, FieldDiffKind::Added);
        assert_eq!(diffs[1].path, path("metadata.labels.tier"));
        assert_eq!(diffs[1].kind, FieldDiffKind::Removed);
    }

    #[test]
    fn test_sequences_are_order_sensitive() {
        let diffs = diff_attributes(&attrs(json!({"ports": [80, 443]})), &attrs(json!({"ports": [443, 80]})));
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].path, path("ports.0"));

        let grown = diff_attributes(&attrs(json!({"ports": [80]})), &attrs(json!({"ports": [80, 443]})));
        assert_eq!(grown.len(), 1);
        assert_eq!(grown[0].path, path("ports.1"));
        assert_eq!(grown[0].kind, FieldDiffKind::Added);
    }

    #[test]
    fn test_string_and_number_are_different() {
        let diffs = diff_attributes(&attrs(json!({"port": "1"})), &attrs(json!({"port": 1})));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, FieldDiffKind::Changed);
    }

    #[test]
    fn test_type_change_is_one_entry() {
        let diffs = diff_attributes(&attrs(json!({"env": {"A": "1"}})), &attrs(json!({"env": ["A=1"]})));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, path("env"));
    }

    #[test]
    fn test_strip_ignored_hides_difference() {
        let before = attrs(json!({"size": 10, "metadata": {"generation": 3}}));
        let after = attrs(json!({"size": 10, "metadata": {"generation": 4}}));
        let ignored = vec![path("metadata.generation")];
        assert!(diff_attributes(&strip_ignored(&before, &ignored), &strip_ignored(&after, &ignored)).is_empty());
    }
}
