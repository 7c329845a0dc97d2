//! Structural diff of projected exchange documents.
//!
//! The original document drives traversal: keys present only in the new
//! document are not reported.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// One differing key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DiffNode {
    Changed { original: Value, new: Value },
    Nested(Diff),
}

/// Field-level differences, keyed by field name.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Diff(pub BTreeMap<String, DiffNode>);

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&DiffNode> {
        self.0.get(key)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Compare two documents.
///
/// Where both sides hold objects the walk recurses and only non-empty
/// sub-diffs are kept; any other differing value becomes
/// `{original, new}` with `null` standing in for a missing new value.
/// Non-object roots yield an empty diff.
pub fn diff(original: &Value, new: &Value) -> Diff {
    let (Value::Object(original), Value::Object(new)) = (original, new) else {
        return Diff::default();
    };

    let mut out = BTreeMap::new();
    for (key, original_value) in original {
        let new_value = new.get(key).unwrap_or(&Value::Null);
        if original_value.is_object() && new_value.is_object() {
            let sub = diff(original_value, new_value);
            if !sub.is_empty() {
                out.insert(key.clone(), DiffNode::Nested(sub));
            }
        } else if original_value != new_value {
            out.insert(
                key.clone(),
                DiffNode::Changed {
                    original: original_value.clone(),
                    new: new_value.clone(),
                },
            );
        }
    }
    Diff(out)
}
