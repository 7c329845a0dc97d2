//! Field projection schemas.
//!
//! A schema mirrors the shape of an exchange document. Each key maps to
//! `true` (keep verbatim), `false` (drop) or a nested schema (recurse);
//! keys the schema does not mention are dropped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Schema {
    Flag(bool),
    Fields(BTreeMap<String, Schema>),
}

impl Default for Schema {
    fn default() -> Self {
        Schema::include_all()
    }
}

impl Schema {
    /// Keeps the whole request and response.
    pub fn include_all() -> Self {
        Schema::Fields(BTreeMap::from([
            ("request".to_string(), Schema::Flag(true)),
            ("response".to_string(), Schema::Flag(true)),
        ]))
    }

    /// Reduce `value` to the fields this schema names.
    ///
    /// Non-object values pass through whatever the schema says.
    pub fn project(&self, value: &Value) -> Value {
        let Value::Object(object) = value else {
            return value.clone();
        };

        match self {
            Schema::Flag(true) => value.clone(),
            Schema::Flag(false) => Value::Object(Map::new()),
            Schema::Fields(fields) => {
                let mut projected = Map::new();
                for (key, sub) in fields {
                    let Some(field) = object.get(key) else {
                        continue;
                    };
                    match sub {
                        Schema::Flag(false) => {}
                        Schema::Flag(true) => {
                            projected.insert(key.clone(), field.clone());
                        }
                        nested @ Schema::Fields(_) => {
                            projected.insert(key.clone(), nested.project(field));
                        }
                    }
                }
                Value::Object(projected)
            }
        }
    }

    /// Schema file location for `app`.
    pub fn path_for(dir: &Path, app: &str) -> PathBuf {
        dir.join(format!("{app}.json"))
    }

    /// Load the schema for `app`, falling back to [`Schema::include_all`]
    /// when the file is absent or unreadable.
    pub fn load(dir: &Path, app: &str) -> Self {
        let path = Self::path_for(dir, app);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "No schema file, comparing every field");
                return Schema::include_all();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Schema file unreadable, comparing every field");
                return Schema::include_all();
            }
        };

        match serde_json::from_str(&content) {
            Ok(schema) => {
                tracing::debug!(path = %path.display(), "Loaded schema");
                schema
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Schema file is not valid, comparing every field");
                Schema::include_all()
            }
        }
    }
}
