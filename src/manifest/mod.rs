//! Manifest values produced by component discovery
//!
//! Component manifests are arbitrary structured data that may embed
//! function values. `ManifestValue` keeps functions as a distinct variant so
//! they are never confused with ordinary strings while in memory; the
//! string tagging only exists in the on-disk form (see [`codec`]).

pub mod codec;

use std::fmt;

use indexmap::IndexMap;
use serde_json::{Number, Value};

use crate::config::ProjectManifest;

/// Source text of a function value embedded in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSource(String);

impl FunctionSource {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A structured manifest value
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<ManifestValue>),
    /// Object with keys kept in insertion order
    Object(IndexMap<String, ManifestValue>),
    /// Executable hook, carried as its source text
    Function(FunctionSource),
}

impl ManifestValue {
    pub fn is_object(&self) -> bool {
        matches!(self, ManifestValue::Object(_))
    }

    /// Look up a key on an object value
    pub fn get(&self, key: &str) -> Option<&ManifestValue> {
        match self {
            ManifestValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ManifestValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionSource> {
        match self {
            ManifestValue::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Convert plain JSON into a manifest value.
    ///
    /// No function detection happens here; strings stay strings.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => ManifestValue::Null,
            Value::Bool(b) => ManifestValue::Bool(b),
            Value::Number(n) => ManifestValue::Number(n),
            Value::String(s) => ManifestValue::String(s),
            Value::Array(items) => {
                ManifestValue::Array(items.into_iter().map(Self::from_json).collect())
            }
            Value::Object(map) => ManifestValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Count the function values nested anywhere in this value
    pub fn function_count(&self) -> usize {
        match self {
            ManifestValue::Function(_) => 1,
            ManifestValue::Array(items) => items.iter().map(Self::function_count).sum(),
            ManifestValue::Object(map) => map.values().map(Self::function_count).sum(),
            _ => 0,
        }
    }
}

impl From<&str> for ManifestValue {
    fn from(s: &str) -> Self {
        ManifestValue::String(s.to_string())
    }
}

impl From<String> for ManifestValue {
    fn from(s: String) -> Self {
        ManifestValue::String(s)
    }
}

impl From<bool> for ManifestValue {
    fn from(b: bool) -> Self {
        ManifestValue::Bool(b)
    }
}

impl From<i64> for ManifestValue {
    fn from(n: i64) -> Self {
        ManifestValue::Number(n.into())
    }
}

impl From<FunctionSource> for ManifestValue {
    fn from(f: FunctionSource) -> Self {
        ManifestValue::Function(f)
    }
}

/// Where a component's manifest was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestSource {
    /// A `manifest` property on the exported binding itself
    Static,
    /// A `manifest` property on a fresh instance of the exported class
    Instance,
}

/// One discovered component
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDescriptor {
    /// Name of the export the component was found under
    pub export_name: String,

    pub source: ManifestSource,

    /// The component's self-described manifest fragment
    pub manifest: ManifestValue,
}

/// The manifest written next to the build artifact
#[derive(Debug, Clone, PartialEq)]
pub struct OutputManifest {
    pub id: String,
    pub version: String,
    pub name: String,
    pub description: String,
    pub components: Vec<ManifestValue>,
}

impl OutputManifest {
    /// Combine project metadata with discovered components, keeping
    /// discovery order.
    pub fn new(project: &ProjectManifest, components: Vec<ComponentDescriptor>) -> Self {
        Self {
            id: project.id.clone(),
            version: project.version.clone(),
            name: project.name.clone(),
            description: project.description.clone(),
            components: components.into_iter().map(|c| c.manifest).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_keeps_key_order() {
        let value = ManifestValue::from_json(json!({"z": 1, "a": 2, "m": 3}));
        let ManifestValue::Object(map) = value else {
            panic!("expected object");
        };
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn test_from_json_never_tags_functions() {
        let value = ManifestValue::from_json(json!("/Function(function () {})/"));
        assert_eq!(value.as_function(), None);
    }

    #[test]
    fn test_function_count() {
        let mut map = IndexMap::new();
        map.insert("type".to_string(), ManifestValue::from("button"));
        map.insert(
            "onClick".to_string(),
            FunctionSource::new("function () { return 1; }").into(),
        );
        map.insert(
            "hooks".to_string(),
            ManifestValue::Array(vec![FunctionSource::new("() => 2").into()]),
        );
        assert_eq!(ManifestValue::Object(map).function_count(), 2);
    }
}
