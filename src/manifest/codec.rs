//! On-disk encoding of output manifests
//!
//! Manifests are written as pretty-printed JSON. A function value is written
//! as the string `/Function(<source>)/`. An ordinary string that happens to
//! have that shape gets one extra leading `/` on the way out and loses it on
//! the way back in, so decoding never mistakes data for code.
//!
//! # Trust boundary
//!
//! [`revive`] compiles the function sources it finds. It is meant for
//! manifests this tool wrote from its own build artifact; it must not be
//! pointed at manifests from anywhere else.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{FunctionSource, ManifestValue, OutputManifest};
use crate::runtime::{FunctionHandle, RuntimeError, ScriptRuntime};

/// `/Function(...)/` with one or more leading slashes
static TAGGED_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^(/+)Function\((.*)\)/$").unwrap());

/// Errors raised while encoding, decoding or reviving a manifest
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to compile function at {pointer}: {source}")]
    Compile {
        pointer: String,
        #[source]
        source: RuntimeError,
    },
}

#[derive(Serialize, Deserialize)]
struct RawManifest {
    id: String,
    version: String,
    name: String,
    description: String,
    components: Vec<Value>,
}

/// Encode a manifest to its text form
pub fn encode(manifest: &OutputManifest) -> Result<String, CodecError> {
    let raw = RawManifest {
        id: manifest.id.clone(),
        version: manifest.version.clone(),
        name: manifest.name.clone(),
        description: manifest.description.clone(),
        components: manifest.components.iter().map(encode_value).collect(),
    };

    let mut text = serde_json::to_string_pretty(&raw)?;
    text.push('\n');
    Ok(text)
}

/// Decode a manifest, restoring function values from their tagged form
pub fn decode(text: &str) -> Result<OutputManifest, CodecError> {
    let raw: RawManifest = serde_json::from_str(text)?;

    Ok(OutputManifest {
        id: raw.id,
        version: raw.version,
        name: raw.name,
        description: raw.description,
        components: raw.components.into_iter().map(decode_value).collect(),
    })
}

/// Encode a single value to JSON
pub fn encode_value(value: &ManifestValue) -> Value {
    match value {
        ManifestValue::Null => Value::Null,
        ManifestValue::Bool(b) => Value::Bool(*b),
        ManifestValue::Number(n) => Value::Number(n.clone()),
        ManifestValue::String(s) if TAGGED_FUNCTION.is_match(s) => Value::String(format!("/{s}")),
        ManifestValue::String(s) => Value::String(s.clone()),
        ManifestValue::Array(items) => Value::Array(items.iter().map(encode_value).collect()),
        ManifestValue::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), encode_value(v)))
                .collect(),
        ),
        ManifestValue::Function(f) => Value::String(format!("/Function({})/", f.as_str())),
    }
}

/// Decode a single JSON value
pub fn decode_value(value: Value) -> ManifestValue {
    match value {
        Value::String(s) => decode_string(s),
        Value::Array(items) => ManifestValue::Array(items.into_iter().map(decode_value).collect()),
        Value::Object(map) => ManifestValue::Object(
            map.into_iter()
                .map(|(k, v)| (k, decode_value(v)))
                .collect(),
        ),
        other => ManifestValue::from_json(other),
    }
}

fn decode_string(s: String) -> ManifestValue {
    let Some(caps) = TAGGED_FUNCTION.captures(&s) else {
        return ManifestValue::String(s);
    };

    if caps[1].len() == 1 {
        ManifestValue::Function(FunctionSource::new(&caps[2]))
    } else {
        ManifestValue::String(s[1..].to_string())
    }
}

/// A compiled function value inside a revived manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hook {
    /// Index of the component the function belongs to
    pub component: usize,

    /// JSON pointer of the function within the manifest
    pub pointer: String,

    pub function: FunctionHandle,
}

/// Compile every function value of a decoded manifest in `runtime`.
///
/// Hooks are returned in document order.
pub fn revive(
    manifest: &OutputManifest,
    runtime: &mut dyn ScriptRuntime,
) -> Result<Vec<Hook>, CodecError> {
    let mut hooks = Vec::new();

    for (index, component) in manifest.components.iter().enumerate() {
        let pointer = format!("/components/{index}");
        revive_value(component, index, pointer, runtime, &mut hooks)?;
    }

    Ok(hooks)
}

fn revive_value(
    value: &ManifestValue,
    component: usize,
    pointer: String,
    runtime: &mut dyn ScriptRuntime,
    hooks: &mut Vec<Hook>,
) -> Result<(), CodecError> {
    match value {
        ManifestValue::Function(source) => {
            let function = runtime
                .compile_function(source)
                .map_err(|source| CodecError::Compile {
                    pointer: pointer.clone(),
                    source,
                })?;
            hooks.push(Hook {
                component,
                pointer,
                function,
            });
        }
        ManifestValue::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                revive_value(item, component, format!("{pointer}/{i}"), runtime, hooks)?;
            }
        }
        ManifestValue::Object(map) => {
            for (key, item) in map {
                let escaped = key.replace('~', "~0").replace('/', "~1");
                revive_value(item, component, format!("{pointer}/{escaped}"), runtime, hooks)?;
            }
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::QuickJsRuntime;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    fn sample() -> OutputManifest {
        let mut button = IndexMap::new();
        button.insert("type".to_string(), ManifestValue::from("button"));
        button.insert("order".to_string(), ManifestValue::from(3));
        button.insert("enabled".to_string(), ManifestValue::from(true));
        button.insert(
            "onClick".to_string(),
            FunctionSource::new("function (event) { return event.id + 1; }").into(),
        );
        button.insert(
            "label".to_string(),
            ManifestValue::from("/Function(not code)/"),
        );

        OutputManifest {
            id: "ext1".to_string(),
            version: "1.0.0".to_string(),
            name: "Ext".to_string(),
            description: "d".to_string(),
            components: vec![
                ManifestValue::Object(button),
                ManifestValue::Array(vec![ManifestValue::Null]),
            ],
        }
    }

    #[test]
    fn test_encode_tags_functions() {
        let text = encode(&sample()).unwrap();
        assert!(text.contains(r#""onClick": "/Function(function (event) { return event.id + 1; })/""#));
        assert!(text.contains(r#""label": "//Function(not code)/""#));
    }

    #[test]
    fn test_decode_inverts_encode() {
        let manifest = sample();
        let decoded = decode(&encode(&manifest).unwrap()).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn test_escaping_nests() {
        let value = ManifestValue::from("//Function(x)/");
        assert_eq!(encode_value(&value), Value::String("///Function(x)/".to_string()));
        assert_eq!(decode_value(encode_value(&value)), value);
    }

    #[test]
    fn test_function_source_may_contain_delimiters() {
        let source = FunctionSource::new("function () { return \")/\" + '/Function('; }");
        let value = ManifestValue::Function(source.clone());
        assert_eq!(decode_value(encode_value(&value)).as_function(), Some(&source));
    }

    #[test]
    fn test_near_misses_stay_strings() {
        for s in ["Function(x)/", "/Function(x)", "/function(x)/", "a/Function(x)/"] {
            assert_eq!(decode_value(Value::String(s.to_string())), ManifestValue::from(s));
        }
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let err = decode(r#"{"id": "x", "components": []}"#).unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn test_encoded_field_order() {
        let text = encode(&sample()).unwrap();
        let positions: Vec<usize> = ["\"id\"", "\"version\"", "\"name\"", "\"description\"", "\"components\""]
            .iter()
            .map(|key| text.find(key).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_revived_functions_keep_behavior() {
        let decoded = decode(&encode(&sample()).unwrap()).unwrap();
        let mut runtime = QuickJsRuntime::new().unwrap();

        let hooks = revive(&decoded, &mut runtime).unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].component, 0);
        assert_eq!(hooks[0].pointer, "/components/0/onClick");

        let mut event = IndexMap::new();
        event.insert("id".to_string(), ManifestValue::from(41));
        let result = runtime
            .call_function(hooks[0].function, &[ManifestValue::Object(event)])
            .unwrap();
        assert_eq!(result, ManifestValue::from(42));
    }

    #[test]
    fn test_revive_reports_bad_source() {
        let mut manifest = sample();
        manifest.components = vec![ManifestValue::Array(vec![FunctionSource::new("not a function").into()])];
        let mut runtime = QuickJsRuntime::new().unwrap();

        let err = revive(&manifest, &mut runtime).unwrap_err();
        assert!(matches!(err, CodecError::Compile { ref pointer, .. } if pointer == "/components/0/0"));
    }
}
