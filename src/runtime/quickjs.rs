//! [`ScriptRuntime`] backed by the QuickJS engine

use std::path::Path;

use rquickjs::{CatchResultExt, Context, Runtime};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, trace};

use super::{FunctionHandle, RuntimeError, ScriptRuntime};
use crate::manifest::codec::encode_value;
use crate::manifest::{FunctionSource, ManifestValue};

const PRELUDE: &str = include_str!("prelude.js");

/// Reply of the prelude's `capture` bridge
#[derive(Deserialize)]
struct Outcome<T> {
    ok: bool,
    value: Option<T>,
    error: Option<String>,
}

/// Typed description of a script value, as produced by the prelude
#[derive(Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
enum Node {
    Undefined,
    Null,
    Bool(bool),
    Num(serde_json::Number),
    Str(String),
    Fn(String),
    Arr(Vec<Node>),
    Obj(Vec<(String, Node)>),
}

impl Node {
    fn into_value(self) -> Option<ManifestValue> {
        let value = match self {
            Node::Undefined => return None,
            Node::Null => ManifestValue::Null,
            Node::Bool(b) => ManifestValue::Bool(b),
            Node::Num(n) => ManifestValue::Number(n),
            Node::Str(s) => ManifestValue::String(s),
            Node::Fn(source) => ManifestValue::Function(FunctionSource::new(source)),
            Node::Arr(items) => ManifestValue::Array(
                items
                    .into_iter()
                    .map(|item| item.into_value().unwrap_or(ManifestValue::Null))
                    .collect(),
            ),
            Node::Obj(entries) => ManifestValue::Object(
                entries
                    .into_iter()
                    .filter_map(|(key, node)| node.into_value().map(|value| (key, value)))
                    .collect(),
            ),
        };
        Some(value)
    }
}

/// Quote `s` as a script string literal
fn literal(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// In-process JavaScript runtime.
///
/// Each instance owns its own realm; nothing leaks between instances, so the
/// pipeline creates a fresh one per build pass.
pub struct QuickJsRuntime {
    context: Context,
    // Dropped after `context`.
    _runtime: Runtime,
    exports: Option<Vec<String>>,
    functions: usize,
}

impl QuickJsRuntime {
    pub fn new() -> Result<Self, RuntimeError> {
        let runtime = Runtime::new().map_err(|e| RuntimeError::Engine(e.to_string()))?;
        let context = Context::full(&runtime).map_err(|e| RuntimeError::Engine(e.to_string()))?;
        context.with(|ctx| {
            ctx.eval::<(), _>(PRELUDE)
                .catch(&ctx)
                .map_err(|e| RuntimeError::Engine(e.to_string()))
        })?;

        Ok(Self {
            context,
            _runtime: runtime,
            exports: None,
            functions: 0,
        })
    }

    /// Run `body` through the prelude's `capture` bridge.
    ///
    /// With `plain` the return value is passed through `JSON.stringify`
    /// as-is; otherwise it is described as a [`Node`] tree.
    fn capture<T: DeserializeOwned>(
        &mut self,
        body: &str,
        plain: bool,
    ) -> Result<Option<T>, RuntimeError> {
        let script = format!("__extension_host__.capture(function () {{ {body} }}, {plain});");

        let text = self.context.with(|ctx| {
            ctx.eval::<String, _>(script)
                .catch(&ctx)
                .map_err(|e| RuntimeError::Engine(e.to_string()))
        })?;

        let outcome: Outcome<T> = serde_json::from_str(&text)
            .map_err(|e| RuntimeError::Engine(format!("malformed host reply: {e}")))?;

        if outcome.ok {
            Ok(outcome.value)
        } else {
            Err(RuntimeError::Exception(
                outcome.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }

    fn describe(&mut self, body: &str) -> Result<Option<ManifestValue>, RuntimeError> {
        Ok(self
            .capture::<Node>(body, false)?
            .and_then(Node::into_value))
    }

    fn check_export(&self, export: &str) -> Result<(), RuntimeError> {
        match &self.exports {
            None => Err(RuntimeError::NoModule),
            Some(names) if names.iter().any(|n| n == export) => Ok(()),
            Some(_) => Err(RuntimeError::UnknownExport(export.to_string())),
        }
    }
}

impl ScriptRuntime for QuickJsRuntime {
    fn load_module(&mut self, source: &str, origin: &Path) -> Result<Vec<String>, RuntimeError> {
        debug!("Evaluating module {}", origin.display());
        self.exports = None;

        let body = format!("return __extension_host__.load({});", literal(source));
        let names: Vec<String> = self.capture(&body, true)?.unwrap_or_default();

        trace!("Module exports: {:?}", names);
        self.exports = Some(names.clone());
        Ok(names)
    }

    fn static_manifest(&mut self, export: &str) -> Result<Option<ManifestValue>, RuntimeError> {
        self.check_export(export)?;
        self.describe(&format!(
            "return __extension_host__.staticManifest({});",
            literal(export)
        ))
    }

    fn is_constructor(&mut self, export: &str) -> Result<bool, RuntimeError> {
        self.check_export(export)?;
        let body = format!("return __extension_host__.isConstructor({});", literal(export));
        Ok(self.capture::<bool>(&body, true)?.unwrap_or(false))
    }

    fn instance_manifest(&mut self, export: &str) -> Result<Option<ManifestValue>, RuntimeError> {
        self.check_export(export)?;
        self.describe(&format!(
            "return __extension_host__.instanceManifest({});",
            literal(export)
        ))
    }

    fn compile_function(&mut self, source: &FunctionSource) -> Result<FunctionHandle, RuntimeError> {
        let body = format!("return __extension_host__.compile({});", literal(source.as_str()));
        let index: usize = self
            .capture(&body, true)?
            .ok_or_else(|| RuntimeError::Engine("compile returned no handle".to_string()))?;

        self.functions = self.functions.max(index + 1);
        Ok(FunctionHandle(index))
    }

    fn call_function(
        &mut self,
        function: FunctionHandle,
        args: &[ManifestValue],
    ) -> Result<ManifestValue, RuntimeError> {
        if function.0 >= self.functions {
            return Err(RuntimeError::UnknownFunction(function.0));
        }

        let args = serde_json::Value::Array(args.iter().map(encode_value).collect());
        let body = format!(
            "return __extension_host__.call({}, JSON.parse({}));",
            function.0,
            literal(&args.to_string())
        );
        Ok(self.describe(&body)?.unwrap_or(ManifestValue::Null))
    }

    fn check_syntax(&mut self, code: &str) -> Result<(), RuntimeError> {
        let body = format!("return __extension_host__.checkSyntax({});", literal(code));
        self.capture::<bool>(&body, true).map(|_| ())
    }
}
