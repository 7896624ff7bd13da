//! Component discovery
//!
//! Evaluates a built artifact and collects the manifest every exported
//! component describes itself with. A `manifest` property on the export
//! itself wins; otherwise constructible exports are instantiated once and
//! the instance's `manifest` is used. Exports that yield neither are
//! reported as warnings, never as errors.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

use crate::manifest::{ComponentDescriptor, ManifestSource, ManifestValue};
use crate::runtime::{RuntimeError, ScriptRuntime};

/// Failures that make a whole discovery pass unusable
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read artifact {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to load artifact {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: RuntimeError,
    },
}

/// Components found in an artifact, in export order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    pub components: Vec<ComponentDescriptor>,
    pub warnings: Vec<String>,
}

/// Load the artifact at `artifact_path` into `runtime` and read every
/// export's manifest.
pub fn discover(artifact_path: &Path, runtime: &mut dyn ScriptRuntime) -> Result<Discovery, DiscoveryError> {
    let source = fs::read_to_string(artifact_path).map_err(|source| DiscoveryError::Read {
        path: artifact_path.to_path_buf(),
        source,
    })?;

    let exports = runtime
        .load_module(&source, artifact_path)
        .map_err(|source| DiscoveryError::Load {
            path: artifact_path.to_path_buf(),
            source,
        })?;

    debug!("Artifact exports {} binding(s)", exports.len());

    let mut discovery = Discovery::default();
    for export in exports {
        match inspect(&export, runtime) {
            Ok((source, manifest)) => {
                trace!("Export '{}' provides a {:?} manifest", export, source);
                discovery.components.push(ComponentDescriptor {
                    export_name: export,
                    source,
                    manifest,
                });
            }
            Err(reason) => discovery.warnings.push(format!("Export '{export}' skipped: {reason}")),
        }
    }

    Ok(discovery)
}

/// Find the manifest for one export, or the reason there is none
fn inspect(export: &str, runtime: &mut dyn ScriptRuntime) -> Result<(ManifestSource, ManifestValue), String> {
    match runtime.static_manifest(export) {
        Ok(Some(manifest)) if manifest.is_object() => return Ok((ManifestSource::Static, manifest)),
        Ok(Some(_)) => return Err("static manifest is not an object".to_string()),
        Ok(None) => {}
        Err(e) => return Err(format!("reading its manifest threw: {e}")),
    }

    let constructible = runtime
        .is_constructor(export)
        .map_err(|e| format!("inspecting it threw: {e}"))?;
    if !constructible {
        return Err("it is not a component (no manifest)".to_string());
    }

    match runtime.instance_manifest(export) {
        Ok(Some(manifest)) if manifest.is_object() => Ok((ManifestSource::Instance, manifest)),
        Ok(Some(_)) => Err("instance manifest is not an object".to_string()),
        Ok(None) => Err("it is not a component (no manifest)".to_string()),
        Err(e) => Err(format!("instantiating it threw: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FunctionSource;
    use crate::runtime::{FunctionHandle, QuickJsRuntime};
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    /// How a fake export behaves
    #[derive(Clone)]
    enum Fake {
        Static(ManifestValue),
        Instance(ManifestValue),
        Plain,
        ThrowingConstructor,
    }

    struct FakeRuntime {
        exports: Vec<(String, Fake)>,
        instantiated: Vec<String>,
    }

    impl FakeRuntime {
        fn new(exports: &[(&str, Fake)]) -> Self {
            Self {
                exports: exports.iter().map(|(n, f)| (n.to_string(), f.clone())).collect(),
                instantiated: Vec::new(),
            }
        }

        fn get(&self, name: &str) -> Result<&Fake, RuntimeError> {
            self.exports
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, f)| f)
                .ok_or_else(|| RuntimeError::UnknownExport(name.to_string()))
        }
    }

    impl ScriptRuntime for FakeRuntime {
        fn load_module(&mut self, _source: &str, _origin: &Path) -> Result<Vec<String>, RuntimeError> {
            Ok(self.exports.iter().map(|(n, _)| n.clone()).collect())
        }

        fn static_manifest(&mut self, export: &str) -> Result<Option<ManifestValue>, RuntimeError> {
            Ok(match self.get(export)? {
                Fake::Static(m) => Some(m.clone()),
                _ => None,
            })
        }

        fn is_constructor(&mut self, export: &str) -> Result<bool, RuntimeError> {
            Ok(!matches!(self.get(export)?, Fake::Plain))
        }

        fn instance_manifest(&mut self, export: &str) -> Result<Option<ManifestValue>, RuntimeError> {
            self.instantiated.push(export.to_string());
            match self.get(export)? {
                Fake::Instance(m) => Ok(Some(m.clone())),
                Fake::ThrowingConstructor => Err(RuntimeError::Exception("Error: boom".to_string())),
                _ => Ok(None),
            }
        }

        fn compile_function(&mut self, _source: &FunctionSource) -> Result<FunctionHandle, RuntimeError> {
            unimplemented!()
        }

        fn call_function(
            &mut self,
            _function: FunctionHandle,
            _args: &[ManifestValue],
        ) -> Result<ManifestValue, RuntimeError> {
            unimplemented!()
        }

        fn check_syntax(&mut self, _code: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    fn manifest(kind: &str) -> ManifestValue {
        let mut map = IndexMap::new();
        map.insert("type".to_string(), ManifestValue::from(kind));
        ManifestValue::Object(map)
    }

    fn artifact(content: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.js");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_static_manifest_wins_without_instantiation() {
        let (_dir, path) = artifact("");
        let mut runtime = FakeRuntime::new(&[("Button", Fake::Static(manifest("button")))]);

        let discovery = discover(&path, &mut runtime).unwrap();
        assert_eq!(discovery.components.len(), 1);
        assert_eq!(discovery.components[0].source, ManifestSource::Static);
        assert!(runtime.instantiated.is_empty());
    }

    #[test]
    fn test_order_and_warnings() {
        let (_dir, path) = artifact("");
        let mut runtime = FakeRuntime::new(&[
            ("B", Fake::Instance(manifest("b"))),
            ("helper", Fake::Plain),
            ("A", Fake::Static(manifest("a"))),
            ("Broken", Fake::ThrowingConstructor),
        ]);

        let discovery = discover(&path, &mut runtime).unwrap();
        let names: Vec<&str> = discovery.components.iter().map(|c| c.export_name.as_str()).collect();
        assert_eq!(names, ["B", "A"]);
        assert_eq!(discovery.components[0].source, ManifestSource::Instance);
        assert_eq!(discovery.warnings.len(), 2);
        assert!(discovery.warnings[0].starts_with("Export 'helper' skipped"));
        assert!(discovery.warnings[1].contains("Error: boom"));
    }

    #[test]
    fn test_non_object_manifest_is_a_warning() {
        let (_dir, path) = artifact("");
        let mut runtime = FakeRuntime::new(&[("X", Fake::Static(ManifestValue::from("nope")))]);

        let discovery = discover(&path, &mut runtime).unwrap();
        assert!(discovery.components.is_empty());
        assert_eq!(discovery.warnings, ["Export 'X' skipped: static manifest is not an object"]);
    }

    #[test]
    fn test_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let mut runtime = FakeRuntime::new(&[]);
        let err = discover(&dir.path().join("index.js"), &mut runtime).unwrap_err();
        assert!(matches!(err, DiscoveryError::Read { .. }));
    }

    #[test]
    fn test_discovers_real_artifact() {
        let (_dir, path) = artifact(
            r#"
var __extension_exports__ = (function (__host_require__) {
  var React = __host_require__("react");
  class Button extends React.Component {}
  Button.manifest = { type: "button", onClick: function (e) { return e; } };
  class Panel extends React.Component {
    constructor(props) { super(props); this.manifest = { type: "panel" }; }
  }
  return { Button: Button, Panel: Panel, VERSION: "1.0" };
})(__extension_require__);
"#,
        );
        let mut runtime = QuickJsRuntime::new().unwrap();

        let discovery = discover(&path, &mut runtime).unwrap();
        let names: Vec<&str> = discovery.components.iter().map(|c| c.export_name.as_str()).collect();
        assert_eq!(names, ["Button", "Panel"]);
        assert_eq!(discovery.components[0].manifest.function_count(), 1);
        let on_click = discovery.components[0]
            .manifest
            .get("onClick")
            .and_then(ManifestValue::as_function)
            .unwrap();
        assert_eq!(on_click.as_str(), "function (e) { return e; }");
        assert_eq!(discovery.components[1].source, ManifestSource::Instance);
        assert_eq!(discovery.warnings.len(), 1);
    }

    #[test]
    fn test_throwing_artifact_is_fatal() {
        let (_dir, path) = artifact("throw new Error('nope');");
        let mut runtime = QuickJsRuntime::new().unwrap();
        let err = discover(&path, &mut runtime).unwrap_err();
        assert!(matches!(err, DiscoveryError::Load { .. }));
    }
}
