//! Script runtime used to introspect build artifacts
//!
//! Component discovery needs to evaluate the freshly built `index.js`, walk
//! its export table and read manifests off the exported classes. That
//! capability sits behind [`ScriptRuntime`] so discovery and the manifest
//! codec never see engine details.

mod quickjs;

use std::path::Path;

use thiserror::Error;

use crate::manifest::{FunctionSource, ManifestValue};

pub use quickjs::QuickJsRuntime;

/// Global the artifact assigns its export table to
pub const ARTIFACT_EXPORTS_GLOBAL: &str = "__extension_exports__";

/// Global the artifact calls to obtain externalized libraries
pub const HOST_REQUIRE_GLOBAL: &str = "__extension_require__";

/// Errors raised by a script runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Script code threw; carries the stringified exception
    #[error("{0}")]
    Exception(String),

    /// `load_module` has not been called yet
    #[error("no module has been loaded")]
    NoModule,

    /// No export with this name exists in the loaded module
    #[error("module has no export named '{0}'")]
    UnknownExport(String),

    #[error("unknown function handle {0}")]
    UnknownFunction(usize),

    /// The engine itself failed outside of script code
    #[error("script engine failure: {0}")]
    Engine(String),
}

/// A function compiled inside a runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionHandle(pub(crate) usize);

impl FunctionHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Loads compiled modules and evaluates code on behalf of the pipeline
pub trait ScriptRuntime {
    /// Evaluate a built artifact and return its export names in declaration
    /// order. Replaces any previously loaded module.
    fn load_module(&mut self, source: &str, origin: &Path) -> Result<Vec<String>, RuntimeError>;

    /// Read the `manifest` property of an export without instantiating it.
    /// `Ok(None)` when the property is absent.
    fn static_manifest(&mut self, export: &str) -> Result<Option<ManifestValue>, RuntimeError>;

    /// Whether an export can be invoked with `new`
    fn is_constructor(&mut self, export: &str) -> Result<bool, RuntimeError>;

    /// Instantiate an export with no arguments and read the instance's
    /// `manifest` property.
    fn instance_manifest(&mut self, export: &str) -> Result<Option<ManifestValue>, RuntimeError>;

    /// Compile function source text into a callable value
    fn compile_function(&mut self, source: &FunctionSource) -> Result<FunctionHandle, RuntimeError>;

    /// Call a compiled function with plain arguments
    fn call_function(
        &mut self,
        function: FunctionHandle,
        args: &[ManifestValue],
    ) -> Result<ManifestValue, RuntimeError>;

    /// Parse `code` as a function body without running it
    fn check_syntax(&mut self, code: &str) -> Result<(), RuntimeError>;
}
