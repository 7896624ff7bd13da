//! Bundler adapter
//!
//! [`BundlerBackend`] is the seam between the pipeline and whatever turns a
//! [`BuildConfiguration`] into an artifact. [`NativeBundler`] is the shipped
//! backend: it walks the module graph from the entry, compiles every module,
//! syntax-checks the results and writes a single self-contained `index.js`
//! (plus `index.css` and emitted assets).

mod graph;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{BuildConfiguration, Profile};
use crate::resolver::{Resolution, Resolver};
use crate::runtime::{QuickJsRuntime, ScriptRuntime, ARTIFACT_EXPORTS_GLOBAL, HOST_REQUIRE_GLOBAL};
use crate::transform::{minify_script, Compiled, Transformer};
use crate::utils::{format_size, path_to_module_id, relative_path};

pub use graph::{Module, ModuleGraph, ModuleId, ModuleType};

/// Quiet period before a burst of file changes triggers a rebuild
pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(200);

/// Production artifacts above this size get a performance warning
pub const ARTIFACT_SIZE_HINT: usize = 244 * 1024;

/// File patterns whose changes trigger a rebuild
const WATCHED_PATTERNS: &[&str] = &[
    "**/*.{js,jsx,ts,tsx,mjs,cjs,json}",
    "**/*.{css,less}",
    "**/*.{jpg,jpeg,png,gif,ico,svg,woff,woff2,eot,ttf}",
];

/// Failures of the bundler itself, as opposed to problems in the project
/// being built (those are reported in [`BuildResult::errors`])
#[derive(Debug, Error)]
pub enum BundlerError {
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("invalid watch pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("bundler task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Outcome of one bundling pass
#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    /// Problems in the project; nothing was written when non-empty
    pub errors: Vec<String>,

    pub warnings: Vec<String>,

    /// Files written by this pass
    pub bundles: Vec<BundleInfo>,

    pub duration: Duration,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Information about a written file
#[derive(Debug, Clone, PartialEq)]
pub struct BundleInfo {
    /// Output file path
    pub output_path: PathBuf,

    /// Size in bytes
    pub size: usize,
}

/// Drives the passes of a watch session
#[async_trait]
pub trait BuildObserver: Send {
    /// Configuration for the next rebuild, derived afresh from the project.
    /// `None` skips the pass; the observer has already reported why.
    fn configure(&mut self) -> Option<BuildConfiguration>;

    /// Receives the result of every pass
    async fn on_result(&mut self, result: BuildResult);
}

/// Produces the JavaScript artifact for a build configuration
#[async_trait]
pub trait BundlerBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Run one pass
    async fn run(&self, config: &BuildConfiguration) -> Result<BuildResult, BundlerError>;

    /// Build with `config`, then rebuild on every relevant change under the
    /// source directory with a configuration fetched from `observer`,
    /// reporting each pass back to it. Returns only on failure of the
    /// watcher itself.
    async fn watch(
        &self,
        config: BuildConfiguration,
        observer: &mut dyn BuildObserver,
    ) -> Result<(), BundlerError>;
}

/// The built-in bundler
#[derive(Debug, Clone, Default)]
pub struct NativeBundler;

impl NativeBundler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BundlerBackend for NativeBundler {
    fn name(&self) -> &str {
        "native"
    }

    async fn run(&self, config: &BuildConfiguration) -> Result<BuildResult, BundlerError> {
        let config = Arc::new(config.clone());
        tokio::task::spawn_blocking(move || Bundler::new(config).build()).await?
    }

    async fn watch(
        &self,
        config: BuildConfiguration,
        observer: &mut dyn BuildObserver,
    ) -> Result<(), BundlerError> {
        let filter = WatchFilter::new(&config)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(WATCH_DEBOUNCE, move |result: DebounceEventResult| {
            // The receiver only goes away when watching stops
            let _ = tx.send(result);
        })
        .map_err(|source| BundlerError::Watch {
            path: config.source_dir.clone(),
            source,
        })?;

        debouncer
            .watcher()
            .watch(&config.source_dir, RecursiveMode::Recursive)
            .map_err(|source| BundlerError::Watch {
                path: config.source_dir.clone(),
                source,
            })?;

        info!("Watching {} for changes", config.source_dir.display());

        let result = self.run(&config).await?;
        observer.on_result(result).await;

        while let Some(events) = rx.recv().await {
            let events = match events {
                Ok(events) => events,
                Err(e) => {
                    error!("Watch error: {:?}", e);
                    continue;
                }
            };

            let changed: Vec<PathBuf> = events
                .into_iter()
                .map(|event| event.path)
                .filter(|path| filter.is_relevant(path))
                .collect();

            let Some(first) = changed.first() else {
                continue;
            };
            info!(
                "File changed: {}{}",
                relative_path(&config.source_dir, first).unwrap_or_else(|| first.display().to_string()),
                if changed.len() > 1 {
                    format!(" (+{} more)", changed.len() - 1)
                } else {
                    String::new()
                }
            );

            let Some(next) = observer.configure() else {
                continue;
            };
            match self.run(&next).await {
                Ok(result) => observer.on_result(result).await,
                Err(e) => error!("Rebuild failed: {}", e),
            }
        }

        Ok(())
    }
}

/// Decides which changed paths trigger a rebuild
struct WatchFilter {
    source_dir: PathBuf,
    output_dir: PathBuf,
    patterns: GlobSet,
}

impl WatchFilter {
    fn new(config: &BuildConfiguration) -> Result<Self, BundlerError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in WATCHED_PATTERNS {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            source_dir: config.source_dir.clone(),
            output_dir: config.output_dir.clone(),
            patterns: builder.build()?,
        })
    }

    fn is_relevant(&self, path: &Path) -> bool {
        if path.starts_with(&self.output_dir) {
            return false;
        }

        let relative = path.strip_prefix(&self.source_dir).unwrap_or(path);
        let hidden_or_installed = relative.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            name.starts_with('.') || name == "node_modules"
        });

        !hidden_or_installed && self.patterns.is_match(relative)
    }
}

/// State of one bundling pass
struct Bundler {
    config: Arc<BuildConfiguration>,
    /// Canonical project directory module names are relative to
    root: PathBuf,
    resolver: Resolver,
    transformer: Transformer,
    graph: RwLock<ModuleGraph>,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Bundler {
    fn new(config: Arc<BuildConfiguration>) -> Self {
        Self {
            root: fs::canonicalize(&config.source_dir).unwrap_or_else(|_| config.source_dir.clone()),
            resolver: Resolver::new(config.clone()),
            transformer: Transformer::new(config.clone()),
            config,
            graph: RwLock::new(ModuleGraph::new()),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn build(mut self) -> Result<BuildResult, BundlerError> {
        let start = Instant::now();

        // 1. Build the module graph from the entry
        info!("Building module graph...");
        let entry_path = self.config.entry_path();
        let entry = self.process_module(&entry_path, true);
        let Some(entry) = entry else {
            if self.errors.is_empty() {
                self.errors.push(format!(
                    "Module not found: Error: Can't resolve '{}' in '{}'",
                    self.config.entry,
                    self.config.source_dir.display()
                ));
            }
            return Ok(self.finish(Vec::new(), start));
        };

        // 2. Link and syntax-check every module
        let linked = self.link_modules();

        if !self.errors.is_empty() {
            return Ok(self.finish(Vec::new(), start));
        }

        // 3. Write outputs
        info!("Writing bundles...");
        let bundles = self.write_outputs(entry, &linked)?;

        debug!("Build completed in {:?}", start.elapsed());

        Ok(self.finish(bundles, start))
    }

    fn finish(self, bundles: Vec<BundleInfo>, start: Instant) -> BuildResult {
        BuildResult {
            errors: self.errors,
            warnings: self.warnings,
            bundles,
            duration: start.elapsed(),
        }
    }

    /// Stable id for a module: its path relative to the project directory
    fn module_name(&self, path: &Path) -> String {
        relative_path(&self.root, path)
            .map(|p| path_to_module_id(Path::new(&p)))
            .unwrap_or_else(|| path_to_module_id(path))
    }

    /// Add a module and, depth first, everything it requires
    fn process_module(&mut self, path: &Path, is_entry: bool) -> Option<ModuleId> {
        let canonical_path = fs::canonicalize(path).ok()?;

        if let Some(id) = self.graph.read().get_module_id(&canonical_path) {
            return Some(id);
        }

        let module_type = ModuleType::from_path(&canonical_path);
        let name = self.module_name(&canonical_path);

        let compiled = match self.transformer.compile(&canonical_path, &name, &module_type) {
            Ok(compiled) => compiled,
            Err(e) => {
                self.errors.push(format!("Module build failed ({name}): {e:#}"));
                Compiled {
                    code: String::new(),
                    style: None,
                    assets: Vec::new(),
                }
            }
        };

        let dependencies = self.resolver.extract_dependencies(&compiled.code);

        let module_id = self.graph.write().add_module(Module {
            path: canonical_path.clone(),
            name: name.clone(),
            module_type,
            is_entry,
            dependencies: dependencies.clone(),
            resolutions: Vec::new(),
            compiled,
        });

        let mut resolutions = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            let resolved = match self.resolver.resolve(&dep, &canonical_path) {
                Ok(resolved) => resolved,
                Err(e) => {
                    self.errors.push(format!("Module not found ({name}): {e:#}"));
                    continue;
                }
            };

            match resolved {
                Some(Resolution::Module(dep_path)) => {
                    if let Some(dep_id) = self.process_module(&dep_path, false) {
                        let mut graph = self.graph.write();
                        graph.add_dependency(module_id, dep_id);
                        if let Some(dep_module) = graph.get_module(dep_id) {
                            resolutions.push((dep, Resolution::Module(dep_module.path.clone())));
                        }
                    }
                }
                Some(external @ Resolution::External(_)) => resolutions.push((dep, external)),
                None => {
                    let dir = canonical_path.parent().unwrap_or(Path::new("."));
                    self.errors.push(format!(
                        "Module not found: Error: Can't resolve '{}' in '{}'",
                        dep,
                        dir.display()
                    ));
                }
            }
        }

        if let Some(module) = self.graph.write().get_module_mut(module_id) {
            module.resolutions = resolutions;
        }

        Some(module_id)
    }

    /// Rewrite requires to module ids and syntax-check the results
    fn link_modules(&mut self) -> Vec<String> {
        let graph = self.graph.read();
        let mut linked = Vec::with_capacity(graph.len());

        let mut runtime = match QuickJsRuntime::new() {
            Ok(runtime) => Some(runtime),
            Err(e) => {
                self.warnings.push(format!("Syntax check skipped: {e}"));
                None
            }
        };

        for module in graph.modules() {
            let code = self.resolver.rewrite_requires(&module.compiled.code, |specifier| {
                let (_, resolution) = module.resolutions.iter().find(|(dep, _)| dep == specifier)?;
                let target = match resolution {
                    Resolution::Module(path) => {
                        let id = graph.get_module_id(path)?;
                        format!("__require__({})", quote(&graph.get_module(id)?.name))
                    }
                    Resolution::External(name) => format!("__host_require__({})", quote(name)),
                };
                Some(target)
            });

            if let Some(runtime) = runtime.as_mut() {
                if let Err(e) = runtime.check_syntax(&code) {
                    self.errors.push(format!("Module parse failed ({}): {}", module.name, e));
                }
            }

            linked.push(code);
        }

        linked
    }

    fn write_outputs(&mut self, entry: ModuleId, linked: &[String]) -> Result<Vec<BundleInfo>, BundlerError> {
        let graph = self.graph.read();
        let output_dir = &self.config.output_dir;

        fs::create_dir_all(output_dir).map_err(|source| BundlerError::Write {
            path: output_dir.clone(),
            source,
        })?;

        let mut bundles = Vec::new();

        // JavaScript artifact
        let mut artifact = render_artifact(&graph, entry, linked);
        if self.config.minify {
            artifact = minify_script(&artifact);
        }
        bundles.push(write_file(&self.config.artifact_path(), artifact.as_bytes())?);

        if self.config.profile == Profile::Production && artifact.len() > ARTIFACT_SIZE_HINT {
            self.warnings.push(format!(
                "asset size limit: {} ({}) exceeds the recommended limit ({})",
                self.config.filename,
                format_size(artifact.len()),
                format_size(ARTIFACT_SIZE_HINT)
            ));
        }

        // Stylesheets in evaluation order
        let order = graph.evaluation_order(entry);
        let styles: Vec<&str> = order
            .iter()
            .filter_map(|&id| graph.get_module(id))
            .filter_map(|m| m.compiled.style.as_ref())
            .map(|s| s.css.as_str())
            .filter(|css| !css.trim().is_empty())
            .collect();

        let stylesheet_path = self.config.stylesheet_path();
        if styles.is_empty() {
            remove_stale(&stylesheet_path);
        } else {
            let separator = if self.config.minify { "" } else { "\n" };
            bundles.push(write_file(&stylesheet_path, styles.join(separator).as_bytes())?);
        }

        // Emitted assets
        for module in graph.modules() {
            for asset in &module.compiled.assets {
                let path = output_dir.join(&asset.file_name);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|source| BundlerError::Write {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                bundles.push(write_file(&path, &asset.contents)?);
            }
        }

        // Style variables nobody declares
        for name in self.config.style_variables.keys() {
            let name = name.trim_start_matches('@');
            let declared = graph
                .modules()
                .filter_map(|m| m.compiled.style.as_ref())
                .any(|s| s.variables.iter().any(|v| v == name));
            if !declared {
                self.warnings
                    .push(format!("Style variable '@{name}' is not declared by any stylesheet"));
            }
        }

        Ok(bundles)
    }
}

fn quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn write_file(path: &Path, contents: &[u8]) -> Result<BundleInfo, BundlerError> {
    fs::write(path, contents).map_err(|source| BundlerError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(BundleInfo {
        output_path: path.to_path_buf(),
        size: contents.len(),
    })
}

fn remove_stale(path: &Path) {
    if path.is_file() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove stale {}: {}", path.display(), e);
        }
    }
}

/// Assemble the artifact: one IIFE holding every module, evaluating to the
/// entry module's exports.
fn render_artifact(graph: &ModuleGraph, entry: ModuleId, linked: &[String]) -> String {
    let mut out = String::new();

    out.push_str(&format!("var {ARTIFACT_EXPORTS_GLOBAL} = (function (__host_require__) {{\n"));
    out.push_str("  var __modules__ = {};\n");

    for (module, code) in graph.modules().zip(linked) {
        out.push_str(&format!("\n  // {}\n", module.name));
        out.push_str(&format!(
            "  __modules__[{}] = function (module, exports, require) {{\n",
            quote(&module.name)
        ));
        for line in code.lines() {
            out.push_str("    ");
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("  };\n");
    }

    let entry_name = graph.get_module(entry).map(|m| m.name.as_str()).unwrap_or_default();

    out.push_str(&format!(
        r#"
  var __cache__ = {{}};

  function __require__(id) {{
    var cached = __cache__[id];
    if (cached) return cached.exports;
    var module = (__cache__[id] = {{ exports: {{}} }});
    __modules__[id].call(module.exports, module, module.exports, __require__);
    return module.exports;
  }}

  function __default__(m) {{
    return m && m.__esModule ? m["default"] : m;
  }}

  function __export_star__(target, source) {{
    Object.keys(source).forEach(function (key) {{
      if (key !== "default" && !Object.prototype.hasOwnProperty.call(target, key)) {{
        target[key] = source[key];
      }}
    }});
  }}

  return __require__({entry});
}})(typeof {host} === "function" ? {host} : function (name) {{
  throw new Error("Host library '" + name + "' is not available");
}});
"#,
        entry = quote(entry_name),
        host = HOST_REQUIRE_GLOBAL,
    ));

    out
}
