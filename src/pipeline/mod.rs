//! Pipeline orchestration
//!
//! One pass loads the project manifest, derives a build configuration,
//! runs the bundler backend, discovers components in the fresh artifact and
//! writes the output manifest next to it. Watch mode repeats everything
//! after the build for each result the backend delivers.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::bundler::{BuildObserver, BuildResult, BundleInfo, BundlerBackend};
use crate::config::{BuildConfiguration, BuildOptions, ProjectManifest};
use crate::discovery::{discover, DiscoveryError};
use crate::error::{PipelineError, Result};
use crate::manifest::codec::encode;
use crate::manifest::{ComponentDescriptor, OutputManifest};
use crate::runtime::QuickJsRuntime;

/// Where a pass currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Loading,
    Configuring,
    Building,
    Discovering,
    Serializing,
    Done,
    Reporting,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Loading => "loading",
            PipelineState::Configuring => "configuring",
            PipelineState::Building => "building",
            PipelineState::Discovering => "discovering",
            PipelineState::Serializing => "serializing",
            PipelineState::Done => "done",
            PipelineState::Reporting => "reporting",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful pass
#[derive(Debug, Clone)]
pub struct PassReport {
    /// The output manifest that was written
    pub manifest_path: PathBuf,

    pub components: Vec<ComponentDescriptor>,

    /// Files the bundler wrote
    pub bundles: Vec<BundleInfo>,

    /// Bundler and discovery warnings, in that order
    pub warnings: Vec<String>,

    pub duration: Duration,
}

/// Drives build passes against a bundler backend
pub struct Pipeline {
    options: BuildOptions,
    backend: Arc<dyn BundlerBackend>,
    state: Mutex<PipelineState>,
}

impl Pipeline {
    pub fn new(options: BuildOptions, backend: Arc<dyn BundlerBackend>) -> Self {
        Self {
            options,
            backend,
            state: Mutex::new(PipelineState::Idle),
        }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// State reached by the most recent pass
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    fn transition(&self, next: PipelineState) {
        let mut state = self.state.lock();
        debug!("Pipeline {} -> {}", *state, next);
        *state = next;
    }

    fn fail(&self, error: PipelineError) -> PipelineError {
        self.transition(PipelineState::Reporting);
        self.transition(PipelineState::Failed);
        error
    }

    /// Run a single pass
    pub async fn run(&self) -> Result<PassReport> {
        let start = Instant::now();
        self.transition(PipelineState::Idle);

        let (project, config) = self.configure().map_err(|e| self.fail(e))?;

        self.transition(PipelineState::Building);
        info!("Bundling with the {} backend", self.backend.name());
        let result = self.backend.run(&config).await.map_err(|e| self.fail(e.into()))?;

        let mut report = self
            .complete(&project, &config, result)
            .await
            .map_err(|e| self.fail(e))?;
        report.duration = start.elapsed();
        Ok(report)
    }

    /// Build, then rebuild and rediscover on every change until the
    /// watcher stops. Every rebuild starts from a freshly loaded project
    /// manifest. Failed passes are logged and do not end the watch.
    pub async fn watch(&self) -> Result<()> {
        self.transition(PipelineState::Idle);
        let (project, config) = self.configure().map_err(|e| self.fail(e))?;

        self.transition(PipelineState::Building);
        let mut observer = PassObserver {
            pipeline: self,
            project,
            config: config.clone(),
        };

        self.backend
            .watch(config, &mut observer)
            .await
            .map_err(|e| self.fail(e.into()))
    }

    fn configure(&self) -> Result<(ProjectManifest, BuildConfiguration)> {
        self.transition(PipelineState::Loading);
        let project = ProjectManifest::load(&self.options.source_dir)?;

        self.transition(PipelineState::Configuring);
        let config = BuildConfiguration::new(&project, &self.options);
        debug!("Build configuration: {:?}", config);

        Ok((project, config))
    }

    /// Everything after the bundler: discovery and the output manifest
    async fn complete(
        &self,
        project: &ProjectManifest,
        config: &BuildConfiguration,
        result: BuildResult,
    ) -> Result<PassReport> {
        if !result.succeeded() {
            return Err(PipelineError::Build { errors: result.errors });
        }

        self.transition(PipelineState::Discovering);
        let artifact_path = config.artifact_path();
        let discovery = tokio::task::spawn_blocking(move || {
            let mut runtime = QuickJsRuntime::new().map_err(|source| DiscoveryError::Load {
                path: artifact_path.clone(),
                source,
            })?;
            discover(&artifact_path, &mut runtime)
        })
        .await??;

        info!("Discovered {} component(s)", discovery.components.len());

        self.transition(PipelineState::Serializing);
        let manifest = OutputManifest::new(project, discovery.components.clone());
        let manifest_path = config.manifest_path();
        write_atomic(&manifest_path, &encode(&manifest)?)?;

        self.transition(PipelineState::Done);

        let mut warnings = result.warnings;
        warnings.extend(discovery.warnings);

        Ok(PassReport {
            manifest_path,
            components: discovery.components,
            bundles: result.bundles,
            warnings,
            duration: result.duration,
        })
    }
}

/// Configures and finishes each watch-mode pass
struct PassObserver<'a> {
    pipeline: &'a Pipeline,
    project: ProjectManifest,
    config: BuildConfiguration,
}

#[async_trait]
impl<'a> BuildObserver for PassObserver<'a> {
    fn configure(&mut self) -> Option<BuildConfiguration> {
        match self.pipeline.configure() {
            Ok((project, config)) => {
                self.pipeline.transition(PipelineState::Building);
                self.project = project;
                self.config = config.clone();
                Some(config)
            }
            Err(e) => {
                log_failure(&self.pipeline.fail(e));
                None
            }
        }
    }

    async fn on_result(&mut self, result: BuildResult) {
        let start = Instant::now();

        match self.pipeline.complete(&self.project, &self.config, result).await {
            Ok(report) => {
                for warning in &report.warnings {
                    warn!("{}", warning);
                }
                info!(
                    "Wrote {} with {} component(s) in {:?}",
                    report.manifest_path.display(),
                    report.components.len(),
                    start.elapsed() + report.duration
                );
            }
            Err(e) => log_failure(&self.pipeline.fail(e)),
        }

        self.pipeline.transition(PipelineState::Building);
    }
}

fn log_failure(error: &PipelineError) {
    match error {
        PipelineError::Build { errors } => {
            for e in errors {
                error!("{}", e);
            }
        }
        other => error!("{}", other),
    }
}

/// Write through a sibling temp file so readers never see a partial file
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let write_err = |source: io::Error| PipelineError::Write {
        path: path.to_path_buf(),
        source,
    };

    fs::write(&tmp, contents).map_err(write_err)?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        write_err(source)
    })
}
