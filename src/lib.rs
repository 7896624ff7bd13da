//! extension-packager library
//!
//! Builds a UI extension project into `index.js`/`index.css`, loads the
//! artifact in an embedded script runtime to discover the components it
//! exports and writes their manifests to `manifest.json`.

pub mod bundler;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod resolver;
pub mod runtime;
pub mod transform;
pub mod utils;

pub use bundler::{BundlerBackend, NativeBundler};
pub use cli::Cli;
pub use config::{BuildConfiguration, BuildOptions, ProjectManifest};
pub use error::PipelineError;
pub use pipeline::{PassReport, Pipeline, PipelineState};
