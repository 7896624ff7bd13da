//! Project configuration
//!
//! Loads an extension project's `manifest.json` and derives the build
//! configuration handed to the bundler.

mod build;
mod schema;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

pub use build::*;
pub use schema::*;

/// File name of the project manifest inside the source directory
pub const PROJECT_MANIFEST: &str = "manifest.json";

/// Errors raised while loading a project manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read project manifest {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse project manifest {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid project manifest {}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },
}

impl ProjectManifest {
    /// Load `manifest.json` from a project directory
    pub fn load<P: AsRef<Path>>(directory: P) -> Result<Self, ManifestError> {
        let directory = directory.as_ref();
        let path = directory.join(PROJECT_MANIFEST);

        let content = fs::read_to_string(&path).map_err(|source| ManifestError::Read {
            path: path.clone(),
            source,
        })?;

        let mut manifest = Self::parse(&content).map_err(|source| ManifestError::Parse {
            path: path.clone(),
            source,
        })?;

        manifest.directory = fs::canonicalize(directory).map_err(|source| ManifestError::Read {
            path: directory.to_path_buf(),
            source,
        })?;

        manifest.validate(&path)?;

        debug!(
            "Loaded project manifest {} ({} v{})",
            path.display(),
            manifest.id,
            manifest.version
        );

        Ok(manifest)
    }

    /// Parse manifest text. The returned manifest has no directory set.
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    fn validate(&self, path: &Path) -> Result<(), ManifestError> {
        let invalid = |message: &str| ManifestError::Invalid {
            path: path.to_path_buf(),
            message: message.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("`id` must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(invalid("`version` must not be empty"));
        }
        if self.entry.trim().is_empty() {
            return Err(invalid("`index` must not be empty"));
        }

        if semver::Version::parse(&self.version).is_err() {
            warn!(
                "Version '{}' of extension '{}' is not a semantic version",
                self.version, self.id
            );
        }

        Ok(())
    }

    /// Absolute path of the entry module
    pub fn entry_path(&self) -> PathBuf {
        self.directory.join(&self.entry)
    }
}
