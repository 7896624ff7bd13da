//! Errors surfaced by a pipeline pass

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::bundler::BundlerError;
use crate::config::ManifestError;
use crate::discovery::DiscoveryError;
use crate::manifest::codec::CodecError;

/// Anything that makes a pass fail
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The bundler reported problems in the project; one entry per problem
    #[error("build failed with {} error(s)", errors.len())]
    Build { errors: Vec<String> },

    #[error(transparent)]
    Bundler(#[from] BundlerError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
