//! Watch command implementation

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tracing::info;

use super::ProjectArgs;
use crate::bundler::NativeBundler;
use crate::config::BuildMode;
use crate::pipeline::Pipeline;

/// Rebuild the extension whenever its sources change
#[derive(Args, Debug)]
pub struct WatchCommand {
    #[command(flatten)]
    pub project: ProjectArgs,
}

impl WatchCommand {
    pub async fn execute(&self) -> Result<()> {
        let options = self.project.options(BuildMode::Watch)?;

        eprintln!(
            "{} Watching {}\n",
            "→".blue(),
            options.source_dir.display().to_string().cyan()
        );
        eprintln!("  {} Press {} to stop\n", "•".dimmed(), "Ctrl+C".yellow());

        let pipeline = Pipeline::new(options, Arc::new(NativeBundler::new()));

        tokio::select! {
            result = pipeline.watch() => result?,
            _ = tokio::signal::ctrl_c() => info!("Stopping watch"),
        }

        Ok(())
    }
}
