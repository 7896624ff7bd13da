//! Build command implementation

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use tracing::info;
use walkdir::WalkDir;

use super::{print_errors, print_warnings, ProjectArgs};
use crate::bundler::NativeBundler;
use crate::config::BuildMode;
use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::utils::{format_duration, format_size, relative_path};

/// Build the extension once
#[derive(Args, Debug)]
pub struct BuildCommand {
    #[command(flatten)]
    pub project: ProjectArgs,
}

impl BuildCommand {
    pub async fn execute(&self) -> Result<()> {
        let start = Instant::now();
        let options = self.project.options(BuildMode::Build)?;

        info!("Building {}", options.source_dir.display());
        eprintln!("{} Building extension...", "→".blue());

        let pipeline = Pipeline::new(options, Arc::new(NativeBundler::new()));

        let report = match pipeline.run().await {
            Ok(report) => report,
            Err(PipelineError::Build { errors }) => {
                eprintln!("\n{} Build failed\n", "✗".red().bold());
                print_errors(&errors);
                eprintln!();
                bail!("build failed with {} error(s)", errors.len());
            }
            Err(e) => return Err(e.into()),
        };

        eprintln!(
            "\n{} Packaged {} component(s) in {}\n",
            "✓".green().bold(),
            report.components.len(),
            format_duration(start.elapsed())
        );

        if let Some(output_dir) = report.manifest_path.parent() {
            print_outputs(output_dir);
        }

        if !report.warnings.is_empty() {
            eprintln!();
            print_warnings(&report.warnings);
        }

        eprintln!();

        Ok(())
    }
}

/// List every file in the output directory with its size
fn print_outputs(output_dir: &Path) {
    let files = WalkDir::new(output_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file());

    for entry in files {
        let size = entry.metadata().map(|m| m.len() as usize).unwrap_or(0);
        let name = relative_path(output_dir, entry.path()).unwrap_or_else(|| entry.path().display().to_string());

        eprintln!(
            "  {} {} {}",
            "•".dimmed(),
            name.cyan(),
            format_size(size).dimmed()
        );
    }
}
