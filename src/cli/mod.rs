//! Command-line interface for extension-packager
//!
//! Subcommands:
//! - `build`: one pass, then exit
//! - `watch` (alias `debug`): rebuild and rediscover on every change

mod build;
mod watch;

use std::convert::Infallible;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use crate::config::{BuildMode, BuildOptions, Profile};

pub use build::BuildCommand;
pub use watch::WatchCommand;

/// Package a UI extension into a bundle and a component manifest
#[derive(Parser, Debug)]
#[command(name = "extension-packager")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the extension once
    Build(BuildCommand),

    /// Rebuild the extension whenever its sources change
    #[command(alias = "debug")]
    Watch(WatchCommand),
}

/// Arguments shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Extension project directory (contains manifest.json)
    pub dir: PathBuf,

    /// Output directory, relative to the project directory
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    /// Build profile: `production`, anything else builds for development
    #[arg(long, env = "NODE_ENV", default_value = "development", value_parser = parse_profile)]
    pub profile: Profile,
}

fn parse_profile(value: &str) -> Result<Profile, Infallible> {
    Ok(Profile::from_env_value(value))
}

impl ProjectArgs {
    /// Pipeline options with the project directory made absolute
    pub fn options(&self, mode: BuildMode) -> Result<BuildOptions> {
        let dir = absolute(&self.dir)?;
        let mut options = BuildOptions::new(mode, dir).with_profile(self.profile);
        if let Some(outdir) = &self.outdir {
            options = options.with_output_dir(outdir);
        }
        Ok(options)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to determine the current directory")?;
    Ok(cwd.join(path))
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<()> {
        print_banner();

        match &self.command {
            Commands::Build(cmd) => cmd.execute().await,
            Commands::Watch(cmd) => cmd.execute().await,
        }
    }
}

fn print_banner() {
    eprintln!(
        "\n{} {}\n",
        "extension-packager".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}

/// Print each warning on its own line
fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        eprintln!("  {} {}", "!".yellow().bold(), warning.yellow());
    }
}

/// Print each build error on its own line
fn print_errors(errors: &[String]) {
    for error in errors {
        eprintln!("  {} {}", "✗".red().bold(), error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build() {
        let cli = Cli::try_parse_from([
            "extension-packager",
            "build",
            "demo",
            "-o",
            "out",
            "--profile",
            "production",
        ])
        .unwrap();

        let Commands::Build(cmd) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(cmd.project.dir, PathBuf::from("demo"));
        assert_eq!(cmd.project.outdir, Some(PathBuf::from("out")));
        assert_eq!(cmd.project.profile, Profile::Production);

        let options = cmd.project.options(BuildMode::Build).unwrap();
        assert!(options.source_dir.is_absolute());
        assert_eq!(options.output_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_profile_is_lenient() {
        let parse = |profile: &str| {
            let cli = Cli::try_parse_from(["extension-packager", "build", "demo", "--profile", profile]).unwrap();
            let Commands::Build(cmd) = cli.command else {
                panic!("expected build");
            };
            cmd.project.profile
        };
        assert_eq!(parse("PRODUCTION"), Profile::Production);
        assert_eq!(parse("test"), Profile::Development);
        assert_eq!(parse("staging"), Profile::Development);
    }

    #[test]
    fn test_debug_is_watch() {
        let cli = Cli::try_parse_from(["extension-packager", "debug", "demo", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Watch(_)));
    }

    #[test]
    fn test_usage_errors() {
        let missing_dir = Cli::try_parse_from(["extension-packager", "build"]).unwrap_err();
        assert_eq!(missing_dir.kind(), ErrorKind::MissingRequiredArgument);

        let unknown = Cli::try_parse_from(["extension-packager", "serve", "demo"]).unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::InvalidSubcommand);
    }
}
