//! Build configuration derived from a project manifest and caller options

use std::path::{Component, Path, PathBuf};

use indexmap::IndexMap;

use super::ProjectManifest;

/// Libraries provided by the host at load time; never bundled
pub const EXTERNAL_LIBRARIES: &[&str] = &["react", "react-dom"];

/// Extensions tried, in order, when an import omits one
pub const RESOLVE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx"];

/// Fixed name of the JavaScript artifact
pub const ARTIFACT_FILENAME: &str = "index.js";

/// Fixed name of the extracted stylesheet
pub const STYLESHEET_FILENAME: &str = "index.css";

/// Name of the generated manifest inside the output directory
pub const OUTPUT_MANIFEST_FILENAME: &str = "manifest.json";

/// Output directory used when the caller gives none
pub const DEFAULT_OUTPUT_DIR: &str = "dist";

/// Images up to this many bytes are inlined as data URIs
pub const INLINE_ASSET_LIMIT: usize = 8192;

/// Single build or rebuild on change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Build,
    Watch,
}

/// Build profile, mirroring `NODE_ENV`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    #[default]
    Development,
    Production,
}

impl Profile {
    /// `production` (any case) selects [`Profile::Production`]; every other
    /// value, `test` and `staging` included, builds for development.
    pub fn from_env_value(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            Profile::Production
        } else {
            Profile::Development
        }
    }
}

/// Options supplied by the caller
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub mode: BuildMode,
    pub profile: Profile,

    /// Project directory containing `manifest.json`
    pub source_dir: PathBuf,

    /// Output directory override
    pub output_dir: Option<PathBuf>,
}

impl BuildOptions {
    pub fn new(mode: BuildMode, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            profile: Profile::default(),
            source_dir: source_dir.into(),
            output_dir: None,
        }
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }
}

/// Everything the bundler backend needs for one pass.
///
/// Built fresh for every pass and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildConfiguration {
    pub profile: Profile,

    /// Absolute project directory
    pub source_dir: PathBuf,

    /// Entry module exactly as written in the project manifest
    pub entry: String,

    /// Absolute output directory
    pub output_dir: PathBuf,

    pub filename: String,
    pub style_filename: String,

    /// `.less` variable overrides
    pub style_variables: IndexMap<String, String>,

    /// Bare specifiers left to the host
    pub externals: Vec<String>,

    /// Bare specifier prefixes mapped to directories
    pub aliases: Vec<(String, PathBuf)>,

    pub extensions: Vec<String>,
    pub minify: bool,
    pub inline_limit: usize,
}

impl BuildConfiguration {
    /// Derive the configuration for one pass
    pub fn new(manifest: &ProjectManifest, options: &BuildOptions) -> Self {
        let source_dir = manifest.directory.clone();

        let output_dir = match &options.output_dir {
            Some(dir) => normalize(&source_dir.join(dir)),
            None => source_dir.join(DEFAULT_OUTPUT_DIR),
        };

        let aliases = vec![
            ("src".to_string(), source_dir.join("src")),
            ("business".to_string(), source_dir.join("src").join("business")),
        ];

        Self {
            profile: options.profile,
            entry: manifest.entry.clone(),
            output_dir,
            filename: ARTIFACT_FILENAME.to_string(),
            style_filename: STYLESHEET_FILENAME.to_string(),
            style_variables: manifest.style_variables.clone(),
            externals: EXTERNAL_LIBRARIES.iter().map(|s| s.to_string()).collect(),
            aliases,
            extensions: RESOLVE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            minify: options.profile == Profile::Production,
            inline_limit: INLINE_ASSET_LIMIT,
            source_dir,
        }
    }

    /// Absolute path of the entry module
    pub fn entry_path(&self) -> PathBuf {
        normalize(&self.source_dir.join(&self.entry))
    }

    /// Where the bundler writes the JavaScript artifact
    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(&self.filename)
    }

    pub fn stylesheet_path(&self) -> PathBuf {
        self.output_dir.join(&self.style_filename)
    }

    /// Where the pipeline writes the output manifest
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(OUTPUT_MANIFEST_FILENAME)
    }

    pub fn is_external(&self, specifier: &str) -> bool {
        self.externals.iter().any(|name| {
            specifier == name
                || specifier
                    .strip_prefix(name.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// Remove `.` and resolve `..` components without touching the file system
pub fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push("..");
                }
            }
            other => result.push(other.as_os_str()),
        }
    }

    result
}
