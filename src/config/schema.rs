//! Project manifest schema definitions

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// An extension project's `manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectManifest {
    /// Extension identifier
    pub id: String,

    /// Extension version
    pub version: String,

    /// Human readable name
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Entry module, relative to the project directory
    #[serde(rename = "index", alias = "entry", default = "default_entry")]
    pub entry: String,

    /// Overrides for `@variables` declared in `.less` stylesheets
    #[serde(default)]
    pub style_variables: IndexMap<String, String>,

    /// Directory the manifest was loaded from (computed)
    #[serde(skip)]
    pub directory: PathBuf,
}

pub(crate) fn default_entry() -> String {
    "index.js".to_string()
}
