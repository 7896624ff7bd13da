//! Module resolution
//!
//! Handles resolving require specifiers to files, host externals, or
//! packages under `node_modules`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::BuildConfiguration;

/// `require("...")` calls left in compiled code
static REQUIRE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\brequire\s*\(\s*(?:"([^"]+)"|'([^']+)')\s*\)"#).unwrap());

/// Where a specifier points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A file to bundle
    Module(PathBuf),

    /// A library the host provides at load time
    External(String),
}

/// Module resolver
pub struct Resolver {
    config: Arc<BuildConfiguration>,
}

impl Resolver {
    /// Create a new resolver
    pub fn new(config: Arc<BuildConfiguration>) -> Self {
        Self { config }
    }

    /// Extract required specifiers from compiled code, first occurrence order
    pub fn extract_dependencies(&self, code: &str) -> Vec<String> {
        let mut dependencies: Vec<String> = Vec::new();

        for cap in REQUIRE_REGEX.captures_iter(code) {
            if let Some(specifier) = cap.get(1).or_else(|| cap.get(2)) {
                let spec = specifier.as_str().to_string();
                if !dependencies.contains(&spec) {
                    dependencies.push(spec);
                }
            }
        }

        debug!("Found {} dependencies", dependencies.len());

        dependencies
    }

    /// Rewrite each `require("spec")` in `code` to what `target` returns for
    /// the specifier; specifiers it returns `None` for stay untouched.
    pub fn rewrite_requires<F>(&self, code: &str, target: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        REQUIRE_REGEX
            .replace_all(code, |caps: &regex::Captures| {
                let specifier = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
                target(specifier).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Resolve a specifier required from the file `from`
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<Option<Resolution>> {
        debug!("Resolving '{}' from '{}'", specifier, from.display());

        if self.config.is_external(specifier) {
            return Ok(Some(Resolution::External(specifier.to_string())));
        }

        let base_dir = from.parent().unwrap_or(Path::new("."));

        let resolved = if specifier.starts_with('.') || specifier.starts_with('/') {
            self.resolve_relative(specifier, base_dir)
        } else if let Some(path) = self.resolve_alias(specifier) {
            Some(path)
        } else {
            self.resolve_bare(specifier, base_dir)?
        };

        debug!("Resolved to: {:?}", resolved);

        Ok(resolved.map(Resolution::Module))
    }

    /// Resolve a relative import
    fn resolve_relative(&self, specifier: &str, base_dir: &Path) -> Option<PathBuf> {
        self.resolve_file(&base_dir.join(specifier))
    }

    /// Exact file, then each configured extension appended, then `index.*`
    fn resolve_file(&self, target: &Path) -> Option<PathBuf> {
        if target.is_file() {
            return Some(target.to_path_buf());
        }

        for ext in &self.config.extensions {
            let mut with_ext = target.as_os_str().to_os_string();
            with_ext.push(".");
            with_ext.push(ext);
            let with_ext = PathBuf::from(with_ext);
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }

        if target.is_dir() {
            for ext in &self.config.extensions {
                let index = target.join(format!("index.{}", ext));
                if index.is_file() {
                    return Some(index);
                }
            }
        }

        None
    }

    fn resolve_alias(&self, specifier: &str) -> Option<PathBuf> {
        self.config.aliases.iter().find_map(|(alias, dir)| {
            if specifier == alias {
                return self.resolve_file(dir);
            }
            specifier
                .strip_prefix(alias.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .and_then(|rest| self.resolve_file(&dir.join(rest)))
        })
    }

    /// Resolve a bare import (from node_modules)
    fn resolve_bare(&self, specifier: &str, from: &Path) -> Result<Option<PathBuf>> {
        let mut current = from.to_path_buf();

        // Walk up directory tree looking for node_modules
        loop {
            let node_modules = current.join("node_modules");

            if node_modules.is_dir() {
                if let Some(resolved) = self.resolve_in_node_modules(&node_modules, specifier)? {
                    return Ok(Some(resolved));
                }
            }

            if !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Resolve a module within a node_modules directory
    fn resolve_in_node_modules(&self, node_modules: &Path, specifier: &str) -> Result<Option<PathBuf>> {
        // Split specifier into package name and subpath
        let (package_name, subpath) = if specifier.starts_with('@') {
            // Scoped package: @scope/name or @scope/name/subpath
            let parts: Vec<&str> = specifier.splitn(3, '/').collect();
            if parts.len() < 2 {
                return Ok(None);
            }
            let name = format!("{}/{}", parts[0], parts[1]);
            (name, parts.get(2).map(|s| s.to_string()))
        } else {
            let mut parts = specifier.splitn(2, '/');
            let name = parts.next().unwrap_or_default().to_string();
            (name, parts.next().map(|s| s.to_string()))
        };

        let package_dir = node_modules.join(&package_name);

        if !package_dir.is_dir() {
            return Ok(None);
        }

        if let Some(sub) = subpath {
            return Ok(self.resolve_file(&package_dir.join(sub)));
        }

        let package_json = package_dir.join("package.json");

        if package_json.is_file() {
            let content = fs::read_to_string(&package_json)
                .with_context(|| format!("Failed to read {}", package_json.display()))?;
            let pkg: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", package_json.display()))?;

            // Try module field first (ESM), then main
            for field in ["module", "main"] {
                if let Some(entry) = pkg.get(field).and_then(|v| v.as_str()) {
                    if let Some(path) = self.resolve_file(&package_dir.join(entry)) {
                        return Ok(Some(path));
                    }
                }
            }
        }

        Ok(self.resolve_file(&package_dir.join("index")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuildMode, BuildOptions, ProjectManifest};
    use tempfile::TempDir;

    fn resolver(root: &Path) -> Resolver {
        let mut manifest = ProjectManifest::parse(r#"{ "id": "ext1", "version": "1.0.0" }"#).unwrap();
        manifest.directory = root.to_path_buf();
        let options = BuildOptions::new(BuildMode::Build, root);
        Resolver::new(Arc::new(BuildConfiguration::new(&manifest, &options)))
    }

    fn touch(root: &Path, relative: &str, content: &str) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_extract_requires() {
        let dir = TempDir::new().unwrap();
        let code = r#"
            var __import0__ = require("./foo");
            var bar = require('./bar.js');
            require("./foo");
            Promise.resolve().then(function () { return require("./lazy"); });
        "#;
        let deps = resolver(dir.path()).extract_dependencies(code);
        assert_eq!(deps, ["./foo", "./bar.js", "./lazy"]);
    }

    #[test]
    fn test_rewrite_requires() {
        let dir = TempDir::new().unwrap();
        let code = r#"var a = require("./a"); var r = require('react'); var x = require("./x");"#;
        let out = resolver(dir.path()).rewrite_requires(code, |spec| match spec {
            "./a" => Some("__require__(\"a.js\")".to_string()),
            "react" => Some("__host_require__(\"react\")".to_string()),
            _ => None,
        });
        assert_eq!(
            out,
            r#"var a = __require__("a.js"); var r = __host_require__("react"); var x = require("./x");"#
        );
    }

    #[test]
    fn test_resolve_relative_appends_extensions() {
        let dir = TempDir::new().unwrap();
        let from = touch(dir.path(), "index.ts", "");
        let target = touch(dir.path(), "button.view.tsx", "");
        let index = touch(dir.path(), "widgets/index.js", "");

        let r = resolver(dir.path());
        assert_eq!(
            r.resolve("./button.view", &from).unwrap(),
            Some(Resolution::Module(target))
        );
        assert_eq!(r.resolve("./widgets", &from).unwrap(), Some(Resolution::Module(index)));
        assert_eq!(r.resolve("./missing", &from).unwrap(), None);
    }

    #[test]
    fn test_resolve_externals_and_aliases() {
        let dir = TempDir::new().unwrap();
        let from = touch(dir.path(), "index.js", "");
        let helper = touch(dir.path(), "src/business/helper.ts", "");

        let r = resolver(dir.path());
        assert_eq!(
            r.resolve("react", &from).unwrap(),
            Some(Resolution::External("react".to_string()))
        );
        assert_eq!(
            r.resolve("react-dom/client", &from).unwrap(),
            Some(Resolution::External("react-dom/client".to_string()))
        );
        assert_eq!(
            r.resolve("business/helper", &from).unwrap(),
            Some(Resolution::Module(helper.clone()))
        );
        assert_eq!(
            r.resolve("src/business/helper", &from).unwrap(),
            Some(Resolution::Module(helper))
        );
    }

    #[test]
    fn test_resolve_node_modules() {
        let dir = TempDir::new().unwrap();
        let from = touch(dir.path(), "src/index.js", "");
        touch(dir.path(), "node_modules/lodash/package.json", r#"{ "main": "lib/lodash" }"#);
        let main = touch(dir.path(), "node_modules/lodash/lib/lodash.js", "");
        let scoped = touch(dir.path(), "node_modules/@scope/pkg/index.js", "");

        let r = resolver(dir.path());
        assert_eq!(r.resolve("lodash", &from).unwrap(), Some(Resolution::Module(main)));
        assert_eq!(r.resolve("@scope/pkg", &from).unwrap(), Some(Resolution::Module(scoped)));
        assert_eq!(r.resolve("left-pad", &from).unwrap(), None);
    }
}
