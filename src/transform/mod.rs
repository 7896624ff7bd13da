//! Code transformation
//!
//! Turns every module the bundler reaches into a CommonJS function body:
//! TypeScript and JSX are lowered, ES module syntax becomes `require`/
//! `exports`, stylesheets are compiled and extracted, and binary assets
//! become URLs.

mod esm;
mod jsx;
mod lexer;
mod style;
mod typescript;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::bundler::ModuleType;
use crate::config::BuildConfiguration;
use crate::utils::hash_content;

pub use esm::{to_commonjs, DEFAULT_EXPORT_BINDING, ES_MODULE_MARKER};
pub use jsx::transform_jsx;
pub use style::{class_map_module, expand_less, process_stylesheet, rewrite_urls, Expanded, Stylesheet};
pub use typescript::strip_types;

/// Directory, relative to the output directory, for emitted images
pub const IMAGE_OUTPUT_DIR: &str = "styles/default/images";

/// Depth allowed for nested stylesheet `@import`s
const MAX_IMPORT_DEPTH: usize = 16;

static STYLE_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*@import\s*(?:\([^)]*\)\s*)?["']([^"']+)["'][ \t]*;?"#).unwrap()
});

/// A file copied to the output directory
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedAsset {
    /// Path relative to the output directory
    pub file_name: String,
    pub contents: Vec<u8>,
}

/// Stylesheet output of one module
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStyle {
    pub css: String,

    /// Variables the stylesheet declares
    pub variables: Vec<String>,
}

/// Result of compiling one module
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    /// CommonJS module body
    pub code: String,

    pub style: Option<CompiledStyle>,

    pub assets: Vec<EmittedAsset>,
}

impl Compiled {
    fn script(code: String) -> Self {
        Self {
            code,
            style: None,
            assets: Vec::new(),
        }
    }
}

/// Module compiler for one build pass
pub struct Transformer {
    config: Arc<BuildConfiguration>,
}

impl Transformer {
    pub fn new(config: Arc<BuildConfiguration>) -> Self {
        Self { config }
    }

    /// Read and compile the module at `path`
    pub fn compile(&self, path: &Path, module_id: &str, module_type: &ModuleType) -> Result<Compiled> {
        match module_type {
            ModuleType::Image | ModuleType::Font => {
                let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
                self.compile_asset(&bytes, path, module_type)
            }
            ModuleType::Unknown => bail!("No loader for {}", path.display()),
            _ => {
                let source = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                self.transform(&source, path, module_id, module_type)
            }
        }
    }

    /// Compile source text of a text-based module
    pub fn transform(
        &self,
        source: &str,
        path: &Path,
        module_id: &str,
        module_type: &ModuleType,
    ) -> Result<Compiled> {
        match module_type {
            ModuleType::JavaScript if is_package_file(path) => Ok(Compiled::script(to_commonjs(source))),
            ModuleType::JavaScript | ModuleType::Jsx => {
                debug!("Transforming JSX: {}", path.display());
                let code = transform_jsx(source).with_context(|| format!("Invalid JSX in {}", path.display()))?;
                Ok(Compiled::script(to_commonjs(&code)))
            }
            ModuleType::TypeScript => {
                debug!("Transforming TypeScript: {}", path.display());
                Ok(Compiled::script(to_commonjs(&strip_types(source, false))))
            }
            ModuleType::Tsx => {
                debug!("Transforming TSX: {}", path.display());
                let code = transform_jsx(&strip_types(source, true))
                    .with_context(|| format!("Invalid JSX in {}", path.display()))?;
                Ok(Compiled::script(to_commonjs(&code)))
            }
            ModuleType::Json => self.transform_json(source, path),
            ModuleType::Css | ModuleType::Less => self.transform_style(source, path, module_id, module_type),
            ModuleType::Image | ModuleType::Font => self.compile_asset(source.as_bytes(), path, module_type),
            ModuleType::Unknown => bail!("No loader for {}", path.display()),
        }
    }

    /// Transform JSON to JS module
    fn transform_json(&self, source: &str, path: &Path) -> Result<Compiled> {
        debug!("Transforming JSON: {}", path.display());

        let value: serde_json::Value =
            serde_json::from_str(source).with_context(|| format!("Invalid JSON in {}", path.display()))?;

        Ok(Compiled::script(format!("module.exports = {value};")))
    }

    fn transform_style(
        &self,
        source: &str,
        path: &Path,
        module_id: &str,
        module_type: &ModuleType,
    ) -> Result<Compiled> {
        debug!("Transforming stylesheet: {}", path.display());

        let no_overrides = Default::default();
        let (source, overrides) = match module_type {
            ModuleType::Less => (
                expand_style_imports(source, path, 0)?,
                &self.config.style_variables,
            ),
            _ => (source.to_string(), &no_overrides),
        };

        let expanded = expand_less(&source, overrides)
            .with_context(|| format!("Failed to compile {}", path.display()))?;

        let mut assets = Vec::new();
        let base = path.parent().unwrap_or(Path::new("."));
        let css = rewrite_urls(&expanded.css, |target| {
            let target = target.split(&['?', '#'][..]).next().unwrap_or(target);
            let file = base.join(target);
            let module_type = ModuleType::from_path(&file);
            if !matches!(module_type, ModuleType::Image | ModuleType::Font) {
                return Ok(None);
            }
            let bytes = fs::read(&file)
                .with_context(|| format!("Module not found: {} (referenced from {})", target, path.display()))?;
            let (url, asset) = self.asset_url(&bytes, &file, &module_type);
            assets.extend(asset);
            Ok(Some(url))
        })?;

        let sheet = process_stylesheet(&css, module_id, self.config.minify)
            .with_context(|| format!("Failed to compile {}", path.display()))?;

        Ok(Compiled {
            code: class_map_module(&sheet.classes),
            style: Some(CompiledStyle {
                css: sheet.css,
                variables: expanded.variables,
            }),
            assets,
        })
    }

    fn compile_asset(&self, bytes: &[u8], path: &Path, module_type: &ModuleType) -> Result<Compiled> {
        let (url, asset) = self.asset_url(bytes, path, module_type);
        let literal = serde_json::Value::String(url).to_string();

        Ok(Compiled {
            code: format!("module.exports = {literal};"),
            style: None,
            assets: asset.into_iter().collect(),
        })
    }

    /// Data URI for small images and fonts, otherwise an emitted file
    fn asset_url(&self, bytes: &[u8], path: &Path, module_type: &ModuleType) -> (String, Option<EmittedAsset>) {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();

        if *module_type == ModuleType::Font || bytes.len() <= self.config.inline_limit {
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            return (format!("data:{};base64,{encoded}", mime_type(&extension)), None);
        }

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("asset");
        let hash = hash_content(bytes);
        let file_name = format!("{IMAGE_OUTPUT_DIR}/{}.{stem}.{extension}", &hash[..8]);

        debug!("Emitting {} as {}", path.display(), file_name);

        (
            file_name.clone(),
            Some(EmittedAsset {
                file_name,
                contents: bytes.to_vec(),
            }),
        )
    }
}

/// Installed packages ship plain JavaScript
fn is_package_file(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == "node_modules")
}

fn mime_type(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "svg" => "image/svg+xml",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "eot" => "application/vnd.ms-fontobject",
        _ => "application/octet-stream",
    }
}

/// Inline `@import`ed stylesheets; `~` resolves from `node_modules`
fn expand_style_imports(source: &str, path: &Path, depth: usize) -> Result<String> {
    if depth > MAX_IMPORT_DEPTH {
        bail!("Stylesheet imports nested too deeply at {}", path.display());
    }

    let base = path.parent().unwrap_or(Path::new("."));
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;

    for caps in STYLE_IMPORT.captures_iter(source) {
        let (Some(whole), Some(specifier)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if specifier.as_str().contains("://") {
            continue;
        }

        let target = resolve_style_import(specifier.as_str(), base)
            .with_context(|| format!("Module not found: {} (imported from {})", specifier.as_str(), path.display()))?;
        let imported = fs::read_to_string(&target)
            .with_context(|| format!("Failed to read {}", target.display()))?;

        out.push_str(&source[cursor..whole.start()]);
        out.push_str(&expand_style_imports(&imported, &target, depth + 1)?);
        out.push('\n');
        cursor = whole.end();
    }

    out.push_str(&source[cursor..]);
    Ok(out)
}

fn resolve_style_import(specifier: &str, base: &Path) -> Option<PathBuf> {
    let candidates = |path: PathBuf| {
        let mut list = vec![path.clone()];
        if path.extension().is_none() {
            list.push(path.with_extension("less"));
            list.push(path.with_extension("css"));
        }
        list
    };

    if let Some(package_path) = specifier.strip_prefix('~') {
        return base
            .ancestors()
            .map(|dir| dir.join("node_modules").join(package_path))
            .flat_map(candidates)
            .find(|p| p.is_file());
    }

    candidates(base.join(specifier)).into_iter().find(|p| p.is_file())
}

/// Strip comments and collapse whitespace in generated JavaScript.
///
/// Line breaks survive unless the previous character ends a statement or
/// opens a block, so automatic semicolon insertion is unaffected.
pub fn minify_script(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut result = String::with_capacity(code.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' || c == '\'' || c == '`' {
            let end = if c == '`' {
                lexer::template_end(&chars, i)
            } else {
                lexer::string_end(&chars, i)
            };
            result.extend(&chars[i..end]);
            i = end;
            continue;
        }
        if let Some(end) = lexer::comment_end(&chars, i) {
            // Keep `a /* */ b` from becoming `ab`
            if !result.ends_with(char::is_whitespace) && chars[i + 1] == '*' {
                result.push(' ');
            }
            i = end;
            continue;
        }

        if c.is_whitespace() {
            let mut end = i;
            let mut newline = false;
            while end < chars.len() && chars[end].is_whitespace() {
                newline |= chars[end] == '\n';
                end += 1;
            }
            i = end;

            let prev = result.trim_end_matches(' ').chars().last();
            let next = chars.get(end).copied();
            if newline {
                while result.ends_with(' ') {
                    result.pop();
                }
                if !matches!(prev, None | Some('{') | Some(';') | Some(',') | Some('\n')) {
                    result.push('\n');
                }
            } else if needs_space(prev, next) {
                result.push(' ');
            }
            continue;
        }

        if result.ends_with(' ') && !needs_space(result.trim_end_matches(' ').chars().last(), Some(c)) {
            result.pop();
        }
        result.push(c);
        i += 1;
    }

    result.trim().to_string()
}

fn needs_space(prev: Option<char>, next: Option<char>) -> bool {
    match (prev, next) {
        (Some(a), Some(b)) => {
            let word = |c: char| lexer::is_ident_char(c) || c == '\\';
            (word(a) && word(b)) || (a == b && matches!(a, '+' | '-' | '/')) || a == '/' || b == '/'
        }
        _ => false,
    }
}
