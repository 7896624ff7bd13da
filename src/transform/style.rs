//! Stylesheets: Less variables and nesting, then CSS modules and vendor
//! prefixes through lightningcss
//!
//! Supported Less: `@name: value;` variables (global scope, last declaration
//! wins, overridable from the project manifest), `@{name}` interpolation and
//! nested rules with `&`. Mixins, guards and operations are not evaluated.

use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;
use lightningcss::css_modules::{self, Pattern};
use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use super::lexer::{comment_end, string_end};

/// At-rules that look like variable references but are plain CSS
const CSS_AT_RULES: &[&str] = &[
    "media",
    "import",
    "keyframes",
    "-webkit-keyframes",
    "font-face",
    "supports",
    "charset",
    "namespace",
    "page",
    "document",
    "layer",
    "container",
    "plugin",
];

/// At-rules whose blocks hold declarations or keyframe selectors
const OPAQUE_AT_RULES: &[&str] = &["keyframes", "-webkit-keyframes", "font-face", "page"];

/// Nesting depth allowed while expanding variables that reference variables
const MAX_VARIABLE_DEPTH: usize = 16;

/// Scoped class names: file stem, local name, hash of the module id
const CLASS_NAME_PATTERN: &str = "[name]__[local]__[hash]";

/// Oldest browsers the prefixed output has to work in
fn browser_targets() -> Targets {
    let version = |major: u32| major << 16;
    Targets::from(Browsers {
        chrome: Some(version(64)),
        edge: Some(version(79)),
        firefox: Some(version(60)),
        safari: Some(version(12)),
        ios_saf: Some(version(12)),
        ..Browsers::default()
    })
}

/// Plain CSS produced from a Less source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expanded {
    pub css: String,

    /// Variables declared by the source
    pub variables: Vec<String>,
}

/// A stylesheet module after scoping and prefixing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stylesheet {
    pub css: String,

    /// Local name to scoped name, sorted by local name
    pub classes: IndexMap<String, String>,
}

#[derive(Debug, Clone)]
enum Node {
    Declaration(String),
    Variable(String, String),
    Rule(String, Vec<Node>),
    AtRule(String, Option<Vec<Node>>),
}

/// Expand Less variables and nesting into plain CSS.
///
/// `overrides` replace declared variables (keys with or without `@`).
pub fn expand_less(source: &str, overrides: &IndexMap<String, String>) -> Result<Expanded> {
    let chars: Vec<char> = strip_comments(source).chars().collect();
    let (nodes, _) = parse_nodes(&chars, 0)?;

    let mut variables: IndexMap<String, String> = IndexMap::new();
    collect_variables(&nodes, &mut variables);
    let declared: Vec<String> = variables.keys().cloned().collect();

    for (name, value) in overrides {
        variables.insert(name.trim_start_matches('@').to_string(), value.clone());
    }

    let mut emitter = Emitter {
        variables: &variables,
        out: String::new(),
    };
    emitter.emit(&nodes, &[])?;

    Ok(Expanded {
        css: emitter.out,
        variables: declared,
    })
}

/// Run plain CSS through lightningcss as a CSS module.
///
/// Class names, keyframes and grid areas are scoped per `filename` (the
/// module id), vendor prefixes are added for [`browser_targets`] and the
/// output is minified when `minify` is set.
pub fn process_stylesheet(css: &str, filename: &str, minify: bool) -> Result<Stylesheet> {
    let pattern = Pattern::parse(CLASS_NAME_PATTERN).map_err(|e| anyhow!("invalid class name pattern: {e:?}"))?;
    let mut sheet = StyleSheet::parse(
        css,
        ParserOptions {
            filename: filename.to_string(),
            css_modules: Some(css_modules::Config {
                pattern,
                ..Default::default()
            }),
            ..Default::default()
        },
    )
    .map_err(|e| anyhow!("{e}"))?;

    let targets = browser_targets();
    sheet
        .minify(MinifyOptions {
            targets,
            ..Default::default()
        })
        .map_err(|e| anyhow!("{e}"))?;

    let result = sheet
        .to_css(PrinterOptions {
            minify,
            targets,
            ..Default::default()
        })
        .map_err(|e| anyhow!("{e}"))?;

    let mut classes: Vec<(String, String)> = result
        .exports
        .unwrap_or_default()
        .into_iter()
        .map(|(local, export)| (local, export.name))
        .collect();
    classes.sort();

    Ok(Stylesheet {
        css: result.code,
        classes: classes.into_iter().collect(),
    })
}

/// JavaScript module exposing the scoped class names
pub fn class_map_module(classes: &IndexMap<String, String>) -> String {
    let map: serde_json::Map<String, serde_json::Value> = classes
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    format!("module.exports = {};", serde_json::Value::Object(map))
}

/// Replace every relative `url(...)` with what `replace` returns for it
pub fn rewrite_urls<F>(css: &str, mut replace: F) -> Result<String>
where
    F: FnMut(&str) -> Result<Option<String>>,
{
    let mut out = String::with_capacity(css.len());
    let mut rest = css;

    while let Some(pos) = rest.find("url(") {
        out.push_str(&rest[..pos + 4]);
        let tail = &rest[pos + 4..];
        let Some(close) = tail.find(')') else {
            rest = tail;
            break;
        };

        let raw = tail[..close].trim();
        let target = raw.trim_matches(|c| c == '"' || c == '\'');
        let local = !target.is_empty()
            && !target.starts_with("data:")
            && !target.starts_with('#')
            && !target.starts_with('/')
            && !target.contains("://");

        match local.then(|| replace(target)).transpose()?.flatten() {
            Some(url) => out.push_str(&serde_json::Value::String(url).to_string()),
            None => out.push_str(&tail[..close]),
        }
        rest = &tail[close..];
    }

    out.push_str(rest);
    Ok(out)
}

fn strip_comments(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    let mut parens = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' {
            let end = string_end(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }
        match c {
            '(' => parens += 1,
            ')' => parens = parens.saturating_sub(1),
            _ => {}
        }
        // `//` inside `url(...)` is part of the url
        let line_comment = chars.get(i + 1) == Some(&'/') && parens > 0;
        if !line_comment {
            if let Some(end) = comment_end(&chars, i) {
                i = end;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }

    out
}

/// Parse statements until the closing `}` of the current block
fn parse_nodes(chars: &[char], start: usize) -> Result<(Vec<Node>, usize)> {
    let mut nodes = Vec::new();
    let mut i = start;
    let mut text = String::new();
    let mut parens = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' {
            let end = string_end(chars, i);
            text.extend(&chars[i..end]);
            i = end;
            continue;
        }
        match c {
            '(' => parens += 1,
            ')' => parens = parens.saturating_sub(1),
            _ => {}
        }

        if parens == 0 && c == '{' && !text.ends_with('@') {
            let prelude = text.trim().to_string();
            text.clear();
            let (children, end) = parse_nodes(chars, i + 1)?;
            nodes.push(if prelude.starts_with('@') {
                Node::AtRule(prelude, Some(children))
            } else {
                Node::Rule(prelude, children)
            });
            i = end;
            continue;
        }
        if parens == 0 && c == '{' {
            // `@{name}` interpolation
            let close = chars[i..].iter().position(|&c| c == '}').map_or(chars.len(), |p| i + p + 1);
            text.extend(&chars[i..close]);
            i = close;
            continue;
        }
        if parens == 0 && (c == ';' || c == '}') {
            push_statement(&mut nodes, &text);
            text.clear();
            i += 1;
            if c == '}' {
                return Ok((nodes, i));
            }
            continue;
        }

        text.push(c);
        i += 1;
    }

    if !text.trim().is_empty() {
        push_statement(&mut nodes, &text);
    }
    if start > 0 {
        bail!("unclosed block in stylesheet");
    }
    Ok((nodes, i))
}

fn push_statement(nodes: &mut Vec<Node>, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }

    if let Some(rest) = text.strip_prefix('@') {
        let name_len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
            .unwrap_or(rest.len());
        let after = rest[name_len..].trim_start();
        if name_len > 0 && after.starts_with(':') {
            nodes.push(Node::Variable(
                rest[..name_len].to_string(),
                after[1..].trim().to_string(),
            ));
            return;
        }
        nodes.push(Node::AtRule(text.to_string(), None));
        return;
    }

    nodes.push(Node::Declaration(text.to_string()));
}

fn collect_variables(nodes: &[Node], variables: &mut IndexMap<String, String>) {
    for node in nodes {
        match node {
            Node::Variable(name, value) => {
                variables.insert(name.clone(), value.clone());
            }
            Node::Rule(_, children) | Node::AtRule(_, Some(children)) => {
                collect_variables(children, variables)
            }
            _ => {}
        }
    }
}

struct Emitter<'a> {
    variables: &'a IndexMap<String, String>,
    out: String,
}

impl<'a> Emitter<'a> {
    fn emit(&mut self, nodes: &[Node], parents: &[String]) -> Result<()> {
        let declarations: Vec<String> = nodes
            .iter()
            .filter_map(|n| match n {
                Node::Declaration(d) => Some(d),
                _ => None,
            })
            .map(|d| self.substitute(d, 0))
            .collect::<Result<_>>()?;

        if !declarations.is_empty() {
            if parents.is_empty() {
                bail!("declaration outside of a rule: {}", declarations[0]);
            }
            self.out.push_str(&parents.join(",\n"));
            self.out.push_str(" {\n");
            for declaration in declarations {
                self.out.push_str("  ");
                self.out.push_str(&declaration);
                self.out.push_str(";\n");
            }
            self.out.push_str("}\n");
        }

        for node in nodes {
            match node {
                Node::Rule(prelude, children) => {
                    let prelude = wrap_bare_global(&self.substitute(prelude, 0)?);
                    let selectors = combine_selectors(parents, &prelude);
                    self.emit(children, &selectors)?;
                }
                Node::AtRule(prelude, Some(children)) => {
                    let prelude = self.substitute(prelude, 0)?;
                    let name = at_rule_name(&prelude);
                    self.out.push_str(&prelude);
                    self.out.push_str(" {\n");
                    if OPAQUE_AT_RULES.contains(&name) {
                        if children.iter().all(|n| matches!(n, Node::Declaration(_))) {
                            for child in children {
                                if let Node::Declaration(d) = child {
                                    let declaration = self.substitute(d, 0)?;
                                    self.out.push_str(&format!("  {declaration};\n"));
                                }
                            }
                        } else {
                            self.emit(children, &[])?;
                        }
                    } else {
                        self.emit(children, parents)?;
                    }
                    self.out.push_str("}\n");
                }
                Node::AtRule(prelude, None) => {
                    let prelude = self.substitute(prelude, 0)?;
                    self.out.push_str(&prelude);
                    self.out.push_str(";\n");
                }
                Node::Declaration(_) | Node::Variable(..) => {}
            }
        }

        Ok(())
    }

    /// Replace `@name` and `@{name}` references
    fn substitute(&self, text: &str, depth: usize) -> Result<String> {
        if depth > MAX_VARIABLE_DEPTH {
            bail!("variable nesting too deep in `{text}`");
        }
        if !text.contains('@') {
            return Ok(text.to_string());
        }

        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c == '"' || c == '\'' {
                let end = string_end(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
                continue;
            }
            if c != '@' {
                out.push(c);
                i += 1;
                continue;
            }

            let braced = chars.get(i + 1) == Some(&'{');
            let start = if braced { i + 2 } else { i + 1 };
            let mut end = start;
            while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '-' || chars[end] == '_') {
                end += 1;
            }
            let name: String = chars[start..end].iter().collect();

            if name.is_empty() || (!braced && CSS_AT_RULES.contains(&name.as_str())) {
                out.push(c);
                i += 1;
                continue;
            }

            let Some(value) = self.variables.get(&name) else {
                bail!("variable @{name} is undefined");
            };
            out.push_str(&self.substitute(value, depth + 1)?);
            i = if braced && chars.get(end) == Some(&'}') { end + 1 } else { end };
        }

        Ok(out)
    }
}

/// `:global .a .b` becomes `:global(.a .b)`, the form lightningcss scopes
fn wrap_bare_global(prelude: &str) -> String {
    if !prelude.contains(":global") {
        return prelude.to_string();
    }

    prelude
        .split(',')
        .map(|selector| match selector.find(":global") {
            Some(pos) if !selector[pos + ":global".len()..].starts_with('(') => {
                let rest = selector[pos + ":global".len()..].trim();
                if rest.is_empty() {
                    selector.to_string()
                } else {
                    format!("{}:global({})", &selector[..pos], rest)
                }
            }
            _ => selector.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn at_rule_name(prelude: &str) -> &str {
    let rest = prelude.trim_start_matches('@');
    let end = rest.find(|c: char| c.is_whitespace() || c == '(').unwrap_or(rest.len());
    &rest[..end]
}

/// Combine nested selectors; `&` refers to the parent selector
fn combine_selectors(parents: &[String], prelude: &str) -> Vec<String> {
    let children: Vec<&str> = prelude.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    if parents.is_empty() {
        return children.iter().map(|s| s.to_string()).collect();
    }

    let mut combined = Vec::with_capacity(parents.len() * children.len());
    for parent in parents {
        for child in &children {
            if child.contains('&') {
                combined.push(child.replace('&', parent));
            } else {
                combined.push(format!("{parent} {child}"));
            }
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> Stylesheet {
        let expanded = expand_less(source, &IndexMap::new()).unwrap();
        process_stylesheet(&expanded.css, "src/button.less", false).unwrap()
    }

    #[test]
    fn test_variables_and_overrides() {
        let source = "@primary: blue;\n@border: 1px solid @primary;\n.x { color: @primary; border: @border; }";
        let mut overrides = IndexMap::new();
        overrides.insert("@primary".to_string(), "red".to_string());

        let expanded = expand_less(source, &overrides).unwrap();
        assert!(expanded.css.contains("color: red;"));
        assert!(expanded.css.contains("border: 1px solid red;"));
        assert_eq!(expanded.variables, ["primary", "border"]);
    }

    #[test]
    fn test_undefined_variable() {
        let err = expand_less(".x { color: @missing; }", &IndexMap::new()).unwrap_err();
        assert!(err.to_string().contains("@missing"));
    }

    #[test]
    fn test_class_scoping() {
        let sheet = compile(".button { color: red; }\n.button:hover, .icon > span { color: blue; }");
        let button = sheet.classes.get("button").unwrap();
        assert!(button.starts_with("button__button__"));
        assert!(sheet.css.contains(&format!(".{button}:hover")));
        assert!(sheet.classes.contains_key("icon"));
        assert!(!sheet.css.contains(".button "));
    }

    #[test]
    fn test_scoping_is_stable_per_module() {
        let a = compile(".title { color: red; }");
        let b = compile(".title { color: blue; }");
        assert_eq!(a.classes, b.classes);

        let other = process_stylesheet(".title { color: red; }", "src/other.less", false).unwrap();
        assert_ne!(a.classes.get("title"), other.classes.get("title"));
        assert!(other.classes["title"].starts_with("other__title__"));
    }

    #[test]
    fn test_global_passthrough() {
        let sheet = compile(":global(.ant-btn) .local { margin: 0; }\n:global .plain { padding: 0; }");
        let local = sheet.classes.get("local").unwrap();
        assert!(sheet.css.contains(&format!(".ant-btn .{local}")));
        assert!(sheet.css.contains(".plain {"));
        assert!(!sheet.classes.contains_key("ant-btn"));
        assert!(!sheet.classes.contains_key("plain"));
    }

    #[test]
    fn test_wrap_bare_global() {
        assert_eq!(wrap_bare_global(":global .a .b"), ":global(.a .b)");
        assert_eq!(wrap_bare_global(".x, :global .y"), ".x, :global(.y)");
        assert_eq!(wrap_bare_global(":global(.a) .b"), ":global(.a) .b");
    }

    #[test]
    fn test_nesting() {
        let expanded = expand_less(
            ".card { padding: 1px; &:hover { color: red; } .body { margin: 0; } }",
            &IndexMap::new(),
        )
        .unwrap();
        assert!(expanded.css.contains(".card {\n  padding: 1px;\n}"));
        assert!(expanded.css.contains(".card:hover {\n  color: red;\n}"));
        assert!(expanded.css.contains(".card .body {\n  margin: 0;\n}"));

        let sheet = process_stylesheet(&expanded.css, "src/button.less", false).unwrap();
        let card = &sheet.classes["card"];
        let body = &sheet.classes["body"];
        assert!(sheet.css.contains(&format!(".{card} .{body}")));
    }

    #[test]
    fn test_media_and_keyframes() {
        let sheet = compile(
            "@w: 600px;\n@media (max-width: @w) { .a { width: 100%; } }\n@keyframes spin { from { opacity: 0; } to { opacity: 1; } }",
        );
        assert!(sheet.css.contains("@media (max-width: 600px)"));
        assert!(sheet.css.contains("@keyframes"));
        assert!(sheet.classes.contains_key("a"));
        assert!(!sheet.classes.contains_key("from"));
    }

    #[test]
    fn test_comments_removed_urls_kept() {
        let sheet = compile("// note\n.a { /* x */ background: url(http://cdn/x.png); }");
        assert!(sheet.css.contains("http://cdn/x.png"));
        assert!(!sheet.css.contains("note"));
    }

    #[test]
    fn test_vendor_prefixes() {
        let sheet = compile(".a { user-select: none; }");
        assert!(sheet.css.contains("-webkit-user-select: none"));
        assert!(sheet.css.contains("user-select: none"));
    }

    #[test]
    fn test_minified_output() {
        let sheet = process_stylesheet(".a > .b {\n  color: red;\n  margin: 0 auto;\n}\n", "x.css", true).unwrap();
        let (a, b) = (&sheet.classes["a"], &sheet.classes["b"]);
        assert_eq!(sheet.css, format!(".{a}>.{b}{{color:red;margin:0 auto}}"));
    }

    #[test]
    fn test_invalid_css_is_an_error() {
        assert!(process_stylesheet("..a { color: red; }", "x.css", false).is_err());
    }

    #[test]
    fn test_rewrite_urls() {
        let css = ".a { background: url('./img/logo.png'); } .b { background: url(data:image/png;base64,AA); }";
        let out = rewrite_urls(css, |target| Ok(Some(format!("styles/{target}")))).unwrap();
        assert!(out.contains("url(\"styles/./img/logo.png\")"));
        assert!(out.contains("url(data:image/png;base64,AA)"));
    }

    #[test]
    fn test_class_map_module() {
        let mut classes = IndexMap::new();
        classes.insert("title".to_string(), "a__title__Xy12ab".to_string());
        assert_eq!(
            class_map_module(&classes),
            r#"module.exports = {"title":"a__title__Xy12ab"};"#
        );
    }
}
