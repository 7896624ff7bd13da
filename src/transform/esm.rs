//! ES module syntax to CommonJS
//!
//! Import and export statements are recognised at the start of a line and
//! rewritten to `require` calls. Export assignments are appended after the
//! module body in declaration order, so the host sees the exports in the
//! order they were written. Imported names are bound once, when the import
//! runs; live bindings are not emulated.

use once_cell::sync::Lazy;
use regex::Regex;

/// Marks a module compiled from ES syntax
pub const ES_MODULE_MARKER: &str = "Object.defineProperty(exports, \"__esModule\", { value: true });";

/// Name bound to an anonymous `export default` expression
pub const DEFAULT_EXPORT_BINDING: &str = "__default_export__";

static IMPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*import\s+(?:([\w$]+)\s*(?:,\s*)?)?(\*\s*as\s+[\w$]+|\{[^}]*\})?\s*from\s*["']([^"']+)["'][ \t]*;?"#,
    )
    .unwrap()
});

static IMPORT_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^[ \t]*import\s*["']([^"']+)["'][ \t]*;?"#).unwrap());

static EXPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s*(\{[^}]*\})\s*from\s*["']([^"']+)["'][ \t]*;?"#).unwrap()
});

static EXPORT_STAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s*\*\s*(?:as\s+([\w$]+)\s*)?from\s*["']([^"']+)["'][ \t]*;?"#)
        .unwrap()
});

static EXPORT_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^[ \t]*export\s*(\{[^}]*\})[ \t]*;?"#).unwrap());

static EXPORT_DEFAULT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*export\s+default\s+((?:async\s+)?function\b\s*\*?\s*([\w$]+)?|class\b\s*([\w$]+)?)"#,
    )
    .unwrap()
});

static EXPORT_DEFAULT_EXPR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^[ \t]*export\s+default\s+"#).unwrap());

static EXPORT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*export\s+((?:async\s+)?function\b\s*\*?\s*([\w$]+)|class\s+([\w$]+)|(?:const|let|var)\s+([\w$]+|\{[^}]*\}|\[[^\]]*\]))"#,
    )
    .unwrap()
});

static DYNAMIC_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bimport\s*\(\s*("[^"]+"|'[^']+')\s*\)"#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Kind {
    ImportFrom,
    ImportBare,
    ExportFrom,
    ExportStar,
    ExportList,
    ExportDefaultDecl,
    ExportDefaultExpr,
    ExportDecl,
}

impl Kind {
    fn pattern(self) -> &'static Regex {
        match self {
            Kind::ImportFrom => &IMPORT_FROM,
            Kind::ImportBare => &IMPORT_BARE,
            Kind::ExportFrom => &EXPORT_FROM,
            Kind::ExportStar => &EXPORT_STAR,
            Kind::ExportList => &EXPORT_LIST,
            Kind::ExportDefaultDecl => &EXPORT_DEFAULT_DECL,
            Kind::ExportDefaultExpr => &EXPORT_DEFAULT_EXPR,
            Kind::ExportDecl => &EXPORT_DECL,
        }
    }
}

/// Ordering matters: on equal start positions the earlier kind wins
const KINDS: [Kind; 8] = [
    Kind::ImportFrom,
    Kind::ImportBare,
    Kind::ExportFrom,
    Kind::ExportStar,
    Kind::ExportList,
    Kind::ExportDefaultDecl,
    Kind::ExportDefaultExpr,
    Kind::ExportDecl,
];

struct Statement {
    start: usize,
    end: usize,
    kind: Kind,
    groups: Vec<Option<String>>,
}

impl Statement {
    fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }
}

/// Rewrite import/export statements in `source` as CommonJS
pub fn to_commonjs(source: &str) -> String {
    let source = rewrite_dynamic_imports(source);

    let mut statements: Vec<Statement> = Vec::new();
    for kind in KINDS {
        for caps in kind.pattern().captures_iter(&source) {
            let Some(whole) = caps.get(0) else { continue };
            statements.push(Statement {
                start: whole.start(),
                end: whole.end(),
                kind,
                groups: caps.iter().map(|g| g.map(|m| m.as_str().to_string())).collect(),
            });
        }
    }
    statements.sort_by_key(|s| (s.start, s.kind));

    let mut out = String::with_capacity(source.len());
    let mut exports: Vec<String> = Vec::new();
    let mut cursor = 0;
    let mut counter = 0;

    for statement in statements.iter() {
        if statement.start < cursor {
            continue;
        }
        out.push_str(&source[cursor..statement.start]);
        out.push_str(&rewrite(statement, &mut counter, &mut exports));
        cursor = statement.end;
    }
    out.push_str(&source[cursor..]);

    if statements.is_empty() {
        return out;
    }

    let mut module = String::with_capacity(out.len() + 128);
    module.push_str(ES_MODULE_MARKER);
    module.push('\n');
    module.push_str(&out);
    if !module.ends_with('\n') {
        module.push('\n');
    }
    for line in exports {
        module.push_str(&line);
        module.push('\n');
    }
    module
}

fn rewrite_dynamic_imports(source: &str) -> String {
    DYNAMIC_IMPORT
        .replace_all(source, "Promise.resolve().then(function () { return require($1); })")
        .into_owned()
}

fn rewrite(statement: &Statement, counter: &mut usize, exports: &mut Vec<String>) -> String {
    match statement.kind {
        Kind::ImportFrom => {
            let binding = next_binding("__import", counter);
            let specifier = statement.group(3).unwrap_or_default();
            let mut code = format!("var {binding} = require({});", quote(specifier));

            if let Some(default) = statement.group(1) {
                code.push_str(&format!(" var {default} = __default__({binding});"));
            }
            match statement.group(2) {
                Some(clause) if clause.starts_with('*') => {
                    let name = clause.rsplit(char::is_whitespace).next().unwrap_or_default();
                    code.push_str(&format!(" var {name} = {binding};"));
                }
                Some(clause) => {
                    for (imported, local) in specifier_list(clause) {
                        code.push_str(&format!(" var {local} = {binding}[{}];", quote(&imported)));
                    }
                }
                None => {}
            }
            code
        }
        Kind::ImportBare => format!("require({});", quote(statement.group(1).unwrap_or_default())),
        Kind::ExportFrom => {
            let binding = next_binding("__reexport", counter);
            let specifier = statement.group(2).unwrap_or_default();
            for (imported, exported) in specifier_list(statement.group(1).unwrap_or_default()) {
                exports.push(format!(
                    "exports[{}] = {binding}[{}];",
                    quote(&exported),
                    quote(&imported)
                ));
            }
            format!("var {binding} = require({});", quote(specifier))
        }
        Kind::ExportStar => {
            let binding = next_binding("__reexport", counter);
            let specifier = statement.group(2).unwrap_or_default();
            match statement.group(1) {
                Some(name) => exports.push(format!("exports[{}] = {binding};", quote(name))),
                None => exports.push(format!("__export_star__(exports, {binding});")),
            }
            format!("var {binding} = require({});", quote(specifier))
        }
        Kind::ExportList => {
            for (local, exported) in specifier_list(statement.group(1).unwrap_or_default()) {
                exports.push(format!("exports[{}] = {local};", quote(&exported)));
            }
            String::new()
        }
        Kind::ExportDefaultDecl => {
            let declaration = statement.group(1).unwrap_or_default();
            match statement.group(2).or_else(|| statement.group(3)) {
                Some(name) => {
                    exports.push(format!("exports[\"default\"] = {name};"));
                    declaration.to_string()
                }
                None => {
                    exports.push(format!("exports[\"default\"] = {DEFAULT_EXPORT_BINDING};"));
                    format!("var {DEFAULT_EXPORT_BINDING} = {declaration}")
                }
            }
        }
        Kind::ExportDefaultExpr => {
            exports.push(format!("exports[\"default\"] = {DEFAULT_EXPORT_BINDING};"));
            format!("var {DEFAULT_EXPORT_BINDING} = ")
        }
        Kind::ExportDecl => {
            let declaration = statement.group(1).unwrap_or_default();
            let names = match statement.group(2).or_else(|| statement.group(3)) {
                Some(name) => vec![name.to_string()],
                None => pattern_names(statement.group(4).unwrap_or_default()),
            };
            for name in names {
                exports.push(format!("exports[{}] = {name};", quote(&name)));
            }
            declaration.to_string()
        }
    }
}

fn next_binding(prefix: &str, counter: &mut usize) -> String {
    let binding = format!("{prefix}{counter}__");
    *counter += 1;
    binding
}

fn quote(text: &str) -> String {
    let inner = text.trim_matches(|c| c == '"' || c == '\'');
    serde_json::Value::String(inner.to_string()).to_string()
}

/// `{ a, b as c }` as `(a, a)`, `(b, c)` pairs
fn specifier_list(clause: &str) -> Vec<(String, String)> {
    clause
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|item| {
            let mut parts = item.split_whitespace();
            let first = parts.next()?.to_string();
            match (parts.next(), parts.next()) {
                (Some("as"), Some(second)) => Some((first, second.to_string())),
                _ => Some((first.clone(), first)),
            }
        })
        .collect()
}

/// Names bound by a declaration target: `x`, `{ a, b: c, ...d }` or `[a, , b]`
fn pattern_names(pattern: &str) -> Vec<String> {
    let pattern = pattern.trim();
    let inner = match pattern.chars().next() {
        Some('{') | Some('[') => &pattern[1..pattern.len().saturating_sub(1).max(1)],
        _ => return vec![pattern.to_string()],
    };

    inner
        .split(',')
        .filter_map(|part| {
            let part = part.split('=').next().unwrap_or_default();
            let part = part.rsplit(':').next().unwrap_or_default();
            let name = part.trim().trim_start_matches("...").trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_script_untouched() {
        let source = "var a = require('./a');\nmodule.exports = a;\n";
        assert_eq!(to_commonjs(source), source);
    }

    #[test]
    fn test_imports() {
        let out = to_commonjs(
            "import React, { useState as useS, useEffect } from 'react';\nimport * as utils from \"./utils\";\nimport './side';\n",
        );
        assert_eq!(
            out,
            concat!(
                "Object.defineProperty(exports, \"__esModule\", { value: true });\n",
                "var __import0__ = require(\"react\"); var React = __default__(__import0__); ",
                "var useS = __import0__[\"useState\"]; var useEffect = __import0__[\"useEffect\"];\n",
                "var __import1__ = require(\"./utils\"); var utils = __import1__;\n",
                "require(\"./side\");\n",
            )
        );
    }

    #[test]
    fn test_exports_follow_declaration_order() {
        let out = to_commonjs(
            "export class Button {}\nexport function helper() {}\nexport const { a, b: renamed } = obj;\nexport default Button;\n",
        );
        let tail: Vec<&str> = out.lines().filter(|l| l.starts_with("exports[")).collect();
        assert_eq!(
            tail,
            [
                "exports[\"Button\"] = Button;",
                "exports[\"helper\"] = helper;",
                "exports[\"a\"] = a;",
                "exports[\"renamed\"] = renamed;",
                "exports[\"default\"] = __default_export__;",
            ]
        );
        assert!(out.contains("\nclass Button {}\nfunction helper() {}\nconst { a, b: renamed } = obj;\nvar __default_export__ = Button;\n"));
    }

    #[test]
    fn test_export_default_declarations() {
        let out = to_commonjs("export default class Panel {}\n");
        assert!(out.contains("\nclass Panel {}\n"));
        assert!(out.ends_with("exports[\"default\"] = Panel;\n"));

        let out = to_commonjs("export default function () {}\n");
        assert!(out.contains("var __default_export__ = function () {}"));
    }

    #[test]
    fn test_reexports() {
        let out = to_commonjs("export { A, B as C } from './parts';\nexport * from './more';\nexport { local };\n");
        assert!(out.contains("var __reexport0__ = require(\"./parts\");"));
        assert!(out.contains("var __reexport1__ = require(\"./more\");"));
        let tail: Vec<&str> = out.lines().skip(4).collect();
        assert_eq!(
            tail,
            [
                "exports[\"A\"] = __reexport0__[\"A\"];",
                "exports[\"C\"] = __reexport0__[\"B\"];",
                "__export_star__(exports, __reexport1__);",
                "exports[\"local\"] = local;",
            ]
        );
    }

    #[test]
    fn test_dynamic_import() {
        let out = to_commonjs("const page = import('./page');");
        assert_eq!(
            out,
            "const page = Promise.resolve().then(function () { return require('./page'); });"
        );
    }
}
