//! TypeScript type stripping
//!
//! Removes type-only syntax so the remaining text is plain JavaScript:
//! annotations, interfaces, type aliases, `declare` statements, type-only
//! imports/exports, generics, casts, access modifiers and non-null
//! assertions. Enums are lowered to the usual object form. This is a
//! scanner, not a type checker; it relies on the source being valid TS.

use super::lexer::{
    balanced_end, comment_end, is_ident_char, is_ident_start, peek_ident, read_ident, skip_ws,
    string_end, template_end,
};

const MODIFIERS: &[&str] = &[
    "public",
    "private",
    "protected",
    "readonly",
    "override",
    "declare",
    "abstract",
];

/// Keywords after which `<` starts an expression rather than type arguments
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return", "yield", "await", "typeof", "case", "default", "in", "of", "new", "delete", "void",
    "throw", "else", "do",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Paren,
    Square,
    Block,
    Object,
    ClassBody,
}

struct Stripper<'a> {
    chars: &'a [char],
    i: usize,
    out: String,
    /// Open brackets with the number of unresolved `?` ternaries in each
    frames: Vec<(Frame, usize)>,
    last_sig: Option<char>,
    last_word: Option<String>,
    newline_since_sig: bool,
    last_arrow: bool,
    decl_pending: bool,
    class_pending: bool,
    /// Frame depth of an `import {..}` / `export {..}` clause in progress
    clause_depth: Option<usize>,
    jsx: bool,
}

/// Strip TypeScript syntax from `source`.
///
/// With `jsx` set, `<` is never treated as the start of arrow-function type
/// parameters.
pub fn strip_types(source: &str, jsx: bool) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut stripper = Stripper {
        chars: &chars,
        i: 0,
        out: String::with_capacity(source.len()),
        frames: vec![(Frame::Block, 0)],
        last_sig: None,
        last_word: None,
        newline_since_sig: false,
        last_arrow: false,
        decl_pending: false,
        class_pending: false,
        clause_depth: None,
        jsx,
    };
    stripper.run();
    stripper.out
}

impl<'a> Stripper<'a> {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.i + offset).copied()
    }

    fn copy_range(&mut self, end: usize) {
        self.out.extend(&self.chars[self.i..end.min(self.chars.len())]);
        self.i = end;
    }

    fn emit(&mut self, c: char) {
        self.out.push(c);
        self.i += 1;
        self.last_sig = Some(c);
        self.last_word = None;
        self.last_arrow = false;
        self.newline_since_sig = false;
    }

    fn frame(&self) -> Frame {
        self.frames.last().map(|f| f.0).unwrap_or(Frame::Block)
    }

    fn at_statement_start(&self) -> bool {
        matches!(self.last_sig, None | Some(';') | Some('}') | Some('{')) || self.newline_since_sig
    }

    fn run(&mut self) {
        while self.i < self.chars.len() {
            let c = self.chars[self.i];

            if c == '"' || c == '\'' {
                let end = string_end(self.chars, self.i);
                self.copy_range(end);
                self.mark_value(c);
                continue;
            }
            if c == '`' {
                let end = template_end(self.chars, self.i);
                self.copy_range(end);
                self.mark_value(c);
                continue;
            }
            if let Some(end) = comment_end(self.chars, self.i) {
                self.copy_range(end);
                continue;
            }
            if c.is_whitespace() {
                if c == '\n' {
                    self.newline_since_sig = true;
                    if self.clause_depth == Some(self.frames.len()) {
                        self.clause_depth = None;
                    }
                }
                self.out.push(c);
                self.i += 1;
                continue;
            }
            if is_ident_start(c) {
                let (word, end) = read_ident(self.chars, self.i);
                self.word(word, end);
                continue;
            }
            if c.is_ascii_digit() {
                let mut end = self.i;
                while end < self.chars.len()
                    && (is_ident_char(self.chars[end]) || self.chars[end] == '.')
                {
                    end += 1;
                }
                self.copy_range(end);
                self.mark_value('0');
                continue;
            }

            self.punct(c);
        }
    }

    fn mark_value(&mut self, c: char) {
        self.last_sig = Some(c);
        self.last_word = None;
        self.last_arrow = false;
        self.newline_since_sig = false;
    }

    fn punct(&mut self, c: char) {
        match c {
            '(' => {
                self.emit(c);
                self.frames.push((Frame::Paren, 0));
            }
            '[' => {
                self.emit(c);
                self.frames.push((Frame::Square, 0));
            }
            '{' => {
                let frame = if self.class_pending {
                    Frame::ClassBody
                } else if self.expects_expression() {
                    Frame::Object
                } else {
                    Frame::Block
                };
                self.class_pending = false;
                self.emit(c);
                self.frames.push((frame, 0));
            }
            ')' | ']' | '}' => {
                if self.frames.len() > 1 {
                    self.frames.pop();
                }
                self.emit(c);
            }
            ':' => self.colon(),
            '?' => self.question(),
            '!' => {
                let after_value = self
                    .last_sig
                    .is_some_and(|s| is_ident_char(s) || s == ')' || s == ']');
                if after_value && self.peek(1) != Some('=') && self.last_word.as_deref() != Some("return") {
                    self.i += 1;
                } else {
                    self.emit(c);
                }
            }
            '<' => self.angle(),
            '=' => {
                self.decl_pending = false;
                if self.peek(1) == Some('>') {
                    self.emit('=');
                    self.emit('>');
                    self.last_arrow = true;
                } else {
                    self.emit(c);
                }
            }
            ';' => {
                self.decl_pending = false;
                if self.clause_depth == Some(self.frames.len()) {
                    self.clause_depth = None;
                }
                self.emit(c);
            }
            _ => self.emit(c),
        }
    }

    /// Whether a `{` here opens an object literal
    fn expects_expression(&self) -> bool {
        if self.last_arrow {
            return false;
        }
        if let Some(word) = &self.last_word {
            return matches!(
                word.as_str(),
                "const" | "let" | "var" | "return" | "typeof" | "yield" | "await" | "case" | "in" | "of" | "default" | "throw"
            );
        }
        matches!(
            self.last_sig,
            Some('=' | '(' | ',' | ':' | '[' | '?' | '!' | '&' | '|' | '+' | '-' | '*' | '%' | '<')
        )
    }

    fn colon(&mut self) {
        if let Some(top) = self.frames.last_mut() {
            if top.1 > 0 {
                top.1 -= 1;
                self.emit(':');
                return;
            }
        }

        let annotation = match self.frame() {
            Frame::Paren | Frame::ClassBody => true,
            Frame::Block | Frame::Square => self.decl_pending || self.last_sig == Some(')'),
            Frame::Object => self.last_sig == Some(')'),
        };

        if annotation {
            self.i += 1;
            self.skip_type();
        } else {
            self.emit(':');
        }
    }

    fn question(&mut self) {
        let next = skip_ws(self.chars, self.i + 1);
        let following = self.chars.get(next).copied();

        match following {
            Some('.') if !self.chars.get(next + 1).is_some_and(|c| c.is_ascii_digit()) => {
                self.emit('?')
            }
            Some('?') => {
                self.emit('?');
                self.emit('?');
            }
            Some(':') | Some(',') | Some(')') | Some('=') | Some(';')
                if matches!(self.frame(), Frame::Paren | Frame::ClassBody) =>
            {
                // Optional parameter or property marker
                self.i += 1;
            }
            _ => {
                if let Some(top) = self.frames.last_mut() {
                    top.1 += 1;
                }
                self.emit('?');
            }
        }
    }

    fn angle(&mut self) {
        let end = self.angle_end(self.i);
        let after = end.map(|e| skip_ws(self.chars, e));
        let next = after.and_then(|a| self.chars.get(a).copied());

        let declaration = matches!(
            self.previous_keyword().as_deref(),
            Some("class") | Some("function") | Some("interface")
        ) && self.last_word.is_some();

        let call_site = self.last_sig.is_some_and(is_ident_char)
            && self
                .last_word
                .as_deref()
                .map_or(true, |w| !EXPRESSION_KEYWORDS.contains(&w))
            && next == Some('(');

        let member = self.frame() == Frame::ClassBody && self.last_word.is_some() && next == Some('(');

        let heritage = self.class_pending && self.last_word.is_some();

        let arrow = !self.jsx
            && matches!(self.last_sig, Some('=' | '(' | ',' | ':'))
            && self.last_word.is_none()
            && next == Some('(');

        if let Some(end) = end {
            if declaration || heritage || call_site || member || arrow {
                self.i = end;
                return;
            }
        }

        self.emit('<');
    }

    /// The keyword before the identifier that was just emitted
    fn previous_keyword(&self) -> Option<String> {
        let text: Vec<char> = self.out.chars().rev().collect();
        let mut i = 0;
        while i < text.len() && text[i].is_whitespace() {
            i += 1;
        }
        while i < text.len() && is_ident_char(text[i]) {
            i += 1;
        }
        while i < text.len() && text[i].is_whitespace() {
            i += 1;
        }
        let start = i;
        while i < text.len() && is_ident_char(text[i]) {
            i += 1;
        }
        if i == start {
            return None;
        }
        Some(text[start..i].iter().rev().collect())
    }

    /// End of a type argument list starting at `start`, if it looks like one
    fn angle_end(&self, start: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut i = start;
        let mut prev = '\0';

        while i < self.chars.len() {
            let c = self.chars[i];
            match c {
                '"' | '\'' => {
                    i = string_end(self.chars, i);
                    prev = c;
                    continue;
                }
                '<' => depth += 1,
                '>' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                '=' if self.chars.get(i + 1) == Some(&'>') => {
                    i += 2;
                    prev = '>';
                    continue;
                }
                '&' | '|' if prev == c => return None,
                ';' | '!' | '+' | '*' | '/' | '%' | '^' | '~' | '@' | '#' | '\\' | '`' => {
                    return None
                }
                _ => {}
            }
            prev = c;
            i += 1;
        }

        None
    }

    /// Skip a type expression following `:`, `as` or `satisfies`
    fn skip_type(&mut self) {
        let len = self.chars.len();
        let mut depth = 0usize;
        let mut consumed_any = false;
        let mut last: Option<char> = None;
        let mut closed_paren = false;

        while self.i < len {
            let c = self.chars[self.i];

            if c == '"' || c == '\'' {
                self.i = string_end(self.chars, self.i);
                consumed_any = true;
                last = Some(c);
                closed_paren = false;
                continue;
            }
            if let Some(end) = comment_end(self.chars, self.i) {
                self.i = end;
                continue;
            }

            if depth == 0 {
                if c == '=' && self.peek(1) == Some('>') {
                    if closed_paren {
                        self.i += 2;
                        last = Some('>');
                        closed_paren = false;
                        continue;
                    }
                    break;
                }
                if matches!(c, '=' | ',' | ')' | ';' | '}' | ']') {
                    break;
                }
                if c == '{' && consumed_any && !matches!(last, Some('|') | Some('&')) {
                    break;
                }
                if c == '\n' && consumed_any {
                    let next = skip_ws(self.chars, self.i);
                    let continues = matches!(last, Some('|') | Some('&') | Some(':') | Some(','))
                        || matches!(self.chars.get(next), Some('|') | Some('&'));
                    if !continues {
                        break;
                    }
                }
            }

            match c {
                '<' | '(' | '[' | '{' => depth += 1,
                '>' => depth = depth.saturating_sub(1),
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                '=' if self.peek(1) == Some('>') => {
                    self.i += 2;
                    last = Some('>');
                    continue;
                }
                _ => {}
            }

            if !c.is_whitespace() {
                consumed_any = true;
                last = Some(c);
                closed_paren = c == ')' && depth == 0;
            }
            self.i += 1;
        }

        // Keep tokens on either side apart
        if !self.out.ends_with(char::is_whitespace) {
            self.out.push(' ');
        }
    }

    fn word(&mut self, word: String, end: usize) {
        let statement_start = self.at_statement_start();

        match word.as_str() {
            "interface" if statement_start && peek_ident(self.chars, end).is_some() => {
                let open = self.find_from(end, '{');
                self.i = balanced_end(self.chars, open, '{', '}');
                return;
            }
            "type" if statement_start && self.is_type_alias(end) => {
                self.i = end;
                self.skip_statement();
                return;
            }
            "declare" if statement_start && peek_ident(self.chars, end).is_some() => {
                self.i = end;
                self.skip_statement();
                return;
            }
            "enum" if statement_start => {
                self.lower_enum(end);
                return;
            }
            "const" if matches!(peek_ident(self.chars, end), Some((ref w, _)) if w == "enum") => {
                // `const enum` lowers like a regular enum
                let (_, after) = peek_ident(self.chars, end).unwrap_or_default();
                self.lower_enum(after);
                return;
            }
            "import" if statement_start => {
                if matches!(peek_ident(self.chars, end), Some((ref w, _)) if w == "type") {
                    self.i = end;
                    self.skip_statement();
                    return;
                }
                self.open_clause(end);
            }
            "export" if statement_start => match peek_ident(self.chars, end) {
                Some((next, after)) if next == "type" => {
                    if self.chars.get(skip_ws(self.chars, after)) == Some(&'{') {
                        self.i = end;
                        self.skip_statement();
                    } else {
                        // `export type X = ...` - let the alias branch drop it
                        self.i = end;
                    }
                    return;
                }
                Some((next, _)) if next == "interface" || next == "declare" => {
                    self.i = end;
                    return;
                }
                _ => self.open_clause(end),
            },
            "implements" if self.class_pending => {
                self.i = self.find_from(end, '{');
                return;
            }
            "as" | "satisfies" if self.after_value() && self.clause_depth.is_none() => {
                self.i = end;
                self.skip_type();
                return;
            }
            w if MODIFIERS.contains(&w) && self.is_modifier(end) => {
                self.i = skip_ws(self.chars, end);
                return;
            }
            "class" => self.class_pending = true,
            "let" | "const" | "var" => self.decl_pending = true,
            "from" if self.clause_depth.is_some() => self.clause_depth = None,
            _ => {}
        }

        self.out.push_str(&word);
        self.i = end;
        self.last_sig = word.chars().last();
        self.last_word = Some(word);
        self.last_arrow = false;
        self.newline_since_sig = false;
    }

    fn open_clause(&mut self, end: usize) {
        let next = skip_ws(self.chars, end);
        if matches!(self.chars.get(next), Some('{') | Some('*')) {
            self.clause_depth = Some(self.frames.len());
        }
    }

    fn after_value(&self) -> bool {
        match &self.last_word {
            Some(w) => !EXPRESSION_KEYWORDS.contains(&w.as_str()) && w != "import" && w != "export",
            None => self
                .last_sig
                .is_some_and(|s| is_ident_char(s) || matches!(s, ')' | ']' | '}' | '"' | '\'' | '`')),
        }
    }

    fn is_modifier(&self, end: usize) -> bool {
        let frame = self.frame();
        let leading = self
            .last_word
            .as_deref()
            .map_or(true, |w| w == "export" || w == "default");
        if !matches!(frame, Frame::ClassBody | Frame::Paren) && !leading {
            return false;
        }
        match peek_ident(self.chars, end) {
            Some((next, _)) => {
                frame == Frame::ClassBody
                    || frame == Frame::Paren
                    || next == "class"
                    || MODIFIERS.contains(&next.as_str())
            }
            None => {
                let next = skip_ws(self.chars, end);
                frame == Frame::ClassBody && matches!(self.chars.get(next), Some('[') | Some('#'))
            }
        }
    }

    fn is_type_alias(&self, end: usize) -> bool {
        let Some((_, after)) = peek_ident(self.chars, end) else {
            return false;
        };
        let mut i = skip_ws(self.chars, after);
        if self.chars.get(i) == Some(&'<') {
            match self.angle_end(i) {
                Some(e) => i = skip_ws(self.chars, e),
                None => return false,
            }
        }
        self.chars.get(i) == Some(&'=') && self.chars.get(i + 1) != Some(&'=')
    }

    fn find_from(&self, start: usize, target: char) -> usize {
        let mut i = start;
        while i < self.chars.len() && self.chars[i] != target {
            i += 1;
        }
        i
    }

    /// Skip to the end of the current statement: `;`, or a line end that does
    /// not continue the statement, with brackets balanced.
    fn skip_statement(&mut self) {
        let len = self.chars.len();
        let mut depth = 0usize;
        let mut last: Option<char> = None;

        while self.i < len {
            let c = self.chars[self.i];

            if c == '"' || c == '\'' {
                self.i = string_end(self.chars, self.i);
                last = Some(c);
                continue;
            }
            if let Some(end) = comment_end(self.chars, self.i) {
                self.i = end;
                continue;
            }

            match c {
                '{' | '(' | '[' | '<' => depth += 1,
                '}' | ')' | ']' | '>' => depth = depth.saturating_sub(1),
                ';' if depth == 0 => {
                    self.i += 1;
                    return;
                }
                '\n' if depth == 0 => {
                    let next = skip_ws(self.chars, self.i);
                    let continues = matches!(last, Some('=') | Some('|') | Some('&') | Some(','))
                        || matches!(self.chars.get(next), Some('|') | Some('&') | Some('='));
                    if !continues {
                        return;
                    }
                }
                _ => {}
            }

            if !c.is_whitespace() {
                last = Some(c);
            }
            self.i += 1;
        }
    }

    /// Lower `enum Name { ... }` to a plain object
    fn lower_enum(&mut self, end: usize) {
        let Some((name, after)) = peek_ident(self.chars, end) else {
            self.out.push_str("enum");
            self.i = end;
            return;
        };

        let open = self.find_from(after, '{');
        let close = balanced_end(self.chars, open, '{', '}');
        let body: String = self.chars[(open + 1).min(close)..close.saturating_sub(1).max(open + 1)]
            .iter()
            .collect();

        let mut out = format!("var {name}; (function ({name}) {{");
        let mut next: Option<f64> = Some(0.0);

        for member in split_top_level(&body) {
            let member = member.trim();
            if member.is_empty() {
                continue;
            }
            let (key, init) = match member.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (member, None),
            };
            let key = key.trim_matches(|c| c == '"' || c == '\'');
            let key_lit = serde_json::Value::String(key.to_string()).to_string();

            match init {
                Some(v) if v.starts_with('"') || v.starts_with('\'') => {
                    out.push_str(&format!(" {name}[{key_lit}] = {v};"));
                    next = None;
                }
                Some(v) => {
                    out.push_str(&format!(" {name}[{name}[{key_lit}] = {v}] = {key_lit};"));
                    next = v.parse::<f64>().ok().map(|n| n + 1.0);
                }
                None => {
                    let value = next.unwrap_or(0.0);
                    out.push_str(&format!(" {name}[{name}[{key_lit}] = {value}] = {key_lit};"));
                    next = Some(value + 1.0);
                }
            }
        }

        out.push_str(&format!(" }})({name} || ({name} = {{}}));"));
        self.out.push_str(&out);
        self.i = close;
        self.mark_value(';');
    }
}

/// Split on commas that are not nested in brackets or strings
fn split_top_level(body: &str) -> Vec<String> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' || c == '`' {
            let end = if c == '`' {
                template_end(&chars, i)
            } else {
                string_end(&chars, i)
            };
            current.extend(&chars[i..end]);
            i = end;
            continue;
        }
        if let Some(end) = comment_end(&chars, i) {
            i = end;
            continue;
        }
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                i += 1;
                continue;
            }
            _ => {}
        }
        current.push(c);
        i += 1;
    }

    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(source: &str) -> String {
        strip_types(source, false)
    }

    fn squash(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_parameter_and_return_annotations() {
        let out = strip("function add(a: number, b?: number): number { return a + (b || 0); }");
        assert_eq!(squash(&out), "function add(a , b ) { return a + (b || 0); }");
    }

    #[test]
    fn test_variable_annotations() {
        let out = strip("const names: Array<string> = [];\nlet count: number\ncount = 1;");
        assert_eq!(squash(&out), "const names = []; let count count = 1;");
    }

    #[test]
    fn test_object_literals_untouched() {
        let source = "const manifest = { type: Button, label: 'x', nested: { a: 1 } };";
        assert_eq!(strip(source), source);
    }

    #[test]
    fn test_ternaries_untouched() {
        let source = "call(flag ? Left : Right); const x = a ? b : c;";
        assert_eq!(strip(source), source);
    }

    #[test]
    fn test_interfaces_and_aliases_removed() {
        let source = "interface Props {\n  title: string;\n}\ntype Kind = 'a' | 'b';\nexport type Id = string\nconst x = 1;";
        assert_eq!(squash(&strip(source)), "const x = 1;");
    }

    #[test]
    fn test_type_imports_removed() {
        let source = "import type { Manifest } from './types';\nimport React from 'react';";
        assert_eq!(squash(&strip(source)), "import React from 'react';");
    }

    #[test]
    fn test_class_members() {
        let source = "export class Button extends Base implements Widget {\n  static manifest: Manifest = { type: 'button' };\n  private count: number = 0;\n  label?: string;\n  render(): void {}\n}";
        let out = squash(&strip(source));
        assert_eq!(
            out,
            "export class Button extends Base { static manifest = { type: 'button' }; count = 0; label ; render() {} }"
        );
    }

    #[test]
    fn test_generics_and_casts() {
        let source = "function first<T>(items: T[]): T { return items[0] as T; }\nconst [v] = useState<string>('');";
        let out = squash(&strip(source));
        assert_eq!(out, "function first(items ) { return items[0] ; } const [v] = useState('');");
    }

    #[test]
    fn test_comparisons_survive() {
        let source = "if (a < b && c > d) { x = a < 3; }";
        assert_eq!(strip(source), source);
    }

    #[test]
    fn test_non_null_assertions() {
        assert_eq!(strip("el!.focus(); a != b;"), "el.focus(); a != b;");
    }

    #[test]
    fn test_export_alias_kept() {
        let source = "export { Button as default, Panel };";
        assert_eq!(strip(source), source);
    }

    #[test]
    fn test_enum_lowering() {
        let out = strip("enum Color { Red, Green = 5, Blue }");
        assert!(out.contains("Color[Color[\"Red\"] = 0] = \"Red\""));
        assert!(out.contains("Color[Color[\"Green\"] = 5] = \"Green\""));
        assert!(out.contains("Color[Color[\"Blue\"] = 6] = \"Blue\""));
    }

    #[test]
    fn test_strings_untouched() {
        let source = "const s = 'interface: string'; const t = `type ${a}: number`;";
        assert_eq!(strip(source), source);
    }
}
