//! JSX to `React.createElement` calls (classic runtime)

use anyhow::{bail, Result};

use super::lexer::{balanced_end, comment_end, is_ident_char, is_ident_start, string_end, template_end};

const PRAGMA: &str = "React.createElement";
const FRAGMENT: &str = "React.Fragment";

/// Characters after which `<` opens an element rather than comparing
const ELEMENT_CONTEXT: &[char] = &['(', ',', '=', ':', '?', '&', '|', '!', '{', '}', '[', ';', '>'];

/// Rewrite every JSX element in `source`
pub fn transform_jsx(source: &str) -> Result<String> {
    let chars: Vec<char> = source.chars().collect();
    transform_range(&chars, 0, chars.len())
}

fn transform_range(chars: &[char], start: usize, end: usize) -> Result<String> {
    let mut out = String::with_capacity(end - start);
    let mut last_sig: Option<char> = None;
    let mut last_word: Option<String> = None;
    let mut i = start;

    while i < end {
        let c = chars[i];

        if c == '"' || c == '\'' || c == '`' {
            let stop = if c == '`' {
                template_end(chars, i)
            } else {
                string_end(chars, i)
            };
            out.extend(&chars[i..stop.min(end)]);
            i = stop;
            last_sig = Some(c);
            last_word = None;
            continue;
        }
        if let Some(stop) = comment_end(chars, i) {
            out.extend(&chars[i..stop.min(end)]);
            i = stop;
            continue;
        }
        if is_ident_start(c) {
            let mut stop = i;
            while stop < end && is_ident_char(chars[stop]) {
                stop += 1;
            }
            let word: String = chars[i..stop].iter().collect();
            out.push_str(&word);
            last_sig = word.chars().last();
            last_word = Some(word);
            i = stop;
            continue;
        }

        if c == '<' && opens_element(chars, i, last_sig, last_word.as_deref()) {
            let (code, stop) = parse_element(chars, i)?;
            out.push_str(&code);
            i = stop;
            last_sig = Some(')');
            last_word = None;
            continue;
        }

        out.push(c);
        if !c.is_whitespace() {
            last_sig = Some(c);
            last_word = None;
        }
        i += 1;
    }

    Ok(out)
}

fn opens_element(chars: &[char], i: usize, last_sig: Option<char>, last_word: Option<&str>) -> bool {
    let next = chars.get(i + 1).copied();
    if !next.is_some_and(|n| is_ident_start(n) || n == '>') {
        return false;
    }

    match last_word {
        Some(word) => matches!(word, "return" | "yield" | "default" | "case" | "await"),
        None => last_sig.map_or(true, |s| ELEMENT_CONTEXT.contains(&s)),
    }
}

enum Prop {
    Named(String, String),
    Spread(String),
}

/// Parse one element starting at `<`; returns the call and the index after it
fn parse_element(chars: &[char], start: usize) -> Result<(String, usize)> {
    let mut i = start + 1;

    if chars.get(i) == Some(&'>') {
        let (children, stop) = parse_children(chars, i + 1, "")?;
        return Ok((render(FRAGMENT, &[], &children), stop));
    }

    let (name, after) = read_tag_name(chars, i);
    i = after;
    let mut props = Vec::new();

    loop {
        i = skip_space(chars, i);
        match chars.get(i) {
            None => bail!("unterminated JSX element <{name}>"),
            Some('/') if chars.get(i + 1) == Some(&'>') => {
                return Ok((render(&element_type(&name), &props, &[]), i + 2));
            }
            Some('>') => {
                let (children, stop) = parse_children(chars, i + 1, &name)?;
                return Ok((render(&element_type(&name), &props, &children), stop));
            }
            Some('{') => {
                let close = balanced_end(chars, i, '{', '}');
                let inner: String = chars[i + 1..close.saturating_sub(1)].iter().collect();
                let Some(expr) = inner.trim().strip_prefix("...") else {
                    bail!("expected spread attribute in <{name}>, found {{{inner}}}");
                };
                props.push(Prop::Spread(transform_jsx(expr.trim())?));
                i = close;
            }
            Some(&c) if is_ident_start(c) => {
                let (attr, after) = read_tag_name(chars, i);
                i = skip_space(chars, after);
                if chars.get(i) != Some(&'=') {
                    props.push(Prop::Named(attr, "true".to_string()));
                    continue;
                }
                i = skip_space(chars, i + 1);
                let (value, after) = attribute_value(chars, i, &name)?;
                props.push(Prop::Named(attr, value));
                i = after;
            }
            Some(&c) => bail!("unexpected '{c}' in <{name}>"),
        }
    }
}

fn attribute_value(chars: &[char], i: usize, tag: &str) -> Result<(String, usize)> {
    match chars.get(i) {
        Some('"') | Some('\'') => {
            let quote = chars[i];
            let mut stop = i + 1;
            while stop < chars.len() && chars[stop] != quote {
                stop += 1;
            }
            let raw: String = chars[i + 1..stop.min(chars.len())].iter().collect();
            Ok((string_literal(&decode_entities(&raw)), stop + 1))
        }
        Some('{') => {
            let close = balanced_end(chars, i, '{', '}');
            let inner: String = chars[i + 1..close.saturating_sub(1)].iter().collect();
            Ok((transform_jsx(inner.trim())?, close))
        }
        Some('<') => parse_element(chars, i),
        _ => bail!("missing attribute value in <{tag}>"),
    }
}

/// Parse children up to the closing tag for `name` ("" for fragments)
fn parse_children(chars: &[char], start: usize, name: &str) -> Result<(Vec<String>, usize)> {
    let mut children = Vec::new();
    let mut i = start;

    loop {
        match chars.get(i) {
            None => bail!("missing closing tag for <{name}>"),
            Some('<') if chars.get(i + 1) == Some(&'/') => {
                let (closing, after) = read_tag_name(chars, skip_space(chars, i + 2));
                if closing != name {
                    bail!("expected </{name}>, found </{closing}>");
                }
                let close = skip_space(chars, after);
                if chars.get(close) != Some(&'>') {
                    bail!("malformed closing tag </{name}");
                }
                return Ok((children, close + 1));
            }
            Some('<') => {
                let (child, after) = parse_element(chars, i)?;
                children.push(child);
                i = after;
            }
            Some('{') => {
                let close = balanced_end(chars, i, '{', '}');
                let inner: String = chars[i + 1..close.saturating_sub(1)].iter().collect();
                if !is_empty_expression(&inner) {
                    children.push(transform_jsx(inner.trim())?);
                }
                i = close;
            }
            Some(_) => {
                let mut stop = i;
                while stop < chars.len() && chars[stop] != '<' && chars[stop] != '{' {
                    stop += 1;
                }
                let raw: String = chars[i..stop].iter().collect();
                if let Some(text) = clean_text(&raw) {
                    children.push(string_literal(&decode_entities(&text)));
                }
                i = stop;
            }
        }
    }
}

fn is_empty_expression(inner: &str) -> bool {
    let chars: Vec<char> = inner.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
        } else if let Some(end) = comment_end(&chars, i) {
            i = end;
        } else {
            return false;
        }
    }
    true
}

fn read_tag_name(chars: &[char], start: usize) -> (String, usize) {
    let mut i = start;
    while i < chars.len() && (is_ident_char(chars[i]) || matches!(chars[i], '.' | '-' | ':')) {
        i += 1;
    }
    (chars[start..i].iter().collect(), i)
}

fn skip_space(chars: &[char], start: usize) -> usize {
    let mut i = start;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
        } else if let Some(end) = comment_end(chars, i) {
            i = end;
        } else {
            break;
        }
    }
    i
}

/// Lowercase names without a member access are intrinsic elements
fn element_type(name: &str) -> String {
    let intrinsic = name.chars().next().is_some_and(|c| c.is_ascii_lowercase()) && !name.contains('.');
    if intrinsic {
        string_literal(name)
    } else {
        name.to_string()
    }
}

fn render(element: &str, props: &[Prop], children: &[String]) -> String {
    let mut args = vec![element.to_string(), render_props(props)];
    args.extend(children.iter().cloned());
    format!("{PRAGMA}({})", args.join(", "))
}

fn render_props(props: &[Prop]) -> String {
    if props.is_empty() {
        return "null".to_string();
    }

    let mut groups: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for prop in props {
        match prop {
            Prop::Named(name, value) => current.push(format!("{}: {value}", property_key(name))),
            Prop::Spread(expr) => {
                if !current.is_empty() {
                    groups.push(format!("{{{}}}", current.join(", ")));
                    current.clear();
                }
                groups.push(expr.clone());
            }
        }
    }
    if !current.is_empty() {
        groups.push(format!("{{{}}}", current.join(", ")));
    }

    if props.iter().any(|p| matches!(p, Prop::Spread(_))) {
        format!("Object.assign({{}}, {})", groups.join(", "))
    } else {
        groups.join(", ")
    }
}

fn property_key(name: &str) -> String {
    let plain = name.chars().next().is_some_and(is_ident_start) && name.chars().all(is_ident_char);
    if plain {
        name.to_string()
    } else {
        string_literal(name)
    }
}

fn string_literal(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

/// Collapse JSX text the way React compilers do: lines are trimmed,
/// whitespace-only lines dropped, the rest joined with single spaces.
fn clean_text(raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw.split('\n').collect();
    let last = lines.len() - 1;
    let mut parts = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        let line = line.trim_end_matches('\r');
        let mut line = line.replace('\t', " ");
        if index != 0 {
            line = line.trim_start().to_string();
        }
        if index != last {
            line = line.trim_end().to_string();
        }
        if !line.is_empty() {
            parts.push(line);
        }
    }

    if parts.is_empty() || parts.iter().all(|p| p.trim().is_empty()) && lines.len() > 1 {
        return None;
    }
    Some(parts.join(" "))
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let Some(semi) = tail.find(';').filter(|&s| s <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };

        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };

        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsic_element() {
        let out = transform_jsx(r#"const a = <div className="box">Hello</div>;"#).unwrap();
        assert_eq!(
            out,
            r#"const a = React.createElement("div", {className: "box"}, "Hello");"#
        );
    }

    #[test]
    fn test_component_with_expressions() {
        let out = transform_jsx("return <Panel title={props.title} open onClose={() => close(1)} />;").unwrap();
        assert_eq!(
            out,
            "return React.createElement(Panel, {title: props.title, open: true, onClose: () => close(1)});"
        );
    }

    #[test]
    fn test_nested_children_and_whitespace() {
        let source = "render() {\n  return (\n    <ul>\n      <li>{item}</li>\n      <li>two words</li>\n    </ul>\n  );\n}";
        let out = transform_jsx(source).unwrap();
        assert!(out.contains(
            r#"React.createElement("ul", null, React.createElement("li", null, item), React.createElement("li", null, "two words"))"#
        ));
    }

    #[test]
    fn test_fragment_and_spread() {
        let out = transform_jsx("x = <><A {...rest} b=\"1\" /></>").unwrap();
        assert_eq!(
            out,
            r#"x = React.createElement(React.Fragment, null, React.createElement(A, Object.assign({}, rest, {b: "1"})))"#
        );
    }

    #[test]
    fn test_nested_jsx_in_expression() {
        let out = transform_jsx("f(items.map(i => <b key={i}>{i}</b>))").unwrap();
        assert_eq!(
            out,
            "f(items.map(i => React.createElement(\"b\", {key: i}, i)))"
        );
    }

    #[test]
    fn test_comparisons_untouched() {
        let source = "if (a < b && c > d) { x = y<z; }";
        assert_eq!(transform_jsx(source).unwrap(), source);
    }

    #[test]
    fn test_dashed_attributes_and_entities() {
        let out = transform_jsx(r#"<p data-id="7">a &amp; b</p>"#).unwrap();
        assert_eq!(out, r#"React.createElement("p", {"data-id": "7"}, "a & b")"#);
    }

    #[test]
    fn test_mismatched_closing_tag() {
        assert!(transform_jsx("<div></span>").is_err());
    }

    #[test]
    fn test_comment_only_expression_dropped() {
        let out = transform_jsx("<div>{/* nothing */}</div>").unwrap();
        assert_eq!(out, r#"React.createElement("div", null)"#);
    }
}
