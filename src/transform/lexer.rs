//! Character-level helpers shared by the source transforms

pub(crate) fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Index just past the quoted string starting at `start`.
///
/// Unterminated single/double quoted strings stop at the end of the line.
pub(crate) fn string_end(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            '\n' => return i,
            _ => i += 1,
        }
    }

    chars.len()
}

/// Index just past the template literal starting at `start`
pub(crate) fn template_end(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '`' => return i + 1,
            '$' if chars.get(i + 1) == Some(&'{') => i = balanced_end(chars, i + 1, '{', '}'),
            _ => i += 1,
        }
    }

    chars.len()
}

/// Index just past the comment starting at `start`, if one starts there
pub(crate) fn comment_end(chars: &[char], start: usize) -> Option<usize> {
    if chars.get(start) != Some(&'/') {
        return None;
    }

    match chars.get(start + 1) {
        Some('/') => {
            let mut i = start + 2;
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            Some(i)
        }
        Some('*') => {
            let mut i = start + 2;
            while i + 1 < chars.len() {
                if chars[i] == '*' && chars[i + 1] == '/' {
                    return Some(i + 2);
                }
                i += 1;
            }
            Some(chars.len())
        }
        _ => None,
    }
}

/// Index just past the bracket that closes the one at `start`.
///
/// Strings, templates and comments are skipped.
pub(crate) fn balanced_end(chars: &[char], start: usize, open: char, close: char) -> usize {
    let mut depth = 0usize;
    let mut i = start;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' || c == '\'' {
            i = string_end(chars, i);
            continue;
        }
        if c == '`' {
            i = template_end(chars, i);
            continue;
        }
        if let Some(end) = comment_end(chars, i) {
            i = end;
            continue;
        }

        if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return i + 1;
            }
        }
        i += 1;
    }

    chars.len()
}

/// Read an identifier starting at `start`
pub(crate) fn read_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut i = start;
    while i < chars.len() && is_ident_char(chars[i]) {
        i += 1;
    }
    (chars[start..i].iter().collect(), i)
}

/// Index of the next non-whitespace character at or after `start`
pub(crate) fn skip_ws(chars: &[char], start: usize) -> usize {
    let mut i = start;
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

/// The identifier beginning at the next non-whitespace character, if any
pub(crate) fn peek_ident(chars: &[char], start: usize) -> Option<(String, usize)> {
    let i = skip_ws(chars, start);
    if i < chars.len() && is_ident_start(chars[i]) {
        Some(read_ident(chars, i))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_string_end_handles_escapes() {
        let c = chars(r#""a\"b" rest"#);
        assert_eq!(string_end(&c, 0), 6);
    }

    #[test]
    fn test_balanced_end_skips_strings_and_comments() {
        let c = chars("{ a: '}', /* } */ b: `${ {} }` } tail");
        let end = balanced_end(&c, 0, '{', '}');
        assert_eq!(c[..end].iter().collect::<String>(), "{ a: '}', /* } */ b: `${ {} }` }");
    }

    #[test]
    fn test_comment_end() {
        let c = chars("// line\nnext");
        assert_eq!(comment_end(&c, 0), Some(7));
        assert_eq!(comment_end(&c, 8), None);
    }
}
