//! Line tokenizer for the dot-notation config format.
//!
//! Each line is one of:
//! - blank (whitespace only)
//! - a comment (first non-whitespace character is `#`)
//! - `key=value`, optionally followed by a trailing `#comment`
//!
//! Keys and values are taken verbatim. Nothing is trimmed, so `log.level`
//! and `log.level ` are two different keys. `\=`, `\#` and `\\` escape the
//! separator, the comment marker and the backslash itself.

/// A tokenized config line
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Line {
    Blank,
    Comment,
    /// `value` is `None` for `key=` (no value assigned)
    Assign { key: String, value: Option<String> },
}

/// Tokenize one raw line. The error is a short reason for the caller to
/// wrap with line number and content.
pub(crate) fn parse_line(raw: &str) -> Result<Line, &'static str> {
    if raw.trim().is_empty() {
        return Ok(Line::Blank);
    }
    if raw.trim_start().starts_with('#') {
        return Ok(Line::Comment);
    }

    let body = match find_unescaped(raw, '#') {
        Some(pos) => &raw[..pos],
        None => raw,
    };

    let sep = find_unescaped(body, '=').ok_or("missing '=' outside comment")?;
    let key = unescape(&body[..sep]);
    validate_key(&key)?;

    let value = unescape(&body[sep + 1..]);
    let value = if value.is_empty() { None } else { Some(value) };

    Ok(Line::Assign { key, value })
}

/// Byte offset of the first `target` not preceded by an escaping backslash
fn find_unescaped(s: &str, target: char) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
        } else if c == target {
            return Some(i);
        }
    }
    None
}

fn unescape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&next) if matches!(next, '=' | '#' | '\\') => {
                    result.push(next);
                    chars.next();
                }
                // Unknown escape, keep as-is
                _ => result.push(c),
            }
        } else {
            result.push(c);
        }
    }

    result
}

fn validate_key(key: &str) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("empty key");
    }
    if key.split('.').any(str::is_empty) {
        return Err("empty key segment");
    }
    Ok(())
}
