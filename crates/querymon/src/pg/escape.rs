//! Translation of call escapes to Postgres syntax.

use std::borrow::Cow;

/// Rewrite a call escape into SQL Postgres understands.
///
/// - `{call f(?, ?)}` becomes `CALL f($1, $2)`
/// - `{? = call f(?)}` becomes `SELECT f($1)`
/// - `{call f}` becomes `CALL f()`
///
/// Anything else is returned unchanged.
pub fn translate_call_escape(sql: &str) -> Cow<'_, str> {
    let trimmed = sql.trim();
    let Some(body) = trimmed
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .map(str::trim)
    else {
        return Cow::Borrowed(sql);
    };

    let (verb, target) = if let Some(rest) = strip_function_result(body) {
        ("SELECT", rest)
    } else if let Some(rest) = strip_keyword(body, "call") {
        ("CALL", rest)
    } else {
        return Cow::Borrowed(sql);
    };

    let target = target.trim_end();
    let mut translated = format!("{verb} {}", number_placeholders(target));
    if !target.contains('(') {
        translated.push_str("()");
    }
    Cow::Owned(translated)
}

/// `? = call rest` -> `rest`
fn strip_function_result(body: &str) -> Option<&str> {
    let rest = body.strip_prefix('?')?.trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    strip_keyword(rest, "call")
}

/// Strip a case-insensitive keyword that must be followed by whitespace.
fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let head = s.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &s[keyword.len()..];
    let trimmed = rest.trim_start();
    (trimmed.len() < rest.len()).then_some(trimmed)
}

/// Replace `?` placeholders outside string literals with `$1`, `$2`, ...
fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut in_literal = false;
    let mut next = 0usize;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_literal = !in_literal;
                out.push(ch);
            }
            '?' if !in_literal => {
                next += 1;
                out.push('$');
                out.push_str(&next.to_string());
            }
            _ => out.push(ch),
        }
    }
    out
}
