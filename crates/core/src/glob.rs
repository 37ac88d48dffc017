// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Glob matching for rule conditions and guardrail paths.
//!
//! Patterns translate to anchored regexes: `**` matches any run of
//! characters including `/`, `*` any run of non-`/` characters, `?` one
//! non-`/` character; everything else is literal. Backslashes are
//! normalized to `/` and a leading `./` is stripped on both sides.

/// Match `path` against a glob `pattern`.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern = normalize(pattern);
    let path = normalize(path);
    match regex::Regex::new(&glob_to_regex(&pattern)) {
        Ok(re) => re.is_match(&path),
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "unusable glob pattern");
            false
        }
    }
}

fn normalize(s: &str) -> String {
    let s = s.replace('\\', "/");
    s.strip_prefix("./").unwrap_or(&s).to_string()
}

/// Translate a glob into an anchored regex source string.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            c if regex_meta(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    out
}

fn regex_meta(c: char) -> bool {
    matches!(
        c,
        '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\'
    )
}

#[cfg(test)]
#[path = "glob_tests.rs"]
mod tests;
