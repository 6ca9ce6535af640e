// viamail – email messages with DomainKeys Identified Mail signing
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

//! Common parsing utilities.

use std::borrow::Cow;

pub const CRLF: &str = "\r\n";

pub fn strip_suffix<'a>(s: &'a str, suffix: &str) -> &'a str {
    debug_assert!(s.ends_with(suffix));
    &s[..(s.len() - suffix.len())]
}

// FWS = ([*WSP CRLF] 1*WSP)

/// Strips one occurrence of folding whitespace.
pub fn strip_fws(input: &str) -> Option<&str> {
    // Eat as much valid FWS as possible, a lone WSP run counts as success.
    if let Some(s) = strip_wsp(input) {
        s.strip_prefix(CRLF).and_then(strip_wsp).or(Some(s))
    } else {
        input.strip_prefix(CRLF).and_then(strip_wsp)
    }
}

// RFC 5234, appendix B.1

fn strip_wsp(input: &str) -> Option<&str> {
    input
        .strip_prefix(is_wsp)
        .map(|s| s.trim_start_matches(is_wsp))
}

pub fn is_wsp(c: char) -> bool {
    matches!(c, ' ' | '\t')
}

/// Splits the input at any of the separator characters, except where the
/// separator appears inside a quoted string or an angle-bracketed address.
pub fn split_unquoted<'a>(input: &'a str, separators: &[char]) -> Vec<&'a str> {
    let mut pieces = vec![];

    let mut quoted = false;
    let mut escaped = false;
    let mut angle_depth = 0usize;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '<' if !quoted => angle_depth += 1,
            '>' if !quoted => angle_depth = angle_depth.saturating_sub(1),
            c if !quoted && angle_depth == 0 && separators.contains(&c) => {
                pieces.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    pieces.push(&input[start..]);
    pieces
}

/// Removes surrounding double quotes from a quoted string and resolves its
/// backslash escapes. Other input is returned unchanged.
pub fn unquote(input: &str) -> Cow<'_, str> {
    match input.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) if inner.contains('\\') => {
            let mut result = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        result.push(next);
                    }
                } else {
                    result.push(c);
                }
            }
            result.into()
        }
        Some(inner) => inner.into(),
        None => input.into(),
    }
}

/// Encloses the input in double quotes, escaping quotes and backslashes.
pub fn quote(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 2);
    result.push('"');
    for c in input.chars() {
        if matches!(c, '"' | '\\') {
            result.push('\\');
        }
        result.push(c);
    }
    result.push('"');
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fws_ok() {
        assert_eq!(strip_fws(""), None);
        assert_eq!(strip_fws("x"), None);
        assert_eq!(strip_fws(" x"), Some("x"));
        assert_eq!(strip_fws("\r\n"), None);
        assert_eq!(strip_fws(" \r\n"), Some("\r\n"));
        assert_eq!(strip_fws(" \r\n x"), Some("x"));
        assert_eq!(strip_fws("\r\n x"), Some("x"));
    }

    #[test]
    fn split_unquoted_ok() {
        assert_eq!(
            split_unquoted("a@b.c, \"Doe, J\" <j@d.e>, <x,y@z>", &[',']),
            ["a@b.c", " \"Doe, J\" <j@d.e>", " <x,y@z>"]
        );
        assert_eq!(split_unquoted("", &[',']), [""]);
    }

    #[test]
    fn unquote_and_quote_ok() {
        assert_eq!(unquote("\"John Smith\""), "John Smith");
        assert_eq!(unquote("\"a \\\"b\\\" c\""), "a \"b\" c");
        assert_eq!(unquote("plain"), "plain");

        assert_eq!(quote("a \"b\""), "\"a \\\"b\\\"\"");
        assert_eq!(unquote(&quote("x\\y")), "x\\y");
    }
}
