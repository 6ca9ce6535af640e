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

//! Tag lists, the `tag=value; ...` syntax of DKIM signatures and DKIM public
//! key records.
//!
//! See RFC 6376, section 3.2.

use crate::{
    parse::{strip_fws, strip_suffix},
    util::{decode_base64, Base64Error},
};
use std::{
    collections::HashSet,
    error::Error,
    fmt::{self, Display, Formatter},
};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TagListParseError {
    DuplicateTag,
    Syntax,
}

impl Display for TagListParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateTag => write!(f, "duplicate tag in tag list"),
            Self::Syntax => write!(f, "ill-formed tag list"),
        }
    }
}

impl Error for TagListParseError {}

impl From<Base64Error> for TagListParseError {
    fn from(_: Base64Error) -> Self {
        Self::Syntax
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TagSpec<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// A parsed tag list. Tag names are unique, values are kept verbatim
/// including any inner folding whitespace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TagList<'a>(Vec<TagSpec<'a>>);

impl<'a> TagList<'a> {
    pub fn parse(input: &'a str) -> Result<Self, TagListParseError> {
        match parse_tag_list(input) {
            Some((rest, tags)) if rest.is_empty() => {
                let mut names_seen = HashSet::new();
                if tags.iter().any(|tag| !names_seen.insert(tag.name)) {
                    return Err(TagListParseError::DuplicateTag);
                }
                Ok(Self(tags))
            }
            _ => Err(TagListParseError::Syntax),
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.0.iter().find(|tag| tag.name == name).map(|tag| tag.value)
    }
}

impl<'a> AsRef<[TagSpec<'a>]> for TagList<'a> {
    fn as_ref(&self) -> &[TagSpec<'a>] {
        &self.0
    }
}

/// Splits a colon-separated tag value such as `h=` into its trimmed pieces.
pub fn parse_colon_separated_tag_value(value: &str) -> Vec<&str> {
    debug_assert!(is_tag_value(value));

    value
        .split(':')
        .map(|s| s.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n')))
        .collect()
}

pub fn parse_base64_tag_value(value: &str) -> Result<Vec<u8>, TagListParseError> {
    debug_assert!(is_tag_value(value));

    let value = strip_fws_from_tag_value(value);
    Ok(decode_base64(&value)?)
}

/// Removes all folding whitespace from a well-formed tag value.
pub fn strip_fws_from_tag_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect()
}

fn is_tag_value(s: &str) -> bool {
    s.is_empty() || matches!(parse_tag_value(s), Some((rest, _)) if rest.is_empty())
}

fn parse_tag_list(input: &str) -> Option<(&str, Vec<TagSpec<'_>>)> {
    let (mut s, tag) = parse_tag_spec(input)?;

    let mut tags = vec![tag];

    while let Some((next, tag)) = s.strip_prefix(';').and_then(parse_tag_spec) {
        s = next;
        tags.push(tag);
    }

    // trailing semicolon, possibly followed by FWS
    let s = match s.strip_prefix(';') {
        Some(rest) => strip_fws(rest).unwrap_or(rest),
        None => s,
    };

    Some((s, tags))
}

fn parse_tag_spec(input: &str) -> Option<(&str, TagSpec<'_>)> {
    let s = strip_fws(input).unwrap_or(input);

    let (s, name) = parse_tag_name(s)?;

    let s = strip_fws(s).unwrap_or(s);
    let s = s.strip_prefix('=')?;
    let s = strip_fws(s).unwrap_or(s);

    let (s, value) = match parse_tag_value(s) {
        Some((s, value)) => (strip_fws(s).unwrap_or(s), value),
        None => (s, ""),
    };

    Some((s, TagSpec { name, value }))
}

fn parse_tag_name(input: &str) -> Option<(&str, &str)> {
    let s = input
        .strip_prefix(|c: char| c.is_ascii_alphabetic())?
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_');
    Some((s, strip_suffix(input, s)))
}

// tag-value = [ tval *( 1*(WSP / FWS) tval ) ], see erratum 5070
fn parse_tag_value(input: &str) -> Option<(&str, &str)> {
    fn strip_tval(s: &str) -> Option<&str> {
        s.strip_prefix(is_tval_char)
            .map(|s| s.trim_start_matches(is_tval_char))
    }

    let mut s = strip_tval(input)?;

    while let Some(next) = strip_fws(s).and_then(strip_tval) {
        s = next;
    }

    Some((s, strip_suffix(input, s)))
}

/// Strips a tag name and the following `=` from the input, returning the rest
/// and the tag name.
pub fn strip_tag_name_and_equals(input: &str) -> Option<(&str, &str)> {
    let s = strip_fws(input).unwrap_or(input);

    let (s, name) = parse_tag_name(s)?;

    let s = strip_fws(s).unwrap_or(s);
    let s = s.strip_prefix('=')?;

    Some((s, name))
}

/// Printable ASCII except `;`, or any non-ASCII character.
pub fn is_tval_char(c: char) -> bool {
    matches!(c, '!'..=':' | '<'..='~') || !c.is_ascii()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_colon_separated_tag_value_ok() {
        assert_eq!(
            parse_colon_separated_tag_value("ab:\r\n\tc\r\n\td:e"),
            ["ab", "c\r\n\td", "e"]
        );
        assert_eq!(parse_colon_separated_tag_value(""), [""]);
    }

    #[test]
    fn tag_list_parse_ok() {
        let example = " v = 1 ; a=rsa-sha256;d=example.net; s=brisbane;
  c=simple; q=dns/txt;
  t=1117574938; x=1118006938;
  h=from:to:subject:date;
  bh=MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI=;
  b=dzdVyOfAKCdLXdJOc9G2q8LoXSlEniSbav+yuU4zGeeruD00lszZVoG4ZHRNiYzR ;
";
        let example = example.replace('\n', "\r\n");
        let example = example.trim_end();

        let tags = TagList::parse(example).unwrap();

        assert_eq!(tags.as_ref().len(), 11);
        assert_eq!(tags.get("v"), Some("1"));
        assert_eq!(tags.get("h"), Some("from:to:subject:date"));
        assert_eq!(tags.get("z"), None);
    }

    #[test]
    fn tag_list_parse_empty_value() {
        let tags = TagList::parse("v=DKIM1; p=").unwrap();

        assert_eq!(tags.get("p"), Some(""));
    }

    #[test]
    fn tag_list_parse_invalid() {
        assert_eq!(TagList::parse("a=1; a=2"), Err(TagListParseError::DuplicateTag));
        assert_eq!(TagList::parse(""), Err(TagListParseError::Syntax));
        assert_eq!(TagList::parse("a=1;;"), Err(TagListParseError::Syntax));
        assert_eq!(TagList::parse("1a=x"), Err(TagListParseError::Syntax));
    }

    #[test]
    fn parse_base64_tag_value_ok() {
        assert_eq!(parse_base64_tag_value("4p\r\n\tmk"), Ok("♤".into()));
        assert_eq!(parse_base64_tag_value("4p!k"), Err(TagListParseError::Syntax));
    }
}
