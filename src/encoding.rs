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

//! Encoded words in header field values.
//!
//! Non-ASCII text is carried in header fields as a sequence of MIME encoded
//! words, see RFC 2047. Encoding always produces UTF-8 “B” (Base64) encoded
//! words. Decoding also understands the “Q” encoding and the `us-ascii` and
//! `iso-8859-1` charsets.

use crate::{parse::is_wsp, quoted_printable, util};
use std::borrow::Cow;

const ENCODING_START_PREFIX: &str = "=?utf-8?b?";
const ENCODING_END_SUFFIX: &str = "?=";

// RFC 2047 limits lines containing encoded words to 76 characters.
pub(crate) const MAX_LINE_LEN: usize = 76;

/// Encodes a header field value for transmission.
///
/// ASCII text is returned unchanged. Other text is split at character
/// boundaries into encoded words of at most 45 bytes of input each, which are
/// folded onto separate lines. Each word fits on a line of its own following
/// the folding whitespace. Use [`encode_header_field`] for a value that
/// follows a field name on the same line.
///
/// # Examples
///
/// ```
/// use viamail::encoding::encode_header;
///
/// assert_eq!(encode_header("Hello"), "Hello");
/// assert_eq!(encode_header("♤"), "=?utf-8?b?4pmk?=");
/// ```
pub fn encode_header(value: &str) -> Cow<'_, str> {
    encode_header_at(value, 1)
}

/// Encodes the value of the header field with the given name.
///
/// Like [`encode_header`], but the first encoded word is shortened so that
/// the line `Name: value` stays within 76 characters.
///
/// # Examples
///
/// ```
/// use viamail::encoding::encode_header_field;
///
/// let subject = "ä".repeat(40);
/// let value = encode_header_field("Subject", &subject);
/// let first_line = value.split("\r\n").next().unwrap();
///
/// assert!(format!("Subject: {first_line}").len() <= 76);
/// ```
pub fn encode_header_field<'a>(name: &str, value: &'a str) -> Cow<'a, str> {
    encode_header_at(value, name.chars().count() + 2)
}

/// Encodes a value that starts at the given column of its first line.
pub(crate) fn encode_header_at(value: &str, column: usize) -> Cow<'_, str> {
    if value.is_ascii() {
        return value.into();
    }

    let mut words = vec![];

    let mut max_len = word_capacity(column);
    let mut start = 0;
    for (i, c) in value.char_indices() {
        if i > start && i + c.len_utf8() - start > max_len {
            words.push(encode_word(&value[start..i]));
            start = i;
            // continuation lines begin with a single space
            max_len = word_capacity(1);
        }
    }
    words.push(encode_word(&value[start..]));

    words.join("\r\n ").into()
}

// The number of input bytes that fit in an encoded word starting at `column`.
fn word_capacity(column: usize) -> usize {
    let overhead = column + ENCODING_START_PREFIX.len() + ENCODING_END_SUFFIX.len();
    let base64_len = MAX_LINE_LEN.saturating_sub(overhead);
    // at least one Base64 quantum, a long field name may overrun the line
    (base64_len / 4 * 3).max(3)
}

fn encode_word(s: &str) -> String {
    let mut word = String::with_capacity(ENCODING_START_PREFIX.len() + s.len() * 4 / 3 + 4);
    word.push_str(ENCODING_START_PREFIX);
    word.push_str(&util::encode_base64(s));
    word.push_str(ENCODING_END_SUFFIX);
    word
}

/// Decodes all encoded words in a header field value.
///
/// The value is unfolded first. Whitespace between adjacent encoded words is
/// dropped. Decoding is best-effort: anything that is not a well-formed
/// encoded word in a supported charset is kept as literal text.
///
/// # Examples
///
/// ```
/// use viamail::encoding::decode_header;
///
/// assert_eq!(decode_header("=?utf-8?b?4pmk?=\r\n =?UTF-8?Q?_x?= y"), "♤ x y");
/// assert_eq!(decode_header("=?utf-8?b?not base64?="), "=?utf-8?b?not base64?=");
/// ```
pub fn decode_header(value: &str) -> String {
    let unfolded = unfold(value);

    let mut result = String::with_capacity(unfolded.len());
    let mut rest = &unfolded[..];
    let mut after_word = false;

    while let Some(i) = rest.find("=?") {
        let (before, candidate) = rest.split_at(i);

        match decode_word(candidate) {
            Some((decoded, len)) => {
                if !(after_word && before.chars().all(is_wsp)) {
                    result.push_str(before);
                }
                result.push_str(&decoded);
                rest = &candidate[len..];
                after_word = true;
            }
            None => {
                result.push_str(before);
                result.push_str("=?");
                rest = &candidate[2..];
                after_word = false;
            }
        }
    }

    result.push_str(rest);
    result
}

fn unfold(value: &str) -> Cow<'_, str> {
    if value.contains("\r\n") || value.contains('\n') {
        value
            .replace("\r\n", "\n")
            .split('\n')
            .collect::<String>()
            .into()
    } else {
        value.into()
    }
}

// Returns the decoded text and the length of the encoded word.
fn decode_word(s: &str) -> Option<(String, usize)> {
    let inner = s.strip_prefix("=?")?;
    let (charset, inner) = inner.split_once('?')?;
    let (encoding, inner) = inner.split_once('?')?;
    let end = inner.find(ENCODING_END_SUFFIX)?;
    let text = &inner[..end];

    if text.contains(|c: char| c.is_ascii_whitespace()) {
        return None;
    }

    // RFC 2231 allows a language suffix such as `utf-8*en`
    let charset = charset.split('*').next()?;

    let bytes = if encoding.eq_ignore_ascii_case("b") {
        util::decode_base64(text).ok()?
    } else if encoding.eq_ignore_ascii_case("q") {
        quoted_printable::decode(text).ok()?
    } else {
        return None;
    };

    let decoded = decode_charset(charset, bytes)?;

    let len = s.len() - inner.len() + end + ENCODING_END_SUFFIX.len();

    Some((decoded, len))
}

fn decode_charset(charset: &str, bytes: Vec<u8>) -> Option<String> {
    if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8") {
        String::from_utf8(bytes).ok()
    } else if charset.eq_ignore_ascii_case("us-ascii") {
        if bytes.is_ascii() {
            String::from_utf8(bytes).ok()
        } else {
            None
        }
    } else if charset.eq_ignore_ascii_case("iso-8859-1") || charset.eq_ignore_ascii_case("latin1") {
        Some(bytes.into_iter().map(char::from).collect())
    } else {
        None
    }
}
