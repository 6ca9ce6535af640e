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

//! Representation of email header data.
//!
//! A header field is kept as a pair of name and *body*, where the body is the
//! raw byte content following the colon, including any leading whitespace and
//! folding line breaks. This is exactly the form that DKIM canonicalization
//! operates on.

use bstr::ByteSlice;
use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    str::{self, FromStr},
};

pub type HeaderField = (FieldName, FieldBody);

/// An error indicating an ill-formed header field or header block.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct HeaderFieldError;

impl Display for HeaderFieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ill-formed header field")
    }
}

impl Error for HeaderFieldError {}

/// A non-empty collection of header fields, in message order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeaderFields(Box<[HeaderField]>);

impl HeaderFields {
    pub fn new(value: impl Into<Box<[HeaderField]>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HeaderFieldError);
        }
        Ok(Self(value))
    }

    pub fn from_vec(value: Vec<(String, Vec<u8>)>) -> Result<Self, HeaderFieldError> {
        let value: Vec<_> = value
            .into_iter()
            .map(|(name, value)| {
                let name = FieldName::new(name)?;
                let body = FieldBody::new(value)?;
                Ok((name, body))
            })
            .collect::<Result<_, _>>()?;
        Self::new(value)
    }

    /// Returns the body of the first header field with the given name.
    pub fn get(&self, name: &str) -> Option<&FieldBody> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, body)| body)
    }

    /// Returns the bodies of all header fields with the given name, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FieldBody> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| *n == name)
            .map(|(_, body)| body)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HeaderField> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[HeaderField]> for HeaderFields {
    fn as_ref(&self) -> &[HeaderField] {
        &self.0
    }
}

impl From<HeaderFields> for Vec<HeaderField> {
    fn from(header_fields: HeaderFields) -> Self {
        header_fields.0.into()
    }
}

impl IntoIterator for HeaderFields {
    type Item = HeaderField;
    type IntoIter = std::vec::IntoIter<HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_vec().into_iter()
    }
}

impl FromStr for HeaderFields {
    type Err = HeaderFieldError;

    /// Parses a header block in which lines may be terminated with either
    /// CRLF or LF.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.replace("\r\n", "\n").replace('\n', "\r\n");
        parse_header(s.as_bytes())
    }
}

/// Parses a CRLF-delimited header block (without the terminating empty line)
/// into header fields.
pub fn parse_header(input: &[u8]) -> Result<HeaderFields, HeaderFieldError> {
    let input = input.strip_suffix(b"\r\n").unwrap_or(input);

    let mut fields: Vec<(String, Vec<u8>)> = vec![];

    for line in input.split_str("\r\n") {
        if line.starts_with(b" ") || line.starts_with(b"\t") {
            let (_, body) = fields.last_mut().ok_or(HeaderFieldError)?;
            body.extend(b"\r\n");
            body.extend(line);
        } else {
            let i = line.find_byte(b':').ok_or(HeaderFieldError)?;
            let name = str::from_utf8(&line[..i]).map_err(|_| HeaderFieldError)?;
            fields.push((name.into(), line[(i + 1)..].into()));
        }
    }

    HeaderFields::from_vec(fields)
}

/// Splits a raw message into its header fields and body.
///
/// The body is everything following the first empty line. A message without
/// an empty line consists of header fields only.
pub fn parse_message(input: &[u8]) -> Result<(HeaderFields, &[u8]), HeaderFieldError> {
    match input.find(b"\r\n\r\n") {
        Some(i) => {
            let headers = parse_header(&input[..i])?;
            Ok((headers, &input[(i + 4)..]))
        }
        None => Ok((parse_header(input)?, &[])),
    }
}

/// A header field name, compared case-insensitively.
#[derive(Clone, Eq)]
pub struct FieldName(Box<str>);

impl FieldName {
    pub fn new(value: impl Into<Box<str>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HeaderFieldError);
        }
        if !value.chars().all(|c| c.is_ascii_graphic() && c != ':') {
            return Err(HeaderFieldError);
        }
        Ok(Self(value))
    }
}

impl AsRef<str> for FieldName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl PartialEq for FieldName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl PartialEq<&str> for FieldName {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq<str> for FieldName {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Hash for FieldName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

/// A header field body: the raw bytes following the colon.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct FieldBody(Box<[u8]>);

impl FieldBody {
    pub fn new(value: impl Into<Box<[u8]>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();

        let mut lines = value.split_str("\r\n");

        // no stray CR or LF on the first line
        if lines.next().map_or(false, |line| line.contains(&b'\r') || line.contains(&b'\n')) {
            return Err(HeaderFieldError);
        }

        // continuation lines must be folded, not blank, and free of CR or LF
        for line in lines {
            if !(line.starts_with(b" ") || line.starts_with(b"\t")) {
                return Err(HeaderFieldError);
            }
            if line.trim_with(|c| matches!(c, ' ' | '\t')).is_empty() {
                return Err(HeaderFieldError);
            }
            if line.contains(&b'\r') || line.contains(&b'\n') {
                return Err(HeaderFieldError);
            }
        }

        // all other bytes are allowed, UTF-8 is not required
        Ok(Self(value))
    }

    /// Returns the body with line folding removed and surrounding whitespace
    /// trimmed, decoded lossily as UTF-8.
    pub fn to_unfolded_string(&self) -> String {
        let unfolded = self.0.replace(b"\r\n", b"");
        String::from_utf8_lossy(unfolded.trim_with(|c| matches!(c, ' ' | '\t'))).into_owned()
    }
}

impl AsRef<[u8]> for FieldBody {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for FieldBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldBody")
            .field(&self.0.as_bstr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_name_ok() {
        assert!(FieldName::new("Subject").is_ok());
        assert_eq!(FieldName::new("dkim-signature").unwrap(), "DKIM-Signature");

        assert!(FieldName::new("").is_err());
        assert!(FieldName::new("Sub ject").is_err());
        assert!(FieldName::new("a:b").is_err());
    }

    #[test]
    fn field_name_debug() {
        let name = FieldName::new("Subject").unwrap();

        assert_eq!(format!("{name:?}"), "\"Subject\"");
        assert_eq!(format!("{name}"), "Subject");
    }

    #[test]
    fn field_body_ok() {
        assert!(FieldBody::new(*b" ab\r\n\tcd ").is_ok());
        assert!(FieldBody::new(*b"\r\n\ta").is_ok());
        assert!(FieldBody::new(*b"").is_ok());

        assert!(FieldBody::new(*b" \r\na").is_err());
        assert!(FieldBody::new(*b" \r\n \r\n a").is_err());
        assert!(FieldBody::new(*b" \na").is_err());
        assert!(FieldBody::new(*b" abc\r\n").is_err());
    }

    #[test]
    fn field_body_unfolded() {
        let body = FieldBody::new(*b" one\r\n two ").unwrap();

        assert_eq!(body.to_unfolded_string(), "one two");
    }

    #[test]
    fn parse_message_ok() {
        let raw = b"From: me@example.com\r\n\
Subject: hello\r\n\
\tworld\r\n\
\r\n\
Body line\r\n";

        let (headers, body) = parse_message(raw).unwrap();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("subject").unwrap().as_ref(), b" hello\r\n\tworld");
        assert_eq!(body, b"Body line\r\n");
    }

    #[test]
    fn parse_header_rejects_leading_continuation() {
        assert_eq!(parse_header(b" folded\r\nFrom: x"), Err(HeaderFieldError));
        assert_eq!(parse_header(b"no colon here"), Err(HeaderFieldError));
    }

    #[test]
    fn header_fields_from_str_ok() {
        let headers = HeaderFields::from_str("From: me\nTo: you,\n them\nTo: others").unwrap();

        assert_eq!(headers.get_all("to").count(), 2);
        assert_eq!(headers.get("TO").unwrap().as_ref(), b" you,\r\n them");
    }

    #[test]
    fn header_fields_into_iter() {
        let headers = HeaderFields::from_str("From: me\nTo: you").unwrap();

        let names: Vec<_> = headers.into_iter().map(|(name, _)| name).collect();

        assert_eq!(names, ["From", "To"]);
    }
}
