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

//! Email messages with lazy DKIM signing.
//!
//! A [`Message`] is mutable up to the moment it is rendered. Attaching DKIM
//! options with [`Message::dkim`] only records the intent to sign: every call
//! to [`Message::as_message`] or [`Message::as_string`] renders the message
//! from its current state and signs the result anew. Changes made after
//! attaching the options are therefore always covered by the signature.

mod dkim;

pub use self::dkim::{DkimOptions, KeySource, KeyStream};

use self::dkim::DkimSigner;
use crate::{
    address::{fold_address_list, sanitize_address, sanitize_address_list, AddressInput},
    encoding::encode_header_field,
    error::{ArgumentError, DkimError, Error},
    header::{FieldBody, FieldName, HeaderFields},
    message_id::MessageId,
};
use bstr::ByteSlice;
use chrono::{DateTime, Local, TimeZone};
use std::fmt::{self, Display, Formatter};
use tracing::{debug, trace, warn};

// Header fields holding address lists, rendered address by address.
const ADDRESS_HEADERS: [&str; 6] = ["From", "Sender", "Reply-To", "To", "Cc", "Bcc"];

/// Formats a date as the value of a *Date* header, in RFC 5322 form.
///
/// # Examples
///
/// ```
/// use chrono::{FixedOffset, TimeZone};
/// use viamail::message::format_date_header;
///
/// let date = FixedOffset::east_opt(2 * 3600)
///     .unwrap()
///     .with_ymd_and_hms(2023, 6, 9, 16, 13, 12)
///     .unwrap();
///
/// assert_eq!(format_date_header(&date), "Fri, 9 Jun 2023 16:13:12 +0200");
/// ```
pub fn format_date_header<Tz>(date: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    date.format("%a, %-d %b %Y %H:%M:%S %z").to_string()
}

/// An email message under construction.
///
/// Header names are case-insensitive. A name may occur several times, and
/// the order of headers is preserved.
///
/// # Examples
///
/// ```
/// use viamail::message::Message;
///
/// let mut message = Message::new();
/// message.set_from(("Me", "me@example.com"))?;
/// message.set_to("you@example.org")?;
/// message.set_subject("Hello")?;
/// message.set_body("Hi there!\n");
///
/// let s = message.as_string()?;
///
/// assert!(s.starts_with("From: Me <me@example.com>\r\n"));
/// assert!(s.ends_with("\r\n\r\nHi there!\r\n"));
/// # Ok::<_, viamail::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct Message {
    headers: Vec<(FieldName, String)>,
    body: Vec<u8>,
    message_id: Option<MessageId>,
    dkim: Option<DkimSigner>,
}

impl Message {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the value of the first header with the given name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the values of all headers with the given name, in order.
    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| *n == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns all headers in order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_ref(), v.as_str()))
    }

    /// Sets a header, replacing all existing occurrences. The header keeps the
    /// position of its first occurrence, or is appended.
    ///
    /// The value may contain non-ASCII text, which is encoded when rendering.
    /// Values of address headers such as *From* or *To* are taken as address
    /// lists: only their display names are encoded.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> Result<(), ArgumentError> {
        let (name, value) = validate_header(name, value.into())?;

        match self.headers.iter().position(|(n, _)| *n == name) {
            Some(i) => {
                self.headers[i].1 = value;
                let mut j = 0;
                self.headers.retain(|(n, _)| {
                    j += 1;
                    j - 1 <= i || *n != name
                });
            }
            None => self.headers.push((name, value)),
        }

        Ok(())
    }

    /// Appends a header, keeping any existing occurrences.
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) -> Result<(), ArgumentError> {
        let header = validate_header(name, value.into())?;
        self.headers.push(header);
        Ok(())
    }

    /// Removes all occurrences of a header, returning how many were removed.
    pub fn remove_header(&mut self, name: &str) -> usize {
        let len = self.headers.len();
        self.headers.retain(|(n, _)| *n != name);
        len - self.headers.len()
    }

    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) -> Result<(), ArgumentError> {
        self.set_header("Subject", subject)
    }

    /// Sets the *From* header to a sanitized address.
    pub fn set_from(&mut self, address: impl Into<AddressInput>) -> Result<(), ArgumentError> {
        let value = sanitize_address(address)?;
        self.set_header("From", value)
    }

    /// Sets the *To* header to a sanitized address list.
    pub fn set_to(&mut self, addresses: impl Into<AddressInput>) -> Result<(), ArgumentError> {
        let value = sanitize_address_list(addresses)?;
        self.set_header("To", value)
    }

    /// Sets the *Cc* header to a sanitized address list.
    pub fn set_cc(&mut self, addresses: impl Into<AddressInput>) -> Result<(), ArgumentError> {
        let value = sanitize_address_list(addresses)?;
        self.set_header("Cc", value)
    }

    /// Sets the *Reply-To* header to a sanitized address list.
    pub fn set_reply_to(&mut self, addresses: impl Into<AddressInput>) -> Result<(), ArgumentError> {
        let value = sanitize_address_list(addresses)?;
        self.set_header("Reply-To", value)
    }

    /// Sets the *Date* header. Without it, the time of rendering is used.
    pub fn set_date<Tz>(&mut self, date: &DateTime<Tz>) -> Result<(), ArgumentError>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        self.set_header("Date", format_date_header(date))
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Sets the body. Line endings are normalized to CRLF when rendering.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    /// Sets a generator for the *Message-ID* header. A new ID is generated at
    /// every render, unless a *Message-ID* header is set explicitly.
    pub fn set_message_id(&mut self, message_id: MessageId) {
        self.message_id = Some(message_id);
    }

    /// Attaches DKIM signing options, replacing any previous ones.
    ///
    /// Signing itself happens at every render, over the message as it is then.
    ///
    /// # Errors
    ///
    /// Fails with an [`ArgumentError`] if no key is given, and with a
    /// [`DkimError`] if the key, the domain, or the selector is unusable. With
    /// [`DkimOptions::ignore_sign_errors`] set, the latter is only logged, and
    /// the message is rendered without signature. On error, the previous
    /// options remain.
    pub fn dkim(&mut self, options: DkimOptions) -> Result<(), Error> {
        let signer = DkimSigner::new(options)?;
        self.dkim = Some(signer);
        Ok(())
    }

    /// Removes the DKIM signing options.
    pub fn clear_dkim(&mut self) {
        self.dkim = None;
    }

    /// Renders the message in its current state, signing it if DKIM options
    /// are attached.
    ///
    /// # Errors
    ///
    /// Fails with a [`DkimError`] if signing fails and errors are not ignored.
    pub fn as_message(&self) -> Result<RenderedMessage, Error> {
        let mut headers = self.render_headers();
        let body = normalize_line_endings(&self.body);

        if let Some(signer) = &self.dkim {
            match sign_rendered(signer, &headers, &body) {
                Ok((name, value)) => headers.insert(0, (name, value)),
                Err(e) if signer.ignore_sign_errors() => {
                    warn!("ignoring DKIM signing error: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(RenderedMessage { headers, body })
    }

    /// Renders the message in wire format.
    pub fn as_string(&self) -> Result<String, Error> {
        self.as_message().map(|m| m.to_string())
    }

    // Headers in wire form: the value is everything after the colon.
    fn render_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<_> = self
            .headers
            .iter()
            .map(|(name, value)| (name.to_string(), format!(" {}", render_value(name, value))))
            .collect();

        let has = |headers: &[(String, String)], name: &str| {
            headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
        };

        if !has(&headers, "Date") {
            headers.push(("Date".into(), format!(" {}", format_date_header(&Local::now()))));
        }

        if let Some(message_id) = &self.message_id {
            if !has(&headers, "Message-ID") {
                headers.push(("Message-ID".into(), format!(" {}", message_id.generate())));
            }
        }

        if !has(&headers, "MIME-Version") {
            headers.push(("MIME-Version".into(), " 1.0".into()));
        }
        if !has(&headers, "Content-Type") {
            headers.push(("Content-Type".into(), " text/plain; charset=utf-8".into()));
        }
        if !has(&headers, "Content-Transfer-Encoding") {
            let cte = if self.body.is_ascii() { " 7bit" } else { " 8bit" };
            headers.push(("Content-Transfer-Encoding".into(), cte.into()));
        }

        headers
    }
}

fn render_value(name: &FieldName, value: &str) -> String {
    if ADDRESS_HEADERS.iter().any(|h| *name == *h) {
        match fold_address_list(name.as_ref(), value) {
            Ok(value) => return value,
            Err(e) => debug!(%name, "rendering address header as text: {e}"),
        }
    }

    encode_header_field(name.as_ref(), value).into_owned()
}

fn validate_header(name: &str, value: String) -> Result<(FieldName, String), ArgumentError> {
    let field_name =
        FieldName::new(name).map_err(|_| ArgumentError::InvalidHeaderName(name.into()))?;

    // line breaks are only allowed as folds
    let value = value.replace("\r\n", "\n").replace('\n', "\r\n");
    if FieldBody::new(format!(" {value}").into_bytes()).is_err() {
        return Err(ArgumentError::InvalidHeaderValue(name.into()));
    }

    Ok((field_name, value))
}

fn normalize_line_endings(body: &[u8]) -> Vec<u8> {
    body.replace(b"\r\n", b"\n").replace(b"\n", b"\r\n")
}

fn sign_rendered(
    signer: &DkimSigner,
    headers: &[(String, String)],
    body: &[u8],
) -> Result<(String, String), DkimError> {
    let fields = headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone().into_bytes()))
        .collect();
    let fields = HeaderFields::from_vec(fields).map_err(|_| DkimError::InvalidHeader)?;

    trace!(headers = fields.len(), "signing rendered message");

    let result = signer.sign(fields, body)?;

    Ok((result.header_name, result.header_value))
}

/// A rendered message, in wire form.
///
/// Header values are stored as they appear after the colon, including leading
/// whitespace and folding line breaks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderedMessage {
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl RenderedMessage {
    /// Returns the value of the first header with the given name, without
    /// leading whitespace.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim_start_matches(|c| c == ' ' || c == '\t'))
    }

    /// Returns all headers in order, with values in wire form.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the complete message in wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = vec![];
        for (name, value) in &self.headers {
            result.extend(name.as_bytes());
            result.push(b':');
            result.extend(value.as_bytes());
            result.extend(b"\r\n");
        }
        result.extend(b"\r\n");
        result.extend(&self.body);
        result
    }
}

impl Display for RenderedMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            write!(f, "{name}:{value}\r\n")?;
        }
        f.write_str("\r\n")?;
        f.write_str(&String::from_utf8_lossy(&self.body))
    }
}
