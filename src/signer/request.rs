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

use crate::{
    crypto::SigningKey,
    header::{FieldName, HeaderFields},
    signature::{Canonicalization, DomainName, Selector, SignatureAlgorithm, DKIM_SIGNATURE_NAME},
    signer::{format::LINE_WIDTH, SigningError},
};
use std::{cmp::Ordering, time::Duration};

/// A generator for the body length limit tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum BodyLength {
    /// Do not limit the body length: no *l=* tag.
    #[default]
    All,
    /// Sign only the body as presented: set *l=* to the canonicalized body
    /// length.
    OnlyMessageLength,
    /// Sign exactly the given number of bytes of canonicalized body content.
    Exact(u64),
}

impl BodyLength {
    pub(crate) fn to_usize(self) -> Result<Option<usize>, SigningError> {
        match self {
            Self::All | Self::OnlyMessageLength => Ok(None),
            Self::Exact(n) => n.try_into().map(Some).map_err(|_| SigningError::Overflow),
        }
    }
}

/// A generator for the timestamp tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Timestamp {
    #[default]
    Now,
    Exact(u64),
}

/// The selection of headers to include in the *h=* tag.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum HeaderSelection {
    /// Select all occurrences of the headers in [`default_signed_headers`]
    /// present in the message.
    #[default]
    Auto,
    /// Select all occurrences of the given headers present in the message.
    /// The set must contain `From`.
    Pick(Vec<FieldName>),
    /// Use exactly the given names as the *h=* tag. Must contain `From`.
    Manual(Vec<FieldName>),
}

impl HeaderSelection {
    /// Resolves the selection to the list of names for the *h=* tag.
    pub fn resolve(&self, headers: &HeaderFields) -> Vec<FieldName> {
        match self {
            Self::Auto => {
                let names = default_signed_headers();
                select_headers(headers, |name| names.contains(name)).cloned().collect()
            }
            Self::Pick(names) => select_headers(headers, |name| names.contains(name))
                .cloned()
                .collect(),
            Self::Manual(names) => names.clone(),
        }
    }

    fn names(&self) -> Option<&[FieldName]> {
        match self {
            Self::Auto => None,
            Self::Pick(names) | Self::Manual(names) => Some(names),
        }
    }
}

/// Selects all headers matching the predicate, bottom-up, which is the order
/// in which a verifier consumes them.
pub fn select_headers<'a>(
    headers: &'a HeaderFields,
    mut pred: impl FnMut(&FieldName) -> bool + 'a,
) -> impl DoubleEndedIterator<Item = &'a FieldName> + 'a {
    headers
        .iter()
        .rev()
        .filter_map(move |(name, _)| if pred(name) { Some(name) } else { None })
}

/// Returns the headers signed by default.
///
/// RFC 6376 does not recommend a specific set of headers to be signed. This
/// set contains the examples from section 5.4.1, plus `Message-ID`.
pub fn default_signed_headers() -> Vec<FieldName> {
    let names = [
        "From",
        "Reply-To",
        "Subject",
        "Date",
        "To",
        "Cc",
        "Resent-Date",
        "Resent-From",
        "Resent-To",
        "Resent-Cc",
        "In-Reply-To",
        "References",
        "List-Id",
        "List-Help",
        "List-Unsubscribe",
        "List-Subscribe",
        "List-Post",
        "List-Owner",
        "List-Archive",
        "Message-ID",
    ];

    names.into_iter().filter_map(|n| FieldName::new(n).ok()).collect()
}

/// Formatting options for the produced `DKIM-Signature` header.
pub struct OutputFormat {
    /// The header name, equal to `DKIM-Signature` ignoring case.
    pub header_name: String,
    /// The line width in characters at which lines are broken. The default
    /// is 78.
    pub line_width: usize,
    /// Whitespace used to indent continuation lines. The default is `"\t"`.
    pub indentation: String,
    /// Whether to write the *d=* and *s=* values in ASCII form.
    pub ascii_only: bool,
    /// A comparator on tag names that determines the order of tags.
    pub tag_order: Option<Box<dyn Fn(&str, &str) -> Ordering + Send + Sync>>,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            header_name: DKIM_SIGNATURE_NAME.into(),
            line_width: LINE_WIDTH,
            indentation: "\t".into(),
            ascii_only: false,
            tag_order: None,
        }
    }
}

/// A request for creation of a DKIM signature.
pub struct SignRequest<T> {
    /// The key to use for producing the cryptographic signature.
    pub signing_key: T,

    /// The signature algorithm for the *a=* tag, compatible with the key.
    pub algorithm: SignatureAlgorithm,
    /// The canonicalization for the *c=* tag.
    pub canonicalization: Canonicalization,
    /// The selection of headers for the *h=* tag.
    pub header_selection: HeaderSelection,
    /// The signing domain for the *d=* tag.
    pub domain: DomainName,
    /// The selector for the *s=* tag.
    pub selector: Selector,
    /// The strategy for the *l=* tag.
    pub body_length: BodyLength,
    /// The timestamp for the *t=* tag.
    pub timestamp: Option<Timestamp>,
    /// The duration for which the signature remains valid (*x=* tag).
    pub valid_duration: Option<Duration>,

    pub format: OutputFormat,
}

impl<T> SignRequest<T> {
    /// Creates a request with the default header selection, simple/simple
    /// canonicalization, and no optional tags.
    pub fn new(
        domain: DomainName,
        selector: Selector,
        algorithm: SignatureAlgorithm,
        signing_key: T,
    ) -> Self {
        Self {
            signing_key,
            algorithm,
            canonicalization: Default::default(),
            header_selection: HeaderSelection::Auto,
            domain,
            selector,
            body_length: BodyLength::All,
            timestamp: None,
            valid_duration: None,
            format: Default::default(),
        }
    }
}

pub fn validate_request<T: AsRef<SigningKey>>(request: &SignRequest<T>) -> Result<(), SigningError> {
    if request.signing_key.as_ref().key_type() != request.algorithm.key_type() {
        return Err(SigningError::KeyTypeMismatch);
    }

    if let Some(names) = request.header_selection.names() {
        if !names.iter().any(|name| *name == "From") {
            return Err(SigningError::FromHeaderNotSigned);
        }
        if names.iter().any(|name| name.as_ref().contains(';')) {
            return Err(SigningError::InvalidSignedFieldName);
        }
    }

    if matches!(request.valid_duration, Some(d) if d.as_secs() == 0) {
        return Err(SigningError::ZeroExpirationDuration);
    }

    let format = &request.format;
    if !format.header_name.eq_ignore_ascii_case(DKIM_SIGNATURE_NAME)
        || format.line_width == 0
        || format.indentation.is_empty()
        || !format.indentation.chars().all(|c| matches!(c, ' ' | '\t'))
    {
        return Err(SigningError::InvalidOutputFormat);
    }

    Ok(())
}
