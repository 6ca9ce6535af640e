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

//! Signer and supporting types.
//!
//! Signing happens in three steps: [`Signer::prepare_signing`] takes the
//! message header and the sign requests, [`Signer::process_body_chunk`]
//! digests the body, and [`Signer::sign`] produces one result per request.

mod format;
mod request;
mod sign;

pub use self::{
    format::LINE_WIDTH,
    request::{
        default_signed_headers, select_headers, BodyLength, HeaderSelection, OutputFormat,
        SignRequest, Timestamp,
    },
};

use crate::{
    crypto::SigningKey,
    header::HeaderFields,
    message_hash::{BodyHasher, BodyHasherBuilder, BodyHasherStance},
    signature::DkimSignature,
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};
use tracing::debug;

/// The maximum number of sign requests handled by one signer.
pub const MAX_SIGN_REQUESTS: usize = 10;

/// An error that prevents signing altogether.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignerError {
    TooManyRequests,
    EmptyRequests,
    MissingFromHeader,
}

impl Display for SignerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyRequests => write!(f, "too many sign requests"),
            Self::EmptyRequests => write!(f, "no sign requests"),
            Self::MissingFromHeader => write!(f, "message has no From header"),
        }
    }
}

impl Error for SignerError {}

/// An error that occurs when producing one particular signature.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SigningError {
    KeyTypeMismatch,
    FromHeaderNotSigned,
    InvalidSignedFieldName,
    ZeroExpirationDuration,
    InvalidOutputFormat,
    InsufficientBodyLength,
    Overflow,
    SigningFailure,
}

impl Display for SigningError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyTypeMismatch => write!(f, "signing key incompatible with algorithm"),
            Self::FromHeaderNotSigned => write!(f, "From header not included in signed headers"),
            Self::InvalidSignedFieldName => write!(f, "invalid header name in signed headers"),
            Self::ZeroExpirationDuration => write!(f, "zero expiration duration"),
            Self::InvalidOutputFormat => write!(f, "invalid output format"),
            Self::InsufficientBodyLength => write!(f, "body shorter than requested length"),
            Self::Overflow => write!(f, "integer too large"),
            Self::SigningFailure => write!(f, "failed to produce signature"),
        }
    }
}

impl Error for SigningError {}

/// A successfully produced signature.
#[derive(Debug, Eq, PartialEq)]
pub struct SigningResult {
    pub signature: DkimSignature,
    /// The header name, by default `DKIM-Signature`.
    pub header_name: String,
    /// The formatted header value. It must be joined to the name with a colon
    /// and nothing else, as simple header canonicalization does not tolerate
    /// whitespace changes.
    pub header_value: String,
}

impl SigningResult {
    /// Returns the complete header field, without trailing CRLF.
    pub fn format_header(&self) -> String {
        format!("{}:{}", self.header_name, self.header_value)
    }
}

struct SigningTask<T> {
    request: SignRequest<T>,
    error: Option<SigningError>,
}

/// A signer for an email message.
pub struct Signer<T> {
    tasks: Vec<SigningTask<T>>,
    headers: HeaderFields,
    body_hasher: BodyHasher,
}

impl<T> Signer<T>
where
    T: AsRef<SigningKey>,
{
    /// Prepares a message signing process.
    ///
    /// Requests that are invalid do not abort preparation; their error is
    /// reported in the corresponding result of [`Signer::sign`].
    pub fn prepare_signing<I>(headers: HeaderFields, requests: I) -> Result<Self, SignerError>
    where
        I: IntoIterator<Item = SignRequest<T>>,
    {
        if headers.get("From").is_none() {
            return Err(SignerError::MissingFromHeader);
        }

        let mut tasks = vec![];
        let mut body_hasher = BodyHasherBuilder::new(false);

        for (i, request) in requests.into_iter().enumerate() {
            if i >= MAX_SIGN_REQUESTS {
                return Err(SignerError::TooManyRequests);
            }

            let error = request::validate_request(&request)
                .and_then(|_| request.body_length.to_usize())
                .map(|body_length| {
                    body_hasher.register((
                        body_length,
                        request.algorithm.hash_algorithm(),
                        request.canonicalization.body,
                    ));
                })
                .err();

            if let Some(e) = error {
                debug!(domain = %request.domain, "invalid sign request: {e}");
            }

            tasks.push(SigningTask { request, error });
        }

        if tasks.is_empty() {
            return Err(SignerError::EmptyRequests);
        }

        Ok(Self {
            tasks,
            headers,
            body_hasher: body_hasher.build(),
        })
    }

    /// Processes a chunk of the message body. The chunk is canonicalized and
    /// hashed, but not retained.
    pub fn process_body_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        self.body_hasher.hash_chunk(chunk)
    }

    /// Produces the signatures, one result per request, in request order.
    pub fn sign(self) -> Vec<Result<SigningResult, SigningError>> {
        let hasher_results = self.body_hasher.finish();

        self.tasks
            .into_iter()
            .map(|task| match task.error {
                Some(e) => Err(e),
                None => sign::perform_signing(&task.request, &self.headers, &hasher_results),
            })
            .collect()
    }
}
