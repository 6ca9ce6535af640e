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

//! DKIM signing options attached to a message.

use crate::{
    crypto::{HashAlgorithm, SigningKey},
    error::{ArgumentError, DkimError, Error},
    header::{FieldName, HeaderFields},
    signature::{Canonicalization, CanonicalizationAlgorithm, DomainName, Selector, SignatureAlgorithm},
    signer::{HeaderSelection, SignRequest, Signer, SigningError, SigningResult},
};
use std::{
    fmt::{self, Debug, Formatter},
    io::{Read, Seek, SeekFrom},
    sync::{Mutex, PoisonError},
};
use tracing::{debug, trace, warn};

/// A readable and seekable source of key data.
pub trait KeyStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> KeyStream for T {}

/// The source of the PEM-encoded private key.
///
/// The key is read anew each time a message is signed. A stream is rewound to
/// its start before every read; since the read position is shared, renders
/// using the same stream are serialized through a lock.
pub enum KeySource {
    Bytes(Vec<u8>),
    Stream(Mutex<Box<dyn KeyStream>>),
}

impl KeySource {
    pub fn from_stream(stream: impl KeyStream + 'static) -> Self {
        Self::Stream(Mutex::new(Box::new(stream)))
    }

    /// Reads and parses the signing key.
    pub fn load(&self) -> Result<SigningKey, DkimError> {
        match self {
            Self::Bytes(bytes) => Ok(SigningKey::from_pem_bytes(bytes)?),
            Self::Stream(stream) => {
                let mut stream = stream.lock().unwrap_or_else(PoisonError::into_inner);

                let mut bytes = vec![];
                stream.seek(SeekFrom::Start(0)).map_err(DkimError::KeyRead)?;
                stream.read_to_end(&mut bytes).map_err(DkimError::KeyRead)?;

                trace!(len = bytes.len(), "read key data from stream");

                Ok(SigningKey::from_pem_bytes(&bytes)?)
            }
        }
    }
}

impl Debug for KeySource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(_) => write!(f, "KeySource::Bytes(..)"),
            Self::Stream(_) => write!(f, "KeySource::Stream(..)"),
        }
    }
}

impl From<Vec<u8>> for KeySource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for KeySource {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl<const N: usize> From<&[u8; N]> for KeySource {
    fn from(bytes: &[u8; N]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<&str> for KeySource {
    fn from(s: &str) -> Self {
        Self::Bytes(s.as_bytes().into())
    }
}

impl From<String> for KeySource {
    fn from(s: String) -> Self {
        Self::Bytes(s.into_bytes())
    }
}

/// Options for DKIM signing of a message.
///
/// Defaults are relaxed header and simple body canonicalization, and the
/// default set of signed headers.
///
/// # Examples
///
/// ```
/// use viamail::message::DkimOptions;
///
/// # let pem = "";
/// let options = DkimOptions::new("sel", "example.com")
///     .key(pem)
///     .include_headers(["From", "To", "Subject"]);
/// ```
#[derive(Debug)]
pub struct DkimOptions {
    key: Option<KeySource>,
    selector: String,
    domain: String,
    header_canonicalization: CanonicalizationAlgorithm,
    body_canonicalization: CanonicalizationAlgorithm,
    include_headers: Option<Vec<String>>,
    ignore_sign_errors: bool,
}

impl DkimOptions {
    pub fn new(selector: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            key: None,
            selector: selector.into(),
            domain: domain.into(),
            header_canonicalization: CanonicalizationAlgorithm::Relaxed,
            body_canonicalization: CanonicalizationAlgorithm::Simple,
            include_headers: None,
            ignore_sign_errors: false,
        }
    }

    /// Sets the PEM-encoded private key, given as bytes, as a string, or as a
    /// stream. Both RSA and Ed25519 keys are accepted.
    pub fn key(mut self, key: impl Into<KeySource>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the private key from a stream.
    pub fn key_stream(self, stream: impl KeyStream + 'static) -> Self {
        self.key(KeySource::from_stream(stream))
    }

    #[deprecated(note = "use `key` instead")]
    pub fn privkey(self, key: impl Into<KeySource>) -> Self {
        self.key(key)
    }

    pub fn header_canonicalization(mut self, alg: CanonicalizationAlgorithm) -> Self {
        self.header_canonicalization = alg;
        self
    }

    pub fn body_canonicalization(mut self, alg: CanonicalizationAlgorithm) -> Self {
        self.body_canonicalization = alg;
        self
    }

    /// Sets the headers to sign. All occurrences present in the message are
    /// signed. The list must contain `From`, else signing fails when the
    /// message is rendered.
    pub fn include_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_headers = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// When set, a message whose signing fails is rendered without signature
    /// instead of failing with a [`DkimError`].
    pub fn ignore_sign_errors(mut self, value: bool) -> Self {
        self.ignore_sign_errors = value;
        self
    }
}

/// Signing options in validated form, applied at every render.
#[derive(Debug)]
pub(crate) struct DkimSigner {
    key: KeySource,
    domain: String,
    selector: String,
    canonicalization: Canonicalization,
    header_selection: HeaderSelection,
    ignore_sign_errors: bool,
}

impl DkimSigner {
    pub(crate) fn new(options: DkimOptions) -> Result<Self, Error> {
        let DkimOptions {
            key,
            selector,
            domain,
            header_canonicalization,
            body_canonicalization,
            include_headers,
            ignore_sign_errors,
        } = options;

        let key = key.ok_or(ArgumentError::MissingKey)?;

        let header_selection = match include_headers {
            Some(names) => HeaderSelection::Pick(
                names
                    .into_iter()
                    .map(|name| {
                        FieldName::new(name.as_str())
                            .map_err(|_| ArgumentError::InvalidHeaderName(name))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            None => HeaderSelection::Auto,
        };

        // catch bad inputs early, they are checked again for every signature
        let check = signing_identity(&domain, &selector).and_then(|_| key.load());
        if let Err(e) = check {
            if ignore_sign_errors {
                warn!(%domain, %selector, "ignoring unusable DKIM options: {e}");
            } else {
                return Err(e.into());
            }
        }

        Ok(Self {
            key,
            domain,
            selector,
            canonicalization: (header_canonicalization, body_canonicalization).into(),
            header_selection,
            ignore_sign_errors,
        })
    }

    pub(crate) fn ignore_sign_errors(&self) -> bool {
        self.ignore_sign_errors
    }

    /// Signs a rendered header and body.
    pub(crate) fn sign(&self, headers: HeaderFields, body: &[u8]) -> Result<SigningResult, DkimError> {
        let (domain, selector) = signing_identity(&self.domain, &self.selector)?;
        let key = self.key.load()?;

        let algorithm = SignatureAlgorithm::from((key.key_type(), HashAlgorithm::Sha256));

        let mut request = SignRequest::new(domain, selector, algorithm, key);
        request.canonicalization = self.canonicalization;
        request.header_selection = self.header_selection.clone();

        let mut signer = Signer::prepare_signing(headers, [request])?;

        let _ = signer.process_body_chunk(body);

        let result = signer
            .sign()
            .into_iter()
            .next()
            .ok_or(SigningError::SigningFailure)??;

        debug!(domain = %self.domain, selector = %self.selector, "message signed");

        Ok(result)
    }
}

fn signing_identity(domain: &str, selector: &str) -> Result<(DomainName, Selector), DkimError> {
    let domain = DomainName::new(domain).map_err(|_| DkimError::InvalidDomain)?;
    let selector = Selector::new(selector).map_err(|_| DkimError::InvalidSelector)?;
    Ok((domain, selector))
}
