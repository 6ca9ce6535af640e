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

//! Error types of the message layer.
//!
//! Errors come in two tiers. An [`ArgumentError`] means the caller broke the
//! contract of an operation, for example by not supplying a signing key at
//! all. A [`DkimError`] means signing could not be performed with the inputs
//! given, for example because the key is malformed. Only the latter can be
//! suppressed with [`DkimOptions::ignore_sign_errors`].
//!
//! [`DkimOptions::ignore_sign_errors`]: crate::message::DkimOptions::ignore_sign_errors

use crate::{
    crypto::KeyError,
    signer::{SignerError, SigningError},
};
use std::{
    error::Error as StdError,
    fmt::{self, Display, Formatter},
    io,
};

/// A violation of an operation’s contract by the caller.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ArgumentError {
    /// No signing key was supplied.
    MissingKey,
    /// A header name is not a valid field name.
    InvalidHeaderName(String),
    /// A header value contains a line break that is not a valid fold.
    InvalidHeaderValue(String),
    /// An address input has the wrong shape, such as a list of other than
    /// two elements where a (name, address) pair is expected.
    AddressShape,
    /// An e-mail address cannot be split into local part and domain.
    InvalidEmail(String),
}

impl Display for ArgumentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey => write!(f, "no signing key given"),
            Self::InvalidHeaderName(name) => write!(f, "invalid header name {name:?}"),
            Self::InvalidHeaderValue(name) => write!(f, "invalid value for header {name}"),
            Self::AddressShape => write!(f, "expected an address or a (name, address) pair"),
            Self::InvalidEmail(email) => write!(f, "invalid e-mail address {email:?}"),
        }
    }
}

impl StdError for ArgumentError {}

/// An error that prevents a DKIM signature from being produced.
#[derive(Debug)]
pub enum DkimError {
    /// The key data could not be used as a signing key.
    InvalidKey(KeyError),
    /// The key could not be read from its source.
    KeyRead(io::Error),
    InvalidDomain,
    InvalidSelector,
    /// The message has no *From* header.
    MissingFromHeader,
    /// The rendered header could not be prepared for signing.
    InvalidHeader,
    /// Signing failed, for example because *From* is not included in the
    /// signed headers.
    Signing(SigningError),
}

impl Display for DkimError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey(e) => write!(f, "invalid signing key: {e}"),
            Self::KeyRead(e) => write!(f, "could not read signing key: {e}"),
            Self::InvalidDomain => write!(f, "invalid signing domain"),
            Self::InvalidSelector => write!(f, "invalid selector"),
            Self::MissingFromHeader => write!(f, "message has no From header"),
            Self::InvalidHeader => write!(f, "ill-formed message header"),
            Self::Signing(e) => write!(f, "signing failed: {e}"),
        }
    }
}

impl StdError for DkimError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::InvalidKey(e) => Some(e),
            Self::KeyRead(e) => Some(e),
            Self::Signing(e) => Some(e),
            _ => None,
        }
    }
}

impl From<KeyError> for DkimError {
    fn from(error: KeyError) -> Self {
        Self::InvalidKey(error)
    }
}

impl From<SigningError> for DkimError {
    fn from(error: SigningError) -> Self {
        Self::Signing(error)
    }
}

impl From<SignerError> for DkimError {
    fn from(error: SignerError) -> Self {
        match error {
            SignerError::MissingFromHeader => Self::MissingFromHeader,
            SignerError::TooManyRequests | SignerError::EmptyRequests => {
                Self::Signing(SigningError::SigningFailure)
            }
        }
    }
}

/// The error type of the message layer.
#[derive(Debug)]
pub enum Error {
    Argument(ArgumentError),
    Dkim(DkimError),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argument(e) => e.fmt(f),
            Self::Dkim(e) => e.fmt(f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Argument(e) => Some(e),
            Self::Dkim(e) => Some(e),
        }
    }
}

impl From<ArgumentError> for Error {
    fn from(error: ArgumentError) -> Self {
        Self::Argument(error)
    }
}

impl From<DkimError> for Error {
    fn from(error: DkimError) -> Self {
        Self::Dkim(error)
    }
}
