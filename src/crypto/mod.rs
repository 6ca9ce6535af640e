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

//! Cryptographic utilities.
//!
//! # Key formats
//!
//! Signing keys are read from PEM documents. Both the generic PKCS#8 format
//! (label `PRIVATE KEY`, RSA or Ed25519) and the traditional PKCS#1 format
//! for RSA (label `RSA PRIVATE KEY`) are accepted, as both are still in
//! common use.
//!
//! Public keys published in DNS are read leniently. For RSA, RFC 6376 mandates
//! the RSAPublicKey format, but the example in its appendix C shows the
//! SubjectPublicKeyInfo format, and the latter has become the de facto
//! standard. Therefore SubjectPublicKeyInfo is tried first, then
//! RSAPublicKey. For Ed25519, RFC 8463 mandates the 32 raw key bytes; the
//! SubjectPublicKeyInfo format output by OpenSSL is accepted as a fallback.

mod ed25519;
mod hash;
mod rsa;

pub use self::{
    ed25519::{read_ed25519_verifying_key, sign_ed25519, verify_ed25519},
    hash::{digest, CountingHasher, HashStatus, InsufficientInput},
    rsa::{read_rsa_public_key, sign_rsa, verify_rsa},
};

use crate::util::CanonicalStr;
use ::rsa::{pkcs1::DecodeRsaPrivateKey, RsaPrivateKey, RsaPublicKey};
use ed25519_dalek::{SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use pkcs8::{Document, PrivateKeyInfo};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// The minimum RSA key size in bits, see RFC 8301.
pub const MIN_RSA_KEY_BITS: usize = 1024;

/// An error that occurs when reading a private key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyError {
    InvalidPem,
    InvalidKeyData,
    UnsupportedKeyType,
    InsufficientKeySize,
}

impl Display for KeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPem => write!(f, "not a PEM document"),
            Self::InvalidKeyData => write!(f, "invalid private key data"),
            Self::UnsupportedKeyType => write!(f, "unsupported private key type"),
            Self::InsufficientKeySize => write!(f, "private key too small"),
        }
    }
}

impl Error for KeyError {}

/// A private key used for producing DKIM signatures.
#[derive(Debug)]
pub enum SigningKey {
    Rsa(RsaPrivateKey),
    Ed25519(Ed25519SigningKey),
}

impl SigningKey {
    /// Reads a signing key from a PEM document in PKCS#8 or PKCS#1 format.
    pub fn from_pem(s: &str) -> Result<Self, KeyError> {
        let (label, der) = Document::from_pem(s.trim()).map_err(|_| KeyError::InvalidPem)?;

        let key = match label {
            "PRIVATE KEY" => {
                let info = PrivateKeyInfo::try_from(der.as_bytes())
                    .map_err(|_| KeyError::InvalidKeyData)?;

                if let Ok(k) = RsaPrivateKey::try_from(info.clone()) {
                    Self::Rsa(k)
                } else if let Ok(k) = Ed25519SigningKey::try_from(info) {
                    Self::Ed25519(k)
                } else {
                    return Err(KeyError::UnsupportedKeyType);
                }
            }
            "RSA PRIVATE KEY" => {
                let k = RsaPrivateKey::from_pkcs1_der(der.as_bytes())
                    .map_err(|_| KeyError::InvalidKeyData)?;
                Self::Rsa(k)
            }
            _ => return Err(KeyError::UnsupportedKeyType),
        };

        if let Self::Rsa(k) = &key {
            if self::rsa::get_key_size(k) < MIN_RSA_KEY_BITS {
                return Err(KeyError::InsufficientKeySize);
            }
        }

        Ok(key)
    }

    /// Reads a signing key from PEM bytes.
    pub fn from_pem_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let s = std::str::from_utf8(bytes).map_err(|_| KeyError::InvalidPem)?;
        Self::from_pem(s)
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Rsa(_) => KeyType::Rsa,
            Self::Ed25519(_) => KeyType::Ed25519,
        }
    }

    /// Returns the length in bytes of signatures produced with this key.
    pub fn signature_length(&self) -> usize {
        match self {
            Self::Rsa(k) => self::rsa::get_key_size(k) / 8,
            Self::Ed25519(_) => ed25519_dalek::SIGNATURE_LENGTH,
        }
    }

    pub fn sign(&self, hash_alg: HashAlgorithm, data_hash: &[u8]) -> Result<Vec<u8>, SigningError> {
        match self {
            Self::Rsa(k) => sign_rsa(hash_alg, k, data_hash),
            Self::Ed25519(k) => sign_ed25519(k, data_hash),
        }
    }
}

impl AsRef<SigningKey> for SigningKey {
    fn as_ref(&self) -> &Self {
        self
    }
}

/// A public key used for verifying DKIM signatures.
#[derive(Debug)]
pub enum VerifyingKey {
    Rsa(RsaPublicKey),
    Ed25519(Ed25519VerifyingKey),
}

impl VerifyingKey {
    pub fn key_size(&self) -> Option<usize> {
        match self {
            Self::Rsa(public_key) => Some(self::rsa::get_public_key_size(public_key)),
            Self::Ed25519(_) => None,
        }
    }

    pub fn from_key_data(key_type: KeyType, key_data: &[u8]) -> Result<Self, VerificationError> {
        match key_type {
            KeyType::Rsa => {
                let public_key = read_rsa_public_key(key_data)?;
                Ok(Self::Rsa(public_key))
            }
            KeyType::Ed25519 => {
                let verifying_key = read_ed25519_verifying_key(key_data)?;
                Ok(Self::Ed25519(verifying_key))
            }
        }
    }

    pub fn verify(
        &self,
        hash_alg: HashAlgorithm,
        data_hash: &[u8],
        signature: &[u8],
    ) -> Result<(), VerificationError> {
        match self {
            Self::Rsa(k) => verify_rsa(hash_alg, k, data_hash, signature),
            Self::Ed25519(k) => verify_ed25519(k, data_hash, signature),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyType {
    Rsa,
    Ed25519,
}

impl CanonicalStr for KeyType {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ed25519 => "ed25519",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HashAlgorithm {
    Sha256,
}

impl CanonicalStr for HashAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VerificationError {
    InvalidKey,
    InsufficientKeySize,
    InvalidSignature,
    VerificationFailure,
}

impl Display for VerificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid key data"),
            Self::InsufficientKeySize => write!(f, "key too small"),
            Self::InvalidSignature => write!(f, "invalid signature data"),
            Self::VerificationFailure => write!(f, "signature verification failed"),
        }
    }
}

impl Error for VerificationError {}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SigningError;

impl Display for SigningError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "failed to produce signature")
    }
}

impl Error for SigningError {}
