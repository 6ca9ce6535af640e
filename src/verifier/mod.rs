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

//! Verification of DKIM signatures.
//!
//! Key records are fetched through [`LookupTxt`], which callers implement on
//! top of whatever resolver they use. A closure mapping a query name to the
//! record text is enough for tests and simple setups.

mod header;
mod query;
mod verify;

pub use query::LookupTxt;

use crate::{
    crypto::VerificationError,
    header::{self as hdr, FieldName, HeaderFieldError, HeaderFields},
    message_hash::{
        body_hasher_key, BodyHashError, BodyHashResults, BodyHasher, BodyHasherBuilder,
        BodyHasherStance,
    },
    record::DkimKeyRecord,
    signature::{DkimSignature, DkimSignatureError, DkimSignatureErrorKind},
    util::{self, CanonicalStr},
    verifier::header::{HeaderVerifier, VerifyStatus},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    sync::Arc,
    time::{Duration, SystemTime},
};
use tracing::{debug, trace};

/// Verification settings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The number of `DKIM-Signature` headers evaluated, from the top.
    /// Further signatures are ignored.
    pub max_signatures: usize,

    /// Headers that a signature must cover in addition to `From`.
    pub required_signed_headers: Vec<FieldName>,

    /// The smallest acceptable RSA key, in bits. Keys below 1024 bits are
    /// rejected regardless.
    pub min_key_bits: usize,

    /// Reject signatures whose *l=* tag leaves part of the body unsigned.
    pub forbid_partially_signed_body: bool,

    /// Reject signatures past their *x=* expiration.
    pub fail_if_expired: bool,

    /// Reject signatures whose *t=* timestamp lies in the future.
    pub fail_if_in_future: bool,

    /// Allowance for clock skew in the two checks above, in whole seconds.
    pub time_tolerance: Duration,

    /// Overrides the current time.
    pub fixed_system_time: Option<SystemTime>,
}

impl Config {
    fn current_timestamp(&self) -> u64 {
        self.fixed_system_time
            .unwrap_or_else(SystemTime::now)
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_signatures: 10,
            required_signed_headers: vec![],
            min_key_bits: 1024,
            forbid_partially_signed_body: false,
            fail_if_expired: true,
            fail_if_in_future: true,
            time_tolerance: Duration::from_secs(30),
            fixed_system_time: None,
        }
    }
}

/// A signature rejected by one of the [`Config`] settings.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PolicyError {
    RequiredHeadersNotSigned,
    ForbidPartiallySignedBody,
    SignatureExpired,
    TimestampInFuture,
    KeyTooSmall,
}

impl Display for PolicyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::RequiredHeadersNotSigned => "required header not signed",
            Self::ForbidPartiallySignedBody => "body only partially signed",
            Self::SignatureExpired => "signature expired",
            Self::TimestampInFuture => "signature timestamp in the future",
            Self::KeyTooSmall => "key size below minimum",
        };
        f.write_str(msg)
    }
}

impl Error for PolicyError {}

/// The outcome for one `DKIM-Signature` header.
#[derive(Debug, PartialEq)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    /// The position of the `DKIM-Signature` header among all headers.
    pub index: usize,
    /// The signature, unless the header could not be parsed.
    pub signature: Option<DkimSignature>,
    /// The key record used, shared between results for the same selector
    /// and domain.
    pub key_record: Option<Arc<DkimKeyRecord>>,
    /// The key record has flag *t=y*: the domain is testing DKIM.
    pub testing: bool,
    /// The RSA key size in bits.
    pub key_size: Option<usize>,
}

#[derive(Debug, PartialEq)]
pub enum VerificationStatus {
    Success,
    Failure(VerifierError),
}

impl VerificationStatus {
    /// Maps the status to a result for an `Authentication-Results` header
    /// (RFC 8601).
    pub fn to_dkim_auth_result(&self) -> DkimAuthResult {
        match self {
            Self::Success => DkimAuthResult::Pass,
            Self::Failure(error) => error.auth_result(),
        }
    }
}

/// The reason a signature did not verify.
#[derive(Clone, Debug, PartialEq)]
pub enum VerifierError {
    DkimSignatureFormat(DkimSignatureError),
    WrongKeyType,
    KeyRecordFormat,
    KeyRevoked,
    DisallowedHashAlgorithm,
    DisallowedServiceType,
    VerificationFailure(VerificationError),
    BodyHashMismatch,
    InsufficientBodyLength,
    NoKeyFound,
    InvalidKeyDomain,
    KeyLookup,
    Policy(PolicyError),
    Overflow,
}

impl VerifierError {
    fn auth_result(&self) -> DkimAuthResult {
        use DkimSignatureErrorKind as Kind;

        match self {
            // signature not understood
            Self::DkimSignatureFormat(e) => match e.kind {
                Kind::TagListSyntax | Kind::InvalidTagValue(_) | Kind::Unsupported(_) => {
                    DkimAuthResult::Neutral
                }
                Kind::MissingTag(_)
                | Kind::HistoricAlgorithm
                | Kind::FromHeaderNotSigned
                | Kind::ExpirationNotAfterTimestamp => DkimAuthResult::Permerror,
            },
            Self::Overflow => DkimAuthResult::Neutral,

            Self::BodyHashMismatch
            | Self::VerificationFailure(VerificationError::VerificationFailure) => DkimAuthResult::Fail,
            Self::Policy(_) => DkimAuthResult::Policy,
            Self::KeyLookup => DkimAuthResult::Temperror,

            Self::VerificationFailure(_)
            | Self::WrongKeyType
            | Self::KeyRecordFormat
            | Self::KeyRevoked
            | Self::DisallowedHashAlgorithm
            | Self::DisallowedServiceType
            | Self::InsufficientBodyLength
            | Self::NoKeyFound
            | Self::InvalidKeyDomain => DkimAuthResult::Permerror,
        }
    }
}

impl Display for VerifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::DkimSignatureFormat(e) => return e.fmt(f),
            Self::VerificationFailure(e) => return e.fmt(f),
            Self::Policy(e) => return e.fmt(f),
            Self::WrongKeyType => "key type does not match algorithm",
            Self::KeyRecordFormat => "ill-formed key record",
            Self::KeyRevoked => "key revoked",
            Self::DisallowedHashAlgorithm => "hash algorithm not permitted by key record",
            Self::DisallowedServiceType => "key record not for use with email",
            Self::BodyHashMismatch => "body hash does not match",
            Self::InsufficientBodyLength => "body shorter than signed length",
            Self::NoKeyFound => "no key record",
            Self::InvalidKeyDomain => "key record name not a valid domain",
            Self::KeyLookup => "key record lookup failed",
            Self::Overflow => "value too large",
        };
        f.write_str(msg)
    }
}

impl Error for VerifierError {}

/// A DKIM result as used in `Authentication-Results` (RFC 8601).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DkimAuthResult {
    Pass,
    /// The signature was understood and did not verify.
    Fail,
    /// The signature verified but was rejected by [`Config`].
    Policy,
    /// The signature could not be parsed or uses unsupported features.
    Neutral,
    /// The key record could not be retrieved, a retry may succeed.
    Temperror,
    /// The signature can never verify, for example for lack of a key record.
    Permerror,
}

impl CanonicalStr for DkimAuthResult {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Policy => "policy",
            Self::Neutral => "neutral",
            Self::Temperror => "temperror",
            Self::Permerror => "permerror",
        }
    }
}

impl Display for DkimAuthResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

// A signature whose header verification is done, waiting for the body hash.
struct PendingResult {
    status: VerificationStatus,
    index: usize,
    signature: Option<DkimSignature>,
    key_record: Option<Arc<DkimKeyRecord>>,
    testing: bool,
    key_size: Option<usize>,
}

impl PendingResult {
    fn complete(self, hasher_results: &BodyHashResults) -> VerificationResult {
        let status = match (self.status, &self.signature) {
            (VerificationStatus::Success, Some(sig)) => check_body_hash(sig, hasher_results),
            (status, _) => status,
        };

        if let VerificationStatus::Failure(e) = &status {
            debug!(index = self.index, "DKIM signature did not verify: {e}");
        }

        VerificationResult {
            status,
            index: self.index,
            signature: self.signature,
            key_record: self.key_record,
            testing: self.testing,
            key_size: self.key_size,
        }
    }
}

/// A verifier of the DKIM signatures in a message.
///
/// The header is verified first, which is where key records are looked up.
/// The body then follows in one or more chunks, and [`Verifier::finish`]
/// compares the body hashes. For a complete message in wire format,
/// [`verify_message`] does all of this in one call.
///
/// # Examples
///
/// ```
/// use viamail::{
///     header::parse_message,
///     verifier::{Config, Verifier},
/// };
/// # fn f(raw: &[u8], lookup: impl Fn(&str) -> std::io::Result<Vec<u8>>) {
///
/// let (headers, body) = parse_message(raw).unwrap();
///
/// let config = Config::default();
///
/// if let Some(mut verifier) = Verifier::verify_header(&lookup, &headers, &config) {
///     let _ = verifier.process_body_chunk(body);
///
///     for result in verifier.finish() {
///         println!("{}: {}", result.index, result.status.to_dkim_auth_result());
///     }
/// }
/// # }
/// ```
pub struct Verifier {
    pending: Vec<PendingResult>,
    body_hasher: BodyHasher,
}

impl Verifier {
    /// Verifies the signatures over the header, looking up their keys.
    ///
    /// Returns `None` if the header has no `DKIM-Signature`.
    pub fn verify_header<T>(resolver: &T, headers: &HeaderFields, config: &Config) -> Option<Self>
    where
        T: LookupTxt + ?Sized,
    {
        let tasks = HeaderVerifier::find_signatures(headers, config)?.verify_all(resolver);

        let mut body_hasher = BodyHasherBuilder::new(config.forbid_partially_signed_body);

        let pending = tasks
            .into_iter()
            .map(|task| {
                let status = match (task.status, &task.signature) {
                    (VerifyStatus::Successful, Some(sig)) => {
                        body_hasher.register(body_hasher_key(sig));
                        VerificationStatus::Success
                    }
                    (VerifyStatus::Failed(e), _) => VerificationStatus::Failure(e),
                    // verify_all leaves no task in progress
                    _ => VerificationStatus::Failure(VerifierError::KeyLookup),
                };

                PendingResult {
                    status,
                    index: task.index,
                    signature: task.signature,
                    key_record: task.key_record,
                    testing: task.testing,
                    key_size: task.key_size,
                }
            })
            .collect();

        Some(Self {
            pending,
            body_hasher: body_hasher.build(),
        })
    }

    /// Feeds a chunk of the body, with CRLF line endings. The returned stance
    /// tells whether further chunks are still needed.
    pub fn process_body_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        self.body_hasher.hash_chunk(chunk)
    }

    /// Returns one result per evaluated signature, in header order.
    pub fn finish(self) -> Vec<VerificationResult> {
        let hasher_results = self.body_hasher.finish();

        self.pending
            .into_iter()
            .map(|p| p.complete(&hasher_results))
            .collect()
    }
}

fn check_body_hash(sig: &DkimSignature, hasher_results: &BodyHashResults) -> VerificationStatus {
    match hasher_results.get(&body_hasher_key(sig)) {
        Some(Ok((hash, _))) if hash == &sig.body_hash => {
            trace!(domain = %sig.domain, "body hash matched");
            VerificationStatus::Success
        }
        Some(Ok((hash, _))) => {
            trace!(domain = %sig.domain, "body hash mismatch: {}", util::encode_base64(hash));
            VerificationStatus::Failure(VerifierError::BodyHashMismatch)
        }
        Some(Err(BodyHashError::InputTruncated)) => {
            VerificationStatus::Failure(VerifierError::Policy(PolicyError::ForbidPartiallySignedBody))
        }
        Some(Err(BodyHashError::InsufficientInput)) | None => {
            VerificationStatus::Failure(VerifierError::InsufficientBodyLength)
        }
    }
}

/// Verifies the topmost DKIM signature of a complete message in wire format,
/// looking up the public key through the given resolver.
///
/// Returns `Ok(false)` when the message has no signature or the signature does
/// not verify. An error is returned only when the message itself cannot be
/// parsed.
pub fn verify_message<T>(message: &[u8], resolver: &T) -> Result<bool, HeaderFieldError>
where
    T: LookupTxt + ?Sized,
{
    let (headers, body) = hdr::parse_message(message)?;

    let config = Config {
        max_signatures: 1,
        ..Default::default()
    };

    let mut verifier = match Verifier::verify_header(resolver, &headers, &config) {
        Some(verifier) => verifier,
        None => {
            debug!("message not signed");
            return Ok(false);
        }
    };

    let _ = verifier.process_body_chunk(body);

    Ok(verifier
        .finish()
        .first()
        .map_or(false, |r| r.status == VerificationStatus::Success))
}
