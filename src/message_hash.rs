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

//! Computation of the data hash and the body hashes.

use crate::{
    canonicalize::{self, BodyCanonicalizer},
    crypto::{self, CountingHasher, HashAlgorithm, HashStatus, InsufficientInput},
    header::{FieldName, HeaderFields},
    signature::{CanonicalizationAlgorithm, DkimSignature, DKIM_SIGNATURE_NAME},
};
use std::{
    collections::{HashMap, HashSet},
    error::Error,
    fmt::{self, Display, Formatter},
};

/// Computes the hash over the selected headers followed by the
/// `DKIM-Signature` header itself, whose *b=* value must be empty.
pub fn compute_data_hash(
    hash_alg: HashAlgorithm,
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
    dkim_sig_header_name: &str,
    dkim_sig_header_value: &str,
) -> Box<[u8]> {
    debug_assert!(dkim_sig_header_name.eq_ignore_ascii_case(DKIM_SIGNATURE_NAME));

    let mut cheaders = canonicalize::canonicalize_headers(canon_alg, headers, selected_headers);

    // the signature header goes last, without trailing CRLF
    canonicalize::canonicalize_header(
        &mut cheaders,
        canon_alg,
        dkim_sig_header_name,
        dkim_sig_header_value,
    );

    tracing::trace!(data = ?bstr::BStr::new(&cheaders), "canonicalized header data");

    crypto::digest(hash_alg, [&cheaders])
}

/// Whether a body hasher wants more input.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[must_use]
pub enum BodyHasherStance {
    Interested,
    /// All requested body hashes can be answered without further input.
    Done,
}

pub type BodyHasherKey = (Option<usize>, HashAlgorithm, CanonicalizationAlgorithm);

pub fn body_hasher_key(sig: &DkimSignature) -> BodyHasherKey {
    let body_len = sig
        .body_length
        .map(|len| usize::try_from(len).unwrap_or(usize::MAX));
    (body_len, sig.algorithm.hash_algorithm(), sig.canonicalization.body)
}

#[derive(Clone, Default)]
pub struct BodyHasherBuilder {
    fail_on_truncate: bool,
    registrations: HashSet<BodyHasherKey>,
}

impl BodyHasherBuilder {
    /// With `fail_on_truncate`, a body that continues beyond an *l=* limit
    /// yields an error instead of a hash.
    pub fn new(fail_on_truncate: bool) -> Self {
        Self {
            fail_on_truncate,
            registrations: HashSet::new(),
        }
    }

    pub fn register(&mut self, key: BodyHasherKey) {
        self.registrations.insert(key);
    }

    pub fn build(self) -> BodyHasher {
        let hashers = self
            .registrations
            .into_iter()
            .map(|key @ (len, alg, _)| (key, (CountingHasher::new(alg, len), false)))
            .collect();

        BodyHasher {
            fail_on_truncate: self.fail_on_truncate,
            hashers,
            canonicalizer_simple: BodyCanonicalizer::simple(),
            canonicalizer_relaxed: BodyCanonicalizer::relaxed(),
        }
    }
}

/// Canonicalizes and hashes chunks of a message body, once per registered
/// combination of length limit, hash algorithm, and canonicalization.
pub struct BodyHasher {
    fail_on_truncate: bool,
    // the flag records whether input had to be truncated
    hashers: HashMap<BodyHasherKey, (CountingHasher, bool)>,
    canonicalizer_simple: BodyCanonicalizer,
    canonicalizer_relaxed: BodyCanonicalizer,
}

impl BodyHasher {
    pub fn hash_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        // both canonicalizers are stateful and must see every chunk
        let simple = self.canonicalizer_simple.canonicalize_chunk(chunk);
        let relaxed = self.canonicalizer_relaxed.canonicalize_chunk(chunk);

        let fail_on_truncate = self.fail_on_truncate;
        let mut all_done = true;

        for ((_, _, canon), (hasher, truncated)) in &mut self.hashers {
            if hasher.is_done() && (!fail_on_truncate || *truncated) {
                continue;
            }

            let canonicalized = match canon {
                CanonicalizationAlgorithm::Simple => &simple,
                CanonicalizationAlgorithm::Relaxed => &relaxed,
            };

            match hasher.update(canonicalized) {
                HashStatus::AllConsumed => {
                    if fail_on_truncate || !hasher.is_done() {
                        all_done = false;
                    }
                }
                HashStatus::Truncated => *truncated = true,
            }
        }

        if all_done {
            BodyHasherStance::Done
        } else {
            BodyHasherStance::Interested
        }
    }

    pub fn finish(self) -> BodyHashResults {
        let simple = self.canonicalizer_simple.finish();
        let relaxed = self.canonicalizer_relaxed.finish();

        let fail_on_truncate = self.fail_on_truncate;

        let results = self
            .hashers
            .into_iter()
            .map(|(key @ (_, _, canon), (mut hasher, mut truncated))| {
                let canonicalized = match canon {
                    CanonicalizationAlgorithm::Simple => &simple,
                    CanonicalizationAlgorithm::Relaxed => &relaxed,
                };

                if let HashStatus::Truncated = hasher.update(canonicalized) {
                    truncated = true;
                }

                let result = if fail_on_truncate && truncated {
                    Err(BodyHashError::InputTruncated)
                } else {
                    hasher
                        .finish()
                        .map_err(|InsufficientInput| BodyHashError::InsufficientInput)
                };

                (key, result)
            })
            .collect();

        BodyHashResults { results }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BodyHashError {
    InsufficientInput,
    InputTruncated,
}

impl Display for BodyHashError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientInput => write!(f, "body shorter than signed length"),
            Self::InputTruncated => write!(f, "body not digested entirely"),
        }
    }
}

impl Error for BodyHashError {}

pub type BodyHashResult = Result<(Box<[u8]>, usize), BodyHashError>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BodyHashResults {
    results: HashMap<BodyHasherKey, BodyHashResult>,
}

impl BodyHashResults {
    pub fn get(&self, key: &BodyHasherKey) -> Option<&BodyHashResult> {
        self.results.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::encode_base64;

    const SIMPLE: BodyHasherKey = (None, HashAlgorithm::Sha256, CanonicalizationAlgorithm::Simple);
    const RELAXED: BodyHasherKey = (None, HashAlgorithm::Sha256, CanonicalizationAlgorithm::Relaxed);

    fn build(fail_on_truncate: bool, keys: &[BodyHasherKey]) -> BodyHasher {
        let mut builder = BodyHasherBuilder::new(fail_on_truncate);
        for &key in keys {
            builder.register(key);
        }
        builder.build()
    }

    #[test]
    fn body_hasher_both_canonicalizations() {
        let mut hasher = build(false, &[SIMPLE, RELAXED]);

        assert_eq!(hasher.hash_chunk(b"abc \r\n"), BodyHasherStance::Interested);

        let results = hasher.finish();

        assert_eq!(results.get(&SIMPLE).unwrap().as_ref().unwrap().1, 6);
        assert_eq!(results.get(&RELAXED).unwrap().as_ref().unwrap().1, 5);
    }

    #[test]
    fn body_hasher_fail_on_truncate() {
        let key = (Some(4), HashAlgorithm::Sha256, CanonicalizationAlgorithm::Relaxed);
        let mut hasher = build(true, &[key]);

        assert_eq!(hasher.hash_chunk(b"ab"), BodyHasherStance::Interested);
        assert_eq!(hasher.hash_chunk(b"c"), BodyHasherStance::Interested);

        // the final CRLF exceeds the limit
        let results = hasher.finish();

        assert_eq!(results.get(&key), Some(&Err(BodyHashError::InputTruncated)));
    }

    #[test]
    fn body_hasher_with_length() {
        let key = (Some(27), HashAlgorithm::Sha256, CanonicalizationAlgorithm::Simple);
        let mut hasher = build(false, &[key]);

        assert_eq!(hasher.hash_chunk(b"well  hello \r\n"), BodyHasherStance::Interested);
        assert_eq!(hasher.hash_chunk(b"\r\n what agi \r"), BodyHasherStance::Interested);
        assert_eq!(hasher.hash_chunk(b"\n\r\n"), BodyHasherStance::Done);

        let results = hasher.finish();

        assert_eq!(
            results.get(&key).unwrap().as_ref().unwrap().0,
            crypto::digest(HashAlgorithm::Sha256, [b"well  hello \r\n\r\n what agi \r"])
        );
    }

    #[test]
    fn body_hasher_insufficient_input() {
        let key = (Some(100), HashAlgorithm::Sha256, CanonicalizationAlgorithm::Simple);
        let mut hasher = build(false, &[key]);

        let _ = hasher.hash_chunk(b"short\r\n");

        assert_eq!(hasher.finish().get(&key), Some(&Err(BodyHashError::InsufficientInput)));
    }

    #[test]
    fn body_hasher_known_hash() {
        let mut hasher = build(false, &[RELAXED]);

        let body = b"\
Hello Proff,\r\n\
\r\n\
Let\xe2\x80\x99s try this again, with line\r\n\
breaks and empty lines even.\r\n\
\r\n\
Ciao, und bis bald\r\n\
\r\n\
\r\n\
-- \r\n\
David\r\n\
";

        let _ = hasher.hash_chunk(body);

        let results = hasher.finish();

        assert_eq!(
            encode_base64(&results.get(&RELAXED).unwrap().as_ref().unwrap().0),
            "RMSbeRTj/zCxWeWQXpEIbiqxH0Jqg5eYs4ORzOt3MT0="
        );
    }
}
