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
    crypto::VerifyingKey,
    header::HeaderFields,
    message_hash,
    signature::DkimSignature,
    tag_list,
    verifier::VerifierError,
};
use std::borrow::Cow;
use tracing::trace;

/// Verifies the signature data of a DKIM signature against the header hash,
/// given the original name and value of the *DKIM-Signature* header.
pub fn perform_verification(
    headers: &HeaderFields,
    public_key: &VerifyingKey,
    sig: &DkimSignature,
    name: &str,
    value: &str,
) -> Result<(), VerifierError> {
    let hash_alg = sig.algorithm.hash_algorithm();

    let original_dkim_sig = make_original_dkim_sig(value);

    let data_hash = message_hash::compute_data_hash(
        hash_alg,
        sig.canonicalization.header,
        headers,
        &sig.signed_headers,
        name,
        &original_dkim_sig,
    );

    match public_key.verify(hash_alg, &data_hash, &sig.signature_data) {
        Ok(()) => {
            trace!(algorithm = %sig.algorithm, "public key verification successful");
            Ok(())
        }
        Err(e) => {
            trace!(algorithm = %sig.algorithm, "public key verification failed: {e}");
            Err(VerifierError::VerificationFailure(e))
        }
    }
}

// Removes the b= tag value, leaving everything else (including whitespace
// around the tag) in place.
fn make_original_dkim_sig(value: &str) -> Cow<'_, str> {
    fn b_tag_prefix_len(s: &str) -> Option<usize> {
        let (rest, _) = tag_list::strip_tag_name_and_equals(s).filter(|(_, name)| *name == "b")?;
        Some(s.len() - rest.len())
    }

    let mut last_i = 0;

    for (i, _) in value.match_indices(';') {
        if let Some(n) = b_tag_prefix_len(&value[last_i..i]) {
            let mut val = String::with_capacity(value.len());
            val.push_str(&value[..(last_i + n)]);
            val.push_str(&value[i..]);
            return val.into();
        }
        last_i = i + 1;
    }

    if last_i != value.len() {
        if let Some(n) = b_tag_prefix_len(&value[last_i..]) {
            return value[..(last_i + n)].into();
        }
    }

    value.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_original_dkim_sig_basic() {
        assert_eq!(make_original_dkim_sig(" a = 1 ; b = 2 ; c = 3 "), " a = 1 ; b =; c = 3 ");
        assert_eq!(make_original_dkim_sig(" a = 1 ; b = 2 ;"), " a = 1 ; b =;");
        assert_eq!(make_original_dkim_sig(" a = 1 ; b = 2 "), " a = 1 ; b =");
        assert_eq!(make_original_dkim_sig(" a = 1 ; b ="), " a = 1 ; b =");
    }

    #[test]
    fn make_original_dkim_sig_keeps_bh() {
        assert_eq!(
            make_original_dkim_sig(" bh=abc=;\r\n\tb=de\r\n\tf="),
            " bh=abc=;\r\n\tb="
        );
        assert_eq!(make_original_dkim_sig(" v=1; d=x"), " v=1; d=x");
    }
}
