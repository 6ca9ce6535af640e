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
    header::HeaderFields,
    message_hash::{self, BodyHashError, BodyHashResults},
    signer::{
        format::{self, UnsignedDkimSignature},
        BodyLength, SignRequest, SigningError, SigningResult, Timestamp,
    },
};
use std::time::SystemTime;
use tracing::trace;

pub fn perform_signing<T>(
    request: &SignRequest<T>,
    headers: &HeaderFields,
    hasher_results: &BodyHashResults,
) -> Result<SigningResult, SigningError>
where
    T: AsRef<SigningKey>,
{
    let algorithm = request.algorithm;
    let canonicalization = request.canonicalization;

    let key = (
        request.body_length.to_usize()?,
        algorithm.hash_algorithm(),
        canonicalization.body,
    );

    let (body_hash, final_len) = match hasher_results.get(&key) {
        Some(Ok((h, final_len))) => (h.clone(), *final_len),
        Some(Err(BodyHashError::InsufficientInput)) => {
            return Err(SigningError::InsufficientBodyLength);
        }
        Some(Err(BodyHashError::InputTruncated)) | None => {
            return Err(SigningError::SigningFailure);
        }
    };

    let body_length = match request.body_length {
        BodyLength::All => None,
        BodyLength::OnlyMessageLength | BodyLength::Exact(_) => {
            Some(final_len.try_into().map_err(|_| SigningError::Overflow)?)
        }
    };

    let signed_headers = request.header_selection.resolve(headers);

    if !signed_headers.iter().any(|name| *name == "From") {
        return Err(SigningError::FromHeaderNotSigned);
    }

    trace!(?signed_headers, "selected headers for signing");

    let timestamp = request.timestamp.map(|timestamp| match timestamp {
        Timestamp::Now => now_unix_secs(),
        Timestamp::Exact(t) => t,
    });

    let expiration = request.valid_duration.map(|duration| {
        timestamp
            .unwrap_or_else(now_unix_secs)
            .saturating_add(duration.as_secs())
    });

    let sig = UnsignedDkimSignature {
        algorithm,
        body_hash,
        canonicalization,
        domain: request.domain.clone(),
        signed_headers: signed_headers.into(),
        body_length,
        selector: request.selector.clone(),
        timestamp,
        expiration,
    };

    produce_signature(sig, request, headers)
}

fn produce_signature<T>(
    sig: UnsignedDkimSignature,
    request: &SignRequest<T>,
    headers: &HeaderFields,
) -> Result<SigningResult, SigningError>
where
    T: AsRef<SigningKey>,
{
    let signing_key = request.signing_key.as_ref();
    let format = &request.format;

    let b_len = estimate_b_tag_length(signing_key);

    let (mut header_value, insertion_index) = sig.format_without_signature(format, b_len);

    let header_name = &format.header_name;
    let hash_alg = sig.algorithm.hash_algorithm();

    let data_hash = message_hash::compute_data_hash(
        hash_alg,
        sig.canonicalization.header,
        headers,
        &sig.signed_headers,
        header_name,
        &header_value,
    );

    let signature_data = match signing_key.sign(hash_alg, &data_hash) {
        Ok(s) => {
            trace!(algorithm = %sig.algorithm, "signing successful");
            s
        }
        Err(e) => {
            trace!(algorithm = %sig.algorithm, "signing failed: {e}");
            return Err(SigningError::SigningFailure);
        }
    };

    let sig = sig.into_signature(signature_data.into());

    format::insert_signature_data(
        &mut header_value,
        insertion_index,
        header_name,
        &sig.signature_data,
        format,
    );

    Ok(SigningResult {
        signature: sig,
        header_name: header_name.clone(),
        header_value,
    })
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |t| t.as_secs())
}

// length of the Base64 encoding of the signature
fn estimate_b_tag_length(signing_key: &SigningKey) -> usize {
    (signing_key.signature_length() + 2) / 3 * 4
}
