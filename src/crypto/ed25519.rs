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

use crate::crypto::{SigningError, VerificationError};
use ed25519_dalek::{
    pkcs8::DecodePublicKey, Signature, Signer, SigningKey, Verifier, VerifyingKey,
};

pub fn read_ed25519_verifying_key(key_data: &[u8]) -> Result<VerifyingKey, VerificationError> {
    VerifyingKey::try_from(key_data)
        .or_else(|_| VerifyingKey::from_public_key_der(key_data))
        .map_err(|_| VerificationError::InvalidKey)
}

pub fn verify_ed25519(
    verifying_key: &VerifyingKey,
    data_hash: &[u8],
    signature_data: &[u8],
) -> Result<(), VerificationError> {
    let signature = Signature::from_slice(signature_data)
        .map_err(|_| VerificationError::InvalidSignature)?;

    verifying_key
        .verify(data_hash, &signature)
        .map_err(|_| VerificationError::VerificationFailure)
}

pub fn sign_ed25519(signing_key: &SigningKey, data_hash: &[u8]) -> Result<Vec<u8>, SigningError> {
    let signature = signing_key
        .try_sign(data_hash)
        .map_err(|_| SigningError)?;
    Ok(signature.to_bytes().to_vec())
}
