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

use crate::crypto::{HashAlgorithm, SigningError, VerificationError, MIN_RSA_KEY_BITS};
use rsa::{
    pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, traits::PublicKeyParts, Pkcs1v15Sign,
    RsaPrivateKey, RsaPublicKey,
};
use sha2::Sha256;

pub fn get_public_key_size(k: &RsaPublicKey) -> usize {
    k.size() * 8
}

pub fn get_key_size(k: &RsaPrivateKey) -> usize {
    k.size() * 8
}

pub fn read_rsa_public_key(key_data: &[u8]) -> Result<RsaPublicKey, VerificationError> {
    let public_key = RsaPublicKey::from_public_key_der(key_data)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(key_data))
        .map_err(|_| VerificationError::InvalidKey)?;

    if get_public_key_size(&public_key) < MIN_RSA_KEY_BITS {
        return Err(VerificationError::InsufficientKeySize);
    }

    Ok(public_key)
}

pub fn verify_rsa(
    hash_alg: HashAlgorithm,
    public_key: &RsaPublicKey,
    data_hash: &[u8],
    signature_data: &[u8],
) -> Result<(), VerificationError> {
    let scheme = match hash_alg {
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
    };

    public_key
        .verify(scheme, data_hash, signature_data)
        .map_err(|_| VerificationError::VerificationFailure)
}

pub fn sign_rsa(
    hash_alg: HashAlgorithm,
    private_key: &RsaPrivateKey,
    data_hash: &[u8],
) -> Result<Vec<u8>, SigningError> {
    let scheme = match hash_alg {
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
    };

    private_key.sign(scheme, data_hash).map_err(|_| SigningError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::DecodePrivateKey;

    #[test]
    fn read_rsa2048_key() {
        let public_key_pem = include_str!("../../tests/keys/rsa2048.pub.pem");
        let private_key_pem = include_str!("../../tests/keys/rsa2048.pem");

        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem).unwrap();
        let public_key = RsaPublicKey::from_public_key_pem(public_key_pem).unwrap();

        assert_eq!(get_public_key_size(&public_key), 2048);
        assert_eq!(RsaPublicKey::from(&private_key), public_key);

        match crate::crypto::SigningKey::from_pem(private_key_pem).unwrap() {
            crate::crypto::SigningKey::Rsa(k) => assert_eq!(k, private_key),
            _ => panic!("not an RSA key"),
        }
    }

    #[test]
    fn read_rsa_public_key_pkcs1_fallback() {
        use rsa::pkcs1::EncodeRsaPublicKey;

        let public_key_pem = include_str!("../../tests/keys/rsa2048.pub.pem");
        let public_key = RsaPublicKey::from_public_key_pem(public_key_pem).unwrap();
        let der = public_key.to_pkcs1_der().unwrap();

        assert_eq!(read_rsa_public_key(der.as_bytes()), Ok(public_key));
        assert_eq!(read_rsa_public_key(b"junk"), Err(VerificationError::InvalidKey));
    }
}
