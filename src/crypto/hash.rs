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

use crate::crypto::HashAlgorithm;
use digest::{Digest, DynDigest};
use sha2::Sha256;

/// Computes the digest of the concatenated slices.
pub fn digest<I, T>(hash_alg: HashAlgorithm, slices: I) -> Box<[u8]>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    match hash_alg {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            for bytes in slices {
                Digest::update(&mut hasher, bytes.as_ref());
            }
            Box::from(&Digest::finalize(hasher)[..])
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InsufficientInput;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashStatus {
    AllConsumed,
    Truncated,
}

/// A hasher that digests at most a given number of bytes and keeps count of
/// the bytes digested.
pub struct CountingHasher {
    digest: Box<dyn DynDigest + Send>,
    length: Option<usize>,
    bytes_written: usize,
}

impl CountingHasher {
    pub fn new(hash_alg: HashAlgorithm, length: Option<usize>) -> Self {
        let digest: Box<dyn DynDigest + Send> = match hash_alg {
            HashAlgorithm::Sha256 => Box::new(Sha256::default()),
        };

        Self {
            digest,
            length,
            bytes_written: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) -> HashStatus {
        let (bytes, status) = match self.length {
            Some(len) => {
                let left = len - self.bytes_written;
                if left >= bytes.len() {
                    (bytes, HashStatus::AllConsumed)
                } else {
                    (&bytes[..left], HashStatus::Truncated)
                }
            }
            None => (bytes, HashStatus::AllConsumed),
        };

        self.digest.update(bytes);
        self.bytes_written += bytes.len();

        status
    }

    pub fn finish(self) -> Result<(Box<[u8]>, usize), InsufficientInput> {
        if self.length.is_some() && !self.is_done() {
            return Err(InsufficientInput);
        }

        Ok((self.digest.finalize(), self.bytes_written))
    }

    pub fn is_done(&self) -> bool {
        matches!(self.length, Some(len) if len == self.bytes_written)
    }
}
