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
    crypto::{HashAlgorithm, KeyType, VerifyingKey},
    header::HeaderFields,
    record::DkimKeyRecord,
    signature::{DkimSignature, DkimSignatureError, DkimSignatureErrorKind, DKIM_SIGNATURE_NAME},
    verifier::{
        query::{LookupTxt, Queries},
        verify, Config, PolicyError, VerifierError,
    },
};
use std::{str, sync::Arc};
use tracing::{debug, trace};

pub enum VerifyStatus {
    InProgress,
    Failed(VerifierError),
    Successful,
}

pub struct VerifyTask {
    pub status: VerifyStatus,
    pub index: usize,
    pub signature: Option<DkimSignature>,
    pub name: Box<str>,
    pub value: Box<str>,
    pub key_record: Option<Arc<DkimKeyRecord>>,
    pub testing: bool,
    pub key_size: Option<usize>,
}

impl VerifyTask {
    fn failed(index: usize, signature: Option<DkimSignature>, error: VerifierError) -> Self {
        Self {
            status: VerifyStatus::Failed(error),
            index,
            signature,
            name: Default::default(),
            value: Default::default(),
            key_record: None,
            testing: false,
            key_size: None,
        }
    }

    fn in_progress(index: usize, signature: DkimSignature, name: &str, value: &str) -> Self {
        Self {
            status: VerifyStatus::InProgress,
            index,
            signature: Some(signature),
            name: name.into(),
            value: value.into(),
            key_record: None,
            testing: false,
            key_size: None,
        }
    }
}

/// Verification of the *DKIM-Signature* headers of a header block.
pub struct HeaderVerifier<'a> {
    headers: &'a HeaderFields,
    config: &'a Config,
    tasks: Vec<VerifyTask>,
}

impl<'a> HeaderVerifier<'a> {
    /// Collects the signatures to evaluate, or `None` if there are none.
    pub fn find_signatures(headers: &'a HeaderFields, config: &'a Config) -> Option<Self> {
        let dkim_headers = headers
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| *name == DKIM_SIGNATURE_NAME)
            .take(config.max_signatures);

        let mut tasks = vec![];

        for (index, (name, value)) in dkim_headers {
            // from here on, the signature counts and a result must be recorded

            // well-formed DKIM-Signature headers contain only UTF-8
            let value = match str::from_utf8(value.as_ref()) {
                Ok(value) => value,
                Err(_) => {
                    let error = DkimSignatureError {
                        domain: None,
                        kind: DkimSignatureErrorKind::TagListSyntax,
                    };
                    tasks.push(VerifyTask::failed(
                        index,
                        None,
                        VerifierError::DkimSignatureFormat(error),
                    ));
                    continue;
                }
            };

            let task = match value.parse::<DkimSignature>() {
                Ok(sig) => match check_policy(&sig, config) {
                    Ok(()) => VerifyTask::in_progress(index, sig, name.as_ref(), value),
                    Err(e) => {
                        debug!(domain = %sig.domain, "signature rejected by policy: {e}");
                        VerifyTask::failed(index, Some(sig), e)
                    }
                },
                Err(e) => {
                    debug!("unusable DKIM-Signature header: {e}");
                    VerifyTask::failed(index, None, VerifierError::DkimSignatureFormat(e))
                }
            };

            tasks.push(task);
        }

        if tasks.is_empty() {
            None
        } else {
            Some(Self { headers, config, tasks })
        }
    }

    /// Looks up key records and verifies all signatures still in progress.
    pub fn verify_all<T>(mut self, resolver: &T) -> Vec<VerifyTask>
    where
        T: LookupTxt + ?Sized,
    {
        let mut queries = Queries::new();

        for task in &mut self.tasks {
            if let VerifyStatus::InProgress = task.status {
                verify_task(task, self.headers, self.config, resolver, &mut queries);
            }
        }

        self.tasks
    }
}

fn check_policy(sig: &DkimSignature, config: &Config) -> Result<(), VerifierError> {
    for h in &config.required_signed_headers {
        if !sig.signed_headers.contains(h) {
            return Err(VerifierError::Policy(PolicyError::RequiredHeadersNotSigned));
        }
    }

    if let Some(len) = sig.body_length {
        // signed body length too large to process on this platform
        if usize::try_from(len).is_err() {
            return Err(VerifierError::Overflow);
        }
    }

    let now = config.current_timestamp();
    let delta = config.time_tolerance.as_secs();

    if config.fail_if_expired {
        if let Some(x) = sig.expiration {
            if now >= x.saturating_add(delta) {
                return Err(VerifierError::Policy(PolicyError::SignatureExpired));
            }
        }
    }

    if config.fail_if_in_future {
        if let Some(t) = sig.timestamp {
            if t.saturating_sub(delta) > now {
                return Err(VerifierError::Policy(PolicyError::TimestampInFuture));
            }
        }
    }

    Ok(())
}

fn verify_task<T>(
    task: &mut VerifyTask,
    headers: &HeaderFields,
    config: &Config,
    resolver: &T,
    queries: &mut Queries,
) where
    T: LookupTxt + ?Sized,
{
    let sig = match &task.signature {
        Some(sig) => sig,
        None => return,
    };

    trace!(domain = %sig.domain, selector = %sig.selector, "processing DKIM-Signature");

    let key_type = sig.algorithm.key_type();
    let hash_alg = sig.algorithm.hash_algorithm();

    let records = match queries.look_up(resolver, &sig.domain, &sig.selector) {
        Ok(records) => records,
        Err(e) => {
            task.status = VerifyStatus::Failed(e.clone());
            return;
        }
    };

    // step through all (usually only one) key records, recording the last
    // error seen
    for (i, record) in records.iter().enumerate() {
        trace!("trying verification using DKIM key record {}", i + 1);

        task.key_record = None;
        task.testing = false;
        task.key_size = None;

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                task.status = VerifyStatus::Failed(e.clone());
                continue;
            }
        };

        task.key_record = Some(record.clone());
        task.testing = record.is_testing();

        if let Err(e) = validate_key_record(key_type, hash_alg, record) {
            task.status = VerifyStatus::Failed(e);
            continue;
        }

        let public_key = match VerifyingKey::from_key_data(key_type, &record.key_data) {
            Ok(k) => k,
            Err(e) => {
                trace!("unusable public key: {e}");
                task.status = VerifyStatus::Failed(VerifierError::VerificationFailure(e));
                continue;
            }
        };

        task.key_size = public_key.key_size();

        if matches!(task.key_size, Some(n) if n < config.min_key_bits) {
            trace!("public key size too small");
            task.status = VerifyStatus::Failed(VerifierError::Policy(PolicyError::KeyTooSmall));
            continue;
        }

        match verify::perform_verification(headers, &public_key, sig, &task.name, &task.value) {
            Ok(()) => {
                task.status = VerifyStatus::Successful;
                break;
            }
            Err(e) => {
                task.status = VerifyStatus::Failed(e);
            }
        }
    }
}

fn validate_key_record(
    key_type: KeyType,
    hash_alg: HashAlgorithm,
    record: &DkimKeyRecord,
) -> Result<(), VerifierError> {
    if record.key_type != key_type {
        trace!("wrong public key type");
        return Err(VerifierError::WrongKeyType);
    }
    if !record.hash_algorithms.contains(&hash_alg) {
        trace!("disallowed hash algorithm");
        return Err(VerifierError::DisallowedHashAlgorithm);
    }
    if !record.allows_email() {
        trace!("disallowed service type");
        return Err(VerifierError::DisallowedServiceType);
    }
    Ok(())
}
