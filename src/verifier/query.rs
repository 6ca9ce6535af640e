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

//! Key record lookup.

use crate::{
    record::{DkimKeyRecord, DkimKeyRecordError},
    signature::{DomainName, Selector},
    verifier::VerifierError,
};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    sync::Arc,
};
use tracing::trace;

/// A resolver of DNS TXT records.
///
/// The verifier performs no network I/O itself, all key record lookups go
/// through an implementation of this trait. Any closure taking the query name
/// and returning the payload of a single TXT record implements it.
///
/// # Examples
///
/// ```
/// use std::io::{self, ErrorKind};
/// use viamail::verifier::LookupTxt;
///
/// let resolver = |name: &str| match name {
///     "sel._domainkey.example.com." => Ok(b"v=DKIM1; k=ed25519; p=...".to_vec()),
///     _ => Err(io::Error::from(ErrorKind::NotFound)),
/// };
///
/// assert!(resolver.lookup_txt("sel._domainkey.example.org.").is_err());
/// ```
pub trait LookupTxt {
    /// Looks up the TXT records at the given absolute domain name (with
    /// trailing dot). Each answer holds the character strings of one TXT
    /// record, concatenated.
    ///
    /// A non-existent record should be reported as an empty answer or as an
    /// error of kind `NotFound`.
    fn lookup_txt(&self, domain: &str) -> io::Result<Vec<io::Result<Vec<u8>>>>;
}

impl<F> LookupTxt for F
where
    F: Fn(&str) -> io::Result<Vec<u8>>,
{
    fn lookup_txt(&self, domain: &str) -> io::Result<Vec<io::Result<Vec<u8>>>> {
        self(domain).map(|txt| vec![Ok(txt)])
    }
}

/// Parsed key records found at some domain and selector, or the reason why
/// none could be obtained.
pub type KeyRecords = Result<Vec<Result<Arc<DkimKeyRecord>, VerifierError>>, VerifierError>;

/// Formats the name at which the key record for a domain and selector is
/// published.
pub fn query_name(domain: &DomainName, selector: &Selector) -> String {
    // Note the trailing dot: only absolute queries.
    format!("{}._domainkey.{}.", selector.to_ascii(), domain.to_ascii())
}

/// Key record lookups performed during one verification, so that signatures
/// sharing domain and selector trigger only one lookup.
#[derive(Default)]
pub struct Queries {
    results: HashMap<String, KeyRecords>,
}

impl Queries {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn look_up<T>(&mut self, resolver: &T, domain: &DomainName, selector: &Selector) -> &KeyRecords
    where
        T: LookupTxt + ?Sized,
    {
        self.results
            .entry(query_name(domain, selector))
            .or_insert_with_key(|dname| look_up_records(resolver, dname))
    }
}

fn look_up_records<T: LookupTxt + ?Sized>(resolver: &T, dname: &str) -> KeyRecords {
    trace!(%dname, "looking up DKIM key record");

    let txts = match resolver.lookup_txt(dname) {
        Ok(txts) if txts.is_empty() => {
            trace!("no key record");
            return Err(VerifierError::NoKeyFound);
        }
        Ok(txts) => txts,
        Err(e) => {
            return Err(match e.kind() {
                ErrorKind::NotFound => {
                    trace!("no key record");
                    VerifierError::NoKeyFound
                }
                ErrorKind::InvalidInput => {
                    trace!("invalid key record domain name");
                    VerifierError::InvalidKeyDomain
                }
                _ => {
                    trace!("could not look up key record: {e}");
                    VerifierError::KeyLookup
                }
            });
        }
    };

    // RFC 6376, section 6.1.2 allows cycling through multiple key records in
    // unspecified order. At most three are tried: the first two and the last.
    let last = txts.len() - 1;

    let records = txts
        .into_iter()
        .enumerate()
        .filter(|(i, _)| *i < 2 || *i == last)
        .map(|(_, txt)| parse_record(txt))
        .collect();

    Ok(records)
}

fn parse_record(txt: io::Result<Vec<u8>>) -> Result<Arc<DkimKeyRecord>, VerifierError> {
    let txt = txt.map_err(|e| {
        trace!("could not read TXT record: {e}");
        VerifierError::KeyRecordFormat
    })?;

    DkimKeyRecord::from_txt_bytes(&txt)
        .map(Arc::new)
        .map_err(|e| {
            trace!("invalid key record: {e}");
            match e {
                DkimKeyRecordError::RevokedKey => VerifierError::KeyRevoked,
                _ => VerifierError::KeyRecordFormat,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct MockLookupTxt;

    impl LookupTxt for MockLookupTxt {
        fn lookup_txt(&self, domain: &str) -> io::Result<Vec<io::Result<Vec<u8>>>> {
            match domain {
                "sel._domainkey.example.com." => Ok(vec![
                    Ok(b"v=DKIM1; k=ed25519; p=VigVX9zKQVf15Q5Ku5ggnQFVRtd6BdWFtT3rFYQvKLQ=".to_vec()),
                    Ok(b"two\xff\x00".to_vec()),
                    Ok(b"v=DKIM1; p=".to_vec()),
                    Err(ErrorKind::Unsupported.into()),
                ]),
                "xn--9j8hqg._domainkey.example.xn--fiqs8s." => Ok(vec![]),
                "err._domainkey.example.org." => Err(ErrorKind::TimedOut.into()),
                _ => Err(ErrorKind::NotFound.into()),
            }
        }
    }

    fn domain_and_selector(domain: &str, selector: &str) -> (DomainName, Selector) {
        (DomainName::new(domain).unwrap(), Selector::new(selector).unwrap())
    }

    #[test]
    fn query_name_ok() {
        let (d, s) = domain_and_selector("Example.中国", "🎆🏮");

        assert_eq!(query_name(&d, &s), "xn--9j8hqg._domainkey.example.xn--fiqs8s.");
    }

    #[test]
    fn look_up_records_ok() {
        let (d, s) = domain_and_selector("example.com", "sel");

        let mut queries = Queries::new();

        let records = queries.look_up(&MockLookupTxt, &d, &s).as_ref().unwrap();

        assert_eq!(records.len(), 3);
        assert!(records[0].is_ok());
        assert_eq!(records[1], Err(VerifierError::KeyRecordFormat));
        assert_eq!(records[2], Err(VerifierError::KeyRecordFormat));
    }

    #[test]
    fn look_up_records_errors() {
        let mut queries = Queries::new();

        let (d, s) = domain_and_selector("example.xn--fiqs8s", "xn--9j8hqg");
        assert_eq!(queries.look_up(&MockLookupTxt, &d, &s), &Err(VerifierError::NoKeyFound));

        let (d, s) = domain_and_selector("example.org", "err");
        assert_eq!(queries.look_up(&MockLookupTxt, &d, &s), &Err(VerifierError::KeyLookup));

        let (d, s) = domain_and_selector("example.net", "none");
        assert_eq!(queries.look_up(&MockLookupTxt, &d, &s), &Err(VerifierError::NoKeyFound));
    }

    #[test]
    fn look_up_records_revoked() {
        let resolver = |_: &str| -> io::Result<Vec<u8>> { Ok(b"v=DKIM1; p=".to_vec()) };
        let (d, s) = domain_and_selector("example.com", "sel");

        let mut queries = Queries::new();

        let records = queries.look_up(&resolver, &d, &s).as_ref().unwrap();

        assert_eq!(records, &[Err(VerifierError::KeyRevoked)]);
    }

    #[test]
    fn queries_cache_lookups() {
        let count = Cell::new(0);
        let resolver = |_: &str| -> io::Result<Vec<u8>> {
            count.set(count.get() + 1);
            Err(io::Error::from(ErrorKind::NotFound))
        };

        let (d1, s1) = domain_and_selector("example.com", "sel");
        let (d2, s2) = domain_and_selector("EXAMPLE.com", "sel");

        let mut queries = Queries::new();
        let _ = queries.look_up(&resolver, &d1, &s1);
        let _ = queries.look_up(&resolver, &d2, &s2);

        assert_eq!(count.get(), 1);
    }
}
