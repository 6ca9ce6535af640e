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

//! DKIM public key record, as published in DNS.
//!
//! See RFC 6376, section 3.6.1.

use crate::{
    crypto::{HashAlgorithm, KeyType},
    tag_list::{parse_base64_tag_value, parse_colon_separated_tag_value, TagList, TagSpec},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServiceType {
    Any,
    Email,
    Other(Box<str>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Flag {
    Testing,
    NoSubdomains,
    Other(Box<str>),
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DkimKeyRecordError {
    RecordSyntax,
    TagListSyntax,
    InvalidBase64,
    UnsupportedVersion,
    MisplacedVersionTag,
    UnsupportedKeyType,
    NoSupportedHashAlgorithms,
    RevokedKey,
    MissingKeyTag,
    ServiceTypesEmpty,
}

impl Display for DkimKeyRecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordSyntax => write!(f, "ill-formed key record"),
            Self::TagListSyntax => write!(f, "invalid tag-list"),
            Self::InvalidBase64 => write!(f, "invalid Base64 string"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::MisplacedVersionTag => write!(f, "v= tag not initial"),
            Self::UnsupportedKeyType => write!(f, "unsupported key type"),
            Self::NoSupportedHashAlgorithms => write!(f, "no supported hash algorithms"),
            Self::RevokedKey => write!(f, "key revoked"),
            Self::MissingKeyTag => write!(f, "p= tag missing"),
            Self::ServiceTypesEmpty => write!(f, "service types empty"),
        }
    }
}

impl Error for DkimKeyRecordError {}

/// A DKIM public key record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DkimKeyRecord {
    pub hash_algorithms: Box<[HashAlgorithm]>,
    pub key_type: KeyType,
    pub key_data: Box<[u8]>,
    pub service_types: Box<[ServiceType]>,
    pub flags: Box<[Flag]>,
}

impl DkimKeyRecord {
    /// Parses a key record from the raw bytes of a TXT record.
    ///
    /// Bare LF line breaks as produced by some DNS tooling are accepted in
    /// place of CRLF.
    pub fn from_txt_bytes(bytes: &[u8]) -> Result<Self, DkimKeyRecordError> {
        let s = std::str::from_utf8(bytes).map_err(|_| DkimKeyRecordError::RecordSyntax)?;
        let s = s.replace("\r\n", "\n").replace('\n', "\r\n");
        s.trim().parse()
    }

    pub fn is_testing(&self) -> bool {
        self.flags.contains(&Flag::Testing)
    }

    pub fn allows_email(&self) -> bool {
        self.service_types
            .iter()
            .any(|s| matches!(s, ServiceType::Any | ServiceType::Email))
    }

    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, DkimKeyRecordError> {
        let mut hash_algorithms = vec![HashAlgorithm::Sha256];
        let mut key_type = KeyType::Rsa;
        let mut key_data = None;
        let mut service_types = vec![ServiceType::Any];
        let mut flags = vec![];

        for (i, &TagSpec { name, value }) in tag_list.as_ref().iter().enumerate() {
            match name {
                "v" => {
                    if i != 0 {
                        return Err(DkimKeyRecordError::MisplacedVersionTag);
                    }
                    if value != "DKIM1" {
                        return Err(DkimKeyRecordError::UnsupportedVersion);
                    }
                }
                "h" => {
                    hash_algorithms = parse_colon_separated_tag_value(value)
                        .into_iter()
                        .filter(|s| s.eq_ignore_ascii_case("sha256"))
                        .map(|_| HashAlgorithm::Sha256)
                        .take(1)
                        .collect();

                    if hash_algorithms.is_empty() {
                        return Err(DkimKeyRecordError::NoSupportedHashAlgorithms);
                    }
                }
                "k" => {
                    if value.eq_ignore_ascii_case("ed25519") {
                        key_type = KeyType::Ed25519;
                    } else if !value.eq_ignore_ascii_case("rsa") {
                        return Err(DkimKeyRecordError::UnsupportedKeyType);
                    }
                }
                "p" => {
                    if value.is_empty() {
                        return Err(DkimKeyRecordError::RevokedKey);
                    }

                    let s = parse_base64_tag_value(value)
                        .map_err(|_| DkimKeyRecordError::InvalidBase64)?;

                    key_data = Some(s.into());
                }
                "s" => {
                    let st: Vec<_> = parse_colon_separated_tag_value(value)
                        .into_iter()
                        .filter(|s| !s.is_empty())
                        .map(|s| {
                            if s == "*" {
                                ServiceType::Any
                            } else if s.eq_ignore_ascii_case("email") {
                                ServiceType::Email
                            } else {
                                ServiceType::Other(s.into())
                            }
                        })
                        .collect();

                    if st.is_empty() {
                        return Err(DkimKeyRecordError::ServiceTypesEmpty);
                    }

                    service_types = st;
                }
                "t" => {
                    flags = parse_colon_separated_tag_value(value)
                        .into_iter()
                        .filter(|s| !s.is_empty())
                        .map(|s| {
                            if s.eq_ignore_ascii_case("y") {
                                Flag::Testing
                            } else if s.eq_ignore_ascii_case("s") {
                                Flag::NoSubdomains
                            } else {
                                Flag::Other(s.into())
                            }
                        })
                        .collect();
                }
                // unknown tags, and the n= notes, are ignored
                _ => {}
            }
        }

        let key_data = key_data.ok_or(DkimKeyRecordError::MissingKeyTag)?;

        Ok(Self {
            hash_algorithms: hash_algorithms.into(),
            key_type,
            key_data,
            service_types: service_types.into(),
            flags: flags.into(),
        })
    }
}

impl FromStr for DkimKeyRecord {
    type Err = DkimKeyRecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list = TagList::parse(s).map_err(|_| DkimKeyRecordError::TagListSyntax)?;

        Self::from_tag_list(&tag_list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_record_ok() {
        let record: DkimKeyRecord = "v=DKIM1; p=YWJj; s = email; t=y:s; n = some=20notes;"
            .parse()
            .unwrap();

        assert_eq!(
            record,
            DkimKeyRecord {
                hash_algorithms: [HashAlgorithm::Sha256].into(),
                key_type: KeyType::Rsa,
                key_data: b"abc".to_vec().into(),
                service_types: [ServiceType::Email].into(),
                flags: [Flag::Testing, Flag::NoSubdomains].into(),
            }
        );
        assert!(record.is_testing());
        assert!(record.allows_email());
    }

    #[test]
    fn key_record_errors() {
        let parse = |s: &str| s.parse::<DkimKeyRecord>();

        assert_eq!(parse("v=DKIM1; p="), Err(DkimKeyRecordError::RevokedKey));
        assert_eq!(parse("k=rsa; v=DKIM1; p=YWJj"), Err(DkimKeyRecordError::MisplacedVersionTag));
        assert_eq!(parse("v=DKIM1; k=dsa; p=YWJj"), Err(DkimKeyRecordError::UnsupportedKeyType));
        assert_eq!(parse("v=DKIM1; h=sha1; p=YWJj"), Err(DkimKeyRecordError::NoSupportedHashAlgorithms));
        assert_eq!(parse("v=DKIM1"), Err(DkimKeyRecordError::MissingKeyTag));
        assert_eq!(parse("v=DKIM1; p=YWJj; p=YWJj"), Err(DkimKeyRecordError::TagListSyntax));
    }

    #[test]
    fn key_record_from_txt_bytes_lf() {
        let record = DkimKeyRecord::from_txt_bytes(b"v=DKIM1; k=ed25519;\n\t p=YW\n\tJj").unwrap();

        assert_eq!(record.key_type, KeyType::Ed25519);
        assert_eq!(&*record.key_data, b"abc");
    }
}
