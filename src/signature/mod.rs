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

//! The DKIM signature and its parts.

mod names;

pub use names::{DomainName, ParseDomainError, Selector};

use crate::{
    crypto::{HashAlgorithm, KeyType},
    header::FieldName,
    tag_list::{parse_base64_tag_value, parse_colon_separated_tag_value, TagList},
    util::{encode_base64, CanonicalStr},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

pub const DKIM_SIGNATURE_NAME: &str = "DKIM-Signature";

/// A signature algorithm for the *a=* tag.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureAlgorithm {
    RsaSha256,
    Ed25519Sha256,
}

impl SignatureAlgorithm {
    const ALL: [Self; 2] = [Self::RsaSha256, Self::Ed25519Sha256];

    pub fn key_type(self) -> KeyType {
        match self {
            Self::RsaSha256 => KeyType::Rsa,
            Self::Ed25519Sha256 => KeyType::Ed25519,
        }
    }

    pub fn hash_algorithm(self) -> HashAlgorithm {
        HashAlgorithm::Sha256
    }
}

impl From<(KeyType, HashAlgorithm)> for SignatureAlgorithm {
    fn from((key_type, _): (KeyType, HashAlgorithm)) -> Self {
        match key_type {
            KeyType::Rsa => Self::RsaSha256,
            KeyType::Ed25519 => Self::Ed25519Sha256,
        }
    }
}

impl CanonicalStr for SignatureAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::RsaSha256 => "rsa-sha256",
            Self::Ed25519Sha256 => "ed25519-sha256",
        }
    }
}

impl Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = DkimSignatureErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(alg) = Self::ALL.into_iter().find(|a| s.eq_ignore_ascii_case(a.canonical_str())) {
            return Ok(alg);
        }

        // RFC 8301 withdrew SHA-1
        if s.eq_ignore_ascii_case("rsa-sha1") {
            Err(DkimSignatureErrorKind::HistoricAlgorithm)
        } else {
            Err(DkimSignatureErrorKind::Unsupported("a"))
        }
    }
}

/// A canonicalization algorithm, for either header or body.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CanonicalizationAlgorithm {
    #[default]
    Simple,
    Relaxed,
}

impl CanonicalStr for CanonicalizationAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }
}

impl Display for CanonicalizationAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for CanonicalizationAlgorithm {
    type Err = DkimSignatureErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Simple, Self::Relaxed]
            .into_iter()
            .find(|c| s.eq_ignore_ascii_case(c.canonical_str()))
            .ok_or(DkimSignatureErrorKind::Unsupported("c"))
    }
}

/// The *c=* tag: header and body canonicalization.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct Canonicalization {
    pub header: CanonicalizationAlgorithm,
    pub body: CanonicalizationAlgorithm,
}

impl From<(CanonicalizationAlgorithm, CanonicalizationAlgorithm)> for Canonicalization {
    fn from((header, body): (CanonicalizationAlgorithm, CanonicalizationAlgorithm)) -> Self {
        Self { header, body }
    }
}

impl CanonicalStr for Canonicalization {
    fn canonical_str(&self) -> &'static str {
        use CanonicalizationAlgorithm::*;

        match (self.header, self.body) {
            (Simple, Simple) => "simple/simple",
            (Simple, Relaxed) => "simple/relaxed",
            (Relaxed, Simple) => "relaxed/simple",
            (Relaxed, Relaxed) => "relaxed/relaxed",
        }
    }
}

impl Display for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl fmt::Debug for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.header, self.body)
    }
}

impl FromStr for Canonicalization {
    type Err = DkimSignatureErrorKind;

    /// Parses `header/body`, where a missing body part means *simple*.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (header, body) = s.split_once('/').unwrap_or((s, "simple"));
        Ok((header.parse()?, body.parse()?).into())
    }
}

/// The reason a `DKIM-Signature` header value was rejected.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DkimSignatureErrorKind {
    /// The value is not a well-formed tag list.
    TagListSyntax,
    /// A required tag is absent.
    MissingTag(&'static str),
    /// A tag value is ill-formed.
    InvalidTagValue(&'static str),
    /// A tag value is well-formed, but names a version, algorithm,
    /// canonicalization or query method this library does not know.
    Unsupported(&'static str),
    /// The algorithm is *rsa-sha1*.
    HistoricAlgorithm,
    /// The *h=* tag does not list `From`.
    FromHeaderNotSigned,
    /// The *x=* expiration is not later than the *t=* timestamp.
    ExpirationNotAfterTimestamp,
}

impl Display for DkimSignatureErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::TagListSyntax => write!(f, "ill-formed tag list"),
            Self::MissingTag(name) => write!(f, "{name}= tag missing"),
            Self::InvalidTagValue(name) => write!(f, "ill-formed {name}= tag value"),
            Self::Unsupported(name) => write!(f, "unsupported {name}= tag value"),
            Self::HistoricAlgorithm => write!(f, "historic algorithm rsa-sha1"),
            Self::FromHeaderNotSigned => write!(f, "From header not signed"),
            Self::ExpirationNotAfterTimestamp => write!(f, "expiration not after timestamp"),
        }
    }
}

/// An error that occurs when parsing a `DKIM-Signature` header value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DkimSignatureError {
    /// The *d=* domain, if one could be read, for diagnostics.
    pub domain: Option<DomainName>,
    pub kind: DkimSignatureErrorKind,
}

impl Display for DkimSignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{} (d={domain})", self.kind),
            None => self.kind.fmt(f),
        }
    }
}

impl Error for DkimSignatureError {}

/// A DKIM signature as encoded in a `DKIM-Signature` header field.
///
/// The tags *i=* and *z=* are accepted on input but not retained.
#[derive(Clone, Eq, PartialEq)]
pub struct DkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub signature_data: Box<[u8]>,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
}

impl FromStr for DkimSignature {
    type Err = DkimSignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tags = TagList::parse(s).map_err(|_| DkimSignatureError {
            domain: None,
            kind: DkimSignatureErrorKind::TagListSyntax,
        })?;

        Self::from_tags(&tags).map_err(|kind| DkimSignatureError {
            domain: tags.get("d").and_then(|d| DomainName::new(d).ok()),
            kind,
        })
    }
}

impl DkimSignature {
    // Tags are checked in a fixed order, so that the reported error does not
    // depend on the order of tags in the input.
    fn from_tags(tags: &TagList<'_>) -> Result<Self, DkimSignatureErrorKind> {
        use DkimSignatureErrorKind::*;

        let required = |name: &'static str| tags.get(name).ok_or(MissingTag(name));
        let base64 = |name: &'static str| {
            parse_base64_tag_value(required(name)?)
                .map(Vec::into_boxed_slice)
                .map_err(|_| InvalidTagValue(name))
        };
        let number = |name: &'static str| {
            tags.get(name)
                .map(|value| value.parse::<u64>().map_err(|_| InvalidTagValue(name)))
                .transpose()
        };

        if required("v")? != "1" {
            return Err(Unsupported("v"));
        }

        let algorithm = required("a")?.parse()?;
        let signature_data = base64("b")?;
        let body_hash = base64("bh")?;

        let canonicalization = match tags.get("c") {
            Some(value) => value.parse()?,
            None => Default::default(),
        };

        let domain = DomainName::new(required("d")?).map_err(|_| InvalidTagValue("d"))?;

        let signed_headers = parse_colon_separated_tag_value(required("h")?)
            .into_iter()
            .map(FieldName::new)
            .collect::<Result<Box<[_]>, _>>()
            .map_err(|_| InvalidTagValue("h"))?;
        if !signed_headers.iter().any(|name| *name == "From") {
            return Err(FromHeaderNotSigned);
        }

        let body_length = number("l")?;

        if let Some(methods) = tags.get("q") {
            let methods = parse_colon_separated_tag_value(methods);
            if !methods.iter().any(|m| m.eq_ignore_ascii_case("dns/txt")) {
                return Err(Unsupported("q"));
            }
        }

        let selector = Selector::new(required("s")?).map_err(|_| InvalidTagValue("s"))?;

        let timestamp = number("t")?;
        let expiration = number("x")?;
        if matches!((timestamp, expiration), (Some(t), Some(x)) if x <= t) {
            return Err(ExpirationNotAfterTimestamp);
        }

        Ok(Self {
            algorithm,
            signature_data,
            body_hash,
            canonicalization,
            domain,
            signed_headers,
            body_length,
            selector,
            timestamp,
            expiration,
        })
    }
}

impl fmt::Debug for DkimSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkimSignature")
            .field("algorithm", &self.algorithm)
            .field("signature_data", &encode_base64(&self.signature_data))
            .field("body_hash", &encode_base64(&self.body_hash))
            .field("canonicalization", &self.canonicalization)
            .field("domain", &self.domain)
            .field("signed_headers", &self.signed_headers)
            .field("body_length", &self.body_length)
            .field("selector", &self.selector)
            .field("timestamp", &self.timestamp)
            .field("expiration", &self.expiration)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::decode_base64;

    #[test]
    fn parse_appendix_a_signature() {
        // RFC 6376, appendix A.2, with i= and z= tags
        let example = "v=1; a=rsa-sha256; d=example.net; s=brisbane;
  c=simple; q=dns/txt; i=@eng.example.net;
  t=1117574938; x=1118006938;
  h=from:to:subject:date;
  z=From:foo@eng.example.net|To:joe@example.com|
   Subject:demo=20run|Date:July=205,=202005=203:44:08=20PM=20-0700;
  bh=MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI=;
  b=dzdVyOfAKCdLXdJOc9G2q8LoXSlEniSbav+yuU4zGeeruD00lszZVoG4ZHRNiYzR";
        let example = example.replace('\n', "\r\n");

        let sig: DkimSignature = example.parse().unwrap();

        assert_eq!(sig.algorithm, SignatureAlgorithm::RsaSha256);
        assert_eq!(
            &*sig.signature_data,
            decode_base64("dzdVyOfAKCdLXdJOc9G2q8LoXSlEniSbav+yuU4zGeeruD00lszZVoG4ZHRNiYzR")
                .unwrap()
                .as_slice()
        );
        assert_eq!(&*sig.body_hash, &b"12345678901234567890123456789012"[..]);
        assert_eq!(sig.canonicalization, Canonicalization::default());
        assert_eq!(sig.domain, DomainName::new("example.net").unwrap());
        assert_eq!(sig.selector, Selector::new("brisbane").unwrap());
        assert_eq!(
            sig.signed_headers
                .iter()
                .map(|name| name.as_ref())
                .collect::<Vec<_>>(),
            ["from", "to", "subject", "date"]
        );
        assert_eq!(sig.body_length, None);
        assert_eq!(sig.timestamp, Some(1117574938));
        assert_eq!(sig.expiration, Some(1118006938));
    }

    #[test]
    fn signature_errors() {
        use DkimSignatureErrorKind::*;

        let parse = |s: &str| s.parse::<DkimSignature>().unwrap_err().kind;

        assert_eq!(parse("v=1; a=rsa-sha256"), MissingTag("b"));
        assert_eq!(parse("v=1; a=rsa-sha1"), HistoricAlgorithm);
        assert_eq!(parse("v=2"), Unsupported("v"));
        assert_eq!(parse("v=1; v=1"), TagListSyntax);
        assert_eq!(
            parse("v=1; a=rsa-sha256; b=; bh=; d=example.com; s=sel; h=to:subject"),
            FromHeaderNotSigned
        );
        assert_eq!(
            parse("v=1; a=rsa-sha256; b=; bh=; d=example.com; s=sel; h=from; t=10; x=10"),
            ExpirationNotAfterTimestamp
        );
        assert_eq!(
            parse("v=1; a=rsa-sha256; b=; bh=; d=example.com; s=sel; h=from; l=many"),
            InvalidTagValue("l")
        );

        let e = "v=1; a=rsa-sha256; b=; bh=; d=example.com; c=fancy"
            .parse::<DkimSignature>()
            .unwrap_err();
        assert_eq!(e.kind, Unsupported("c"));
        assert_eq!(e.domain, Some(DomainName::new("example.com").unwrap()));
    }

    #[test]
    fn canonicalization_from_str() {
        use CanonicalizationAlgorithm::*;

        assert_eq!("relaxed".parse(), Ok(Canonicalization::from((Relaxed, Simple))));
        assert_eq!("simple/relaxed".parse(), Ok(Canonicalization::from((Simple, Relaxed))));
        assert_eq!(
            "relaxed/none".parse::<Canonicalization>(),
            Err(DkimSignatureErrorKind::Unsupported("c"))
        );
    }
}
