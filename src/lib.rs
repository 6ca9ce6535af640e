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

//! A library for building outgoing email messages and signing them with
//! *DomainKeys Identified Mail* (DKIM) signatures, as described in [RFC 6376].
//!
//! The central type is [`Message`], a mutable email message. DKIM signing
//! options attached with [`Message::dkim`] are applied lazily: the message is
//! signed every time it is rendered, over its state at that moment. Changes
//! made after attaching the options are always reflected in the signature.
//!
//! Around this, the library provides:
//!
//! - the header codec (module [`encoding`]): MIME encoded words for non-ASCII
//!   header values,
//! - address sanitization (module [`address`]), including conversion of
//!   internationalized domain names,
//! - *Message-ID* generation (module [`message_id`]),
//! - the DKIM signer and verifier (modules [`signer`] and [`verifier`]), which
//!   can also be used on their own, together with the low-level DKIM building
//!   blocks they are made of.
//!
//! Both `rsa-sha256` and `ed25519-sha256` ([RFC 8463]) signatures are
//! supported. Keys are read from PEM documents in PKCS#1 or PKCS#8 format.
//!
//! # Errors
//!
//! Errors of the message layer come in two tiers, see module [`error`]: an
//! [`ArgumentError`] reports misuse by the caller, a [`DkimError`] reports
//! that signing was not possible with the inputs given.
//!
//! # Examples
//!
//! ```
//! use viamail::message::{DkimOptions, Message};
//!
//! let key = std::fs::read("tests/keys/ed25519.pem")?;
//!
//! let mut message = Message::new();
//! message.set_from("me@example.com")?;
//! message.set_to("you@example.org")?;
//! message.set_subject("Hello")?;
//! message.set_body("Hi!\n");
//!
//! message.dkim(DkimOptions::new("sel", "example.com").key(key))?;
//!
//! // signing happens here, against the current subject
//! message.set_subject("Hello again")?;
//! let s = message.as_string()?;
//!
//! assert!(s.starts_with("DKIM-Signature: v=1; a=ed25519-sha256;"));
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376
//! [RFC 8463]: https://www.rfc-editor.org/rfc/rfc8463

pub mod address;
pub mod canonicalize;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod header;
pub mod message;
pub mod message_hash;
pub mod message_id;
mod parse;
pub mod quoted_printable;
pub mod record;
pub mod signature;
pub mod signer;
mod tag_list;
mod util;
pub mod verifier;

pub use crate::{
    address::{
        parse_name_and_email, parse_name_and_email_list, sanitize_address, sanitize_address_list,
        sanitize_email, AddressInput,
    },
    crypto::SigningKey,
    encoding::{decode_header, encode_header, encode_header_field},
    error::{ArgumentError, DkimError, Error},
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    message::{format_date_header, DkimOptions, KeySource, Message, RenderedMessage},
    message_id::MessageId,
    signature::{DomainName, Selector, SignatureAlgorithm},
    signer::{SignRequest, Signer, SignerError, SigningError, SigningResult},
    util::{decode_base64, encode_base64, Base64Error, CanonicalStr},
    verifier::{verify_message, Config, LookupTxt, VerificationResult, VerificationStatus, Verifier, VerifierError},
};
