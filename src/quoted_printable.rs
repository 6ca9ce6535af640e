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

//! The “Q” encoding of encoded words.
//!
//! See RFC 2047, section 4.2.

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct QuotedPrintableError;

impl Display for QuotedPrintableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "failed to decode Quoted-Printable data")
    }
}

impl Error for QuotedPrintableError {}

/// Decodes the bytes in the encoded text of a “Q”-encoded word.
///
/// An underscore stands for the space character, `=` introduces a byte given
/// as two hex digits. Whitespace may not appear in encoded text.
pub fn decode(s: &str) -> Result<Vec<u8>, QuotedPrintableError> {
    let mut result = Vec::with_capacity(s.len());

    let mut bytes = s.bytes();

    while let Some(b) = bytes.next() {
        match b {
            b'=' => {
                let c1 = bytes.next().filter(u8::is_ascii_hexdigit).ok_or(QuotedPrintableError)?;
                let c2 = bytes.next().filter(u8::is_ascii_hexdigit).ok_or(QuotedPrintableError)?;

                result.push(u8_from_digits(c1, c2));
            }
            b'_' => result.push(b' '),
            b if is_q_safe_byte(b) => result.push(b),
            _ => return Err(QuotedPrintableError),
        }
    }

    Ok(result)
}

fn u8_from_digits(c1: u8, c2: u8) -> u8 {
    // only uppercase hex digits are allowed, but lowercase does no harm
    fn to_u8(c: u8) -> u8 {
        match c {
            b'0'..=b'9' => c - b'0',
            b'A'..=b'F' => c - b'A' + 0xa,
            b'a'..=b'f' => c - b'a' + 0xa,
            _ => 0,
        }
    }

    debug_assert!(c1.is_ascii_hexdigit() && c2.is_ascii_hexdigit());

    to_u8(c1) * 0x10 + to_u8(c2)
}

fn is_q_safe_byte(b: u8) -> bool {
    // printable ASCII without ? and space
    matches!(b, b'!'..=b'>' | b'@'..=b'~')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_basic() {
        assert_eq!(decode(""), Ok(vec![]));
        assert_eq!(decode("ab_cd"), Ok(b"ab cd".to_vec()));
        assert_eq!(decode("=C3=A4_space"), Ok("ä space".as_bytes().to_vec()));
        assert_eq!(decode("=c3=a4"), Ok("ä".as_bytes().to_vec()));
        assert_eq!(decode("a=3D=5F"), Ok(b"a=_".to_vec()));
    }

    #[test]
    fn decode_invalid() {
        assert_eq!(decode("a b"), Err(QuotedPrintableError));
        assert_eq!(decode("=4"), Err(QuotedPrintableError));
        assert_eq!(decode("=XY"), Err(QuotedPrintableError));
        assert_eq!(decode("a?b"), Err(QuotedPrintableError));
        assert_eq!(decode("ä"), Err(QuotedPrintableError));
    }
}
