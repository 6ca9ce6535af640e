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

//! Parsing and sanitization of e-mail addresses.
//!
//! Addresses are given either as formatted strings (`Name <addr>` or a bare
//! `addr`) or as (name, address) pairs. Sanitized addresses contain only
//! ASCII: a non-ASCII display name becomes an encoded word, and a non-ASCII
//! domain is converted to its A-label form.

use crate::{
    encoding::{decode_header, encode_header_at, MAX_LINE_LEN},
    error::ArgumentError,
    parse::{quote, split_unquoted, unquote},
};

/// A parsed address: optional display name and e-mail address.
pub type NameAndEmail = (Option<String>, String);

/// An address argument.
///
/// The shape of the input decides how it is read. A tuple always means a single
/// (name, address) pair, while an array or vector holds separate entries. Note
/// the pitfall this implies: `("a@b.c", "d@e.f")` is one address with display
/// name `a@b.c`, whereas `["a@b.c", "d@e.f"]` is two addresses.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum AddressInput {
    /// A formatted address, or for lists a string of comma-separated
    /// formatted addresses.
    Unparsed(String),
    /// A (name, address) pair.
    Single(String, String),
    /// A sequence of formatted addresses. Where a single address is expected,
    /// a sequence of exactly two elements is read as a (name, address) pair.
    List(Vec<String>),
}

impl From<&str> for AddressInput {
    fn from(s: &str) -> Self {
        Self::Unparsed(s.into())
    }
}

impl From<String> for AddressInput {
    fn from(s: String) -> Self {
        Self::Unparsed(s)
    }
}

impl From<&String> for AddressInput {
    fn from(s: &String) -> Self {
        Self::Unparsed(s.clone())
    }
}

impl<N, E> From<(N, E)> for AddressInput
where
    N: Into<String>,
    E: Into<String>,
{
    fn from((name, email): (N, E)) -> Self {
        Self::Single(name.into(), email.into())
    }
}

impl<S: Into<String>> From<Vec<S>> for AddressInput {
    fn from(v: Vec<S>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for AddressInput {
    fn from(a: [S; N]) -> Self {
        Self::List(a.into_iter().map(Into::into).collect())
    }
}

/// Sanitizes an e-mail address.
///
/// A non-ASCII domain is converted to A-labels, the local part is kept as is.
/// ASCII input without `@` is passed through unchanged.
///
/// # Errors
///
/// Fails if the address contains non-ASCII characters and cannot be split
/// into exactly one local part and domain, or if the domain is not a valid
/// internationalized domain name.
///
/// # Examples
///
/// ```
/// use viamail::address::sanitize_email;
///
/// assert_eq!(sanitize_email("a@♤.d").unwrap(), "a@xn--f6h.d");
/// ```
pub fn sanitize_email(email: &str) -> Result<String, ArgumentError> {
    let invalid = || ArgumentError::InvalidEmail(email.into());

    let mut parts = email.split('@');

    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), None, _) if email.is_ascii() => Ok(email.into()),
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => {
            if domain.is_ascii() {
                Ok(email.into())
            } else {
                let domain = idna::domain_to_ascii(domain).map_err(|_| invalid())?;
                Ok(format!("{local}@{domain}"))
            }
        }
        _ if email.is_ascii() => Ok(email.into()),
        _ => Err(invalid()),
    }
}

/// Sanitizes an address for use in an address header field.
///
/// The result is `Name <addr>` if there is a display name, else a bare `addr`.
/// Sanitizing an already sanitized address yields the same result.
///
/// # Examples
///
/// ```
/// use viamail::address::sanitize_address;
///
/// assert_eq!(sanitize_address("♤ <a@b.d>").unwrap(), "=?utf-8?b?4pmk?= <a@b.d>");
/// assert_eq!(sanitize_address(("John", "j@♤.d")).unwrap(), "John <j@xn--f6h.d>");
/// ```
pub fn sanitize_address(input: impl Into<AddressInput>) -> Result<String, ArgumentError> {
    let (name, email) = parse_name_and_email(input)?;
    format_address(name.as_deref(), &email)
}

fn format_address(name: Option<&str>, email: &str) -> Result<String, ArgumentError> {
    format_address_at(name, email, 1)
}

// `column` is where the address starts on its line.
fn format_address_at(name: Option<&str>, email: &str, column: usize) -> Result<String, ArgumentError> {
    let email = sanitize_email(email)?;

    match name {
        Some(name) => {
            let name = if name.is_ascii() {
                if needs_quoting(name) {
                    quote(name)
                } else {
                    name.into()
                }
            } else {
                encode_header_at(name, column).into_owned()
            };
            Ok(format!("{name} <{email}>"))
        }
        None => Ok(email),
    }
}

/// Sanitizes a list of addresses, joined with `, `.
pub fn sanitize_address_list(input: impl Into<AddressInput>) -> Result<String, ArgumentError> {
    let addresses = parse_name_and_email_list(input)?
        .iter()
        .map(|(name, email)| format_address(name.as_deref(), email))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(addresses.join(", "))
}

/// Formats an address list as the value of the header field with the given
/// name, without the leading space.
///
/// Display names may be given raw or already encoded; they are decoded and
/// encoded anew to fit the line. An address that would overrun the line
/// starts on a continuation line.
pub(crate) fn fold_address_list(field_name: &str, value: &str) -> Result<String, ArgumentError> {
    let mut out = String::new();

    // position just after the colon
    let mut column = field_name.chars().count() + 1;

    for (i, (name, email)) in parse_name_and_email_list(value)?.into_iter().enumerate() {
        let name = name.map(|name| decode_header(&name));
        let name = name.as_deref();

        if i > 0 {
            out.push(',');
            column += 1;
        }

        let mut address = format_address_at(name, &email, column + 1)?;

        if i > 0 {
            if column + 1 + first_line_len(&address) > MAX_LINE_LEN {
                out.push_str("\r\n");
                column = 0;
                address = format_address_at(name, &email, 1)?;
            }
            out.push(' ');
        }

        column = match address.rfind("\r\n") {
            Some(j) => address[(j + 2)..].chars().count(),
            None => column + 1 + address.chars().count(),
        };

        out.push_str(&address);
    }

    Ok(out)
}

fn first_line_len(s: &str) -> usize {
    s.split("\r\n").next().map_or(0, |line| line.chars().count())
}

fn needs_quoting(name: &str) -> bool {
    // RFC 5322 specials, quoted strings are already unquoted here
    name.contains(|c| matches!(c, '(' | ')' | '<' | '>' | '[' | ']' | ':' | ';' | '@' | '\\' | ',' | '.' | '"'))
}

/// Parses a single address into display name and e-mail address.
///
/// # Errors
///
/// Fails if the input is a list of other than two elements.
///
/// # Examples
///
/// ```
/// use viamail::address::parse_name_and_email;
///
/// assert_eq!(
///     parse_name_and_email(r#""John Smith" <john@smith.me>"#).unwrap(),
///     (Some("John Smith".into()), "john@smith.me".into())
/// );
/// assert_eq!(
///     parse_name_and_email(["John Smith", "john@smith.me"]).unwrap(),
///     (Some("John Smith".into()), "john@smith.me".into())
/// );
/// assert!(parse_name_and_email(["john@smith.me"]).is_err());
/// ```
pub fn parse_name_and_email(input: impl Into<AddressInput>) -> Result<NameAndEmail, ArgumentError> {
    match input.into() {
        AddressInput::Unparsed(s) => Ok(parse_address(&s)),
        AddressInput::Single(name, email) => Ok(name_and_email(name, email)),
        AddressInput::List(v) => match <[String; 2]>::try_from(v) {
            Ok([name, email]) => Ok(name_and_email(name, email)),
            Err(_) => Err(ArgumentError::AddressShape),
        },
    }
}

/// Parses a list of addresses into display names and e-mail addresses.
///
/// A string may hold several comma-separated addresses. A tuple is a single
/// (name, address) pair, each element of an array or vector is a separate
/// address.
///
/// # Examples
///
/// ```
/// use viamail::address::parse_name_and_email_list;
///
/// assert_eq!(
///     parse_name_and_email_list(["a@b.c", "d@e.f"]).unwrap(),
///     [(None, "a@b.c".into()), (None, "d@e.f".into())]
/// );
/// assert_eq!(
///     parse_name_and_email_list(("a@b.c", "d@e.f")).unwrap(),
///     [(Some("a@b.c".into()), "d@e.f".into())]
/// );
/// ```
pub fn parse_name_and_email_list(
    input: impl Into<AddressInput>,
) -> Result<Vec<NameAndEmail>, ArgumentError> {
    match input.into() {
        AddressInput::Unparsed(s) => Ok(split_unquoted(&s, &[','])
            .into_iter()
            .filter(|piece| !piece.trim().is_empty())
            .map(parse_address)
            .collect()),
        AddressInput::Single(name, email) => Ok(vec![name_and_email(name, email)]),
        AddressInput::List(v) => Ok(v.iter().map(|s| parse_address(s)).collect()),
    }
}

fn name_and_email(name: String, email: String) -> NameAndEmail {
    let name = Some(name).filter(|n| !n.is_empty());
    (name, email)
}

// `Name <addr>`, `"Quoted Name" <addr>`, `<addr>`, or `addr`
fn parse_address(s: &str) -> NameAndEmail {
    let s = s.trim();

    if let Some(inner) = s.strip_suffix('>') {
        if let Some(i) = inner.rfind('<') {
            let name = unquote(inner[..i].trim()).into_owned();
            let email = inner[(i + 1)..].trim().to_owned();
            return name_and_email(name, email);
        }
    }

    (None, s.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_name_and_email_ok() {
        assert_eq!(parse_name_and_email("john@smith.me").unwrap(), (None, "john@smith.me".into()));
        assert_eq!(
            parse_name_and_email("\"John Smith\" <john@smith.me>").unwrap(),
            (Some("John Smith".into()), "john@smith.me".into())
        );
        assert_eq!(
            parse_name_and_email(vec!["John Smith", "john@smith.me"]).unwrap(),
            (Some("John Smith".into()), "john@smith.me".into())
        );
        assert_eq!(parse_name_and_email("<a@b.c>").unwrap(), (None, "a@b.c".into()));
    }

    #[test]
    fn parse_name_and_email_wrong_shape() {
        assert_eq!(parse_name_and_email(vec!["42"]), Err(ArgumentError::AddressShape));
        assert_eq!(parse_name_and_email(["a", "b", "c"]), Err(ArgumentError::AddressShape));
        assert_eq!(parse_name_and_email(Vec::<String>::new()), Err(ArgumentError::AddressShape));
    }

    #[test]
    fn parse_name_and_email_list_ok() {
        assert_eq!(
            parse_name_and_email_list(vec!["a@b.c", "d@e.f"]).unwrap(),
            [(None, "a@b.c".into()), (None, "d@e.f".into())]
        );
        assert_eq!(
            parse_name_and_email_list(("a@b.c", "d@e.f")).unwrap(),
            [(Some("a@b.c".into()), "d@e.f".into())]
        );
        assert_eq!(parse_name_and_email_list(vec!["a@b.c"]).unwrap(), [(None, "a@b.c".into())]);
        assert_eq!(
            parse_name_and_email_list("♤ <a@b.c>").unwrap(),
            [(Some("♤".into()), "a@b.c".into())]
        );
        assert_eq!(
            parse_name_and_email_list("\"Doe, J\" <j@d.e>, x@y.z").unwrap(),
            [(Some("Doe, J".into()), "j@d.e".into()), (None, "x@y.z".into())]
        );
        assert!(parse_name_and_email_list("").unwrap().is_empty());
    }

    #[test]
    fn sanitize_address_ok() {
        assert_eq!(sanitize_address("a <b>").unwrap(), "a <b>");
        assert_eq!(sanitize_address("a@b.d").unwrap(), "a@b.d");
        assert_eq!(sanitize_address("x y <a@b.d>").unwrap(), "x y <a@b.d>");
        assert_eq!(sanitize_address("♤ <a@b.d>").unwrap(), "=?utf-8?b?4pmk?= <a@b.d>");
        assert_eq!(sanitize_address("a@♤.d").unwrap(), "a@xn--f6h.d");
        assert_eq!(sanitize_address("\"Doe, J\" <j@d.e>").unwrap(), "\"Doe, J\" <j@d.e>");
    }

    #[test]
    fn sanitize_address_idempotent() {
        for input in ["♤ <a@♤.d>", "\"Doe, J\" <j@d.e>", "x y <a@b.d>", "a@b.d", "Мама <m@b.d>"] {
            let once = sanitize_address(input).unwrap();
            let twice = sanitize_address(once.as_str()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn sanitize_address_list_ok() {
        assert_eq!(
            sanitize_address_list(vec!["♤ <a@b.d>", "c@♤.d"]).unwrap(),
            "=?utf-8?b?4pmk?= <a@b.d>, c@xn--f6h.d"
        );
    }

    #[test]
    fn fold_address_list_decodes_names() {
        assert_eq!(
            fold_address_list("From", "Zoë <zoe@example.com>").unwrap(),
            "=?utf-8?b?Wm/Dqw==?= <zoe@example.com>"
        );
        assert_eq!(
            fold_address_list("From", "=?utf-8?b?Wm/Dqw==?= <zoe@example.com>").unwrap(),
            "=?utf-8?b?Wm/Dqw==?= <zoe@example.com>"
        );
        assert_eq!(
            fold_address_list("To", "\"Doe, J\" <j@d.e>, x@y.z").unwrap(),
            "\"Doe, J\" <j@d.e>, x@y.z"
        );
        assert_eq!(fold_address_list("To", "zoë@example.com").unwrap(), "zoë@example.com");
    }

    #[test]
    fn fold_address_list_long() {
        let value = [
            "Ünïcödé Ünïcödé Ünïcödé Ünïcödé Ünïcödé <u@example.com>",
            "first.recipient@example.com",
            "second.recipient@example.com",
            "third.recipient@example.com",
        ];
        let value = value.join(", ");

        let folded = fold_address_list("Reply-To", &value).unwrap();

        let field = format!("Reply-To: {folded}");
        assert!(field.split("\r\n").all(|line| line.len() <= 76), "{field}");
        assert!(field.split("\r\n").skip(1).all(|line| line.starts_with(' ')));
        assert_eq!(
            parse_name_and_email_list(decode_header(&folded)).unwrap().len(),
            4
        );
    }

    #[test]
    fn sanitize_email_ok() {
        assert_eq!(sanitize_email("a@♤.d").unwrap(), "a@xn--f6h.d");
        assert_eq!(sanitize_email("a@b.d").unwrap(), "a@b.d");
        assert_eq!(sanitize_email("b").unwrap(), "b");
        assert_eq!(sanitize_email("ä@b.d").unwrap(), "ä@b.d");

        assert!(sanitize_email("♤").is_err());
        assert!(sanitize_email("a@b@♤.d").is_err());
        assert!(sanitize_email("@♤.d").is_err());
    }
}
