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

use crate::tag_list;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
};

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct ParseDomainError;

impl Display for ParseDomainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "not a valid domain name")
    }
}

impl Error for ParseDomainError {}

// Both names keep their input form, which may contain U-labels, compare
// case-insensitively and convert to A-labels on demand.
macro_rules! dns_name {
    ($(#[$doc:meta])* $name:ident, $is_valid:ident) => {
        $(#[$doc])*
        #[derive(Clone, Eq)]
        pub struct $name(Box<str>);

        impl $name {
            pub fn new(s: &str) -> Result<Self, ParseDomainError> {
                if $is_valid(s) && idna::domain_to_ascii(s).is_ok() {
                    Ok(Self(s.into()))
                } else {
                    Err(ParseDomainError)
                }
            }

            /// Returns the name in A-label form.
            pub fn to_ascii(&self) -> String {
                idna::domain_to_ascii(&self.0).unwrap_or_else(|_| self.0.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&*self.0, f)
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.0.eq_ignore_ascii_case(&other.0)
            }
        }

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                for b in self.0.bytes() {
                    state.write_u8(b.to_ascii_lowercase());
                }
            }
        }
    };
}

dns_name! {
    /// The signing domain of the *d=* tag: at least two labels, no trailing
    /// dot, and a top-level label that is not all digits.
    DomainName, is_domain
}

dns_name! {
    /// The selector of the *s=* tag: one or more labels.
    Selector, is_selector
}

fn is_domain(s: &str) -> bool {
    if s.is_empty() || s.len() > 253 {
        return false;
    }

    match s.rsplit_once('.') {
        Some((rest, tld)) => {
            is_label(tld) && !tld.bytes().all(|b| b.is_ascii_digit()) && rest.split('.').all(is_label)
        }
        None => false,
    }
}

fn is_selector(s: &str) -> bool {
    s.split('.').all(is_label)
}

// Underscores are tolerated, as in selectors like `dkim_2023`. Restricting to
// tag value characters keeps `;` out of the formatted tag.
fn is_label(s: &str) -> bool {
    (1..=63).contains(&s.len())
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s.chars().all(tag_list::is_tval_char)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_name_ok() {
        assert!(DomainName::new("example.com").is_ok());
        assert!(DomainName::new("mail.example.中国").is_ok());
        assert!(DomainName::new("xn--53h.example.xn--fiqs8s").is_ok());

        assert!(DomainName::new("localhost").is_err());
        assert!(DomainName::new("example.com.").is_err());
        assert!(DomainName::new("example.123").is_err());
        assert!(DomainName::new("exa;mple.com").is_err());

        assert_eq!(DomainName::new("♤.example").unwrap().to_ascii(), "xn--f6h.example");
        assert_eq!(DomainName::new("Example.COM").unwrap(), DomainName::new("example.com").unwrap());
    }

    #[test]
    fn selector_ok() {
        assert!(Selector::new("sel").is_ok());
        assert!(Selector::new("dkim_2023").is_ok());
        assert!(Selector::new("eu.sel").is_ok());

        assert!(Selector::new("").is_err());
        assert!(Selector::new("sel.").is_err());
        assert!(Selector::new("sel-").is_err());
    }
}
