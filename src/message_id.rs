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

//! Generation of *Message-ID* values.

use std::{
    fmt::Write,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::warn;

// only used if the system random source fails
static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A generator of unique *Message-ID* values.
///
/// Each call to [`generate`][MessageId::generate] produces a new value of the
/// form `<idstring.timestamp.random@domain>`, where the timestamp has
/// microsecond resolution and the random part has 64 bits. The id string is
/// fixed per generator, so that all values of one generator share it.
///
/// # Examples
///
/// ```
/// use viamail::message_id::MessageId;
///
/// let gen = MessageId::new().with_domain("example.com");
///
/// let id = gen.generate();
///
/// assert!(id.starts_with('<'));
/// assert!(id.ends_with("@example.com>"));
/// assert_ne!(id, gen.generate());
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageId {
    idstring: String,
    domain: Option<String>,
}

impl MessageId {
    /// Creates a generator with a random id string and the local host name as
    /// domain.
    pub fn new() -> Self {
        let mut idstring = String::new();
        push_hex(&mut idstring, random_u64() >> 32);

        Self {
            idstring,
            domain: None,
        }
    }

    pub fn with_idstring(mut self, idstring: impl Into<String>) -> Self {
        self.idstring = idstring.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Generates a new *Message-ID* value, including angle brackets.
    pub fn generate(&self) -> String {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();

        let mut id = String::from("<");
        id.push_str(&self.idstring);
        id.push('.');
        id.push_str(&micros.to_string());
        id.push('.');
        push_hex(&mut id, random_u64());
        id.push('@');

        match &self.domain {
            Some(domain) => id.push_str(domain),
            None => id.push_str(&local_domain()),
        }

        id.push('>');
        id
    }
}

fn push_hex(s: &mut String, n: u64) {
    let _ = write!(s, "{n:x}");
}

fn random_u64() -> u64 {
    let mut buf = [0; 8];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => u64::from_le_bytes(buf),
        Err(e) => {
            warn!("system random source unavailable: {e}");
            FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed)
        }
    }
}

fn local_domain() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".into())
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generate_unique() {
        let gen = MessageId::new();

        let ids: HashSet<_> = (0..100).map(|_| gen.generate()).collect();

        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn idstring_fixed_per_generator() {
        let gen = MessageId::new();

        let idstring = |id: &str| id[1..].split('.').next().unwrap().to_owned();

        let first = gen.generate();
        let second = gen.generate();

        assert_eq!(idstring(&first), idstring(&second));
        assert_ne!(first, second);
    }

    #[test]
    fn generate_with_idstring_and_domain() {
        let id = MessageId::new().with_idstring("___xxx___").generate();
        assert!(id.starts_with("<___xxx___."));

        let id = MessageId::new().with_domain("___yyy___").generate();
        assert!(id.ends_with("@___yyy___>"));
    }

    #[test]
    fn generate_default_domain() {
        let id = MessageId::new().generate();

        let (_, domain) = id.rsplit_once('@').unwrap();

        assert!(domain.len() > 1);
        assert!(id.matches('.').count() >= 2);
    }
}
