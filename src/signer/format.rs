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
    header::FieldName,
    signature::{Canonicalization, DkimSignature, DomainName, Selector, SignatureAlgorithm},
    signer::OutputFormat,
    util::{self, CanonicalStr},
};
use std::{cmp::Ordering, iter};

// Formatting works with *characters*, not bytes: d= and s= may contain
// non-ASCII UTF-8 (RFC 8616).

pub const LINE_WIDTH: usize = 78;

/// DKIM signature data that does not yet have a cryptographic signature.
pub struct UnsignedDkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
}

impl UnsignedDkimSignature {
    /// Returns the formatted header value with an empty *b=* tag, and the
    /// byte index at which the *b=* value is to be inserted.
    pub fn format_without_signature(&self, format: &OutputFormat, b_tag_len: usize) -> (String, usize) {
        format_without_signature(self, format, b_tag_len)
    }

    pub fn into_signature(self, signature_data: Box<[u8]>) -> DkimSignature {
        DkimSignature {
            algorithm: self.algorithm,
            signature_data,
            body_hash: self.body_hash,
            canonicalization: self.canonicalization,
            domain: self.domain,
            signed_headers: self.signed_headers,
            body_length: self.body_length,
            selector: self.selector,
            timestamp: self.timestamp,
            expiration: self.expiration,
        }
    }
}

fn compute_tag_names(
    sig: &UnsignedDkimSignature,
    tag_order: Option<&(dyn Fn(&str, &str) -> Ordering + Send + Sync)>,
) -> Vec<&'static str> {
    let mut names = Vec::with_capacity(11);

    names.extend(["v", "a", "c", "d", "s"]);
    if sig.body_length.is_some() {
        names.push("l");
    }
    if sig.timestamp.is_some() {
        names.push("t");
    }
    if sig.expiration.is_some() {
        names.push("x");
    }
    names.extend(["h", "bh", "b"]);

    if let Some(tag_order) = tag_order {
        names.sort_by(|a, b| tag_order(a, b));
    }

    names
}

// Current formatting options.
#[derive(Clone, Copy)]
struct Fmt<'a> {
    width: usize,
    indent: &'a str,
    last: bool,
}

fn format_without_signature(
    sig: &UnsignedDkimSignature,
    format: &OutputFormat,
    b_tag_len: usize,
) -> (String, usize) {
    let width = format.line_width;
    let indent = &format.indentation;

    let tag_names = compute_tag_names(sig, format.tag_order.as_deref());
    let last_index = tag_names.len().saturating_sub(1);

    // the cursor starts just past header name and colon
    let mut out = String::new();
    let mut i = format.header_name.chars().count() + 1;
    let mut insertion_i = None;

    for (index, tag_name) in tag_names.into_iter().enumerate() {
        let fmt = Fmt { width, indent, last: index == last_index };
        let out = &mut out;
        let i = &mut i;

        match tag_name {
            "v" => format_tag(out, i, fmt, "v", "1"),
            "a" => format_tag(out, i, fmt, "a", sig.algorithm.canonical_str()),
            "c" => format_tag(out, i, fmt, "c", sig.canonicalization.canonical_str()),
            "d" => {
                let domain = name_form(&sig.domain, sig.domain.to_ascii(), format.ascii_only);
                format_tag(out, i, fmt, "d", &domain);
            }
            "s" => {
                let selector = name_form(&sig.selector, sig.selector.to_ascii(), format.ascii_only);
                format_tag(out, i, fmt, "s", &selector);
            }
            "l" => {
                if let Some(n) = sig.body_length {
                    format_tag(out, i, fmt, "l", &n.to_string());
                }
            }
            "t" => {
                if let Some(n) = sig.timestamp {
                    format_tag(out, i, fmt, "t", &n.to_string());
                }
            }
            "x" => {
                if let Some(n) = sig.expiration {
                    format_tag(out, i, fmt, "x", &n.to_string());
                }
            }
            "h" => format_tag_h(out, i, fmt, &sig.signed_headers),
            "bh" => format_tag_bh(out, i, fmt, &sig.body_hash),
            "b" => insertion_i = Some(format_tag_name_b(out, i, fmt, b_tag_len)),
            _ => {}
        }
    }

    let insertion_i = insertion_i.unwrap_or(out.len());

    (out, insertion_i)
}

fn name_form(name: &impl AsRef<str>, ascii: String, ascii_only: bool) -> String {
    if ascii_only {
        ascii
    } else {
        name.as_ref().to_owned()
    }
}

// `out` is the formatted output, `i` the cursor position within the current
// line in characters.

fn format_tag(out: &mut String, i: &mut usize, fmt: Fmt<'_>, name: &str, value: &str) {
    debug_assert!(name.is_ascii());

    // name + '=' + value [+ ';']
    let taglen = name.len() + value.chars().count() + if fmt.last { 1 } else { 2 };

    advance_i_initial(out, i, taglen, fmt);
    out.push_str(name);
    out.push('=');
    out.push_str(value);

    if !fmt.last {
        out.push(';');
    }
}

fn format_tag_h(out: &mut String, i: &mut usize, fmt: Fmt<'_>, value: &[FieldName]) {
    let mut names = value.iter().map(|f| f.as_ref()).peekable();

    let Some(first_name) = names.next() else {
        return;
    };

    // "h=" + name [+ ';' or ':']
    let taglen = first_name.chars().count() + if names.peek().is_none() && fmt.last { 2 } else { 3 };

    advance_i_initial(out, i, taglen, fmt);
    out.push_str("h=");
    out.push_str(first_name);

    while let Some(name) = names.next() {
        out.push(':');

        // the separator was already counted by the previous item
        let len = name.chars().count() + if names.peek().is_none() && fmt.last { 0 } else { 1 };

        advance_i(out, i, len, fmt);
        out.push_str(name);
    }

    if !fmt.last {
        out.push(';');
    }
}

fn format_tag_bh(out: &mut String, i: &mut usize, fmt: Fmt<'_>, value: &[u8]) {
    let value = util::encode_base64(value);

    // "bh=" plus at least one character of the value
    advance_i_initial(out, i, 4, fmt);
    *i -= 1;
    out.push_str("bh=");

    format_chunks_into_string(out, i, fmt.width, fmt.indent, &value);

    // a final chunk filling the line is still followed by ';'
    if !fmt.last {
        out.push(';');
        *i += 1;
    }
}

// Writes "b=" and returns the insertion index, advancing the cursor past the
// estimated value length.
fn format_tag_name_b(out: &mut String, i: &mut usize, fmt: Fmt<'_>, b_tag_len: usize) -> usize {
    let Fmt { width, indent, last } = fmt;

    advance_i_initial(out, i, 3, fmt);
    *i -= 1;
    out.push_str("b=");

    let insertion_i = out.len();

    let chunk_len = width.saturating_sub(indent.len()).max(1);
    let remaining_len = width.saturating_sub(*i);
    if b_tag_len <= remaining_len {
        *i += b_tag_len;
    } else {
        let mut final_chunk_len = (b_tag_len - remaining_len) % chunk_len;
        if final_chunk_len == 0 {
            final_chunk_len = chunk_len;
        }
        *i = final_chunk_len + indent.len();
    }

    if !last {
        out.push(';');
        *i += 1;
    }

    insertion_i
}

fn break_line(out: &mut String, indent: &str) {
    out.push_str("\r\n");
    out.push_str(indent);
}

/// Advances the cursor to make room for an item of length `len`, breaking
/// the line if necessary.
fn advance_i(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    if *i + len <= fmt.width {
        *i += len;
    } else {
        break_line(out, fmt.indent);
        *i = fmt.indent.len() + len;
    }
}

// Like `advance_i`, for the first item of a tag, which is preceded by a space
// when it stays on the current line.
fn advance_i_initial(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    if *i + len + 1 <= fmt.width {
        out.push(' ');
        *i += len + 1;
    } else {
        break_line(out, fmt.indent);
        *i = fmt.indent.len() + len;
    }
}

fn format_chunks_into_string(out: &mut String, i: &mut usize, width: usize, indent: &str, mut s: &str) {
    let first_chunk_len = width.saturating_sub(*i).min(s.chars().count());

    if first_chunk_len > 0 {
        let c = s.char_indices().nth(first_chunk_len).map_or(s.len(), |(c, _)| c);
        let first_chunk;
        (first_chunk, s) = s.split_at(c);
        out.push_str(first_chunk);
        *i += first_chunk.chars().count();
    }

    let chunk_width = width.saturating_sub(indent.len()).max(1);
    let chunks = iter::from_fn(|| {
        if s.is_empty() {
            return None;
        }
        let c = s.char_indices().nth(chunk_width).map_or(s.len(), |(c, _)| c);
        let chunk;
        (chunk, s) = s.split_at(c);
        Some(chunk)
    });

    for chunk in chunks {
        break_line(out, indent);
        out.push_str(chunk);
        *i = chunk.chars().count() + indent.len();
    }
}

/// Inserts the Base64-encoded signature data at the index obtained from
/// [`UnsignedDkimSignature::format_without_signature`].
pub fn insert_signature_data(
    formatted_header: &mut String,
    insertion_index: usize,
    header_name: &str,
    signature_data: &[u8],
    format: &OutputFormat,
) {
    debug_assert!(insertion_index <= formatted_header.len());

    let s = util::encode_base64(signature_data);

    let before = &formatted_header[..insertion_index];

    let mut lines = before.rsplit("\r\n");
    let last_line = lines.next().unwrap_or_default();
    let mut i = if lines.next().is_some() {
        last_line.chars().count()
    } else {
        header_name.chars().count() + 1 + last_line.chars().count()
    };

    let mut result = String::with_capacity(s.len() + s.len() / 32);
    format_chunks_into_string(&mut result, &mut i, format.line_width, &format.indentation, &s);

    formatted_header.insert_str(insertion_index, &result);
}
