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

//! Canonicalization utilities.
//!
//! See RFC 6376, section 3.4.

use crate::{
    header::{FieldBody, FieldName, HeaderFields},
    signature::CanonicalizationAlgorithm,
};
use bstr::ByteSlice;
use std::collections::HashSet;

const SP: u8 = b' ';
const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRLF: [u8; 2] = [CR, LF];

fn is_wsp(b: u8) -> bool {
    matches!(b, b' ' | b'\t')
}

// what was seen last
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Start,
    LineEnd,
    Cr,
    Wsp,
    WspCr,
    Text,
}

/// A streaming canonicalizer for message body content.
///
/// Only CRLF is recognised as a line terminator; a stray CR or LF is treated
/// like any other byte. Trailing empty lines are held back until non-empty
/// content shows that they are not trailing after all.
pub struct BodyCanonicalizer {
    algorithm: CanonicalizationAlgorithm,
    state: State,
    on_blank_line: bool,
    has_content: bool,
    pending_empty_lines: usize,
}

impl BodyCanonicalizer {
    pub fn new(algorithm: CanonicalizationAlgorithm) -> Self {
        Self {
            algorithm,
            state: State::Start,
            on_blank_line: true,
            has_content: false,
            pending_empty_lines: 0,
        }
    }

    pub fn simple() -> Self {
        Self::new(CanonicalizationAlgorithm::Simple)
    }

    pub fn relaxed() -> Self {
        Self::new(CanonicalizationAlgorithm::Relaxed)
    }

    /// Canonicalizes the next chunk of body content and returns the
    /// canonicalized output available so far.
    pub fn canonicalize_chunk(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes.len());

        for &b in bytes {
            match self.algorithm {
                CanonicalizationAlgorithm::Simple => self.step_simple(&mut out, b),
                CanonicalizationAlgorithm::Relaxed => self.step_relaxed(&mut out, b),
            }
        }

        out
    }

    fn step_simple(&mut self, out: &mut Vec<u8>, b: u8) {
        match self.state {
            State::Start | State::LineEnd | State::Text => {
                if b == CR {
                    self.state = State::Cr;
                } else {
                    self.emit(out, &[b]);
                }
            }
            State::Cr => {
                if b == LF {
                    self.end_line(out);
                } else {
                    self.emit(out, &[CR]);
                    if b != CR {
                        self.emit(out, &[b]);
                    }
                }
            }
            State::Wsp | State::WspCr => unreachable!("whitespace state in simple canonicalization"),
        }
    }

    fn step_relaxed(&mut self, out: &mut Vec<u8>, b: u8) {
        match self.state {
            State::Start | State::LineEnd | State::Text => {
                if is_wsp(b) {
                    self.state = State::Wsp;
                } else if b == CR {
                    self.state = State::Cr;
                } else {
                    self.emit(out, &[b]);
                }
            }
            State::Wsp => {
                if b == CR {
                    self.state = State::WspCr;
                } else if !is_wsp(b) {
                    self.emit(out, &[SP, b]);
                }
            }
            State::Cr => {
                if b == LF {
                    self.end_line(out);
                } else {
                    self.emit(out, &[CR]);
                    if is_wsp(b) {
                        self.state = State::Wsp;
                    } else if b != CR {
                        self.emit(out, &[b]);
                    }
                }
            }
            State::WspCr => {
                if b == LF {
                    // whitespace at end of line is dropped
                    self.end_line(out);
                } else {
                    self.emit(out, &[SP, CR]);
                    if b == CR {
                        self.state = State::Cr;
                    } else if is_wsp(b) {
                        self.state = State::Wsp;
                    } else {
                        self.emit(out, &[b]);
                    }
                }
            }
        }
    }

    // Writes line content, first releasing any empty lines held back.
    fn emit(&mut self, out: &mut Vec<u8>, bytes: &[u8]) {
        for _ in 0..self.pending_empty_lines {
            out.extend(CRLF);
        }
        self.pending_empty_lines = 0;
        self.on_blank_line = false;
        self.has_content = true;
        out.extend(bytes);
        self.state = State::Text;
    }

    fn end_line(&mut self, out: &mut Vec<u8>) {
        if self.on_blank_line {
            self.pending_empty_lines += 1;
        } else {
            out.extend(CRLF);
            self.on_blank_line = true;
        }
        self.state = State::LineEnd;
    }

    /// Completes canonicalization and returns the final piece of output.
    pub fn finish(mut self) -> Vec<u8> {
        let mut out = vec![];

        match (self.algorithm, self.state) {
            // an empty body is a single CRLF in simple, nothing in relaxed
            (CanonicalizationAlgorithm::Simple, State::Start | State::LineEnd) => {
                if !self.has_content {
                    out.extend(CRLF);
                }
            }
            (CanonicalizationAlgorithm::Relaxed, State::Start | State::LineEnd) => {}
            (_, State::Cr) => {
                self.emit(&mut out, &[CR]);
                out.extend(CRLF);
            }
            // trailing whitespace without line break: dropped
            (_, State::Wsp) => {
                if !self.on_blank_line {
                    out.extend(CRLF);
                }
            }
            (_, State::WspCr) => {
                self.emit(&mut out, &[SP, CR]);
                out.extend(CRLF);
            }
            (_, State::Text) => out.extend(CRLF),
        }

        out
    }
}

/// Canonicalizes a complete message body in one go.
pub fn canonicalize_body(algorithm: CanonicalizationAlgorithm, body: &[u8]) -> Vec<u8> {
    let mut canonicalizer = BodyCanonicalizer::new(algorithm);
    let mut result = canonicalizer.canonicalize_chunk(body);
    result.extend(canonicalizer.finish());
    result
}

/// Produces the header canonicalization result for the selected headers.
///
/// Each name in `selected_headers` consumes the bottom-most not yet consumed
/// occurrence of a header field of that name. Names without a remaining
/// occurrence contribute nothing.
pub fn canonicalize_headers(
    algorithm: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
) -> Vec<u8> {
    let mut result = vec![];
    let mut consumed = HashSet::with_capacity(selected_headers.len());

    for selected in selected_headers {
        let occurrence = headers
            .as_ref()
            .iter()
            .enumerate()
            .rev()
            .find(|(i, (name, _))| name == selected && !consumed.contains(i));

        if let Some((i, (name, value))) = occurrence {
            canonicalize_header(&mut result, algorithm, name, value);
            result.extend(CRLF);
            consumed.insert(i);
        }
    }

    result
}

/// Canonicalizes a single header field into the result vector, without a
/// trailing CRLF.
pub fn canonicalize_header(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    name: impl AsRef<str>,
    value: impl AsRef<[u8]>,
) {
    let name = name.as_ref();
    let value = value.as_ref();

    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            result.extend(name.bytes());
            result.push(b':');
            result.extend(value);
        }
        CanonicalizationAlgorithm::Relaxed => {
            result.extend(name.to_ascii_lowercase().bytes());
            result.push(b':');
            canonicalize_header_value_relaxed(result, value);
        }
    }
}

// Unfolds, compresses whitespace runs to a single space, and trims.
fn canonicalize_header_value_relaxed(result: &mut Vec<u8>, value: &[u8]) {
    fn is_space(c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }

    debug_assert!(FieldBody::new(value).is_ok());

    let mut in_space = false;
    for &b in value.trim_with(is_space) {
        if is_space(b.into()) {
            if !in_space {
                result.push(SP);
                in_space = true;
            }
        } else {
            result.push(b);
            in_space = false;
        }
    }
}
