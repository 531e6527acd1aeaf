// dkimcheck – DKIM signature verification
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

//! Email message parsing.
//!
//! Splits a raw RFC 5322 message into header fields and body. Line
//! terminators may be CRLF or bare LF; bare LF input is normalised to CRLF
//! during parsing, both in folded header values and in the returned body.

use crate::header::{FieldBody, FieldName, HeaderField, HeaderFields};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// An error indicating an ill-formed input message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageFormatError {
    /// No empty line separating header block and body.
    MissingBodySeparator,
    /// A header line that is neither a `name:value` field nor a folded
    /// continuation line.
    IllFormedHeaderLine,
    /// The message has no header fields at all.
    NoHeaderFields,
}

impl Display for MessageFormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBodySeparator => {
                write!(f, "header block not terminated by an empty line")
            }
            Self::IllFormedHeaderLine => write!(f, "ill-formed header line"),
            Self::NoHeaderFields => write!(f, "no header fields"),
        }
    }
}

impl Error for MessageFormatError {}

/// Parses a raw message into header fields and body.
///
/// The body is returned with CRLF line endings throughout. Header field
/// values keep their original bytes, except that folded continuation lines
/// are joined with CRLF.
///
/// An mbox-style `From ` line in the header block is skipped.
pub fn parse_message(input: &[u8]) -> Result<(HeaderFields, Vec<u8>), MessageFormatError> {
    let mut lines = split_lines(input);

    let fields = collect_header_fields(&mut lines, true)?;

    let body_lines: Vec<_> = lines.collect();
    let body = body_lines.join(&b"\r\n"[..]);

    Ok((fields, body))
}

/// Parses a header block alone into header fields.
///
/// Unlike in [`parse_message`], a final empty line is not required; trailing
/// empty lines are accepted and ignored.
pub fn parse_header_block(input: &[u8]) -> Result<HeaderFields, MessageFormatError> {
    let mut lines = split_lines(input);

    let fields = collect_header_fields(&mut lines, false)?;

    // Nothing but blank lines may follow the header block.
    if lines.any(|line| !line.is_empty()) {
        return Err(MessageFormatError::IllFormedHeaderLine);
    }

    Ok(fields)
}

fn split_lines(input: &[u8]) -> impl Iterator<Item = &[u8]> {
    input
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

fn collect_header_fields<'a>(
    lines: &mut impl Iterator<Item = &'a [u8]>,
    require_separator: bool,
) -> Result<HeaderFields, MessageFormatError> {
    let mut fields: Vec<(FieldName, Vec<u8>)> = vec![];
    let mut seen_separator = false;

    for line in lines {
        if line.is_empty() {
            seen_separator = true;
            break;
        }

        if line[0] == b' ' || line[0] == b'\t' {
            // a folded continuation line extends the preceding field
            match fields.last_mut() {
                Some((_, value)) => {
                    value.extend_from_slice(b"\r\n");
                    value.extend_from_slice(line);
                }
                None => return Err(MessageFormatError::IllFormedHeaderLine),
            }
        } else {
            match split_header_line(line) {
                Some((name, value)) => fields.push((name, value.to_vec())),
                None if line.starts_with(b"From ") => {}
                None => return Err(MessageFormatError::IllFormedHeaderLine),
            }
        }
    }

    if require_separator && !seen_separator {
        return Err(MessageFormatError::MissingBodySeparator);
    }

    let fields: Vec<HeaderField> = fields
        .into_iter()
        .map(|(name, value)| {
            let value =
                FieldBody::new(value).map_err(|_| MessageFormatError::IllFormedHeaderLine)?;
            Ok((name, value))
        })
        .collect::<Result<_, _>>()?;

    HeaderFields::new(fields).map_err(|_| MessageFormatError::NoHeaderFields)
}

fn split_header_line(line: &[u8]) -> Option<(FieldName, &[u8])> {
    let i = line.iter().position(|&b| b == b':')?;
    let name = std::str::from_utf8(&line[..i]).ok()?;
    let name = FieldName::new(name).ok()?;
    Some((name, &line[i + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message_basic() {
        let msg = b"From hewgill@example.org Thu Sep 18 12:00:00 2008\n\
            Received: by example.org;\n\
            \tThu, 18 Sep 2008 12:00:00 -0500\n\
            From: Greg <greg@example.org>\n\
            Subject: hello\n\
            \n\
            Body text.\n\
            Second line.\n";

        let (headers, body) = parse_message(msg).unwrap();

        let headers: Vec<_> = headers.into();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].0, "Received");
        assert_eq!(
            headers[0].1.as_ref(),
            b" by example.org;\r\n\tThu, 18 Sep 2008 12:00:00 -0500"
        );
        assert_eq!(headers[1].0, "From");

        assert_eq!(body, b"Body text.\r\nSecond line.\r\n");
    }

    #[test]
    fn parse_message_crlf_input() {
        let msg = b"A: 1\r\nB: 2\r\n\r\nbody\r\n";

        let (headers, body) = parse_message(msg).unwrap();

        assert_eq!(headers.as_ref().len(), 2);
        assert_eq!(body, b"body\r\n");
    }

    #[test]
    fn parse_message_no_trailing_newline_in_body() {
        let (_, body) = parse_message(b"A: 1\n\nlast line").unwrap();
        assert_eq!(body, b"last line");
    }

    #[test]
    fn parse_message_empty_body() {
        let (headers, body) = parse_message(b"A: 1\n\n").unwrap();
        assert_eq!(headers.as_ref().len(), 1);
        assert_eq!(body, b"");
    }

    #[test]
    fn parse_message_errors() {
        assert_eq!(
            parse_message(b"A: 1"),
            Err(MessageFormatError::MissingBodySeparator)
        );
        assert_eq!(
            parse_message(b"no colon here\n\n"),
            Err(MessageFormatError::IllFormedHeaderLine)
        );
        assert_eq!(
            parse_message(b"\tstray continuation\n\n"),
            Err(MessageFormatError::IllFormedHeaderLine)
        );
        assert_eq!(
            parse_message(b"From x\n\nbody"),
            Err(MessageFormatError::NoHeaderFields)
        );
    }

    #[test]
    fn parse_header_block_ok() {
        let headers = parse_header_block(b"A: 1\nB: 2").unwrap();
        assert_eq!(headers.as_ref().len(), 2);

        let headers = parse_header_block(b"A: 1\nB: 2\n\n").unwrap();
        assert_eq!(headers.as_ref().len(), 2);

        assert_eq!(
            parse_header_block(b"A: 1\n\nB: 2"),
            Err(MessageFormatError::IllFormedHeaderLine)
        );
    }
}
