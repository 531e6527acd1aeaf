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

//! Quoted-Printable decoding for the *qp-section* fragment grammar.
//!
//! See RFC 2045, section 6.7, as used by the DKIM key record's n= tag.

use crate::parse::is_wsp;
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

// This is slightly modified from RFC 2045, section 6.7: It uses RFC 6376's
// *dkim-safe-char*, also allowing UTF-8 content.

/// Decodes the bytes in an RFC 2045 *qp-section*.
pub fn decode_qp_section(s: &str) -> Result<Vec<u8>, QuotedPrintableError> {
    let mut result = Vec::with_capacity(s.len());

    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '=' {
            let c1 = chars.next().filter(|&c| is_hexdig(c))
                .ok_or(QuotedPrintableError)?;
            let c2 = chars.next().filter(|&c| is_hexdig(c))
                .ok_or(QuotedPrintableError)?;

            let digit1 = u8::try_from(c1).unwrap();
            let digit2 = u8::try_from(c2).unwrap();

            let b = u8_from_digits(digit1, digit2);

            result.push(b);
        } else if is_dkim_safe_char(c) || is_wsp(c) {
            let mut buf = [0; 4];
            result.extend(c.encode_utf8(&mut buf).bytes());
        } else {
            return Err(QuotedPrintableError);
        }
    }

    Ok(result)
}

fn u8_from_digits(c1: u8, c2: u8) -> u8 {
    // Strictly speaking, only uppercase hex digits are allowed in (DKIM-)
    // Quoted-Printable, but there is no harm in accepting lowercase, too.
    fn to_u8(c: u8) -> u8 {
        match c {
            b'0' => 0,
            b'1' => 0x1,
            b'2' => 0x2,
            b'3' => 0x3,
            b'4' => 0x4,
            b'5' => 0x5,
            b'6' => 0x6,
            b'7' => 0x7,
            b'8' => 0x8,
            b'9' => 0x9,
            b'A' | b'a' => 0xa,
            b'B' | b'b' => 0xb,
            b'C' | b'c' => 0xc,
            b'D' | b'd' => 0xd,
            b'E' | b'e' => 0xe,
            b'F' | b'f' => 0xf,
            _ => unreachable!(),
        }
    }

    debug_assert!(c1.is_ascii_hexdigit() && c2.is_ascii_hexdigit());

    to_u8(c1) * 0x10 + to_u8(c2)
}

fn is_dkim_safe_char(c: char) -> bool {
    // printable ASCII without ; and = plus any non-ASCII UTF-8
    matches!(c, '!'..=':' | '<' | '>'..='~') || !c.is_ascii()
}

fn is_hexdig(c: char) -> bool {
    c.is_ascii_hexdigit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_qp_section_ok() {
        let example = " wha i☮ ef o=92fj";
        assert_eq!(decode_qp_section(example), Ok(b" wha i\xe2\x98\xae ef o\x92fj".to_vec()));
    }

    #[test]
    fn decode_qp_section_invalid() {
        assert_eq!(decode_qp_section("a=9"), Err(QuotedPrintableError));
        assert_eq!(decode_qp_section("a;b"), Err(QuotedPrintableError));
    }
}
