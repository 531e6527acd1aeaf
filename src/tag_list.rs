//! Tag-list parsing.
//!
//! See RFC 6376, section 3.2. The grammar is applied with erratum 5070's
//! correction for folding whitespace in tag values.

use crate::{
    parse::{strip_fws, strip_suffix},
    quoted_printable, util,
};
use std::collections::HashSet;

pub fn parse_colon_separated_tag_value(value: &str) -> Vec<&str> {
    // assume input is a valid tag-list value
    debug_assert!(is_tag_value(value));

    value
        .split(':')
        .map(|s| s.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n')))
        .collect()
}

pub fn parse_qp_section_tag_value(value: &str) -> Result<Vec<u8>, TagListParseError> {
    debug_assert!(is_tag_value(value));

    quoted_printable::decode_qp_section(value).map_err(|_| TagListParseError::Syntax)
}

pub fn parse_base64_tag_value(value: &str) -> Result<Vec<u8>, TagListParseError> {
    debug_assert!(is_tag_value(value));

    let value = strip_fws_from_tag_value(value);
    util::decode_base64(&value).map_err(|_| TagListParseError::Syntax)
}

fn is_tag_value(s: &str) -> bool {
    s.is_empty() || matches!(parse_tag_value(s), Some((rest, _)) if rest.is_empty())
}

/// Removes all folding whitespace from a tag value.
pub fn strip_fws_from_tag_value(value: &str) -> String {
    // assume only well-formed FWS
    value
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect()
}

/// Strips a leading tag name and equals sign, and returns the remainder
/// together with the name.
///
/// This allows locating a tag's value bytes in unparsed input, as when
/// excising the b= tag value from an original DKIM-Signature header.
pub fn strip_tag_name_and_equals(value: &str) -> Option<(&str, &str)> {
    let s = strip_fws(value).unwrap_or(value);

    let (s, name) = parse_tag_name(s)?;

    let s = strip_fws(s).unwrap_or(s);

    let s = s.strip_prefix('=')?;

    Some((s, name))
}

#[derive(Debug, PartialEq, Eq)]
pub struct TagSpec<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TagListParseError {
    DuplicateTag,
    Syntax,
}

/// A parsed tag-list, with tags in their original order.
#[derive(Debug, PartialEq, Eq)]
pub struct TagList<'a>(Vec<TagSpec<'a>>);

impl<'a> AsRef<[TagSpec<'a>]> for TagList<'a> {
    fn as_ref(&self) -> &[TagSpec<'a>] {
        &self.0
    }
}

impl<'a> TagList<'a> {
    pub fn from_str(val: &'a str) -> Result<Self, TagListParseError> {
        match parse_tag_list(val) {
            Some((rest, tag_list)) if rest.is_empty() => {
                // ensure no duplicate names
                let mut names_seen = HashSet::new();
                if tag_list.iter().any(|tag| !names_seen.insert(tag.name)) {
                    return Err(TagListParseError::DuplicateTag);
                }
                Ok(TagList(tag_list))
            }
            _ => Err(TagListParseError::Syntax),
        }
    }
}

fn parse_tag_list(val: &str) -> Option<(&str, Vec<TagSpec<'_>>)> {
    let (mut s, t) = parse_tag_spec(val)?;

    let mut tags = vec![t];

    while let Some((snext, t)) = s.strip_prefix(';').and_then(parse_tag_spec) {
        s = snext;
        tags.push(t);
    }

    let s = s.strip_prefix(';').unwrap_or(s);

    Some((s, tags))
}

fn parse_tag_spec(val: &str) -> Option<(&str, TagSpec<'_>)> {
    let s = strip_fws(val).unwrap_or(val);

    let (s, name) = parse_tag_name(s)?;

    let s = strip_fws(s).unwrap_or(s);

    let s = s.strip_prefix('=')?;

    let s = strip_fws(s).unwrap_or(s);

    let (s, value) = match parse_tag_value(s) {
        Some((s, value)) => {
            let s = strip_fws(s).unwrap_or(s);
            (s, value)
        }
        None => (s, Default::default()),
    };

    Some((s, TagSpec { name, value }))
}

fn parse_tag_name(value: &str) -> Option<(&str, &str)> {
    let s = value
        .strip_prefix(is_alpha)?
        .trim_start_matches(is_alphanum);
    Some((s, strip_suffix(value, s)))
}

// Note erratum 5070 in ABNF
fn parse_tag_value(value: &str) -> Option<(&str, &str)> {
    fn strip_tval(s: &str) -> Option<&str> {
        s.strip_prefix(is_tval_char)
            .map(|s| s.trim_start_matches(is_tval_char))
    }

    let mut s = strip_tval(value)?;

    while let Some(snext) = strip_fws(s).and_then(strip_tval) {
        s = snext;
    }

    Some((s, strip_suffix(value, s)))
}

fn is_alpha(c: char) -> bool {
    c.is_ascii_alphabetic()
}

fn is_alphanum(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn is_tval_char(c: char) -> bool {
    // printable ASCII w/o ; or non-ASCII UTF-8
    matches!(c, '!'..=':' | '<'..='~') || !c.is_ascii()
}
