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

//! A library for verifying *DomainKeys Identified Mail* (DKIM) signatures as
//! described in [RFC 6376].
//!
//! This library provides a high-level verification API, as well as low-level
//! APIs that cover the various DKIM protocol areas.
//!
//! The high-level API is the type [`Verifier`] in module `verifier`: it takes
//! an email message, evaluates all DKIM signatures attached to it, and reports
//! a result per signature. Most users will want to deal with DKIM via this
//! API. For convenience, all the relevant items are re-exported at the top
//! level.
//!
//! The high-level API exposes various configuration options for the
//! verification process. It is, however, closed, and does not provide
//! extension points or similar; only the DNS lookup is pluggable, through the
//! [`LookupTxt`][crate::verifier::LookupTxt] trait. The low-level building
//! blocks are provided in the remaining modules. They contain basic helpers
//! for cryptography, canonicalisation, message parsing, encoding, etc. Users
//! familiar with DKIM could use these building blocks to build their own
//! verification facilities.
//!
//! See the example for `Verifier` for basic usage.
//!
//! # Cargo features
//!
//! The feature **`hickory-resolver`** makes an implementation of
//! [`LookupTxt`][crate::verifier::LookupTxt] available for the
//! hickory-resolver DNS resolver.
//!
//! The feature **`tool`** (enabled by default) builds the `dkimcheck`
//! command-line program, which verifies the signatures of a message read from
//! a file or standard input.
//!
//! Acceptance of historic cryptographic material (RSA keys shorter than 1024
//! bits, the SHA-1 hash algorithm; see [RFC 8301]) is controlled in the
//! verifier configuration.
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376
//! [RFC 8301]: https://www.rfc-editor.org/rfc/rfc8301

pub mod canonicalize;
pub mod crypto;
pub mod header;
pub mod message;
pub mod message_hash;
mod parse;
pub mod quoted_printable;
pub mod record;
pub mod signature;
mod tag_list;
mod util;
pub mod verifier;

pub use crate::{
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    message::{parse_message, MessageFormatError},
    signature::{DkimSignature, DomainName, Selector, SignatureAlgorithm},
    util::{decode_base64, encode_base64, Base64Error, CanonicalStr},
    verifier::{
        Config, LookupTxt, StaticLookup, Verdict, VerificationResult, VerificationStatus,
        Verifier,
    },
};
