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

//! Verifier and supporting types.

mod header;
mod lookup;
mod query;
mod verify;

pub use lookup::{LookupTxt, StaticLookup};

use crate::{
    crypto,
    header::{FieldName, HeaderFields},
    message::{self, MessageFormatError},
    message_hash::{
        body_hasher_key, BodyHashError, BodyHashResults, BodyHasher, BodyHasherBuilder,
        BodyHasherStance,
    },
    record::{DkimKeyRecord, Flags},
    signature::{DkimSignature, DkimSignatureError},
    util::{self, CanonicalStr},
    verifier::header::{HeaderVerifier, VerifyStatus},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    sync::Arc,
    time::{Duration, SystemTime},
};
use tracing::trace;

/// Configuration for a verifier process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The maximum duration of public key record lookups. When this duration is
    /// exceeded evaluation fails with a temporary error.
    pub lookup_timeout: Duration,

    /// Evaluate at most this number of signatures; any further signature
    /// headers are ignored.
    pub max_signatures: usize,

    /// If given required headers are not signed in a DKIM signature, the
    /// signature does not validate. Note that the header `From` is always
    /// required to be signed independent of this setting.
    pub required_signed_headers: Vec<FieldName>,

    /// Minimum acceptable RSA key size in bits. Signatures made with a smaller
    /// key do not validate (RFC 8301 recommends at least 1024 bits).
    pub min_key_bits: usize,

    /// When this flag is set, signatures using the obsolete SHA-1 hash
    /// algorithm are acceptable.
    pub allow_sha1: bool,

    /// When this flag is set, an expired signature (x=) validates anyway.
    pub allow_expired: bool,

    /// If a DKIM signature has the l= tag, and the body length given in this
    /// tag is less than the actual message body length, the signature does not
    /// validate. In other words, signatures that cover only part of the message
    /// body are not accepted.
    pub forbid_unsigned_content: bool,

    /// Tolerance applied to time values when checking signature expiration (x=)
    /// or timestamp validity (t=), to allow for clock drift. Resolution is in
    /// seconds.
    pub time_tolerance: Duration,

    /// The `SystemTime` value to use as the instant ‘now’. This is a hook for
    /// testing with a fixed timestamp.
    pub fixed_system_time: Option<SystemTime>,
}

impl Config {
    fn current_timestamp(&self) -> u64 {
        self.fixed_system_time
            .unwrap_or_else(SystemTime::now)
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(10),
            max_signatures: 10,
            required_signed_headers: vec![],
            min_key_bits: 1024,
            allow_sha1: true,
            allow_expired: false,
            forbid_unsigned_content: false,
            time_tolerance: Duration::from_secs(300),
            fixed_system_time: None,
        }
    }
}

/// An unacceptable signature or key property per the verifier configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PolicyError {
    RequiredHeadersNotSigned,
    SignatureExpired,
    TimestampInFuture,
    Sha1HashAlgorithm,
    KeyTooSmall,
    UnsignedContent,
}

impl Display for PolicyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequiredHeadersNotSigned => {
                write!(f, "headers required to be signed were not signed")
            }
            Self::SignatureExpired => write!(f, "signature expired"),
            Self::TimestampInFuture => write!(f, "timestamp in the future"),
            Self::Sha1HashAlgorithm => write!(f, "hash algorithm SHA-1 not acceptable"),
            Self::KeyTooSmall => write!(f, "public key size too small"),
            Self::UnsignedContent => write!(f, "partial body signing not acceptable"),
        }
    }
}

impl Error for PolicyError {}

/// An error that led to failed verification of some DKIM signature.
#[derive(Clone, Debug, PartialEq)]
pub enum VerificationError {
    /// The *DKIM-Signature* header could not be parsed into a usable signature.
    DkimSignatureFormat(DkimSignatureError),
    /// The signature or key is not acceptable per the verifier configuration.
    Policy(PolicyError),
    /// The key record's key type does not match the signature algorithm.
    WrongKeyType,
    /// The key record could not be parsed.
    KeyRecordSyntax,
    /// The key record's key has been revoked (empty p= tag).
    KeyRevoked,
    /// The key record does not allow the signature's hash algorithm.
    DisallowedHashAlgorithm,
    /// The key record does not cover use for email.
    DisallowedServiceType,
    /// The key record forbids subdomain signing (t=s), but the i= domain is not
    /// equal to the d= domain.
    DomainMismatch,
    /// Cryptographic verification of the signature failed.
    VerificationFailure(crypto::VerificationError),
    /// The message body hash did not match the bh= tag.
    BodyHashMismatch,
    /// The message body was shorter than the length declared in the l= tag.
    InsufficientBodyLength,
    /// No key record was found for the signature's selector and domain.
    NoKeyFound,
    /// The selector and domain did not form a usable DNS query name.
    InvalidKeyDomain,
    /// The key record lookup timed out.
    KeyLookupTimeout,
    /// The key record lookup failed.
    KeyLookup,
    /// A number exceeded the processable range on this platform.
    Overflow,
}

impl Display for VerificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DkimSignatureFormat(error) => error.kind.fmt(f),
            Self::Policy(error) => error.fmt(f),
            Self::WrongKeyType => write!(f, "wrong key type"),
            Self::KeyRecordSyntax => write!(f, "invalid syntax in key record"),
            Self::KeyRevoked => write!(f, "key in key record revoked"),
            Self::DisallowedHashAlgorithm => write!(f, "hash algorithm not allowed by key record"),
            Self::DisallowedServiceType => write!(f, "service type not allowed by key record"),
            Self::DomainMismatch => write!(f, "domain mismatch"),
            Self::VerificationFailure(error) => error.fmt(f),
            Self::BodyHashMismatch => write!(f, "body hash mismatch"),
            Self::InsufficientBodyLength => write!(f, "truncated body"),
            Self::NoKeyFound => write!(f, "no key record found"),
            Self::InvalidKeyDomain => write!(f, "invalid key record domain name"),
            Self::KeyLookupTimeout => write!(f, "key record lookup timed out"),
            Self::KeyLookup => write!(f, "key record lookup failed"),
            Self::Overflow => write!(f, "integer size too large"),
        }
    }
}

impl Error for VerificationError {}

/// The verification status of an evaluated DKIM signature.
///
/// This type encodes the output states described in RFC 6376, section 3.9:
/// `Success` corresponds to *SUCCESS*, `Failure` corresponds to both *PERMFAIL*
/// and *TEMPFAIL*, distinguishable through the attached error.
#[derive(Clone, Debug, PartialEq)]
pub enum VerificationStatus {
    /// A *SUCCESS* result status.
    Success,
    /// A *PERMFAIL* or *TEMPFAIL* result status, with failure cause attached.
    Failure(VerificationError),
}

impl VerificationStatus {
    /// Converts this verification status to a verdict.
    pub fn to_verdict(&self) -> Verdict {
        use VerificationError::*;

        match self {
            Self::Success => Verdict::Valid,
            Self::Failure(error) => match error {
                DkimSignatureFormat(_) | Policy(_) => Verdict::Invalid,
                WrongKeyType
                | KeyRecordSyntax
                | KeyRevoked
                | DisallowedHashAlgorithm
                | DisallowedServiceType
                | DomainMismatch
                | VerificationFailure(_)
                | BodyHashMismatch
                | InsufficientBodyLength
                | NoKeyFound
                | InvalidKeyDomain => Verdict::Permfail,
                KeyLookupTimeout | KeyLookup => Verdict::Tempfail,
                Overflow => Verdict::Error,
            },
        }
    }
}

/// The plain-language verdict on an evaluated DKIM signature.
///
/// As a general rule, `Invalid` signals that evaluation did not get past
/// parsing and acceptance of the signature itself, while `Permfail` and
/// `Tempfail` concern problems with a well-understood signature.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Verdict {
    /// The signature was verified successfully.
    Valid,

    /// The signature could not be evaluated, because it was ill-formed, uses
    /// unsupported features, or was rejected by policy before cryptographic
    /// evaluation.
    Invalid,

    /// Evaluation failed for a temporary reason, such as a DNS lookup timeout.
    /// Retrying may give a definite result.
    Tempfail,

    /// The signature was evaluated and definitely rejected: the cryptographic
    /// check or body hash comparison failed, or no usable public key is
    /// available.
    Permfail,

    /// Evaluation failed because an implementation limit was reached.
    Error,
}

impl CanonicalStr for Verdict {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Tempfail => "tempfail",
            Self::Permfail => "permfail",
            Self::Error => "error",
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

/// A verification result arrived at for some DKIM signature header.
#[derive(Debug, PartialEq)]
pub struct VerificationResult {
    /// The verification status.
    pub status: VerificationStatus,
    /// The index of the evaluated *DKIM-Signature* header among the message's
    /// *DKIM-Signature* headers, in header order, starting from zero.
    pub index: usize,
    /// The parsed DKIM signature data obtained from the *DKIM-Signature*
    /// header, if available.
    pub signature: Option<DkimSignature>,
    /// The parsed DKIM public key record used in the verification, if
    /// available.
    ///
    /// The record is behind an `Arc` only so that it may be shared among the
    /// `VerificationResult`s returned by a call to [`Verifier::finish`].
    pub key_record: Option<Arc<DkimKeyRecord>>,
}

impl VerificationResult {
    /// Returns the verdict corresponding to the verification status.
    pub fn verdict(&self) -> Verdict {
        self.status.to_verdict()
    }

    /// Whether the signature's key record declares testing mode (flag *t=y*).
    /// A testing signature verifies like any other; the flag is only surfaced
    /// for reporting.
    pub fn is_testing(&self) -> bool {
        self.key_record
            .as_ref()
            .map_or(false, |rec| rec.flags.contains(&Flags::Testing))
    }
}

struct VerifierTask {
    status: VerificationStatus,
    index: usize,
    signature: Option<DkimSignature>,
    key_record: Option<Arc<DkimKeyRecord>>,
}

/// A verifier of DKIM signatures in an email message.
///
/// `Verifier` is the high-level API for verifying a message. It implements a
/// three-phase, staged design that allows processing the message in chunks, and
/// shortcutting unnecessary body processing.
///
/// 1. **[`verify_header`][Verifier::verify_header]** (async): first, perform
///    signature verification on the message header and return a verifier that
///    carries the preliminary results; this is where most of the actual work is
///    done
/// 2. [`process_body_chunk`][Verifier::process_body_chunk]: then, any number of
///    chunks of the message body are fed to the verification process
/// 3. [`finish`][Verifier::finish]: finally, the body hashes are computed and
///    the final verification results are returned
///
/// For whole messages already in memory, the one-shot
/// [`verify_message`][Verifier::verify_message] drives all three phases.
///
/// # Examples
///
/// The following example shows how to verify a message's signatures using the
/// high-level API.
///
/// ```
/// # use std::{future::Future, io::{self, ErrorKind}, pin::Pin};
/// # #[derive(Clone)]
/// # struct MockLookupTxt;
/// # impl dkimcheck::verifier::LookupTxt for MockLookupTxt {
/// #     type Answer = Vec<io::Result<Vec<u8>>>;
/// #     type Query<'a> = Pin<Box<dyn Future<Output = io::Result<Self::Answer>> + Send + 'a>>;
/// #
/// #     fn lookup_txt(&self, domain: &str) -> Self::Query<'_> {
/// #         let domain = domain.to_owned();
/// #         Box::pin(async move {
/// #             match domain.as_str() {
/// #                 "selector._domainkey.example.com." => {
/// #                     Ok(vec![
/// #                         Ok(b"v=DKIM1; k=ed25519; p=f8IRGiRaCQ83GCI56F77ueW0l5hinwOG31ZmlSyReBk=".to_vec()),
/// #                     ])
/// #                 }
/// #                 _ => unimplemented!(),
/// #             }
/// #         })
/// #     }
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// use dkimcheck::*;
///
/// let header = "DKIM-Signature: v=1; d=example.com; s=selector; a=ed25519-sha256;\r\n\
///     \tt=1687435395; x=1687867395; h=Date:Subject:To:From; bh=1zGfaauQ3vmMhm21CGMC23\r\n\
///     \taJE1JrOoKsgT/wvw9owzE=; b=Ny5/l088Iubyzlq56ab9Xe6/9YDcIvydie0GOI6CEsaIdktjLlA\r\n\
///     \tOvKuE7wU4203PIMx0MuW7lFLpdRIcPDl3Cg==\r\n\
///     Received: from smtp.example.com by mail.example.org\r\n\
///     \twith ESMTPS id A6DE7475; Thu, 22 Jun 2023 14:03:29 +0200\r\n\
///     From: me@example.com\r\n\
///     To: you@example.org\r\n\
///     Subject: Re: Thursday 8pm\r\n\
///     Date: Thu, 22 Jun 2023 14:03:12 +0200\r\n".parse()?;
/// let body = b"Hey,\r\n\
///     \r\n\
///     Ready for tonight? ;)\r\n";
///
/// // Note: enable Cargo feature `hickory-resolver` to make an implementation
/// // of trait `LookupTxt` available for hickory-resolver's `TokioAsyncResolver`.
/// let resolver;  // = TokioAsyncResolver::tokio(...);
/// # resolver = MockLookupTxt;
///
/// let config = Config::default();
/// # let mut config = config;
/// # config.fixed_system_time =
/// #     Some(std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1687435411));
///
/// let mut verifier = Verifier::verify_header(&resolver, &header, &config)
///     .await
///     .unwrap();
///
/// let _ = verifier.process_body_chunk(body);
///
/// let results = verifier.finish();
///
/// let signature = results.into_iter().next().unwrap();
///
/// assert_eq!(signature.status, VerificationStatus::Success);
/// assert_eq!(signature.verdict(), Verdict::Valid);
/// # Ok::<_, Box<dyn std::error::Error>>(())
/// # }).unwrap();
/// ```
pub struct Verifier {
    tasks: Vec<VerifierTask>,
    body_hasher: BodyHasher,
}

impl Verifier {
    /// Initiates a message verification process by verifying the header of a
    /// message.
    ///
    /// Returns a verifier for all signatures in the given header, or `None` if
    /// the header contains no signatures.
    pub async fn verify_header<T>(
        resolver: &T,
        headers: &HeaderFields,
        config: &Config,
    ) -> Option<Self>
    where
        T: LookupTxt + Clone + 'static,
    {
        let verifier = HeaderVerifier::find_signatures(headers, config)?;

        let verified_tasks = verifier.verify_all(resolver).await;

        let mut tasks = vec![];
        let mut body_hasher = BodyHasherBuilder::new(config.forbid_unsigned_content);

        for task in verified_tasks {
            let status = match task.status {
                VerifyStatus::InProgress => panic!("verification unexpectedly skipped"),
                VerifyStatus::Failed(e) => {
                    // Key and signature errors can still be superseded by a
                    // body hash failure, so the body hash is requested for
                    // these signatures, too.
                    if is_key_or_signature_error(&e) {
                        if let Some(sig) = &task.signature {
                            let (body_len, hash_alg, canon_alg) = body_hasher_key(sig);
                            body_hasher.register_canonicalization(body_len, hash_alg, canon_alg);
                        }
                    }

                    VerificationStatus::Failure(e)
                }
                VerifyStatus::Successful => {
                    // For successfully verified signatures, register a body
                    // hasher request for verification of the body hash.
                    let sig = task
                        .signature
                        .as_ref()
                        .expect("successful verification missing signature");
                    let (body_len, hash_alg, canon_alg) = body_hasher_key(sig);
                    body_hasher.register_canonicalization(body_len, hash_alg, canon_alg);

                    // Mark this task as a (preliminary) success, later body
                    // hash verification can still result in failure.
                    VerificationStatus::Success
                }
            };

            tasks.push(VerifierTask {
                status,
                index: task.index,
                signature: task.signature,
                key_record: task.key_record,
            });
        }

        let body_hasher = body_hasher.build();

        Some(Self { tasks, body_hasher })
    }

    /// Processes a chunk of the message body.
    ///
    /// Clients should pass the message body either whole or in chunks of
    /// arbitrary size to this method in order to calculate the body hash (the
    /// *bh=* tag). The returned [`BodyHasherStance`] instructs the client how
    /// to proceed if more chunks are outstanding. Note that the given body
    /// chunk is canonicalised and hashed, but not otherwise retained in memory.
    ///
    /// Remember that email message bodies generally use CRLF line endings; this
    /// is important for correct body hash calculation.
    ///
    /// # Examples
    ///
    /// ```
    /// # use dkimcheck::verifier::Verifier;
    /// # fn f(verifier: &mut Verifier) {
    /// let _ = verifier.process_body_chunk(b"\
    /// Hello friend!\r
    /// \r
    /// How are you?\r
    /// ");
    /// # }
    /// ```
    pub fn process_body_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        self.body_hasher.hash_chunk(chunk)
    }

    /// Finishes the verification process and returns the results.
    ///
    /// The returned result vector is never empty. In each result, a failing
    /// body hash takes precedence over an earlier key or signature error.
    pub fn finish(self) -> Vec<VerificationResult> {
        let mut result = vec![];

        let hasher_results = self.body_hasher.finish();

        for task in self.tasks {
            // To obtain the final VerificationStatus, those tasks that did
            // verify successfully, now must have their body hashes verify, too.
            // A body that does not agree with the bh= tag fails the signature
            // before any use of the public key.
            let final_status = match task.status {
                VerificationStatus::Success => {
                    let sig = task
                        .signature
                        .as_ref()
                        .expect("successful verification missing signature");
                    verify_body_hash(sig, &hasher_results)
                }
                VerificationStatus::Failure(e) if is_key_or_signature_error(&e) => {
                    match &task.signature {
                        Some(sig) => match verify_body_hash(sig, &hasher_results) {
                            VerificationStatus::Success => VerificationStatus::Failure(e),
                            failure => failure,
                        },
                        None => VerificationStatus::Failure(e),
                    }
                }
                status @ VerificationStatus::Failure(_) => status,
            };

            result.push(VerificationResult {
                status: final_status,
                index: task.index,
                signature: task.signature,
                key_record: task.key_record,
            });
        }

        result
    }

    /// Verifies all DKIM signatures in the given raw message.
    ///
    /// This is the one-shot convenience form of the staged API: the message is
    /// parsed into header and body, and the verification results for all
    /// signatures are returned. The result vector is empty when the message
    /// carries no signature at all.
    ///
    /// # Errors
    ///
    /// If the message is not well-formed, a message format error is returned
    /// and no signature has been evaluated.
    pub async fn verify_message<T>(
        resolver: &T,
        message: &[u8],
        config: &Config,
    ) -> Result<Vec<VerificationResult>, MessageFormatError>
    where
        T: LookupTxt + Clone + 'static,
    {
        let (headers, body) = message::parse_message(message)?;

        match Self::verify_header(resolver, &headers, config).await {
            Some(mut verifier) => {
                let _ = verifier.process_body_chunk(&body);
                Ok(verifier.finish())
            }
            None => Ok(vec![]),
        }
    }
}

// Key retrieval and checking of the signature itself come after the body hash
// check, so a body hash failure takes precedence over these errors.
fn is_key_or_signature_error(error: &VerificationError) -> bool {
    matches!(
        error,
        VerificationError::Policy(PolicyError::KeyTooSmall)
            | VerificationError::WrongKeyType
            | VerificationError::KeyRecordSyntax
            | VerificationError::KeyRevoked
            | VerificationError::DisallowedHashAlgorithm
            | VerificationError::DisallowedServiceType
            | VerificationError::DomainMismatch
            | VerificationError::VerificationFailure(_)
            | VerificationError::NoKeyFound
            | VerificationError::InvalidKeyDomain
            | VerificationError::KeyLookupTimeout
            | VerificationError::KeyLookup
    )
}

fn verify_body_hash(sig: &DkimSignature, hasher_results: &BodyHashResults) -> VerificationStatus {
    trace!("now checking body hash for signature");

    let key = body_hasher_key(sig);

    let hasher_result = hasher_results
        .get(&key)
        .expect("requested body hash result not available");

    match hasher_result {
        Ok((h, _)) => {
            if h != &sig.body_hash {
                trace!("body hash mismatch: {}", util::encode_base64(h));
                VerificationStatus::Failure(VerificationError::BodyHashMismatch)
            } else {
                trace!("body hash matched");
                VerificationStatus::Success
            }
        }
        Err(BodyHashError::InsufficientInput) => {
            VerificationStatus::Failure(VerificationError::InsufficientBodyLength)
        }
        Err(BodyHashError::InputTruncated) => {
            VerificationStatus::Failure(VerificationError::Policy(PolicyError::UnsignedContent))
        }
    }
}
