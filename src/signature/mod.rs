//! DKIM signature.

mod names;

pub use names::{DomainName, Identity, ParseDomainError, ParseSelectorError, Selector};

use crate::{
    crypto::{HashAlgorithm, KeyType},
    header::FieldName,
    tag_list::{
        self, parse_base64_tag_value, parse_colon_separated_tag_value, TagList, TagSpec,
    },
    util::{encode_base64, CanonicalStr},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// A signature algorithm.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureAlgorithm {
    /// The *rsa-sha256* signature algorithm.
    RsaSha256,
    /// The *ed25519-sha256* signature algorithm.
    Ed25519Sha256,
    /// The *rsa-sha1* signature algorithm.
    ///
    /// This algorithm is obsolete; see RFC 8301. Signatures using it can still
    /// be read, acceptance is controlled in the verifier configuration.
    RsaSha1,
}

impl SignatureAlgorithm {
    /// Returns this signature algorithm’s key type.
    pub fn key_type(self) -> KeyType {
        match self {
            Self::RsaSha256 | Self::RsaSha1 => KeyType::Rsa,
            Self::Ed25519Sha256 => KeyType::Ed25519,
        }
    }

    /// Returns this signature algorithm’s hash algorithm.
    pub fn hash_algorithm(self) -> HashAlgorithm {
        match self {
            Self::RsaSha256 | Self::Ed25519Sha256 => HashAlgorithm::Sha256,
            Self::RsaSha1 => HashAlgorithm::Sha1,
        }
    }
}

impl CanonicalStr for SignatureAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::RsaSha256 => "rsa-sha256",
            Self::Ed25519Sha256 => "ed25519-sha256",
            Self::RsaSha1 => "rsa-sha1",
        }
    }
}

impl Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("rsa-sha256") {
            Ok(Self::RsaSha256)
        } else if s.eq_ignore_ascii_case("ed25519-sha256") {
            Ok(Self::Ed25519Sha256)
        } else if s.eq_ignore_ascii_case("rsa-sha1") {
            Ok(Self::RsaSha1)
        } else {
            Err("unknown signature algorithm")
        }
    }
}

/// A canonicalization algorithm.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CanonicalizationAlgorithm {
    /// The *simple* canonicalization algorithm.
    #[default]
    Simple,
    /// The *relaxed* canonicalization algorithm.
    Relaxed,
}

impl CanonicalStr for CanonicalizationAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }
}

impl Display for CanonicalizationAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for CanonicalizationAlgorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("simple") {
            Ok(Self::Simple)
        } else if s.eq_ignore_ascii_case("relaxed") {
            Ok(Self::Relaxed)
        } else {
            Err("unknown canonicalization algorithm")
        }
    }
}

/// A pair of header/body canonicalization algorithms.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct Canonicalization {
    /// The header canonicalization.
    pub header: CanonicalizationAlgorithm,
    /// The body canonicalization.
    pub body: CanonicalizationAlgorithm,
}

impl CanonicalStr for Canonicalization {
    fn canonical_str(&self) -> &'static str {
        use CanonicalizationAlgorithm::*;

        match (self.header, self.body) {
            (Simple, Simple) => "simple/simple",
            (Simple, Relaxed) => "simple/relaxed",
            (Relaxed, Simple) => "relaxed/simple",
            (Relaxed, Relaxed) => "relaxed/relaxed",
        }
    }
}

impl Display for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl fmt::Debug for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", &self.header, &self.body)
    }
}

impl FromStr for Canonicalization {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if let Some((header, body)) = s.split_once('/') {
            Self {
                header: CanonicalizationAlgorithm::from_str(header)?,
                body: CanonicalizationAlgorithm::from_str(body)?,
            }
        } else {
            // §3.5: ‘If only one algorithm is named, that algorithm is used for
            // the header and "simple" is used for the body.’
            Self {
                header: CanonicalizationAlgorithm::from_str(s)?,
                body: Default::default(),
            }
        })
    }
}

/// The name of the header field that carries a DKIM signature.
pub const DKIM_SIGNATURE_NAME: &str = "DKIM-Signature";

/// An error that occurs when parsing a `DKIM-Signature` header field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DkimSignatureError {
    // circumstantial diagnostics:
    pub domain: Option<DomainName>,  // header.d=   (a valid domain name)
    pub signature_data_base64: Option<String>,  // header.b=  (the string value!)

    // error:
    pub kind: DkimSignatureErrorKind,
}

impl Display for DkimSignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl Error for DkimSignatureError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DkimSignatureErrorKind {
    MissingVersionTag,
    UnsupportedVersion,
    UnsupportedAlgorithm,
    MissingAlgorithmTag,
    MissingSignatureTag,
    MissingBodyHashTag,
    UnsupportedCanonicalization,
    InvalidDomain,
    MissingDomainTag,
    SignedHeadersEmpty,
    FromHeaderNotSigned,
    MissingSignedHeadersTag,
    InvalidBodyLength,
    QueryMethodsNotSupported,
    InvalidSelector,
    MissingSelectorTag,
    InvalidTimestamp,
    InvalidExpiration,
    ValueSyntax,
    DomainMismatch,
    InvalidUserId,
    ExpirationNotAfterTimestamp,
    InvalidTagList,
    Utf8Encoding,
}

impl Display for DkimSignatureErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingVersionTag => write!(f, "v= tag missing"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::UnsupportedAlgorithm => write!(f, "unsupported algorithm"),
            Self::MissingAlgorithmTag => write!(f, "a= tag missing"),
            Self::MissingSignatureTag => write!(f, "b= tag missing"),
            Self::MissingBodyHashTag => write!(f, "bh= tag missing"),
            Self::UnsupportedCanonicalization => write!(f, "unsupported canonicalization"),
            Self::InvalidDomain => write!(f, "invalid domain"),
            Self::MissingDomainTag => write!(f, "d= tag missing"),
            Self::SignedHeadersEmpty => write!(f, "no signed headers"),
            Self::FromHeaderNotSigned => write!(f, "From header not signed"),
            Self::MissingSignedHeadersTag => write!(f, "h= tag missing"),
            Self::InvalidBodyLength => write!(f, "invalid body length"),
            Self::QueryMethodsNotSupported => write!(f, "query method not supported"),
            Self::InvalidSelector => write!(f, "invalid selector"),
            Self::MissingSelectorTag => write!(f, "s= tag missing"),
            Self::InvalidTimestamp => write!(f, "invalid timestamp"),
            Self::InvalidExpiration => write!(f, "invalid expiration"),
            Self::ValueSyntax => write!(f, "syntax error"),
            Self::DomainMismatch => write!(f, "domain mismatch"),
            Self::InvalidUserId => write!(f, "invalid user ID"),
            Self::ExpirationNotAfterTimestamp => write!(f, "expiration not after timestamp"),
            Self::InvalidTagList => write!(f, "invalid tag-list"),
            Self::Utf8Encoding => write!(f, "not UTF-8 encoded"),
        }
    }
}

impl Error for DkimSignatureErrorKind {}

/// A DKIM signature as encoded in a `DKIM-Signature` header field.
#[derive(Clone, Eq, PartialEq)]
pub struct DkimSignature {
    // The fields are strongly typed and have public visibility. This does allow
    // constructing an ‘invalid’ `DkimSignature` (eg with empty signature, or
    // empty signed headers) but given usage contexts this is acceptable.
    // Notes:
    // - i= is Option, because §3.5: "the Signer might wish to assert that
    // although it is willing to go as far as signing for the domain, it is
    // unable or unwilling to commit to an individual user name within the
    // domain. It can do so by including the domain part but not the local-part
    // of the identity."

    pub algorithm: SignatureAlgorithm,
    pub signature_data: Box<[u8]>,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,  // not empty, no fields containing ;
    pub user_id: Option<Identity>,
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
}

impl DkimSignature {
    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, DkimSignatureErrorKind> {
        let mut version_seen = false;
        let mut algorithm = None;
        let mut signature_data = None;
        let mut body_hash = None;
        let mut canonicalization = None;
        let mut domain = None;
        let mut signed_headers = None;
        let mut user_id = None;
        let mut body_length = None;
        let mut selector = None;
        let mut timestamp = None;
        let mut expiration = None;

        for &TagSpec { name, value } in tag_list.as_ref() {
            match name {
                "v" => {
                    if value != "1" {
                        return Err(DkimSignatureErrorKind::UnsupportedVersion);
                    }
                    version_seen = true;
                }
                "a" => {
                    // TODO ensure conformance to value syntax (no "a b\r\n c x..."), else ValueSyntax
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureErrorKind::UnsupportedAlgorithm)?;
                    algorithm = Some(value);
                }
                "b" => {
                    let value = parse_base64_tag_value(value)
                        .map_err(|_| DkimSignatureErrorKind::ValueSyntax)?;
                    signature_data = Some(value.into());
                }
                "bh" => {
                    let value = parse_base64_tag_value(value)
                        .map_err(|_| DkimSignatureErrorKind::ValueSyntax)?;
                    body_hash = Some(value.into());
                }
                "c" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureErrorKind::UnsupportedCanonicalization)?;
                    canonicalization = Some(value);
                }
                "d" => {
                    let value = DomainName::new(value)
                        .map_err(|_| DkimSignatureErrorKind::InvalidDomain)?;
                    domain = Some(value);
                }
                "h" => {
                    let mut sh = vec![];
                    for v in parse_colon_separated_tag_value(value) {
                        let name =
                            FieldName::new(v).map_err(|_| DkimSignatureErrorKind::ValueSyntax)?;
                        sh.push(name);
                    }
                    if sh.is_empty() {
                        return Err(DkimSignatureErrorKind::SignedHeadersEmpty);
                    }
                    // §3.5: ‘The field name "From" MUST be included in the list
                    // of header fields signed.’
                    if !sh.iter().any(|h| *h == "From") {
                        return Err(DkimSignatureErrorKind::FromHeaderNotSigned);
                    }
                    signed_headers = Some(sh.into());
                }
                "i" => {
                    let value = Identity::new(value)
                        .map_err(|_| DkimSignatureErrorKind::InvalidUserId)?;
                    user_id = Some(value);
                }
                "l" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureErrorKind::InvalidBodyLength)?;
                    body_length = Some(value);
                }
                "q" => {
                    let mut dns_txt_seen = false;
                    for v in parse_colon_separated_tag_value(value) {
                        if v.eq_ignore_ascii_case("dns/txt") {
                            dns_txt_seen = true;
                        }
                    }
                    if !dns_txt_seen {
                        return Err(DkimSignatureErrorKind::QueryMethodsNotSupported);
                    }
                }
                "s" => {
                    let value = Selector::new(value)
                        .map_err(|_| DkimSignatureErrorKind::InvalidSelector)?;
                    selector = Some(value);
                }
                "t" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureErrorKind::InvalidTimestamp)?;
                    timestamp = Some(value);
                }
                "x" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureErrorKind::InvalidExpiration)?;
                    expiration = Some(value);
                }
                // §3.5: ‘Tags... not defined... MUST be ignored’; this includes
                // the informational z= tag, which plays no role in verification
                _ => {}
            }
        }

        if !version_seen {
            return Err(DkimSignatureErrorKind::MissingVersionTag);
        }

        let algorithm = algorithm.ok_or(DkimSignatureErrorKind::MissingAlgorithmTag)?;
        let signature_data = signature_data.ok_or(DkimSignatureErrorKind::MissingSignatureTag)?;
        let body_hash = body_hash.ok_or(DkimSignatureErrorKind::MissingBodyHashTag)?;
        let domain = domain.ok_or(DkimSignatureErrorKind::MissingDomainTag)?;
        let signed_headers = signed_headers.ok_or(DkimSignatureErrorKind::MissingSignedHeadersTag)?;
        let selector = selector.ok_or(DkimSignatureErrorKind::MissingSelectorTag)?;

        let user_id = match user_id {
            Some(i) => {
                let i_domain = &i.domain_part;
                if !i_domain.eq_or_subdomain_of(&domain) {
                    return Err(DkimSignatureErrorKind::DomainMismatch);
                }
                Some(i)
            }
            None => None,
        };

        // §3.5: the x= value ‘MUST be greater than the value of the "t=" tag if
        // both are present’
        if let (Some(timestamp), Some(expiration)) = (timestamp, expiration) {
            if expiration <= timestamp {
                return Err(DkimSignatureErrorKind::ExpirationNotAfterTimestamp);
            }
        }

        let canonicalization = canonicalization.unwrap_or_default();

        Ok(Self {
            algorithm,
            signature_data,
            body_hash,
            canonicalization,
            domain,
            signed_headers,
            user_id,
            body_length,
            selector,
            timestamp,
            expiration,
        })
    }
}

impl FromStr for DkimSignature {
    type Err = DkimSignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list = match TagList::from_str(s) {
            Ok(r) => r,
            Err(_e) => {
                return Err(DkimSignatureError {
                    domain: None,
                    signature_data_base64: None,
                    kind: DkimSignatureErrorKind::InvalidTagList,
                });
            }
        };

        match DkimSignature::from_tag_list(&tag_list) {
            Ok(sig) => Ok(sig),
            Err(e) => {
                // attempt to find _some_ info for diagnostics
                let domain = tag_list.as_ref().iter().find(|spec| spec.name == "d")
                    .and_then(|spec| DomainName::new(spec.value).ok());
                let signature_data_base64 = tag_list.as_ref().iter().find(|spec| spec.name == "b")
                    .map(|spec| tag_list::strip_fws_from_tag_value(spec.value));
                Err(DkimSignatureError {
                    domain,
                    signature_data_base64,
                    kind: e,
                })
            }
        }
    }
}

impl fmt::Debug for DkimSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkimSignature")
            .field("algorithm", &self.algorithm)
            .field("signature_data", &encode_base64(&self.signature_data))
            .field("body_hash", &encode_base64(&self.body_hash))
            .field("canonicalization", &self.canonicalization)
            .field("domain", &self.domain)
            .field("signed_headers", &self.signed_headers)
            .field("user_id", &self.user_id)
            .field("body_length", &self.body_length)
            .field("selector", &self.selector)
            .field("timestamp", &self.timestamp)
            .field("expiration", &self.expiration)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tag_list::TagList, util::decode_base64};

    #[test]
    fn example_signature() {
        let example = "v=1; a=rsa-sha256; d=example.net; s=brisbane;
  c=simple; q=dns/txt; i=@eng.example.net;
  t=1117574938; x=1118006938;
  h=from:to:subject:date;
  z=From:foo@eng.example.net|To:joe@example.com|
   Subject:demo=20run|Date:July=205,=202005=203:44:08=20PM=20-0700;
  bh=MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI=;
  b=dzdVyOfAKCdLXdJOc9G2q8LoXSlEniSbav+yuU4zGeeruD00lszZVoG4ZHRNiYzR";
        let example = example.replace('\n', "\r\n");

        let q = TagList::from_str(&example).unwrap();

        let hdr = DkimSignature::from_tag_list(&q).unwrap();

        assert_eq!(
            hdr,
            DkimSignature {
                algorithm: SignatureAlgorithm::RsaSha256,
                signature_data: decode_base64(
                        "dzdVyOfAKCdLXdJOc9G2q8LoXSlEniSbav+yuU4zGeeruD00lszZVoG4ZHRNiYzR"
                    ).unwrap().into(),
                body_hash: decode_base64("MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI=").unwrap().into(),
                canonicalization: Canonicalization {
                    header: CanonicalizationAlgorithm::Simple,
                    body: CanonicalizationAlgorithm::Simple,
                },
                domain: DomainName::new("example.net").unwrap(),
                signed_headers: [
                    FieldName::new("from").unwrap(),
                    FieldName::new("to").unwrap(),
                    FieldName::new("subject").unwrap(),
                    FieldName::new("date").unwrap(),
                ].into(),
                user_id: Some(Identity::new("@eng.example.net").unwrap()),
                selector: Selector::new("brisbane").unwrap(),
                body_length: None,
                timestamp: Some(1117574938),
                expiration: Some(1118006938),
            }
        );
    }

    #[test]
    fn dkim_signature_from_tag_list_ok() {
        let example = " v = 1 ; a=rsa-sha256;d=example.net; s=brisbane;
  c=simple; q=dns/txt; i=中文@eng.example.net;
  t=1117574938; x=1118006938;
  h=from:to:subject:date;
  bh=MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI=;
  b=dzdVyOfAKCdLXdJOc9G2q8LoXSlEniSbav+yuU4zGeeruD00lszZVoG4ZHRNiYzR";
        let example = example.replace('\n', "\r\n");

        let q = TagList::from_str(&example).unwrap();

        let hdr = DkimSignature::from_tag_list(&q).unwrap();

        assert_eq!(
            hdr.signed_headers.as_ref(),
            [
                FieldName::new("from").unwrap(),
                FieldName::new("to").unwrap(),
                FieldName::new("subject").unwrap(),
                FieldName::new("date").unwrap(),
            ]
        );
    }

    #[test]
    fn dkim_signature_with_sha1() {
        let example = "v=1; a=rsa-sha1; d=example.net; s=brisbane; h=from;
  bh=MXqKrb5jreQOzPjHMEfbuldBxU8=;
  b=dzdVyOfAKCdLXdJOc9G2q8LoXSlEniSbav+yuU4zGeeruD00lszZVoG4ZHRNiYzR";
        let example = example.replace('\n', "\r\n");

        let sig = DkimSignature::from_str(&example).unwrap();

        assert_eq!(sig.algorithm, SignatureAlgorithm::RsaSha1);
        assert_eq!(sig.algorithm.key_type(), KeyType::Rsa);
        assert_eq!(sig.algorithm.hash_algorithm(), HashAlgorithm::Sha1);
    }

    #[test]
    fn dkim_signature_errors() {
        let sig = DkimSignature::from_str(
            "v=1; a=rsa-sha256; d=example.net; s=brisbane; h=to:subject; bh=MTI=; b=NDU=",
        );
        assert_eq!(
            sig.unwrap_err().kind,
            DkimSignatureErrorKind::FromHeaderNotSigned
        );

        let sig = DkimSignature::from_str(
            "v=1; a=rsa-sha256; d=example.net; s=brisbane; h=from; t=5; x=5; bh=MTI=; b=NDU=",
        );
        assert_eq!(
            sig.unwrap_err().kind,
            DkimSignatureErrorKind::ExpirationNotAfterTimestamp
        );

        let sig = DkimSignature::from_str(
            "a=rsa-sha256; d=example.net; s=brisbane; h=from; bh=MTI=; b=NDU=",
        );
        assert_eq!(sig.unwrap_err().kind, DkimSignatureErrorKind::MissingVersionTag);
    }

    #[test]
    fn dkim_signature_error_diagnostics() {
        // unsupported version, but d= and b= are readable
        let error = DkimSignature::from_str(
            "v=2; a=rsa-sha256; d=example.net; s=brisbane; h=from; bh=MTI=; b= N DU= ",
        )
        .unwrap_err();

        assert_eq!(error.kind, DkimSignatureErrorKind::UnsupportedVersion);
        assert_eq!(error.domain, Some(DomainName::new("example.net").unwrap()));
        assert_eq!(error.signature_data_base64.as_deref(), Some("NDU="));
    }
}
