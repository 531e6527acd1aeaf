#[cfg(feature = "hickory-resolver")]
mod hickory_resolver;

use std::{
    collections::HashMap,
    future::{self, Future, Ready},
    io::{self, ErrorKind},
};

/// A trait for looking up DNS TXT records containing DKIM public key records.
///
/// The error type used here is `std::io::Error`. The following error kinds on
/// the query result are recognised and receive special treatment.
///
/// * `ErrorKind::InvalidInput` on the query: the domain argument could not be used
/// * `ErrorKind::NotFound` on the query: NXDOMAIN, no key record found
/// * `ErrorKind::TimedOut` on the query: timeout
///
/// The inner, per-record `std::io::Error` can be used to signal errors
/// (parsing, encoding) with individual TXT records.
pub trait LookupTxt: Send + Sync {
    /// The answer consisting of TXT records found.
    type Answer: IntoIterator<Item = io::Result<Vec<u8>>>;
    /// The future resolving to the query’s answer.
    type Query<'a>: Future<Output = io::Result<Self::Answer>> + Send + 'a
    where
        Self: 'a;

    /// Looks up the domain’s TXT records in DNS.
    ///
    /// The domain will be passed to this trait as a string in human-readable
    /// A-label (ASCII) format (eg `selector._domainkey.example.com.`).
    ///
    /// Note that according to RFC 6376, the final answer is expected to contain
    /// only a single TXT record (but DNS allows > 1).
    fn lookup_txt(&self, domain: &str) -> Self::Query<'_>;
}

/// A resolver that serves key records from a fixed, in-memory collection.
///
/// This resolver can be used where live DNS is not available or not wanted,
/// such as when re-verifying an archived message whose key records have been
/// retained, or in tests.
#[derive(Clone, Default)]
pub struct StaticLookup {
    records: HashMap<String, Vec<String>>,
    fallback: Option<String>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key record for the given selector and domain.
    pub fn insert(&mut self, selector: &str, domain: &str, record: impl Into<String>) {
        let name = format!("{selector}._domainkey.{domain}").to_ascii_lowercase();
        self.records.entry(name).or_default().push(record.into());
    }

    /// Sets a key record that answers queries for any name that has no entry of
    /// its own.
    pub fn set_fallback(&mut self, record: impl Into<String>) {
        self.fallback = Some(record.into());
    }
}

impl LookupTxt for StaticLookup {
    type Answer = Vec<io::Result<Vec<u8>>>;
    type Query<'a> = Ready<io::Result<Self::Answer>>;

    fn lookup_txt(&self, domain: &str) -> Self::Query<'_> {
        let name = domain.strip_suffix('.').unwrap_or(domain).to_ascii_lowercase();

        let result = match self.records.get(&name) {
            Some(records) => Ok(records.iter().map(|r| Ok(r.clone().into_bytes())).collect()),
            None => match &self.fallback {
                Some(record) => Ok(vec![Ok(record.clone().into_bytes())]),
                None => Err(ErrorKind::NotFound.into()),
            },
        };

        future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_lookup_ok() {
        let mut lookup = StaticLookup::new();
        lookup.insert("sel", "example.com", "v=DKIM1; p=YWJj");

        let answer = lookup.lookup_txt("Sel._domainkey.Example.com.").await.unwrap();
        assert_eq!(answer[0].as_ref().unwrap(), b"v=DKIM1; p=YWJj");

        let error = lookup.lookup_txt("other._domainkey.example.com.").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn static_lookup_fallback() {
        let mut lookup = StaticLookup::new();
        lookup.set_fallback("v=DKIM1; p=YWJj");

        let answer = lookup.lookup_txt("any._domainkey.example.org.").await.unwrap();
        assert_eq!(answer[0].as_ref().unwrap(), b"v=DKIM1; p=YWJj");
    }
}
