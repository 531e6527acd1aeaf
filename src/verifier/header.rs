use crate::{
    crypto::{HashAlgorithm, KeyType, VerifyingKey},
    header::HeaderFields,
    record::{DkimKeyRecord, DkimKeyRecordParseError, Flags, ServiceType},
    signature::{
        DkimSignature, DkimSignatureError, DkimSignatureErrorKind, DomainName, Identity,
        DKIM_SIGNATURE_NAME,
    },
    verifier::{query::Queries, verify, Config, LookupTxt, PolicyError, VerificationError},
};
use std::{
    io::{self, ErrorKind},
    str::{self, FromStr},
    sync::Arc,
};
use tracing::trace;

pub enum VerifyStatus {
    InProgress,
    Failed(VerificationError),
    Successful,
}

pub struct VerifyTask {
    pub index: usize,

    pub status: VerifyStatus,
    pub signature: Option<DkimSignature>,
    pub name: Option<Box<str>>,
    pub value: Option<Box<str>>,
    pub key_record: Option<Arc<DkimKeyRecord>>,
}

impl VerifyTask {
    fn failed(index: usize, error: VerificationError) -> Self {
        Self {
            index,
            status: VerifyStatus::Failed(error),
            signature: None,
            name: None,
            value: None,
            key_record: None,
        }
    }

    fn in_progress(index: usize, sig: DkimSignature, name: Box<str>, value: Box<str>) -> Self {
        Self {
            index,
            status: VerifyStatus::InProgress,
            signature: Some(sig),
            name: Some(name),
            value: Some(value),
            key_record: None,
        }
    }
}

pub struct HeaderVerifier<'a, 'b> {
    pub headers: &'a HeaderFields,
    pub config: &'b Config,
    pub tasks: Vec<VerifyTask>,
}

impl<'a, 'b> HeaderVerifier<'a, 'b> {
    /// Scans the given headers for *DKIM-Signature* headers and prepares a
    /// verification task for each of them. Returns `None` if no such headers
    /// are present.
    pub fn find_signatures(headers: &'a HeaderFields, config: &'b Config) -> Option<Self> {
        let mut tasks = vec![];

        let dkim_headers = headers
            .as_ref()
            .iter()
            .filter(|(name, _)| *name == DKIM_SIGNATURE_NAME)
            .enumerate()
            .take(config.max_signatures);

        for (index, (name, value)) in dkim_headers {
            // from here on, this signature header counts: a result must be
            // recorded for it

            // well-formed DKIM-Signature headers contain only UTF-8
            let value = match str::from_utf8(value.as_ref()) {
                Ok(value) => value,
                Err(_) => {
                    tasks.push(VerifyTask::failed(
                        index,
                        VerificationError::DkimSignatureFormat(DkimSignatureError {
                            domain: None,
                            signature_data_base64: None,
                            kind: DkimSignatureErrorKind::Utf8Encoding,
                        }),
                    ));
                    continue;
                }
            };

            let task = match DkimSignature::from_str(value) {
                Ok(sig) => {
                    if let Some(len) = sig.body_length {
                        if usize::try_from(len).is_err() {
                            // signed body length unusable on this platform
                            tasks.push(VerifyTask::failed(index, VerificationError::Overflow));
                            continue;
                        }
                    }

                    match check_signature_policy(&sig, config) {
                        Ok(()) => {
                            VerifyTask::in_progress(index, sig, name.as_ref().into(), value.into())
                        }
                        Err(e) => {
                            // the signature itself was readable, keep it in
                            // the result
                            let mut task =
                                VerifyTask::failed(index, VerificationError::Policy(e));
                            task.signature = Some(sig);
                            task
                        }
                    }
                }
                Err(e) => VerifyTask::failed(index, VerificationError::DkimSignatureFormat(e)),
            };

            tasks.push(task);
        }

        if tasks.is_empty() {
            None
        } else {
            Some(Self {
                headers,
                config,
                tasks,
            })
        }
    }

    pub async fn verify_all<T>(mut self, resolver: &T) -> Vec<VerifyTask>
    where
        T: LookupTxt + Clone + 'static,
    {
        let mut queries = Queries::spawn(&self.tasks, resolver, self.config);

        let mut done = vec![];

        // step through the query results *as they come in*; queries are keyed
        // by (domain, selector), and their result is applied to every matching
        // task
        while let Some(result) = queries.set.join_next().await {
            let (indexes, lookup_result) = result.expect("could not join DNS query task");

            let mut records = extract_records(lookup_result);

            let mut i = 0;
            while i < self.tasks.len() {
                if indexes.contains(&self.tasks[i].index) {
                    let mut task = self.tasks.remove(i);

                    verify_task(&mut task, self.headers, self.config, &mut records);

                    done.push(task);
                } else {
                    i += 1;
                }
            }
        }

        // tasks that failed early have no corresponding query: merge together
        // again, in header order
        self.tasks.append(&mut done);
        self.tasks.sort_unstable_by_key(|task| task.index);

        self.tasks
    }
}

fn check_signature_policy(sig: &DkimSignature, config: &Config) -> Result<(), PolicyError> {
    for name in &config.required_signed_headers {
        if !sig.signed_headers.contains(name) {
            trace!("headers required to be signed are not signed");
            return Err(PolicyError::RequiredHeadersNotSigned);
        }
    }

    if sig.algorithm.hash_algorithm() == HashAlgorithm::Sha1 && !config.allow_sha1 {
        trace!("SHA-1 hash algorithm not acceptable");
        return Err(PolicyError::Sha1HashAlgorithm);
    }

    let current_t = config.current_timestamp();
    let delta = config.time_tolerance.as_secs();

    if !config.allow_expired {
        if let Some(t) = sig.expiration {
            if current_t >= t.saturating_add(delta) {
                trace!("signature expired");
                return Err(PolicyError::SignatureExpired);
            }
        }
    }

    if let Some(t) = sig.timestamp {
        if t.saturating_sub(delta) > current_t {
            trace!("timestamp in the future");
            return Err(PolicyError::TimestampInFuture);
        }
    }

    Ok(())
}

enum MaybeRecord {
    Unparsed(io::Result<String>),
    Parsed(Result<Arc<DkimKeyRecord>, DkimKeyRecordParseError>),
}

fn extract_records(
    lookup_result: io::Result<Vec<io::Result<String>>>,
) -> Result<Vec<MaybeRecord>, VerificationError> {
    match lookup_result {
        Ok(txts) if txts.is_empty() => {
            trace!("no key record");
            Err(VerificationError::NoKeyFound)
        }
        Ok(txts) => Ok(txts.into_iter().map(MaybeRecord::Unparsed).collect()),
        Err(e) => match e.kind() {
            ErrorKind::NotFound => {
                trace!("no key record");
                Err(VerificationError::NoKeyFound)
            }
            ErrorKind::InvalidInput => {
                trace!("invalid key record domain name");
                Err(VerificationError::InvalidKeyDomain)
            }
            ErrorKind::TimedOut => {
                trace!("key record lookup timed out");
                Err(VerificationError::KeyLookupTimeout)
            }
            _ => {
                trace!("could not look up key record: {e}");
                Err(VerificationError::KeyLookup)
            }
        },
    }
}

fn verify_task(
    task: &mut VerifyTask,
    headers: &HeaderFields,
    config: &Config,
    lookup_result: &mut Result<Vec<MaybeRecord>, VerificationError>,
) {
    trace!("processing DKIM-Signature");

    let sig = task
        .signature
        .as_ref()
        .expect("signature of in-progress verification task not available");

    let key_type = sig.algorithm.key_type();
    let hash_alg = sig.algorithm.hash_algorithm();

    let txts = match lookup_result {
        Ok(txts) => txts,
        Err(e) => {
            task.status = VerifyStatus::Failed(e.clone());
            return;
        }
    };

    assert!(!txts.is_empty());

    // step through all (usually just one, but several allowed) key records
    for (i, key_record) in iter_records(txts).enumerate() {
        trace!("trying verification using DKIM key record {}", i + 1);

        let key_record = match key_record {
            Ok(key_record) => Arc::clone(key_record),
            Err(e) => {
                // conflate syntax errors, but propagate error about revoked key
                let error = match e {
                    DkimKeyRecordParseError::RevokedKey => VerificationError::KeyRevoked,
                    _ => VerificationError::KeyRecordSyntax,
                };
                // record the last error seen
                task.status = VerifyStatus::Failed(error);
                task.key_record = None;
                continue;
            }
        };

        if let Err(e) = validate_key_record(
            key_type,
            hash_alg,
            &key_record,
            &sig.domain,
            sig.user_id.as_ref(),
        ) {
            task.status = VerifyStatus::Failed(e);
            task.key_record = Some(key_record);
            continue;
        }

        let public_key = match VerifyingKey::from_key_data(key_type, &key_record.key_data) {
            Ok(public_key) => public_key,
            Err(e) => {
                task.status = VerifyStatus::Failed(VerificationError::VerificationFailure(e));
                task.key_record = Some(key_record);
                continue;
            }
        };

        // RFC 8301 key size requirement, as configured
        if let Some(n) = public_key.key_size() {
            if n < config.min_key_bits {
                trace!("public key size {n} below configured minimum");
                task.status =
                    VerifyStatus::Failed(VerificationError::Policy(PolicyError::KeyTooSmall));
                task.key_record = Some(key_record);
                continue;
            }
        }

        let name = task
            .name
            .as_ref()
            .expect("header name of in-progress verification task not available");
        let value = task
            .value
            .as_ref()
            .expect("header value of in-progress verification task not available");

        match verify::perform_verification(headers, &public_key, sig, name, value) {
            Ok(()) => {
                task.status = VerifyStatus::Successful;
                task.key_record = Some(key_record);
                break;
            }
            Err(e) => {
                task.status = VerifyStatus::Failed(e);
                task.key_record = Some(key_record);
            }
        }
    }
}

fn iter_records(
    cached_records: &mut [MaybeRecord],
) -> impl Iterator<Item = &Result<Arc<DkimKeyRecord>, DkimKeyRecordParseError>> {
    cached_records.iter_mut().map(|rec| {
        if let MaybeRecord::Unparsed(txt) = rec {
            let r = match txt {
                Ok(txt) => DkimKeyRecord::from_str(txt).map(Arc::new),
                Err(e) => {
                    trace!("unusable TXT record: {e}");
                    Err(DkimKeyRecordParseError::RecordSyntax)
                }
            };
            *rec = MaybeRecord::Parsed(r);
        }
        match rec {
            MaybeRecord::Parsed(r) => &*r,
            _ => unreachable!(),
        }
    })
}

fn validate_key_record(
    key_type: KeyType,
    hash_alg: HashAlgorithm,
    rec: &DkimKeyRecord,
    domain: &DomainName,
    user_id: Option<&Identity>,
) -> Result<(), VerificationError> {
    if rec.key_type != key_type {
        trace!("wrong public key type");
        return Err(VerificationError::WrongKeyType);
    }
    if !rec.hash_algorithms.contains(&hash_alg) {
        trace!("disallowed hash algorithm");
        return Err(VerificationError::DisallowedHashAlgorithm);
    }
    if !(rec.service_types.contains(&ServiceType::Any)
        || rec.service_types.contains(&ServiceType::Email))
    {
        trace!("disallowed service type");
        return Err(VerificationError::DisallowedServiceType);
    }
    if rec.flags.contains(&Flags::NoSubdomains) {
        // parsing has validated that the i= domain is equal to or a subdomain
        // of d=; here compare the A-label (case-normalised) forms for equality
        if let Some(user_id) = user_id {
            if domain.to_ascii() != user_id.domain_part.to_ascii() {
                trace!("domain mismatch");
                return Err(VerificationError::DomainMismatch);
            }
        }
    }

    Ok(())
}
