pub mod common;

use common::{MockLookup, TestSigningKey};
use dkimcheck::{
    crypto::{self, HashAlgorithm},
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    signature::CanonicalizationAlgorithm,
    verifier::{Config, Verdict, VerificationError, VerificationStatus, Verifier},
};
use std::{io::ErrorKind, str, str::FromStr};

#[tokio::test]
async fn basic_verify() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = MockLookup::new(|name| {
        Box::pin(async move {
            match name {
                "sel._domainkey.example.com." => {
                    let base64 = common::public_key_base64(common::RSA_PUBLIC_KEY_PEM);
                    Ok(vec![Ok(format!("v=DKIM1; k=rsa; p={base64}").into())])
                }
                _ => Err(ErrorKind::NotFound.into()),
            }
        })
    });

    let headers = make_header_fields();
    let body = make_body();

    let headers = common::prepend_header_field(
        make_signature_header(&TestSigningKey::rsa(), &headers, &body),
        make_header_fields(),
    );

    let config = Default::default();

    let sigs = common::verify(&resolver, &headers, &body, &config).await;

    let result = sigs.into_iter().next().unwrap();

    assert_eq!(result.status, VerificationStatus::Success);
    assert_eq!(result.verdict(), Verdict::Valid);
    assert_eq!(result.index, 0);
    assert!(!result.is_testing());

    let sig = result.signature.unwrap();
    assert_eq!(sig.domain.as_ref(), "example.com");
    assert_eq!(sig.selector.as_ref(), "sel");
}

#[tokio::test]
async fn ed25519_verify() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = MockLookup::new(|name| {
        Box::pin(async move {
            match name {
                "sel._domainkey.example.com." => {
                    let base64 = common::ed25519_public_key_base64();
                    Ok(vec![Ok(format!("v=DKIM1; k=ed25519; p={base64}").into())])
                }
                _ => Err(ErrorKind::NotFound.into()),
            }
        })
    });

    let headers = make_header_fields();
    let body = make_body();

    let bh = common::body_hash_base64(
        HashAlgorithm::Sha256,
        CanonicalizationAlgorithm::Relaxed,
        &body,
    );
    let value = format!(
        " v=1; d=example.com; s=sel; a=ed25519-sha256; c=relaxed/relaxed;\r\n\
         \th=From:To:Subject; bh={bh}; b="
    );

    let sig_header = common::sign_dkim_header(
        &TestSigningKey::ed25519(),
        HashAlgorithm::Sha256,
        CanonicalizationAlgorithm::Relaxed,
        &headers,
        &signed_header_names(),
        &value,
    );

    let headers = common::prepend_header_field(sig_header, make_header_fields());

    let config = Default::default();

    let sigs = common::verify(&resolver, &headers, &body, &config).await;

    let result = sigs.into_iter().next().unwrap();

    assert_eq!(result.status, VerificationStatus::Success);
    assert_eq!(result.verdict(), Verdict::Valid);
}

#[tokio::test]
async fn modified_body() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = make_example_com_resolver();

    let headers = make_header_fields();
    let body = make_body();

    let headers = common::prepend_header_field(
        make_signature_header(&TestSigningKey::rsa(), &headers, &body),
        make_header_fields(),
    );

    let mut body = body;
    body.extend_from_slice(b"PS: one more thing\r\n");

    let config = Default::default();

    let sigs = common::verify(&resolver, &headers, &body, &config).await;

    let result = sigs.into_iter().next().unwrap();

    assert_eq!(
        result.status,
        VerificationStatus::Failure(VerificationError::BodyHashMismatch)
    );
    assert_eq!(result.verdict(), Verdict::Permfail);
}

#[tokio::test]
async fn modified_body_and_headers() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = make_example_com_resolver();

    let headers = make_header_fields();
    let body = make_body();

    let sig_header = make_signature_header(&TestSigningKey::rsa(), &headers, &body);

    // replace a signed header and extend the body
    let mut headers = vec![sig_header];
    headers.extend(make_header_fields().into_iter().map(|(name, value)| {
        if name.as_ref() == "Subject" {
            (name, FieldBody::new(*b" REPLACED").unwrap())
        } else {
            (name, value)
        }
    }));
    let headers = HeaderFields::new(headers).unwrap();

    let mut body = body;
    body.extend_from_slice(b"PS: one more thing\r\n");

    let config = Default::default();

    let sigs = common::verify(&resolver, &headers, &body, &config).await;

    let result = sigs.into_iter().next().unwrap();

    // the body hash failure takes precedence over the signature failure
    assert_eq!(
        result.status,
        VerificationStatus::Failure(VerificationError::BodyHashMismatch)
    );
    assert_eq!(result.verdict(), Verdict::Permfail);
}

#[tokio::test]
async fn modified_body_no_key() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = make_example_com_resolver();

    let headers = make_header_fields();
    let body = make_body();

    // a signature whose selector has no key record
    let bh = common::body_hash_base64(
        HashAlgorithm::Sha256,
        CanonicalizationAlgorithm::Relaxed,
        &body,
    );
    let value = format!(
        " v=1; d=example.com; s=sel2; a=rsa-sha256; c=relaxed/relaxed;\r\n\
         \th=From:To:Subject; bh={bh}; b="
    );

    let sig_header = common::sign_dkim_header(
        &TestSigningKey::rsa(),
        HashAlgorithm::Sha256,
        CanonicalizationAlgorithm::Relaxed,
        &headers,
        &signed_header_names(),
        &value,
    );

    let headers = common::prepend_header_field(sig_header, make_header_fields());

    let mut body = body;
    body.extend_from_slice(b"PS: one more thing\r\n");

    let config = Default::default();

    let sigs = common::verify(&resolver, &headers, &body, &config).await;

    let result = sigs.into_iter().next().unwrap();

    // the body hash failure takes precedence over the missing key
    assert_eq!(
        result.status,
        VerificationStatus::Failure(VerificationError::BodyHashMismatch)
    );

    // with the body intact, the missing key is reported
    let body = make_body();

    let sigs = common::verify(&resolver, &headers, &body, &config).await;

    let result = sigs.into_iter().next().unwrap();

    assert_eq!(
        result.status,
        VerificationStatus::Failure(VerificationError::NoKeyFound)
    );
    assert_eq!(result.verdict(), Verdict::Permfail);
}

#[tokio::test]
async fn modified_headers() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = make_example_com_resolver();

    let headers = make_header_fields();
    let body = make_body();

    let sig_header = make_signature_header(&TestSigningKey::rsa(), &headers, &body);

    // replace the signed Subject header before verifying
    let mut headers = vec![sig_header];
    headers.extend(make_header_fields().into_iter().map(|(name, value)| {
        if name.as_ref() == "Subject" {
            (name, FieldBody::new(*b" REPLACED").unwrap())
        } else {
            (name, value)
        }
    }));
    let headers = HeaderFields::new(headers).unwrap();

    let config = Default::default();

    let sigs = common::verify(&resolver, &headers, &body, &config).await;

    let result = sigs.into_iter().next().unwrap();

    assert_eq!(
        result.status,
        VerificationStatus::Failure(VerificationError::VerificationFailure(
            crypto::VerificationError::VerificationFailure
        ))
    );
    assert_eq!(result.verdict(), Verdict::Permfail);
}

#[tokio::test]
async fn corrupted_signature_data() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = make_example_com_resolver();

    let headers = make_header_fields();
    let body = make_body();

    let (sig_name, sig_value) = make_signature_header(&TestSigningKey::rsa(), &headers, &body);

    // flip one character of the base64 signature data in the b= tag
    let mut value = sig_value.as_ref().to_vec();
    let i = value.len() - 4;
    value[i] = if value[i] == b'Q' { b'R' } else { b'Q' };
    let sig_header = (sig_name, FieldBody::new(&value[..]).unwrap());

    let headers = common::prepend_header_field(sig_header, make_header_fields());

    let config = Default::default();

    let sigs = common::verify(&resolver, &headers, &body, &config).await;

    let result = sigs.into_iter().next().unwrap();

    assert_eq!(
        result.status,
        VerificationStatus::Failure(VerificationError::VerificationFailure(
            crypto::VerificationError::VerificationFailure
        ))
    );
    assert_eq!(result.verdict(), Verdict::Permfail);
}

#[tokio::test]
async fn limited_body_length() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = make_example_com_resolver();

    let headers = make_header_fields();
    let mut body = make_body();

    let cbody = common::canonicalize_body(CanonicalizationAlgorithm::Relaxed, &body);
    let bh = dkimcheck::encode_base64(crypto::digest(HashAlgorithm::Sha256, &cbody));
    let value = format!(
        " v=1; d=example.com; s=sel; a=rsa-sha256; c=relaxed/relaxed;\r\n\
         \th=From:To:Subject; l={}; bh={bh}; b=",
        cbody.len()
    );

    let sig_header = common::sign_dkim_header(
        &TestSigningKey::rsa(),
        HashAlgorithm::Sha256,
        CanonicalizationAlgorithm::Relaxed,
        &headers,
        &signed_header_names(),
        &value,
    );

    let headers = common::prepend_header_field(sig_header, make_header_fields());

    body.extend_from_slice(b"\r\n-- trailing content, ignored --\r\n");

    let config = Default::default();

    let sigs = common::verify(&resolver, &headers, &body, &config).await;

    let result = sigs.into_iter().next().unwrap();

    assert_eq!(result.status, VerificationStatus::Success);

    // the same message fails when content not covered by the signature is
    // not acceptable
    let config = Config {
        forbid_unsigned_content: true,
        ..Default::default()
    };

    let sigs = common::verify(&resolver, &headers, &body, &config).await;

    let result = sigs.into_iter().next().unwrap();

    assert_eq!(result.verdict(), Verdict::Invalid);
}

#[tokio::test]
async fn insufficient_body_length() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = make_example_com_resolver();

    let headers = make_header_fields();
    let body = make_body();

    let cbody = common::canonicalize_body(CanonicalizationAlgorithm::Relaxed, &body);
    let bh = dkimcheck::encode_base64(crypto::digest(HashAlgorithm::Sha256, &cbody));

    // the l= tag claims more content than the message carries
    let value = format!(
        " v=1; d=example.com; s=sel; a=rsa-sha256; c=relaxed/relaxed;\r\n\
         \th=From:To:Subject; l={}; bh={bh}; b=",
        cbody.len() + 10
    );

    let sig_header = common::sign_dkim_header(
        &TestSigningKey::rsa(),
        HashAlgorithm::Sha256,
        CanonicalizationAlgorithm::Relaxed,
        &headers,
        &signed_header_names(),
        &value,
    );

    let headers = common::prepend_header_field(sig_header, make_header_fields());

    let config = Default::default();

    let sigs = common::verify(&resolver, &headers, &body, &config).await;

    let result = sigs.into_iter().next().unwrap();

    assert_eq!(
        result.status,
        VerificationStatus::Failure(VerificationError::InsufficientBodyLength)
    );
    assert_eq!(result.verdict(), Verdict::Permfail);
}

#[tokio::test]
async fn multiple_signatures() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = MockLookup::new(|name| {
        Box::pin(async move {
            match name {
                "sel._domainkey.example.com." => {
                    let base64 = common::public_key_base64(common::RSA_PUBLIC_KEY_PEM);
                    Ok(vec![Ok(format!("v=DKIM1; k=rsa; p={base64}").into())])
                }
                "sel._domainkey.example.net." => Err(ErrorKind::Other.into()),
                _ => Err(ErrorKind::NotFound.into()),
            }
        })
    });

    let headers = make_header_fields();
    let body = make_body();

    let key = TestSigningKey::rsa();

    let mut all_headers = vec![];
    for domain in ["example.com", "example.org", "example.net"] {
        let bh = common::body_hash_base64(
            HashAlgorithm::Sha256,
            CanonicalizationAlgorithm::Relaxed,
            &body,
        );
        let value = format!(
            " v=1; d={domain}; s=sel; a=rsa-sha256; c=relaxed/relaxed;\r\n\
             \th=From:To:Subject; bh={bh}; b="
        );
        all_headers.push(common::sign_dkim_header(
            &key,
            HashAlgorithm::Sha256,
            CanonicalizationAlgorithm::Relaxed,
            &headers,
            &signed_header_names(),
            &value,
        ));
    }
    all_headers.extend(make_header_fields());
    let headers = HeaderFields::new(all_headers).unwrap();

    let config = Default::default();

    let sigs = common::verify(&resolver, &headers, &body, &config).await;

    assert_eq!(sigs.len(), 3);

    // results are in header order, and each signature is judged on its own
    assert_eq!(sigs[0].index, 0);
    assert_eq!(sigs[0].status, VerificationStatus::Success);
    assert_eq!(sigs[1].index, 1);
    assert_eq!(
        sigs[1].status,
        VerificationStatus::Failure(VerificationError::NoKeyFound)
    );
    assert_eq!(sigs[1].verdict(), Verdict::Permfail);
    assert_eq!(sigs[2].index, 2);
    assert_eq!(
        sigs[2].status,
        VerificationStatus::Failure(VerificationError::KeyLookup)
    );
    assert_eq!(sigs[2].verdict(), Verdict::Tempfail);
}

#[tokio::test]
async fn testing_flag() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = MockLookup::new(|name| {
        Box::pin(async move {
            match name {
                "sel._domainkey.example.com." => {
                    let base64 = common::public_key_base64(common::RSA_PUBLIC_KEY_PEM);
                    Ok(vec![Ok(format!("v=DKIM1; k=rsa; t=y; p={base64}").into())])
                }
                _ => Err(ErrorKind::NotFound.into()),
            }
        })
    });

    let headers = make_header_fields();
    let body = make_body();

    let headers = common::prepend_header_field(
        make_signature_header(&TestSigningKey::rsa(), &headers, &body),
        make_header_fields(),
    );

    let config = Default::default();

    let sigs = common::verify(&resolver, &headers, &body, &config).await;

    let result = sigs.into_iter().next().unwrap();

    // the testing flag does not alter the outcome, it is only surfaced
    assert_eq!(result.status, VerificationStatus::Success);
    assert!(result.is_testing());
}

#[tokio::test]
async fn one_shot_verify_message() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = make_example_com_resolver();

    let msg = make_plain_message();
    let (header_block, body) = msg.split_once("\r\n\r\n").unwrap();

    let headers: HeaderFields = header_block.parse().unwrap();

    let bh = common::body_hash_base64(
        HashAlgorithm::Sha256,
        CanonicalizationAlgorithm::Relaxed,
        body.as_bytes(),
    );
    let value = format!(
        " v=1; d=example.com; s=sel; a=rsa-sha256; c=relaxed/relaxed;\r\n\
         \th=From:To:Subject; bh={bh}; b="
    );

    let (name, value) = common::sign_dkim_header(
        &TestSigningKey::rsa(),
        HashAlgorithm::Sha256,
        CanonicalizationAlgorithm::Relaxed,
        &headers,
        &signed_header_names(),
        &value,
    );

    let signed_msg = format!(
        "{}:{}\r\n{msg}",
        name.as_ref(),
        str::from_utf8(value.as_ref()).unwrap()
    );

    let config = Default::default();

    let results = Verifier::verify_message(&resolver, signed_msg.as_bytes(), &config)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, VerificationStatus::Success);

    // an unsigned message yields no results
    let results = Verifier::verify_message(&resolver, msg.as_bytes(), &config)
        .await
        .unwrap();

    assert!(results.is_empty());

    // an ill-formed message yields an error
    assert!(Verifier::verify_message(&resolver, b"no header here", &config)
        .await
        .is_err());
}

fn make_example_com_resolver() -> MockLookup {
    MockLookup::new(|name| {
        Box::pin(async move {
            match name {
                "sel._domainkey.example.com." => {
                    let base64 = common::public_key_base64(common::RSA_PUBLIC_KEY_PEM);
                    Ok(vec![Ok(format!("v=DKIM1; k=rsa; p={base64}").into())])
                }
                _ => Err(ErrorKind::NotFound.into()),
            }
        })
    })
}

fn make_signature_header(
    key: &TestSigningKey,
    headers: &HeaderFields,
    body: &[u8],
) -> HeaderField {
    let bh = common::body_hash_base64(
        HashAlgorithm::Sha256,
        CanonicalizationAlgorithm::Relaxed,
        body,
    );
    let value = format!(
        " v=1; d=example.com; s=sel; a=rsa-sha256; c=relaxed/relaxed;\r\n\
         \th=From:To:Subject; bh={bh}; b="
    );

    common::sign_dkim_header(
        key,
        HashAlgorithm::Sha256,
        CanonicalizationAlgorithm::Relaxed,
        headers,
        &signed_header_names(),
        &value,
    )
}

fn signed_header_names() -> Vec<FieldName> {
    vec![
        FieldName::new("From").unwrap(),
        FieldName::new("To").unwrap(),
        FieldName::new("Subject").unwrap(),
    ]
}

fn make_plain_message() -> String {
    "From: me <me@gluet.ch>
To: you@example.com
Subject: dinner plans

Are you hungry yet?
"
    .replace('\n', "\r\n")
}

fn make_header_fields() -> HeaderFields {
    let mut header_fields: Vec<_> = HeaderFields::from_str(
        "Message-ID: <1511928109048645963@gluet.ch>
Date: Fri, 9 Jun 2023 16:13:12 +0200
MIME-Version: 1.0
Content-Type: text/plain; charset=utf-8
Content-Disposition: inline
Content-Transfer-Encoding: 8bit
References: <4344283917108237944@example.com>
 <3993077819152979884@gluet.ch>
 <3209900529850518454@example.com>
In-Reply-To: <3209900529850518454@example.com>
From: me <me@gluet.ch>
To: you@example.com",
    )
    .unwrap()
    .into();

    // include invalid UTF-8 in Subject for fun
    header_fields.push((
        FieldName::new("Subject").unwrap(),
        FieldBody::new(*b" wie gohts dr R\xfcdis\xfcli?").unwrap(),
    ));

    HeaderFields::new(header_fields).unwrap()
}

fn make_body() -> Vec<u8> {
    "Hallo!

Here is some trailing whitespace:
  <- and some leading whitespace
𝔍nclude some Unicode emojis 🕊 💜
all just to exercise the c14n algorithm a bit.

Das wars!

Tschüss,
"
    .replace('\n', "\r\n")
    .bytes()
    .collect()
}
