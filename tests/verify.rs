pub mod common;

use std::{
    io::{self, ErrorKind},
    str::FromStr,
    time::{Duration, UNIX_EPOCH},
};
use viamail::{
    crypto::VerificationError,
    header::{FieldName, HeaderFields},
    signature::{DomainName, Selector, SignatureAlgorithm},
    signer::{BodyLength, SignRequest, Timestamp},
    verifier::{self, Config, DkimAuthResult, PolicyError, VerificationStatus, VerifierError},
};

#[tokio::test]
async fn basic_verify() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = common::make_resolver(
        "sel._domainkey.example.com.",
        "rsa",
        "tests/keys/rsa2048.pub.pem",
    )
    .await
    .unwrap();

    let body = make_body();

    let headers = sign_headers("tests/keys/rsa2048.pem", SignatureAlgorithm::RsaSha256, &body, |_| {}).await;

    let sigs = common::verify(&resolver, &headers, &body, &Default::default());

    let result = sigs.into_iter().next().unwrap();

    assert_eq!(result.status, VerificationStatus::Success);
    assert_eq!(result.status.to_dkim_auth_result(), DkimAuthResult::Pass);
    assert_eq!(result.key_size, Some(2048));
    assert!(!result.testing);
}

#[tokio::test]
async fn limited_body_length() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = common::make_resolver(
        "sel._domainkey.example.com.",
        "ed25519",
        "tests/keys/ed25519.pub.pem",
    )
    .await
    .unwrap();

    let mut body = make_body();

    let headers = sign_headers(
        "tests/keys/ed25519.pem",
        SignatureAlgorithm::Ed25519Sha256,
        &body,
        |req| req.body_length = BodyLength::OnlyMessageLength,
    )
    .await;

    body.extend(b"\r\n-- trailing content, ignored --\r\n");

    let sigs = common::verify(&resolver, &headers, &body, &Default::default());

    assert_eq!(sigs[0].status, VerificationStatus::Success);

    let config = Config {
        forbid_partially_signed_body: true,
        ..Default::default()
    };

    let sigs = common::verify(&resolver, &headers, &body, &config);

    assert_eq!(
        sigs[0].status,
        VerificationStatus::Failure(VerifierError::Policy(PolicyError::ForbidPartiallySignedBody))
    );
}

#[tokio::test]
async fn modified_body_fails() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = common::make_resolver(
        "sel._domainkey.example.com.",
        "ed25519",
        "tests/keys/ed25519.pub.pem",
    )
    .await
    .unwrap();

    let body = make_body();

    let headers =
        sign_headers("tests/keys/ed25519.pem", SignatureAlgorithm::Ed25519Sha256, &body, |_| {}).await;

    let sigs = common::verify(&resolver, &headers, b"Hallo?\r\n", &Default::default());

    assert_eq!(sigs[0].status, VerificationStatus::Failure(VerifierError::BodyHashMismatch));
    assert_eq!(sigs[0].status.to_dkim_auth_result(), DkimAuthResult::Fail);
}

#[tokio::test]
async fn modified_header_fails() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = common::make_resolver(
        "sel._domainkey.example.com.",
        "rsa",
        "tests/keys/rsa2048.pub.pem",
    )
    .await
    .unwrap();

    let body = make_body();

    let headers = sign_headers("tests/keys/rsa2048.pem", SignatureAlgorithm::RsaSha256, &body, |_| {}).await;

    let mut fields: Vec<_> = headers.into();
    let (_, to) = fields.iter_mut().find(|(name, _)| *name == "To").unwrap();
    *to = viamail::header::FieldBody::new(*b" mallory@example.com").unwrap();
    let headers = HeaderFields::new(fields).unwrap();

    let sigs = common::verify(&resolver, &headers, &body, &Default::default());

    assert_eq!(
        sigs[0].status,
        VerificationStatus::Failure(VerifierError::VerificationFailure(
            VerificationError::VerificationFailure
        ))
    );
}

#[tokio::test]
async fn expired_signature() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = common::make_resolver(
        "sel._domainkey.example.com.",
        "ed25519",
        "tests/keys/ed25519.pub.pem",
    )
    .await
    .unwrap();

    let body = make_body();

    let headers = sign_headers(
        "tests/keys/ed25519.pem",
        SignatureAlgorithm::Ed25519Sha256,
        &body,
        |req| {
            req.timestamp = Some(Timestamp::Exact(1686737001));
            req.valid_duration = Some(Duration::from_secs(3600));
        },
    )
    .await;

    let sigs = common::verify(&resolver, &headers, &body, &Default::default());

    assert_eq!(
        sigs[0].status,
        VerificationStatus::Failure(VerifierError::Policy(PolicyError::SignatureExpired))
    );
    assert_eq!(sigs[0].status.to_dkim_auth_result(), DkimAuthResult::Policy);

    let config = Config {
        fixed_system_time: Some(UNIX_EPOCH + Duration::from_secs(1686737001 + 60)),
        ..Default::default()
    };

    let sigs = common::verify(&resolver, &headers, &body, &config);

    assert_eq!(sigs[0].status, VerificationStatus::Success);
}

#[tokio::test]
async fn required_headers_not_signed() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = common::make_resolver(
        "sel._domainkey.example.com.",
        "ed25519",
        "tests/keys/ed25519.pub.pem",
    )
    .await
    .unwrap();

    let body = make_body();

    let headers =
        sign_headers("tests/keys/ed25519.pem", SignatureAlgorithm::Ed25519Sha256, &body, |_| {}).await;

    let config = Config {
        required_signed_headers: vec![FieldName::new("Content-Type").unwrap()],
        ..Default::default()
    };

    let sigs = common::verify(&resolver, &headers, &body, &config);

    assert_eq!(
        sigs[0].status,
        VerificationStatus::Failure(VerifierError::Policy(PolicyError::RequiredHeadersNotSigned))
    );
}

#[tokio::test]
async fn key_lookup_failures() {
    let _ = tracing_subscriber::fmt::try_init();

    let body = make_body();

    let headers =
        sign_headers("tests/keys/ed25519.pem", SignatureAlgorithm::Ed25519Sha256, &body, |_| {}).await;

    let not_found = |_: &str| -> io::Result<Vec<u8>> { Err(ErrorKind::NotFound.into()) };
    let sigs = common::verify(&not_found, &headers, &body, &Default::default());
    assert_eq!(sigs[0].status, VerificationStatus::Failure(VerifierError::NoKeyFound));
    assert_eq!(sigs[0].status.to_dkim_auth_result(), DkimAuthResult::Permerror);

    let unreachable = |_: &str| -> io::Result<Vec<u8>> { Err(ErrorKind::TimedOut.into()) };
    let sigs = common::verify(&unreachable, &headers, &body, &Default::default());
    assert_eq!(sigs[0].status, VerificationStatus::Failure(VerifierError::KeyLookup));
    assert_eq!(sigs[0].status.to_dkim_auth_result(), DkimAuthResult::Temperror);

    let revoked = |_: &str| -> io::Result<Vec<u8>> { Ok(b"v=DKIM1; k=ed25519; p=".to_vec()) };
    let sigs = common::verify(&revoked, &headers, &body, &Default::default());
    assert_eq!(sigs[0].status, VerificationStatus::Failure(VerifierError::KeyRevoked));

    let wrong_type = common::make_resolver(
        "sel._domainkey.example.com.",
        "rsa",
        "tests/keys/rsa2048.pub.pem",
    )
    .await
    .unwrap();
    let sigs = common::verify(&wrong_type, &headers, &body, &Default::default());
    assert_eq!(sigs[0].status, VerificationStatus::Failure(VerifierError::WrongKeyType));
}

#[tokio::test]
async fn small_key_rejected_by_policy() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = common::make_resolver(
        "sel._domainkey.example.com.",
        "rsa",
        "tests/keys/rsa1024.pub.pem",
    )
    .await
    .unwrap();

    let body = make_body();

    let headers = sign_headers("tests/keys/rsa1024.pem", SignatureAlgorithm::RsaSha256, &body, |_| {}).await;

    let config = Config {
        min_key_bits: 2048,
        ..Default::default()
    };

    let sigs = common::verify(&resolver, &headers, &body, &config);

    assert_eq!(
        sigs[0].status,
        VerificationStatus::Failure(VerifierError::Policy(PolicyError::KeyTooSmall))
    );
}

#[tokio::test]
async fn verify_complete_message() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = common::make_resolver(
        "sel._domainkey.example.com.",
        "rsa",
        "tests/keys/rsa2048.pub.pem",
    )
    .await
    .unwrap();

    let body = make_body();

    let headers = sign_headers("tests/keys/rsa2048.pem", SignatureAlgorithm::RsaSha256, &body, |_| {}).await;

    let mut message = vec![];
    for (name, value) in headers.iter() {
        message.extend(name.as_ref().as_bytes());
        message.push(b':');
        message.extend(value.as_ref());
        message.extend(b"\r\n");
    }
    message.extend(b"\r\n");
    message.extend(&body);

    assert_eq!(verifier::verify_message(&message, &resolver), Ok(true));

    let unsigned = b"From: me@example.com\r\nTo: you@example.org\r\n\r\nHi!\r\n";
    assert_eq!(verifier::verify_message(unsigned, &resolver), Ok(false));

    let (i, _) = message.iter().enumerate().rev().find(|(_, b)| **b == b'!').unwrap();
    message[i] = b'?';
    assert_eq!(verifier::verify_message(&message, &resolver), Ok(false));
}

async fn sign_headers(
    key_file: &str,
    algorithm: SignatureAlgorithm,
    body: &[u8],
    configure: impl FnOnce(&mut SignRequest<viamail::SigningKey>),
) -> HeaderFields {
    let signing_key = common::read_signing_key_from_file(key_file).await.unwrap();
    let mut request = SignRequest::new(
        DomainName::new("example.com").unwrap(),
        Selector::new("sel").unwrap(),
        algorithm,
        signing_key,
    );
    configure(&mut request);

    let sigs = common::sign(make_header_fields(), body, [request]);

    let sig = sigs.into_iter().next().unwrap().unwrap();

    common::prepend_header_field(common::to_header_field(&sig), make_header_fields())
}

fn make_header_fields() -> HeaderFields {
    HeaderFields::from_str(
        "Message-ID: <1511928109048645963@gluet.ch>
Date: Fri, 9 Jun 2023 16:13:12 +0200
MIME-Version: 1.0
Content-Type: text/plain; charset=utf-8
Content-Transfer-Encoding: 8bit
From: me <me@gluet.ch>
To: you@example.com
Subject: Grüezi",
    )
    .unwrap()
}

fn make_body() -> Vec<u8> {
    "Hallo!

Here is some trailing whitespace: \x20
  <- and some leading whitespace

Das wars!
"
    .replace('\n', "\r\n")
    .into_bytes()
}
