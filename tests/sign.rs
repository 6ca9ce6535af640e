pub mod common;

use std::str::FromStr;
use viamail::{
    header::{FieldBody, FieldName, HeaderFields},
    signature::{CanonicalizationAlgorithm, DomainName, Selector, SignatureAlgorithm},
    signer::{HeaderSelection, SignRequest, SigningError, Timestamp},
    verifier::VerificationStatus,
};

#[tokio::test]
async fn basic_sign() {
    use CanonicalizationAlgorithm::*;

    let _ = tracing_subscriber::fmt::try_init();

    let headers = make_header_fields();
    let body = make_body();

    let signing_key = common::read_signing_key_from_file("tests/keys/rsa2048.pem").await.unwrap();
    let mut request = SignRequest::new(
        DomainName::new("example.com").unwrap(),
        Selector::new("sel").unwrap(),
        SignatureAlgorithm::RsaSha256,
        signing_key,
    );

    request.canonicalization = (Relaxed, Relaxed).into();
    request.timestamp = Some(Timestamp::Exact(1686737001));
    request.valid_duration = None;
    request.format.header_name = "DKiM-Signature".into();
    request.format.line_width = 64;
    request.format.indentation = "  ".into();
    request.format.tag_order = Some(Box::new(|a: &str, b: &str| a.cmp(b)));

    let sigs = common::sign(headers, &body, [request]);

    assert_eq!(sigs.len(), 1);

    let sig = sigs.into_iter().next().unwrap().unwrap();

    assert_eq!(sig.header_name, "DKiM-Signature");
    assert!(sig.header_value.starts_with(" a=rsa-sha256; b="));
    assert!(sig.header_value.ends_with(" v=1"));
    assert!(sig.header_value.contains(" t=1686737001;"));
    assert!(sig.header_value.contains("\r\n  "));
    assert!(sig.format_header().lines().all(|line| line.len() <= 64));

    // bottom-up, headers outside the default set are left out
    assert_eq!(
        sig.signature
            .signed_headers
            .iter()
            .map(|name| name.as_ref())
            .collect::<Vec<_>>(),
        ["Subject", "To", "From", "In-Reply-To", "References", "Date", "Message-ID"]
    );
    assert_eq!(sig.signature.timestamp, Some(1686737001));
    assert_eq!(sig.signature.canonicalization.header, Relaxed);
    assert_eq!(sig.signature.canonicalization.body, Relaxed);
    assert_eq!(sig.signature.domain.as_ref(), "example.com");
}

#[tokio::test]
async fn sign_and_verify_all_algorithms() {
    use CanonicalizationAlgorithm::*;

    let _ = tracing_subscriber::fmt::try_init();

    let cases = [
        ("rsa", "tests/keys/rsa2048", SignatureAlgorithm::RsaSha256),
        ("rsa", "tests/keys/rsa1024", SignatureAlgorithm::RsaSha256),
        ("ed25519", "tests/keys/ed25519", SignatureAlgorithm::Ed25519Sha256),
    ];

    for (key_type, key_file, algorithm) in cases {
        let resolver = common::make_resolver(
            "sel._domainkey.example.com.",
            key_type,
            &format!("{key_file}.pub.pem"),
        )
        .await
        .unwrap();

        for canonicalization in [(Simple, Simple), (Simple, Relaxed), (Relaxed, Simple), (Relaxed, Relaxed)] {
            let body = make_body();

            let signing_key = common::read_signing_key_from_file(&format!("{key_file}.pem"))
                .await
                .unwrap();
            let mut request = SignRequest::new(
                DomainName::new("example.com").unwrap(),
                Selector::new("sel").unwrap(),
                algorithm,
                signing_key,
            );
            request.canonicalization = canonicalization.into();

            let sigs = common::sign(make_header_fields(), &body, [request]);
            let sig = sigs.into_iter().next().unwrap().unwrap();

            let headers =
                common::prepend_header_field(common::to_header_field(&sig), make_header_fields());

            let results = common::verify(&resolver, &headers, &body, &Default::default());

            assert_eq!(results.len(), 1);
            assert_eq!(
                results[0].status,
                VerificationStatus::Success,
                "{key_file} with {canonicalization:?}"
            );
        }
    }
}

#[tokio::test]
async fn sign_picked_headers_bottom_up() {
    let _ = tracing_subscriber::fmt::try_init();

    let headers = HeaderFields::from_str(
        "Received: from a\nFrom: me@example.com\nTo: you@example.org\nReceived: from b",
    )
    .unwrap();

    let signing_key = common::read_signing_key_from_file("tests/keys/ed25519.pem").await.unwrap();
    let mut request = SignRequest::new(
        DomainName::new("example.com").unwrap(),
        Selector::new("sel").unwrap(),
        SignatureAlgorithm::Ed25519Sha256,
        signing_key,
    );
    request.header_selection = HeaderSelection::Pick(vec![
        FieldName::new("From").unwrap(),
        FieldName::new("Received").unwrap(),
    ]);

    let sigs = common::sign(headers, b"", [request]);
    let sig = sigs.into_iter().next().unwrap().unwrap();

    assert_eq!(
        sig.signature
            .signed_headers
            .iter()
            .map(|name| name.as_ref())
            .collect::<Vec<_>>(),
        ["Received", "From", "Received"]
    );
}

#[tokio::test]
async fn sign_rejects_invalid_requests() {
    let _ = tracing_subscriber::fmt::try_init();

    let ed25519_key = common::read_signing_key_from_file("tests/keys/ed25519.pem").await.unwrap();
    let rsa_key = common::read_signing_key_from_file("tests/keys/rsa2048.pem").await.unwrap();

    let mismatched = SignRequest::new(
        DomainName::new("example.com").unwrap(),
        Selector::new("sel").unwrap(),
        SignatureAlgorithm::RsaSha256,
        ed25519_key,
    );

    let mut no_from = SignRequest::new(
        DomainName::new("example.com").unwrap(),
        Selector::new("sel").unwrap(),
        SignatureAlgorithm::RsaSha256,
        rsa_key,
    );
    no_from.header_selection = HeaderSelection::Pick(vec![FieldName::new("To").unwrap()]);

    let sigs = common::sign(make_header_fields(), &make_body(), [mismatched, no_from]);

    assert_eq!(sigs.len(), 2);
    assert_eq!(sigs[0].as_ref().unwrap_err(), &SigningError::KeyTypeMismatch);
    assert_eq!(sigs[1].as_ref().unwrap_err(), &SigningError::FromHeaderNotSigned);
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

Here is some trailing whitespace: \x20
  <- and some leading whitespace
Include some Unicode emojis 🕊 💜
all just to exercise the c14n algorithm a bit.

Das wars!

Tschüss,
"
    .replace('\n', "\r\n")
    .into_bytes()
}
