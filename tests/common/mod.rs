use std::{io, iter};
use tokio::fs;
use viamail::{
    crypto::SigningKey,
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    signer::{SignRequest, Signer, SigningError, SigningResult},
    verifier::{Config, LookupTxt, VerificationResult, Verifier},
};

pub async fn read_public_key_file_base64(file_name: &str) -> io::Result<String> {
    let s = fs::read_to_string(file_name).await?;
    Ok(s.lines().filter(|line| !line.starts_with("-----")).collect())
}

pub async fn read_signing_key_from_file(file_name: &str) -> io::Result<SigningKey> {
    let s = fs::read_to_string(file_name).await?;
    Ok(SigningKey::from_pem(&s).unwrap())
}

/// Returns a resolver that answers queries for exactly one name with a key
/// record for the given public key file.
pub async fn make_resolver(
    query_name: &'static str,
    key_type: &str,
    public_key_file: &str,
) -> io::Result<impl Fn(&str) -> io::Result<Vec<u8>>> {
    let base64 = read_public_key_file_base64(public_key_file).await?;
    let record = format!("v=DKIM1; k={key_type}; p={base64}");

    Ok(move |name: &str| -> io::Result<Vec<u8>> {
        if name == query_name {
            Ok(record.clone().into_bytes())
        } else {
            Err(io::ErrorKind::NotFound.into())
        }
    })
}

pub fn sign<I>(
    headers: HeaderFields,
    body: &[u8],
    requests: I,
) -> Vec<Result<SigningResult, SigningError>>
where
    I: IntoIterator<Item = SignRequest<SigningKey>>,
{
    let mut signer = Signer::prepare_signing(headers, requests).unwrap();

    let _ = signer.process_body_chunk(body);

    signer.sign()
}

pub fn verify<T>(
    resolver: &T,
    headers: &HeaderFields,
    body: &[u8],
    config: &Config,
) -> Vec<VerificationResult>
where
    T: LookupTxt + ?Sized,
{
    let mut verifier = Verifier::verify_header(resolver, headers, config).unwrap();

    let _ = verifier.process_body_chunk(body);

    verifier.finish()
}

pub fn to_header_field(result: &SigningResult) -> HeaderField {
    (
        FieldName::new(result.header_name.as_str()).unwrap(),
        FieldBody::new(result.header_value.as_bytes()).unwrap(),
    )
}

pub fn prepend_header_field<I>(first: HeaderField, rest: I) -> HeaderFields
where
    I: IntoIterator<Item = HeaderField>,
{
    let headers: Vec<_> = iter::once(first).chain(rest).collect();
    HeaderFields::new(headers).unwrap()
}
