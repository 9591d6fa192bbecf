//! AWS Signature Version 4 請求簽章。
//!
//! 參考：<https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_sigv-create-signed-request.html>

use chrono::{DateTime, Utc};
use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    pkey::{PKey, Private},
    sha::sha256,
    sign::Signer,
};

const AWS_SIGN_V4_DATETIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const AWS_SIGN_V4_DATE_FORMAT: &str = "%Y%m%d";
const AWS_SIGN_V4_ALGORITHM: &str = "AWS4-HMAC-SHA256";
const AWS_SIGN_V4_REQUEST_POSTFIX: &str = "aws4_request";

/// 簽章所需的金鑰與範圍。
#[derive(Debug, Clone, Copy)]
pub(crate) struct SigningScope<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
}

/// 待簽章的請求；只簽 `host` 與 `x-amz-date` 兩個標頭。
#[derive(Debug)]
pub(crate) struct UnsignedRequest<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub query: &'a [(&'a str, &'a str)],
    pub payload: &'a [u8],
}

/// 簽章結果，呼叫端需把兩者都加入請求標頭。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
}

pub(crate) fn aws_sign_v4(
    request: &UnsignedRequest<'_>,
    scope: &SigningScope<'_>,
    now: DateTime<Utc>,
) -> Result<SignedHeaders, ErrorStack> {
    let date = now.format(AWS_SIGN_V4_DATE_FORMAT).to_string();
    let datetime = now.format(AWS_SIGN_V4_DATETIME_FORMAT).to_string();

    let signed_headers = "host;x-amz-date";
    let canonical_headers = format!("host:{}\nx-amz-date:{}\n", request.host, datetime);
    let payload_digest = hex::encode(sha256(request.payload));

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        canonical_uri(request.path),
        canonical_query(request.query),
        canonical_headers,
        signed_headers,
        payload_digest,
    );

    let credential_scope = format!(
        "{date}/{}/{}/{AWS_SIGN_V4_REQUEST_POSTFIX}",
        scope.region, scope.service,
    );
    let canonical_request_hash = hex::encode(sha256(canonical_request.as_bytes()));
    let string_to_sign = format!(
        "{AWS_SIGN_V4_ALGORITHM}\n{datetime}\n{credential_scope}\n{canonical_request_hash}"
    );

    let date_tag = hmac_sha256(format!("AWS4{}", scope.secret_key).as_bytes(), date.as_bytes())?;
    let region_tag = hmac_sha256(&date_tag, scope.region.as_bytes())?;
    let service_tag = hmac_sha256(&region_tag, scope.service.as_bytes())?;
    let signing_tag = hmac_sha256(&service_tag, AWS_SIGN_V4_REQUEST_POSTFIX.as_bytes())?;
    let signature = hex::encode(hmac_sha256(&signing_tag, string_to_sign.as_bytes())?);

    Ok(SignedHeaders {
        authorization: format!(
            "{AWS_SIGN_V4_ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            scope.access_key,
        ),
        amz_date: datetime,
    })
}

fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn canonical_query(query: &[(&str, &str)]) -> String {
    let mut pairs = query
        .iter()
        .map(|(key, value)| format!("{}={}", uri_encode(key), uri_encode(value)))
        .collect::<Vec<_>>();
    pairs.sort();
    pairs.join("&")
}

/// AWS 要求的 URI 編碼：僅保留 unreserved 字元，其他位元組一律 `%XX`（大寫）。
pub(crate) fn uri_encode(input: &str) -> String {
    let mut accumulator = String::with_capacity(2 * input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                accumulator.push(byte as char)
            }
            _ => accumulator.push_str(&format!("%{byte:02X}")),
        }
    }
    accumulator
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ErrorStack> {
    let key: PKey<Private> = PKey::hmac(key)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &key)?;
    signer.update(data)?;
    signer.sign_to_vec()
}
