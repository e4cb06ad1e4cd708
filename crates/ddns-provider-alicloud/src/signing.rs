//! ACS3-HMAC-SHA256 request signing for Alibaba Cloud RPC APIs

use ddns_core::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "ACS3-HMAC-SHA256";

/// Hex SHA-256 of an empty body
const EMPTY_PAYLOAD_HASH: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Everything that goes into one signature
pub struct RequestParts<'a> {
    pub method: &'a str,
    pub host: &'a str,
    /// Already canonical query string, see [`canonical_query`]
    pub query: &'a str,
    pub action: &'a str,
    pub version: &'a str,
    pub access_key_id: &'a str,
    pub access_key_secret: &'a str,
    pub date: &'a str,
    pub nonce: &'a str,
}

/// Current time in the `x-acs-date` format
pub fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Percent-encode and sort parameters into a canonical query string
pub fn canonical_query(params: &[(&str, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    encoded.sort();

    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Headers to attach to the request, `Authorization` included
pub fn sign_request(parts: &RequestParts<'_>) -> Result<Vec<(&'static str, String)>> {
    let mut headers: Vec<(&'static str, String)> = vec![
        ("host", parts.host.to_string()),
        ("x-acs-action", parts.action.to_string()),
        ("x-acs-content-sha256", EMPTY_PAYLOAD_HASH.to_string()),
        ("x-acs-date", parts.date.to_string()),
        ("x-acs-signature-nonce", parts.nonce.to_string()),
        ("x-acs-version", parts.version.to_string()),
    ];
    headers.sort_by(|a, b| a.0.cmp(b.0));

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();
    let signed_headers = headers.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(";");

    let canonical_request = format!(
        "{}\n/\n{}\n{}\n{}\n{}",
        parts.method, parts.query, canonical_headers, signed_headers, EMPTY_PAYLOAD_HASH
    );
    let string_to_sign = format!(
        "{}\n{}",
        ALGORITHM,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );
    let signature = hex::encode(hmac_sha256(
        parts.access_key_secret.as_bytes(),
        &string_to_sign,
    )?);

    let authorization = format!(
        "{} Credential={},SignedHeaders={},Signature={}",
        ALGORITHM, parts.access_key_id, signed_headers, signature
    );

    headers.retain(|(k, _)| *k != "host");
    headers.push(("authorization", authorization));
    Ok(headers)
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::config(format!("invalid signing key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}
