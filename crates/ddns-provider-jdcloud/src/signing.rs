//! JDCLOUD2-HMAC-SHA256 request signing for JD Cloud OpenAPI

use ddns_core::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "JDCLOUD2-HMAC-SHA256";
const SERVICE: &str = "domainservice";
const TERMINATOR: &str = "jdcloud2_request";
pub const CONTENT_TYPE: &str = "application/json";

pub struct RequestParts<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    /// Already canonical query string, see [`canonical_query`]
    pub query: &'a str,
    pub payload: &'a str,
    pub region: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    /// `YYYYMMDDTHHMMSSZ`
    pub date: &'a str,
    pub nonce: &'a str,
}

pub fn timestamp() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn nonce() -> String {
    uuid::Uuid::new_v4().to_string()
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
    let day = parts
        .date
        .get(..8)
        .ok_or_else(|| Error::config(format!("invalid signing date {}", parts.date)))?;

    let canonical_headers = format!(
        "content-type:{}\nhost:{}\nx-jdcloud-date:{}\nx-jdcloud-nonce:{}\n",
        CONTENT_TYPE, parts.host, parts.date, parts.nonce
    );
    let signed_headers = "content-type;host;x-jdcloud-date;x-jdcloud-nonce";
    let payload_hash = hex::encode(Sha256::digest(parts.payload.as_bytes()));

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        parts.method, parts.path, parts.query, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/{}/{}", day, parts.region, SERVICE, TERMINATOR);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        parts.date,
        credential_scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac_sha256(format!("JDCLOUD2{}", parts.secret_key).as_bytes(), day)?;
    let k_region = hmac_sha256(&k_date, parts.region)?;
    let k_service = hmac_sha256(&k_region, SERVICE)?;
    let k_signing = hmac_sha256(&k_service, TERMINATOR)?;
    let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign)?);

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, parts.access_key, credential_scope, signed_headers, signature
    );

    Ok(vec![
        ("content-type", CONTENT_TYPE.to_string()),
        ("x-jdcloud-date", parts.date.to_string()),
        ("x-jdcloud-nonce", parts.nonce.to_string()),
        ("authorization", authorization),
    ])
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::config(format!("invalid signing key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}
