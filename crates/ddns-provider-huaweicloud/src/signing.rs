//! SDK-HMAC-SHA256 (AK/SK) request signing for Huawei Cloud APIs

use ddns_core::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "SDK-HMAC-SHA256";
pub const CONTENT_TYPE: &str = "application/json";

pub struct RequestParts<'a> {
    pub method: &'a str,
    pub host: &'a str,
    /// Request path, e.g. `/v2/zones`
    pub path: &'a str,
    /// Already canonical query string, see [`canonical_query`]
    pub query: &'a str,
    pub payload: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    /// `X-Sdk-Date` value, `YYYYMMDDTHHMMSSZ`
    pub date: &'a str,
}

pub fn timestamp() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
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

/// Encoded path segments, always ending in `/`
fn canonical_uri(path: &str) -> String {
    let mut uri: String = path
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    if !uri.ends_with('/') {
        uri.push('/');
    }
    uri
}

/// Headers to attach to the request, `Authorization` included
pub fn sign_request(parts: &RequestParts<'_>) -> Result<Vec<(&'static str, String)>> {
    let signed_headers = "content-type;host;x-sdk-date";
    let canonical_headers = format!(
        "content-type:{}\nhost:{}\nx-sdk-date:{}\n",
        CONTENT_TYPE, parts.host, parts.date
    );

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        parts.method,
        canonical_uri(parts.path),
        parts.query,
        canonical_headers,
        signed_headers,
        hex::encode(Sha256::digest(parts.payload.as_bytes()))
    );
    let string_to_sign = format!(
        "{}\n{}\n{}",
        ALGORITHM,
        parts.date,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );
    let signature = hex::encode(hmac_sha256(parts.secret_key.as_bytes(), &string_to_sign)?);

    Ok(vec![
        ("content-type", CONTENT_TYPE.to_string()),
        ("x-sdk-date", parts.date.to_string()),
        (
            "authorization",
            format!(
                "{} Access={}, SignedHeaders={}, Signature={}",
                ALGORITHM, parts.access_key, signed_headers, signature
            ),
        ),
    ])
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::config(format!("invalid signing key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_gets_trailing_slash() {
        assert_eq!(canonical_uri("/v2/zones"), "/v2/zones/");
        assert_eq!(canonical_uri("/v2/zones/"), "/v2/zones/");
        assert_eq!(canonical_uri("/v2/zones/a b"), "/v2/zones/a%20b/");
    }

    #[test]
    fn authorization_format() {
        let headers = sign_request(&RequestParts {
            method: "GET",
            host: "dns.cn-north-4.myhuaweicloud.com",
            path: "/v2/zones",
            query: "name=example.com.&type=public",
            payload: "",
            access_key: "AK-test",
            secret_key: "SK-test",
            date: "20240101T000000Z",
        })
        .unwrap();

        let authorization = &headers.iter().find(|(k, _)| *k == "authorization").unwrap().1;
        assert!(authorization.starts_with(
            "SDK-HMAC-SHA256 Access=AK-test, SignedHeaders=content-type;host;x-sdk-date, Signature="
        ));
        assert_eq!(authorization.rsplit('=').next().unwrap().len(), 64);
    }
}
