//! TC3-HMAC-SHA256 request signing for Tencent Cloud API 3.0

use ddns_core::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "TC3-HMAC-SHA256";
const SERVICE: &str = "dnspod";
pub const CONTENT_TYPE: &str = "application/json; charset=utf-8";

pub struct RequestParts<'a> {
    pub host: &'a str,
    pub action: &'a str,
    pub version: &'a str,
    pub region: Option<&'a str>,
    /// JSON body, signed as-is
    pub payload: &'a str,
    pub secret_id: &'a str,
    pub secret_key: &'a str,
    /// Unix seconds
    pub timestamp: i64,
}

/// Headers to attach to the POST, `Authorization` included
pub fn sign_request(parts: &RequestParts<'_>) -> Result<Vec<(&'static str, String)>> {
    let date = chrono::DateTime::from_timestamp(parts.timestamp, 0)
        .ok_or_else(|| Error::config(format!("invalid signing timestamp {}", parts.timestamp)))?
        .format("%Y-%m-%d")
        .to_string();

    let action = parts.action.to_lowercase();
    let canonical_headers = format!(
        "content-type:{}\nhost:{}\nx-tc-action:{}\n",
        CONTENT_TYPE, parts.host, action
    );
    let signed_headers = "content-type;host;x-tc-action";
    let payload_hash = hex::encode(Sha256::digest(parts.payload.as_bytes()));

    let canonical_request = format!(
        "POST\n/\n\n{}\n{}\n{}",
        canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/tc3_request", date, SERVICE);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        parts.timestamp,
        credential_scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let secret_date = hmac_sha256(format!("TC3{}", parts.secret_key).as_bytes(), &date)?;
    let secret_service = hmac_sha256(&secret_date, SERVICE)?;
    let secret_signing = hmac_sha256(&secret_service, "tc3_request")?;
    let signature = hex::encode(hmac_sha256(&secret_signing, &string_to_sign)?);

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, parts.secret_id, credential_scope, signed_headers, signature
    );

    let mut headers = vec![
        ("content-type", CONTENT_TYPE.to_string()),
        ("x-tc-action", parts.action.to_string()),
        ("x-tc-version", parts.version.to_string()),
        ("x-tc-timestamp", parts.timestamp.to_string()),
        ("authorization", authorization),
    ];
    if let Some(region) = parts.region.filter(|r| !r.is_empty()) {
        headers.push(("x-tc-region", region.to_string()));
    }
    Ok(headers)
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

    fn parts(payload: &str) -> RequestParts<'_> {
        RequestParts {
            host: "dnspod.tencentcloudapi.com",
            action: "DescribeRecordList",
            version: "2021-03-23",
            region: None,
            payload,
            secret_id: "AKID-test",
            secret_key: "secret",
            timestamp: 1_704_067_200,
        }
    }

    #[test]
    fn credential_scope_uses_utc_date() {
        let headers = sign_request(&parts("{}")).unwrap();
        let authorization = &headers.iter().find(|(k, _)| *k == "authorization").unwrap().1;

        assert!(authorization.starts_with(
            "TC3-HMAC-SHA256 Credential=AKID-test/2024-01-01/dnspod/tc3_request, SignedHeaders=content-type;host;x-tc-action, Signature="
        ));
    }

    #[test]
    fn payload_changes_signature() {
        let a = sign_request(&parts("{\"Limit\":1}")).unwrap();
        let b = sign_request(&parts("{\"Limit\":2}")).unwrap();

        assert_ne!(a, b);
        assert_eq!(a, sign_request(&parts("{\"Limit\":1}")).unwrap());
    }

    #[test]
    fn region_header_only_when_set() {
        let without = sign_request(&parts("{}")).unwrap();
        let mut with_region = parts("{}");
        with_region.region = Some("ap-guangzhou");
        let with = sign_request(&with_region).unwrap();

        assert!(!without.iter().any(|(k, _)| *k == "x-tc-region"));
        assert!(with.iter().any(|(k, v)| *k == "x-tc-region" && v == "ap-guangzhou"));
    }
}
