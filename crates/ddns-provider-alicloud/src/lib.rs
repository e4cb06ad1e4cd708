// # Alibaba Cloud DNS Update Handler
//
// Keeps one A/AAAA record in Alibaba Cloud DNS (Alidns, API 2015-01-09) in sync.
//
// ## Behavior
//
// - No zone id is needed; records are addressed by domain name and RR
// - `get` walks `DescribeDomainRecords` until RR, domain and type match,
//   caches the record id, then reads through `DescribeDomainRecordInfo`
// - `InvalidRR.NoExist` on read means the record is gone: the cached id is
//   dropped and the record reads as absent
// - Writes use TTL 600 on the configured resolve line
//
// ## API Reference
//
// - RPC-style endpoint `https://alidns.aliyuncs.com/`, action in `x-acs-action`
// - Requests are signed with ACS3-HMAC-SHA256

mod signing;

use async_trait::async_trait;
use ddns_core::config::{AliCloudConfig, RecordSpec, Secret};
use ddns_core::pagination::{DEFAULT_PAGE_SIZE, Page, PageWalker};
use ddns_core::timeout::{REST_CALL_TIMEOUT, bounded};
use ddns_core::traits::DnsUpdateHandler;
use ddns_core::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default Alidns endpoint
const ALIDNS_ENDPOINT: &str = "https://alidns.aliyuncs.com";

/// Alidns API version
const ALIDNS_VERSION: &str = "2015-01-09";

/// TTL for records written by this handler
pub const ALICLOUD_TTL: u32 = 600;

const PROVIDER: &str = "alicloud";

/// Error codes meaning the cached record no longer exists
const RECORD_GONE_CODES: &[&str] = &["InvalidRR.NoExist", "DomainRecordNotBelongToUser"];

/// Vendor error body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(skip)]
    status: u16,
}

impl ApiError {
    fn into_error(self, action: &str) -> Error {
        match (self.status, self.code.as_str()) {
            (401 | 403, _) | (_, "InvalidAccessKeyId.NotFound" | "SignatureDoesNotMatch") => {
                Error::auth(format!("{}: {} ({})", action, self.message, self.code))
            }
            (429, _) | (_, "Throttling" | "Throttling.User") => {
                Error::rate_limited(format!("{}: {}", action, self.message))
            }
            _ => Error::provider(
                PROVIDER,
                format!("{} failed: {} ({})", action, self.message, self.code),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeDomainRecordsResponse {
    total_count: Option<u64>,
    domain_records: DomainRecords,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainRecords {
    #[serde(default)]
    record: Vec<DomainRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainRecord {
    #[serde(rename = "RR")]
    rr: String,
    domain_name: String,
    record_id: String,
    #[serde(rename = "Type")]
    record_type: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordInfoResponse {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordIdResponse {
    record_id: String,
}

/// Alibaba Cloud DNS handler for one record
pub struct AliCloudHandler {
    client: reqwest::Client,
    endpoint: String,
    access_key_id: String,
    access_key_secret: Secret,
    domain: String,
    subdomain: String,
    record_type: &'static str,
    line: String,
    record_id: Option<String>,
    walker: PageWalker,
}

impl std::fmt::Debug for AliCloudHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliCloudHandler")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<REDACTED>")
            .field("domain", &self.domain)
            .field("subdomain", &self.subdomain)
            .field("type", &self.record_type)
            .field("record_id", &self.record_id)
            .finish()
    }
}

impl AliCloudHandler {
    /// Create a handler for `spec`
    pub fn new(spec: &RecordSpec, config: &AliCloudConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REST_CALL_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        let endpoint = match config.region_id.as_deref() {
            Some(region) if !region.is_empty() => format!("https://alidns.{}.aliyuncs.com", region),
            _ => ALIDNS_ENDPOINT.to_string(),
        };

        Ok(Self {
            client,
            endpoint,
            access_key_id: config.access_key_id.clone(),
            access_key_secret: config.access_key_secret.clone(),
            domain: spec.domain.clone(),
            subdomain: spec.subdomain.clone(),
            record_type: spec.record_type(),
            line: config.line.clone(),
            record_id: None,
            walker: PageWalker::new(DEFAULT_PAGE_SIZE),
        })
    }

    /// Point the handler at another endpoint (used by tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the delay between page requests
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.walker = self.walker.with_delay(delay);
        self
    }

    /// Invoke one RPC action
    ///
    /// # Returns
    ///
    /// - `Ok(Ok(T))`: The decoded response
    /// - `Ok(Err(ApiError))`: The API rejected the call
    /// - `Err(Error)`: Transport, timeout or decoding failure
    async fn call<T: DeserializeOwned>(
        &self,
        ctx: &CancellationToken,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<std::result::Result<T, ApiError>> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| Error::config(format!("invalid endpoint {}: {}", self.endpoint, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(Error::config(format!("endpoint {} has no host", self.endpoint))),
        };

        let query = signing::canonical_query(params);
        let signed = signing::sign_request(&signing::RequestParts {
            method: "POST",
            host: &host,
            query: &query,
            action,
            version: ALIDNS_VERSION,
            access_key_id: &self.access_key_id,
            access_key_secret: self.access_key_secret.expose(),
            date: &signing::timestamp(),
            nonce: &uuid::Uuid::new_v4().to_string(),
        })?;

        let mut request = self
            .client
            .post(format!("{}/?{}", self.endpoint, query));
        for (name, value) in signed {
            request = request.header(name, value);
        }

        bounded(ctx, REST_CALL_TIMEOUT, action, async move {
            let response = request
                .send()
                .await
                .map_err(|e| Error::http(format!("{}: {}", action, e)))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| Error::http(format!("{}: failed to read response: {}", action, e)))?;

            if !status.is_success() {
                return match serde_json::from_str::<ApiError>(&body) {
                    Ok(mut api_error) if !api_error.code.is_empty() => {
                        api_error.status = status.as_u16();
                        Ok(Err(api_error))
                    }
                    _ => Err(Error::from_status(PROVIDER, status.as_u16(), &body)),
                };
            }

            let decoded = serde_json::from_str(&body).map_err(|e| {
                Error::provider(PROVIDER, format!("{}: failed to parse response: {}", action, e))
            })?;
            Ok(Ok(decoded))
        })
        .await
    }

    async fn records_page(&self, ctx: &CancellationToken, index: u32) -> Result<Page<DomainRecord>> {
        let action = "DescribeDomainRecords";
        let params = [
            ("DomainName", self.domain.clone()),
            ("RRKeyWord", self.subdomain.clone()),
            ("Type", self.record_type.to_string()),
            ("Line", self.line.clone()),
            ("PageNumber", (index + 1).to_string()),
            ("PageSize", self.walker.page_size().to_string()),
        ];

        let response: DescribeDomainRecordsResponse = self
            .call(ctx, action, &params)
            .await?
            .map_err(|e| e.into_error(action))?;

        Ok(Page::new(response.domain_records.record, response.total_count))
    }

    fn matches(&self, record: &DomainRecord) -> bool {
        record.rr == self.subdomain
            && record.domain_name == self.domain
            && record.record_type == self.record_type
    }
}

#[async_trait]
impl DnsUpdateHandler for AliCloudHandler {
    async fn get(&mut self, ctx: &CancellationToken) -> Result<String> {
        if let Some(record_id) = self.record_id.clone() {
            tracing::debug!("Reading Alidns record {}", record_id);
            let action = "DescribeDomainRecordInfo";

            return match self
                .call::<RecordInfoResponse>(ctx, action, &[("RecordId", record_id.clone())])
                .await?
            {
                Ok(info) => Ok(info.value),
                Err(e) if RECORD_GONE_CODES.contains(&e.code.as_str()) => {
                    tracing::debug!("Alidns record {} vanished, forgetting its ID", record_id);
                    self.record_id = None;
                    Ok(String::new())
                }
                Err(e) => Err(e.into_error(action)),
            };
        }

        tracing::debug!(
            "Searching Alidns records: {}.{} ({})",
            self.subdomain,
            self.domain,
            self.record_type
        );
        let found = {
            let this = &*self;
            this.walker
                .find(
                    ctx,
                    move |i| this.records_page(ctx, i),
                    move |r| this.matches(r),
                )
                .await?
        };

        match found {
            Some(record) => {
                tracing::debug!("Found Alidns record ID: {}", record.record_id);
                self.record_id = Some(record.record_id);
                Ok(record.value)
            }
            None => Ok(String::new()),
        }
    }

    async fn create(&mut self, ctx: &CancellationToken, address: &str) -> Result<()> {
        tracing::info!(
            "Creating Alidns record: {}.{} -> {}",
            self.subdomain,
            self.domain,
            address
        );
        let action = "AddDomainRecord";
        let params = [
            ("DomainName", self.domain.clone()),
            ("RR", self.subdomain.clone()),
            ("Type", self.record_type.to_string()),
            ("Value", address.to_string()),
            ("Line", self.line.clone()),
            ("TTL", ALICLOUD_TTL.to_string()),
        ];

        let created: RecordIdResponse = self
            .call(ctx, action, &params)
            .await?
            .map_err(|e| e.into_error(action))?;

        tracing::debug!("Created Alidns record ID: {}", created.record_id);
        self.record_id = Some(created.record_id);
        Ok(())
    }

    async fn update(&mut self, ctx: &CancellationToken, new_address: &str) -> Result<()> {
        let record_id = self
            .record_id
            .clone()
            .ok_or_else(|| Error::missing_identifier("alidns record ID is unknown"))?;

        tracing::info!(
            "Updating Alidns record {}: {}.{} -> {}",
            record_id,
            self.subdomain,
            self.domain,
            new_address
        );
        let action = "UpdateDomainRecord";
        let params = [
            ("RecordId", record_id),
            ("RR", self.subdomain.clone()),
            ("Type", self.record_type.to_string()),
            ("Value", new_address.to_string()),
            ("Line", self.line.clone()),
            ("TTL", ALICLOUD_TTL.to_string()),
        ];

        let _: RecordIdResponse = self
            .call(ctx, action, &params)
            .await?
            .map_err(|e| e.into_error(action))?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddns_core::config::{DetectionConfig, DetectionMethod, InterfaceDetection, ProviderConfig};
    use ddns_core::{AddressFamily, LocalAddressPolicy};
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> AliCloudConfig {
        AliCloudConfig {
            access_key_id: "LTAI-test".to_string(),
            access_key_secret: Secret::new("very-secret"),
            region_id: None,
            line: "default".to_string(),
        }
    }

    fn spec() -> RecordSpec {
        RecordSpec {
            name: "home".to_string(),
            domain: "example.com".to_string(),
            subdomain: "home".to_string(),
            family: AddressFamily::V4,
            cron: "*/5 * * * *".to_string(),
            detection: DetectionConfig {
                policy: LocalAddressPolicy::Ignore,
                method: DetectionMethod::Interface(InterfaceDetection {
                    name: "eth0".to_string(),
                }),
            },
            provider: ProviderConfig::AliCloud(config()),
        }
    }

    fn handler(server: &MockServer) -> AliCloudHandler {
        AliCloudHandler::new(&spec(), &config())
            .unwrap()
            .with_endpoint(server.uri())
            .with_page_delay(Duration::from_millis(1))
    }

    fn record(rr: &str, id: &str, value: &str) -> serde_json::Value {
        json!({
            "RR": rr,
            "DomainName": "example.com",
            "RecordId": id,
            "Type": "A",
            "Value": value,
            "Line": "default",
            "TTL": 600
        })
    }

    #[tokio::test]
    async fn get_matches_exact_rr_and_caches_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-acs-action", "DescribeDomainRecords"))
            .and(header("x-acs-version", ALIDNS_VERSION))
            .and(header_exists("authorization"))
            .and(query_param("RRKeyWord", "home"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "TotalCount": 2,
                "DomainRecords": {"Record": [
                    record("home2", "r-2", "198.51.100.2"),
                    record("home", "r-1", "198.51.100.1")
                ]}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-acs-action", "DescribeDomainRecordInfo"))
            .and(query_param("RecordId", "r-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "RecordId": "r-1",
                "Value": "198.51.100.1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut handler = handler(&server);
        let ctx = CancellationToken::new();

        assert_eq!(handler.get(&ctx).await.unwrap(), "198.51.100.1");
        assert_eq!(handler.get(&ctx).await.unwrap(), "198.51.100.1");
    }

    #[tokio::test]
    async fn absent_record_then_create() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-acs-action", "DescribeDomainRecords"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "TotalCount": 0,
                "DomainRecords": {"Record": []}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-acs-action", "AddDomainRecord"))
            .and(query_param("RR", "home"))
            .and(query_param("Value", "198.51.100.7"))
            .and(query_param("TTL", "600"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "RecordId": "r-new"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut handler = handler(&server);
        let ctx = CancellationToken::new();

        assert_eq!(handler.get(&ctx).await.unwrap(), "");
        handler.create(&ctx, "198.51.100.7").await.unwrap();
        assert_eq!(handler.record_id.as_deref(), Some("r-new"));
    }

    #[tokio::test]
    async fn vanished_record_reads_as_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-acs-action", "DescribeDomainRecordInfo"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "Code": "InvalidRR.NoExist",
                "Message": "The DNS record does not exist.",
                "RequestId": "req-1"
            })))
            .mount(&server)
            .await;

        let mut handler = handler(&server);
        handler.record_id = Some("r-gone".to_string());

        assert_eq!(handler.get(&CancellationToken::new()).await.unwrap(), "");
        assert!(handler.record_id.is_none());
    }

    #[tokio::test]
    async fn update_requires_and_uses_record_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-acs-action", "UpdateDomainRecord"))
            .and(query_param("RecordId", "r-1"))
            .and(query_param("Value", "198.51.100.9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "RecordId": "r-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut handler = handler(&server);
        let ctx = CancellationToken::new();

        let err = handler.update(&ctx, "198.51.100.9").await.unwrap_err();
        assert!(matches!(err, Error::MissingIdentifier(_)));

        handler.record_id = Some("r-1".to_string());
        handler.update(&ctx, "198.51.100.9").await.unwrap();
    }

    #[tokio::test]
    async fn vendor_errors_are_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "Code": "SignatureDoesNotMatch",
                "Message": "Specified signature is not matched with our calculation."
            })))
            .mount(&server)
            .await;

        let mut handler = handler(&server);
        let err = handler.get(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn secret_not_exposed_in_debug() {
        let handler = AliCloudHandler::new(&spec(), &config()).unwrap();
        let debug_str = format!("{:?}", handler);

        assert!(!debug_str.contains("very-secret"));
        assert!(debug_str.contains("AliCloudHandler"));
    }
}
