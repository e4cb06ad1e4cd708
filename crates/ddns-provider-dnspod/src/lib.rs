// # DNSPod DNS Update Handler
//
// Keeps one A/AAAA record on DNSPod (Tencent Cloud API 3.0, version
// 2021-03-23) in sync.
//
// ## Behavior
//
// - `get` resolves the numeric domain id (`DescribeDomainList`, exact name
//   match) and the record id (`DescribeRecordList`, exact subdomain and type
//   match), walking every page; both are cached
// - `ResourceNotFound.NoDataOfRecord` is an empty listing, not an error
// - `InvalidParameter.RecordIdInvalid` on read drops the cached record id
// - `create` needs the domain id from a previous `get`
// - Writes use TTL 600 on the configured line id and carry the ddns remark
//
// Every call is a JSON POST to `https://dnspod.tencentcloudapi.com/` signed
// with TC3-HMAC-SHA256. API errors arrive with HTTP 200 inside
// `Response.Error`.

mod signing;

use async_trait::async_trait;
use ddns_core::config::{DnsPodConfig, RecordSpec, Secret};
use ddns_core::pagination::{DEFAULT_PAGE_SIZE, Page, PageWalker};
use ddns_core::timeout::{REST_CALL_TIMEOUT, bounded};
use ddns_core::traits::{DnsUpdateHandler, RECORD_COMMENT};
use ddns_core::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DNSPOD_ENDPOINT: &str = "https://dnspod.tencentcloudapi.com";
const DNSPOD_VERSION: &str = "2021-03-23";

/// TTL for records written by this handler
pub const DNSPOD_TTL: u32 = 600;

const PROVIDER: &str = "dnspod";

const NO_DATA_OF_RECORD: &str = "ResourceNotFound.NoDataOfRecord";
const RECORD_ID_INVALID: &str = "InvalidParameter.RecordIdInvalid";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope {
    response: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    code: String,
    #[serde(default)]
    message: String,
}

impl ApiError {
    fn into_error(self, action: &str) -> Error {
        if self.code.starts_with("AuthFailure") {
            Error::auth(format!("{}: {} ({})", action, self.message, self.code))
        } else if self.code.starts_with("RequestLimitExceeded") {
            Error::rate_limited(format!("{}: {}", action, self.message))
        } else {
            Error::provider(
                PROVIDER,
                format!("{} failed: {} ({})", action, self.message, self.code),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainListResponse {
    #[serde(default)]
    domain_list: Vec<DomainItem>,
    domain_count_info: Option<DomainCountInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainCountInfo {
    domain_total: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainItem {
    name: String,
    domain_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordListResponse {
    #[serde(default)]
    record_list: Vec<RecordItem>,
    record_count_info: Option<RecordCountInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordCountInfo {
    subdomain_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordItem {
    name: String,
    record_id: u64,
    #[serde(rename = "Type")]
    record_type: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordInfoResponse {
    record_info: RecordInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordInfo {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordIdResponse {
    record_id: u64,
}

/// DNSPod handler for one record
pub struct DnsPodHandler {
    client: reqwest::Client,
    endpoint: String,
    secret_id: String,
    secret_key: Secret,
    region: Option<String>,
    domain: String,
    subdomain: String,
    record_type: &'static str,
    line_id: String,
    domain_id: Option<u64>,
    record_id: Option<u64>,
    walker: PageWalker,
}

impl std::fmt::Debug for DnsPodHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsPodHandler")
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"<REDACTED>")
            .field("domain", &self.domain)
            .field("subdomain", &self.subdomain)
            .field("type", &self.record_type)
            .field("domain_id", &self.domain_id)
            .field("record_id", &self.record_id)
            .finish()
    }
}

impl DnsPodHandler {
    /// Create a handler for `spec`
    pub fn new(spec: &RecordSpec, config: &DnsPodConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REST_CALL_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: DNSPOD_ENDPOINT.to_string(),
            secret_id: config.secret_id.clone(),
            secret_key: config.secret_key.clone(),
            region: config.region.clone(),
            domain: spec.domain.clone(),
            subdomain: spec.subdomain.clone(),
            record_type: spec.record_type(),
            line_id: config.line_id.clone(),
            domain_id: None,
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

    /// Invoke one action
    ///
    /// # Returns
    ///
    /// - `Ok(Ok(T))`: The decoded `Response` object
    /// - `Ok(Err(ApiError))`: `Response.Error` was set
    /// - `Err(Error)`: Transport, timeout or decoding failure
    async fn call<T: DeserializeOwned>(
        &self,
        ctx: &CancellationToken,
        action: &str,
        payload: Value,
    ) -> Result<std::result::Result<T, ApiError>> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| Error::config(format!("invalid endpoint {}: {}", self.endpoint, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::config(format!("endpoint {} has no host", self.endpoint)))?;

        let body = payload.to_string();
        let headers = signing::sign_request(&signing::RequestParts {
            host,
            action,
            version: DNSPOD_VERSION,
            region: self.region.as_deref(),
            payload: &body,
            secret_id: &self.secret_id,
            secret_key: self.secret_key.expose(),
            timestamp: chrono::Utc::now().timestamp(),
        })?;

        let mut request = self.client.post(format!("{}/", self.endpoint)).body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        bounded(ctx, REST_CALL_TIMEOUT, action, async move {
            let response = request
                .send()
                .await
                .map_err(|e| Error::http(format!("{}: {}", action, e)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(Error::from_status(PROVIDER, status.as_u16(), &body));
            }

            let envelope: Envelope = response.json().await.map_err(|e| {
                Error::provider(PROVIDER, format!("{}: failed to parse response: {}", action, e))
            })?;

            if let Some(error) = envelope.response.get("Error") {
                let api_error: ApiError = serde_json::from_value(error.clone())?;
                return Ok(Err(api_error));
            }

            let decoded = serde_json::from_value(envelope.response).map_err(|e| {
                Error::provider(PROVIDER, format!("{}: unexpected response: {}", action, e))
            })?;
            Ok(Ok(decoded))
        })
        .await
    }

    async fn domains_page(&self, ctx: &CancellationToken, index: u32) -> Result<Page<DomainItem>> {
        let action = "DescribeDomainList";
        let limit = self.walker.page_size();
        let payload = json!({
            "Keyword": self.domain,
            "Offset": index * limit,
            "Limit": limit,
        });

        let response: DomainListResponse = self
            .call(ctx, action, payload)
            .await?
            .map_err(|e| e.into_error(action))?;

        let total = response.domain_count_info.and_then(|c| c.domain_total);
        Ok(Page::new(response.domain_list, total))
    }

    async fn records_page(
        &self,
        ctx: &CancellationToken,
        domain_id: u64,
        index: u32,
    ) -> Result<Page<RecordItem>> {
        let action = "DescribeRecordList";
        let limit = self.walker.page_size();
        let payload = json!({
            "Domain": self.domain,
            "DomainId": domain_id,
            "Subdomain": self.subdomain,
            "RecordType": self.record_type,
            "RecordLineId": self.line_id,
            "Offset": index * limit,
            "Limit": limit,
        });

        match self.call::<RecordListResponse>(ctx, action, payload).await? {
            Ok(response) => {
                let total = response.record_count_info.and_then(|c| c.subdomain_count);
                Ok(Page::new(response.record_list, total))
            }
            Err(e) if e.code == NO_DATA_OF_RECORD => Ok(Page::new(Vec::new(), Some(0))),
            Err(e) => Err(e.into_error(action)),
        }
    }

    async fn resolve_domain_id(&mut self, ctx: &CancellationToken) -> Result<u64> {
        if let Some(domain_id) = self.domain_id {
            return Ok(domain_id);
        }

        tracing::debug!("Looking up DNSPod domain ID for {}", self.domain);
        let found = {
            let this = &*self;
            this.walker
                .find(
                    ctx,
                    move |i| this.domains_page(ctx, i),
                    move |d| d.name == this.domain,
                )
                .await?
        };

        let domain = found.ok_or_else(|| {
            Error::not_found(format!("domain {} does not exist in the account", self.domain))
        })?;

        tracing::debug!("Found DNSPod domain ID: {}", domain.domain_id);
        self.domain_id = Some(domain.domain_id);
        Ok(domain.domain_id)
    }
}

#[async_trait]
impl DnsUpdateHandler for DnsPodHandler {
    async fn get(&mut self, ctx: &CancellationToken) -> Result<String> {
        let domain_id = self.resolve_domain_id(ctx).await?;

        if let Some(record_id) = self.record_id {
            let action = "DescribeRecord";
            let payload = json!({
                "Domain": self.domain,
                "DomainId": domain_id,
                "RecordId": record_id,
            });

            return match self.call::<RecordInfoResponse>(ctx, action, payload).await? {
                Ok(response) => Ok(response.record_info.value),
                Err(e) if e.code == RECORD_ID_INVALID || e.code == NO_DATA_OF_RECORD => {
                    tracing::debug!("DNSPod record {} vanished, forgetting its ID", record_id);
                    self.record_id = None;
                    Ok(String::new())
                }
                Err(e) => Err(e.into_error(action)),
            };
        }

        tracing::debug!(
            "Searching DNSPod records: {}.{} ({})",
            self.subdomain,
            self.domain,
            self.record_type
        );
        let found = {
            let this = &*self;
            this.walker
                .find(
                    ctx,
                    move |i| this.records_page(ctx, domain_id, i),
                    move |r| r.name == this.subdomain && r.record_type == this.record_type,
                )
                .await?
        };

        match found {
            Some(record) => {
                tracing::debug!("Found DNSPod record ID: {}", record.record_id);
                self.record_id = Some(record.record_id);
                Ok(record.value)
            }
            None => Ok(String::new()),
        }
    }

    async fn create(&mut self, ctx: &CancellationToken, address: &str) -> Result<()> {
        let domain_id = self
            .domain_id
            .ok_or_else(|| Error::missing_identifier("dnspod domain ID is unknown"))?;

        tracing::info!(
            "Creating DNSPod record: {}.{} -> {}",
            self.subdomain,
            self.domain,
            address
        );
        let action = "CreateRecord";
        let payload = json!({
            "Domain": self.domain,
            "DomainId": domain_id,
            "SubDomain": self.subdomain,
            "RecordType": self.record_type,
            "RecordLine": "",
            "RecordLineId": self.line_id,
            "Value": address,
            "TTL": DNSPOD_TTL,
            "Remark": RECORD_COMMENT,
        });

        let created: RecordIdResponse = self
            .call(ctx, action, payload)
            .await?
            .map_err(|e| e.into_error(action))?;

        tracing::debug!("Created DNSPod record ID: {}", created.record_id);
        self.record_id = Some(created.record_id);
        Ok(())
    }

    async fn update(&mut self, ctx: &CancellationToken, new_address: &str) -> Result<()> {
        let domain_id = self
            .domain_id
            .ok_or_else(|| Error::missing_identifier("dnspod domain ID is unknown"))?;
        let record_id = self
            .record_id
            .ok_or_else(|| Error::missing_identifier("dnspod record ID is unknown"))?;

        tracing::info!(
            "Updating DNSPod record {}: {}.{} -> {}",
            record_id,
            self.subdomain,
            self.domain,
            new_address
        );
        let action = "ModifyRecord";
        let payload = json!({
            "Domain": self.domain,
            "DomainId": domain_id,
            "RecordId": record_id,
            "SubDomain": self.subdomain,
            "RecordType": self.record_type,
            "RecordLine": "",
            "RecordLineId": self.line_id,
            "Value": new_address,
            "TTL": DNSPOD_TTL,
            "Remark": RECORD_COMMENT,
        });

        let _: RecordIdResponse = self
            .call(ctx, action, payload)
            .await?
            .map_err(|e| e.into_error(action))?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}
