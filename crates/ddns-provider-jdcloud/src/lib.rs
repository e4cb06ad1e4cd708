// # JD Cloud DNS Update Handler
//
// Keeps one A/AAAA record in JD Cloud DNS (domainservice v2) in sync.
//
// ## Behavior
//
// - `get` resolves the numeric domain id (`describeDomains`, exact name
//   match) and then lists resource records filtered by host record, walking
//   every page (page size 50). There is no single-record read, so every pass
//   lists; a cached record id that is no longer listed is dropped
// - `create` needs the domain id; `update` needs both ids
// - Writes use TTL 120 on the configured view (`-1` is the default view)
//
// Requests go to `https://domainservice.jdcloud-api.com/v2/regions/jdcloud-api`
// and are signed with JDCLOUD2-HMAC-SHA256.

mod signing;

use async_trait::async_trait;
use ddns_core::config::{JdCloudConfig, RecordSpec, Secret};
use ddns_core::pagination::{Page, PageWalker};
use ddns_core::timeout::{REST_CALL_TIMEOUT, bounded};
use ddns_core::traits::DnsUpdateHandler;
use ddns_core::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const JDCLOUD_ENDPOINT: &str = "https://domainservice.jdcloud-api.com";
const JDCLOUD_REGION: &str = "jdcloud-api";

/// TTL for records written by this handler
pub const JDCLOUD_TTL: u32 = 120;

/// Page size for domain and record listings
pub const JDCLOUD_PAGE_SIZE: u32 = 50;

const PROVIDER: &str = "jdcloud";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    result: Value,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl ApiError {
    fn into_error(self, action: &str) -> Error {
        match self.code {
            401 | 403 => Error::auth(format!("{}: {} ({})", action, self.message, self.status)),
            404 => Error::not_found(format!("{}: {}", action, self.message)),
            429 => Error::rate_limited(format!("{}: {}", action, self.message)),
            _ => Error::provider(
                PROVIDER,
                format!(
                    "{} failed: {} (code {}, {})",
                    action, self.message, self.code, self.status
                ),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DomainList {
    #[serde(default)]
    data_list: Vec<DomainItem>,
    total_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DomainItem {
    id: i64,
    domain_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordList {
    #[serde(default)]
    data_list: Vec<RecordItem>,
    total_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordItem {
    id: i64,
    host_record: String,
    #[serde(default)]
    host_value: String,
    #[serde(rename = "type")]
    record_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedRecord {
    data_list: CreatedId,
}

#[derive(Debug, Deserialize)]
struct CreatedId {
    id: i64,
}

/// JD Cloud handler for one record
pub struct JdCloudHandler {
    client: reqwest::Client,
    endpoint: String,
    access_key: String,
    secret_key: Secret,
    domain: String,
    subdomain: String,
    record_type: &'static str,
    view_id: i64,
    domain_id: Option<i64>,
    record_id: Option<i64>,
    walker: PageWalker,
}

impl std::fmt::Debug for JdCloudHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JdCloudHandler")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<REDACTED>")
            .field("domain", &self.domain)
            .field("subdomain", &self.subdomain)
            .field("type", &self.record_type)
            .field("view_id", &self.view_id)
            .field("domain_id", &self.domain_id)
            .field("record_id", &self.record_id)
            .finish()
    }
}

impl JdCloudHandler {
    /// Create a handler for `spec`
    pub fn new(spec: &RecordSpec, config: &JdCloudConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REST_CALL_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: JDCLOUD_ENDPOINT.to_string(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            domain: spec.domain.clone(),
            subdomain: spec.subdomain.clone(),
            record_type: spec.record_type(),
            view_id: config.view_id,
            domain_id: None,
            record_id: None,
            walker: PageWalker::new(JDCLOUD_PAGE_SIZE),
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

    /// Invoke one API
    ///
    /// # Parameters
    ///
    /// - `resource`: Path below `/v2/regions/jdcloud-api`
    ///
    /// # Returns
    ///
    /// - `Ok(Ok(T))`: The decoded `result` object
    /// - `Ok(Err(ApiError))`: The body carried an `error` object
    /// - `Err(Error)`: Transport, timeout or decoding failure
    async fn call<T: DeserializeOwned>(
        &self,
        ctx: &CancellationToken,
        action: &str,
        method: reqwest::Method,
        resource: &str,
        params: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<std::result::Result<T, ApiError>> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| Error::config(format!("invalid endpoint {}: {}", self.endpoint, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(Error::config(format!("endpoint {} has no host", self.endpoint))),
        };

        let path = format!("/v2/regions/{}{}", JDCLOUD_REGION, resource);
        let query = signing::canonical_query(params);
        let payload = body.map(|b| b.to_string()).unwrap_or_default();
        let headers = signing::sign_request(&signing::RequestParts {
            method: method.as_str(),
            host: &host,
            path: &path,
            query: &query,
            payload: &payload,
            region: JDCLOUD_REGION,
            access_key: &self.access_key,
            secret_key: self.secret_key.expose(),
            date: &signing::timestamp(),
            nonce: &signing::nonce(),
        })?;

        let target = if query.is_empty() {
            format!("{}{}", self.endpoint, path)
        } else {
            format!("{}{}?{}", self.endpoint, path, query)
        };
        let mut request = self.client.request(method, target);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if !payload.is_empty() {
            request = request.body(payload);
        }

        bounded(ctx, REST_CALL_TIMEOUT, action, async move {
            let response = request
                .send()
                .await
                .map_err(|e| Error::http(format!("{}: {}", action, e)))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| Error::http(format!("{}: failed to read response: {}", action, e)))?;

            let envelope: Envelope = match serde_json::from_str(&text) {
                Ok(envelope) => envelope,
                Err(_) if !status.is_success() => {
                    return Err(Error::from_status(PROVIDER, status.as_u16(), &text));
                }
                Err(e) => {
                    return Err(Error::provider(
                        PROVIDER,
                        format!("{}: failed to parse response: {}", action, e),
                    ));
                }
            };

            if let Some(error) = envelope.error {
                return Ok(Err(error));
            }
            if !status.is_success() {
                return Err(Error::from_status(PROVIDER, status.as_u16(), &text));
            }

            let decoded = serde_json::from_value(envelope.result).map_err(|e| {
                Error::provider(PROVIDER, format!("{}: unexpected response: {}", action, e))
            })?;
            Ok(Ok(decoded))
        })
        .await
    }

    async fn domains_page(&self, ctx: &CancellationToken, index: u32) -> Result<Page<DomainItem>> {
        let action = "describeDomains";
        let params = [
            ("pageNumber", (index + 1).to_string()),
            ("pageSize", self.walker.page_size().to_string()),
            ("domainName", self.domain.clone()),
        ];

        let list: DomainList = self
            .call(ctx, action, reqwest::Method::GET, "/domain", &params, None)
            .await?
            .map_err(|e| e.into_error(action))?;
        Ok(Page::new(list.data_list, list.total_count))
    }

    async fn records_page(
        &self,
        ctx: &CancellationToken,
        domain_id: i64,
        index: u32,
    ) -> Result<Page<RecordItem>> {
        let action = "describeResourceRecord";
        let params = [
            ("pageNumber", (index + 1).to_string()),
            ("pageSize", self.walker.page_size().to_string()),
            ("search", self.subdomain.clone()),
        ];

        let resource = format!("/domain/{}/ResourceRecord", domain_id);
        let list: RecordList = self
            .call(ctx, action, reqwest::Method::GET, &resource, &params, None)
            .await?
            .map_err(|e| e.into_error(action))?;
        Ok(Page::new(list.data_list, list.total_count))
    }

    async fn resolve_domain_id(&mut self, ctx: &CancellationToken) -> Result<i64> {
        if let Some(domain_id) = self.domain_id {
            return Ok(domain_id);
        }

        tracing::debug!("Looking up JD Cloud domain ID for {}", self.domain);
        let found = {
            let this = &*self;
            this.walker
                .find(
                    ctx,
                    move |i| this.domains_page(ctx, i),
                    move |d| d.domain_name == this.domain,
                )
                .await?
        };

        let domain = found
            .ok_or_else(|| Error::not_found(format!("domain {} does not exist", self.domain)))?;

        tracing::debug!("Found JD Cloud domain ID: {}", domain.id);
        self.domain_id = Some(domain.id);
        Ok(domain.id)
    }
}

#[async_trait]
impl DnsUpdateHandler for JdCloudHandler {
    async fn get(&mut self, ctx: &CancellationToken) -> Result<String> {
        let domain_id = self.resolve_domain_id(ctx).await?;

        tracing::debug!(
            "Searching JD Cloud records: {}.{} ({})",
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
                    move |r| r.host_record == this.subdomain && r.record_type == this.record_type,
                )
                .await?
        };

        match found {
            Some(record) => {
                tracing::debug!("Found JD Cloud record ID: {}", record.id);
                self.record_id = Some(record.id);
                Ok(record.host_value)
            }
            None => {
                if let Some(stale) = self.record_id.take() {
                    tracing::debug!("JD Cloud record {} vanished, forgetting its ID", stale);
                }
                Ok(String::new())
            }
        }
    }

    async fn create(&mut self, ctx: &CancellationToken, address: &str) -> Result<()> {
        let domain_id = self
            .domain_id
            .ok_or_else(|| Error::missing_identifier("jdcloud domain ID is unknown"))?;

        tracing::info!(
            "Creating JD Cloud record: {}.{} -> {}",
            self.subdomain,
            self.domain,
            address
        );
        let action = "createResourceRecord";
        let body = json!({
            "req": {
                "hostRecord": self.subdomain,
                "hostValue": address,
                "type": self.record_type,
                "viewValue": self.view_id,
                "ttl": JDCLOUD_TTL,
            }
        });

        let resource = format!("/domain/{}/ResourceRecord", domain_id);
        let created: CreatedRecord = self
            .call(ctx, action, reqwest::Method::POST, &resource, &[], Some(body))
            .await?
            .map_err(|e| e.into_error(action))?;

        self.record_id = Some(created.data_list.id);
        Ok(())
    }

    async fn update(&mut self, ctx: &CancellationToken, new_address: &str) -> Result<()> {
        let domain_id = self
            .domain_id
            .ok_or_else(|| Error::missing_identifier("jdcloud domain ID is unknown"))?;
        let record_id = self
            .record_id
            .ok_or_else(|| Error::missing_identifier("jdcloud record ID is unknown"))?;

        tracing::info!(
            "Updating JD Cloud record {}: {}.{} -> {}",
            record_id,
            self.subdomain,
            self.domain,
            new_address
        );
        let action = "modifyResourceRecord";
        let body = json!({
            "req": {
                "domainName": self.domain,
                "hostRecord": self.subdomain,
                "hostValue": new_address,
                "ttl": JDCLOUD_TTL,
                "type": self.record_type,
                "viewValue": self.view_id,
            }
        });

        let resource = format!("/domain/{}/ResourceRecord/{}", domain_id, record_id);
        let _: Value = self
            .call(ctx, action, reqwest::Method::PUT, &resource, &[], Some(body))
            .await?
            .map_err(|e| e.into_error(action))?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}
