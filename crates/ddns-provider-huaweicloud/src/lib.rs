// # Huawei Cloud DNS Update Handler
//
// Keeps one A/AAAA record set in Huawei Cloud DNS (API v2) in sync.
//
// Zone and record set names are absolute (trailing dot). `get` resolves the
// public zone id and the record set id with `search_mode=equal`, walking
// every page; both ids are cached. A 404 on the record set read drops the
// cached record set id. Writes use TTL 120 and the ddns description.
//
// Requests are signed with SDK-HMAC-SHA256 against
// `https://dns.{region}.myhuaweicloud.com`.

mod signing;

use async_trait::async_trait;
use ddns_core::config::{HuaweiCloudConfig, RecordSpec, Secret};
use ddns_core::pagination::{DEFAULT_PAGE_SIZE, Page, PageWalker};
use ddns_core::timeout::{REST_CALL_TIMEOUT, bounded};
use ddns_core::traits::{DnsUpdateHandler, RECORD_COMMENT};
use ddns_core::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// TTL for records written by this handler
pub const HUAWEICLOUD_TTL: u32 = 120;

const PROVIDER: &str = "huaweicloud";

#[derive(Debug, Deserialize)]
struct Metadata {
    total_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ZoneList {
    #[serde(default)]
    zones: Vec<Zone>,
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RecordSetList {
    #[serde(default)]
    recordsets: Vec<RecordSet>,
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct RecordSet {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    record_type: String,
    #[serde(default)]
    records: Vec<String>,
}

impl RecordSet {
    fn first_address(self) -> String {
        self.records.into_iter().next().unwrap_or_default()
    }
}

/// Huawei Cloud DNS handler for one record
pub struct HuaweiCloudHandler {
    client: reqwest::Client,
    endpoint: String,
    access_key: String,
    secret_key: Secret,
    /// `example.com.`
    zone_name: String,
    /// `home.example.com.`
    record_name: String,
    record_type: &'static str,
    zone_id: Option<String>,
    record_set_id: Option<String>,
    walker: PageWalker,
}

impl std::fmt::Debug for HuaweiCloudHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuaweiCloudHandler")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<REDACTED>")
            .field("record", &self.record_name)
            .field("type", &self.record_type)
            .field("zone_id", &self.zone_id)
            .field("record_set_id", &self.record_set_id)
            .finish()
    }
}

impl HuaweiCloudHandler {
    /// Create a handler for `spec`
    pub fn new(spec: &RecordSpec, config: &HuaweiCloudConfig) -> Result<Self> {
        if config.region.trim().is_empty() {
            return Err(Error::config("huaweicloud region is required"));
        }

        let client = reqwest::Client::builder()
            .timeout(REST_CALL_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("https://dns.{}.myhuaweicloud.com", config.region),
            access_key: config.access_key.clone(),
            secret_key: config.secret_access_key.clone(),
            zone_name: format!("{}.", spec.domain),
            record_name: format!("{}.", spec.fqdn()),
            record_type: spec.record_type(),
            zone_id: None,
            record_set_id: None,
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

    async fn call<T: DeserializeOwned>(
        &self,
        ctx: &CancellationToken,
        operation: &str,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| Error::config(format!("invalid endpoint {}: {}", self.endpoint, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(Error::config(format!("endpoint {} has no host", self.endpoint))),
        };

        let query = signing::canonical_query(params);
        let payload = body.map(|b| b.to_string()).unwrap_or_default();
        let headers = signing::sign_request(&signing::RequestParts {
            method: method.as_str(),
            host: &host,
            path,
            query: &query,
            payload: &payload,
            access_key: &self.access_key,
            secret_key: self.secret_key.expose(),
            date: &signing::timestamp(),
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

        bounded(ctx, REST_CALL_TIMEOUT, operation, async move {
            let response = request
                .send()
                .await
                .map_err(|e| Error::http(format!("{}: {}", operation, e)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(Error::from_status(PROVIDER, status.as_u16(), &body));
            }

            response.json().await.map_err(|e| {
                Error::provider(PROVIDER, format!("{}: failed to parse response: {}", operation, e))
            })
        })
        .await
    }

    async fn zones_page(&self, ctx: &CancellationToken, index: u32) -> Result<Page<Zone>> {
        let limit = self.walker.page_size();
        let params = [
            ("type", "public".to_string()),
            ("name", self.zone_name.clone()),
            ("search_mode", "equal".to_string()),
            ("limit", limit.to_string()),
            ("offset", (index * limit).to_string()),
        ];

        let list: ZoneList = self
            .call(ctx, "list public zones", reqwest::Method::GET, "/v2/zones", &params, None)
            .await?;
        Ok(Page::new(list.zones, list.metadata.and_then(|m| m.total_count)))
    }

    async fn record_sets_page(
        &self,
        ctx: &CancellationToken,
        zone_id: &str,
        index: u32,
    ) -> Result<Page<RecordSet>> {
        let limit = self.walker.page_size();
        let params = [
            ("type", self.record_type.to_string()),
            ("name", self.record_name.clone()),
            ("search_mode", "equal".to_string()),
            ("limit", limit.to_string()),
            ("offset", (index * limit).to_string()),
        ];

        let path = format!("/v2/zones/{}/recordsets", zone_id);
        let list: RecordSetList = self
            .call(ctx, "list record sets", reqwest::Method::GET, &path, &params, None)
            .await?;
        Ok(Page::new(list.recordsets, list.metadata.and_then(|m| m.total_count)))
    }

    async fn resolve_zone_id(&mut self, ctx: &CancellationToken) -> Result<String> {
        if let Some(zone_id) = &self.zone_id {
            return Ok(zone_id.clone());
        }

        tracing::debug!("Looking up Huawei Cloud zone ID for {}", self.zone_name);
        let found = {
            let this = &*self;
            this.walker
                .find(
                    ctx,
                    move |i| this.zones_page(ctx, i),
                    move |z| z.name == this.zone_name,
                )
                .await?
        };

        let zone = found
            .ok_or_else(|| Error::not_found(format!("zone {} does not exist", self.zone_name)))?;

        tracing::debug!("Found Huawei Cloud zone ID: {}", zone.id);
        self.zone_id = Some(zone.id.clone());
        Ok(zone.id)
    }

    fn write_body(&self, address: &str) -> serde_json::Value {
        json!({
            "name": self.record_name,
            "description": RECORD_COMMENT,
            "type": self.record_type,
            "records": [address],
            "ttl": HUAWEICLOUD_TTL,
        })
    }
}

#[async_trait]
impl DnsUpdateHandler for HuaweiCloudHandler {
    async fn get(&mut self, ctx: &CancellationToken) -> Result<String> {
        let zone_id = self.resolve_zone_id(ctx).await?;

        if let Some(record_set_id) = self.record_set_id.clone() {
            let path = format!("/v2/zones/{}/recordsets/{}", zone_id, record_set_id);
            return match self
                .call::<RecordSet>(ctx, "show record set", reqwest::Method::GET, &path, &[], None)
                .await
            {
                Ok(record_set) => Ok(record_set.first_address()),
                Err(Error::NotFound(_)) => {
                    tracing::debug!("Record set {} vanished, forgetting its ID", record_set_id);
                    self.record_set_id = None;
                    Ok(String::new())
                }
                Err(e) => Err(e),
            };
        }

        tracing::debug!("Searching record sets: {} ({})", self.record_name, self.record_type);
        let found = {
            let this = &*self;
            let zone_id = zone_id.as_str();
            this.walker
                .find(
                    ctx,
                    move |i| this.record_sets_page(ctx, zone_id, i),
                    move |r| r.name == this.record_name && r.record_type == this.record_type,
                )
                .await?
        };

        match found {
            Some(record_set) => {
                tracing::debug!("Found record set ID: {}", record_set.id);
                self.record_set_id = Some(record_set.id.clone());
                Ok(record_set.first_address())
            }
            None => Ok(String::new()),
        }
    }

    async fn create(&mut self, ctx: &CancellationToken, address: &str) -> Result<()> {
        let zone_id = self
            .zone_id
            .clone()
            .ok_or_else(|| Error::missing_identifier("huaweicloud zone ID is unknown"))?;

        tracing::info!("Creating Huawei Cloud record set: {} -> {}", self.record_name, address);
        let path = format!("/v2/zones/{}/recordsets", zone_id);
        let created: RecordSet = self
            .call(
                ctx,
                "create record set",
                reqwest::Method::POST,
                &path,
                &[],
                Some(self.write_body(address)),
            )
            .await?;

        self.record_set_id = Some(created.id);
        Ok(())
    }

    async fn update(&mut self, ctx: &CancellationToken, new_address: &str) -> Result<()> {
        let zone_id = self
            .zone_id
            .clone()
            .ok_or_else(|| Error::missing_identifier("huaweicloud zone ID is unknown"))?;
        let record_set_id = self
            .record_set_id
            .clone()
            .ok_or_else(|| Error::missing_identifier("huaweicloud record set ID is unknown"))?;

        tracing::info!(
            "Updating Huawei Cloud record set {}: {} -> {}",
            record_set_id,
            self.record_name,
            new_address
        );
        let path = format!("/v2/zones/{}/recordsets/{}", zone_id, record_set_id);
        let _: RecordSet = self
            .call(
                ctx,
                "update record set",
                reqwest::Method::PUT,
                &path,
                &[],
                Some(self.write_body(new_address)),
            )
            .await?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}
