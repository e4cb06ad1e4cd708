// # Cloudflare DNS Update Handler
//
// This crate keeps one A/AAAA record on Cloudflare in sync.
//
// ## Behavior
//
// - `get` resolves the zone id (exact zone name match) and the record id
//   (exact name and type match), walking every page, then reads the record
// - Both ids are cached for the life of the handler
// - A record that disappeared (404 on read) clears the cached record id
// - `create`/`update` send TTL 120, proxying disabled and the ddns comment
//
// ## Security Requirements
//
// - Credentials NEVER appear in logs or Debug output
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List Zones: GET `/zones?name=...`
// - List DNS Records: GET `/zones/:zone_id/dns_records?type=...&name=...`
// - DNS Record Details: GET `/zones/:zone_id/dns_records/:record_id`
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Update DNS Record: PUT `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use ddns_core::config::{CloudflareAuth, CloudflareConfig, RecordSpec};
use ddns_core::pagination::{Page, PageWalker};
use ddns_core::timeout::{REST_CALL_TIMEOUT, bounded};
use ddns_core::traits::{DnsUpdateHandler, RECORD_COMMENT};
use ddns_core::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// TTL for records written by this handler
pub const CLOUDFLARE_TTL: u32 = 120;

/// Largest page Cloudflare serves for record listings
pub const CLOUDFLARE_PAGE_SIZE: u32 = 100;

/// Maximum page size of the zone listing
pub const CLOUDFLARE_ZONE_PAGE_SIZE: u32 = 50;

const PROVIDER: &str = "cloudflare";

/// Cloudflare v4 response envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    total_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    name: String,
    #[serde(default)]
    content: String,
}

/// Cloudflare handler for one record
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose credentials.
pub struct CloudflareHandler {
    client: reqwest::Client,
    base_url: String,
    auth: CloudflareAuth,
    domain: String,
    subdomain: String,
    fqdn: String,
    record_type: &'static str,
    zone_id: Option<String>,
    record_id: Option<String>,
    walker: PageWalker,
    zone_walker: PageWalker,
}

impl std::fmt::Debug for CloudflareHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareHandler")
            .field("auth", &"<REDACTED>")
            .field("record", &self.fqdn)
            .field("type", &self.record_type)
            .field("zone_id", &self.zone_id)
            .field("record_id", &self.record_id)
            .finish()
    }
}

impl CloudflareHandler {
    /// Create a handler for `spec`
    ///
    /// # Parameters
    ///
    /// - `spec`: The managed record
    /// - `config`: API token, or global API key plus account email
    ///
    /// # Returns
    ///
    /// - `Err(Error::Config)`: No usable credentials or HTTP client failure
    pub fn new(spec: &RecordSpec, config: &CloudflareConfig) -> Result<Self> {
        let auth = config.auth()?;

        let client = reqwest::Client::builder()
            .timeout(REST_CALL_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: CLOUDFLARE_API_BASE.to_string(),
            auth,
            domain: spec.domain.clone(),
            subdomain: spec.subdomain.clone(),
            fqdn: spec.fqdn(),
            record_type: spec.record_type(),
            zone_id: None,
            record_id: None,
            walker: PageWalker::new(CLOUDFLARE_PAGE_SIZE),
            zone_walker: PageWalker::new(CLOUDFLARE_ZONE_PAGE_SIZE),
        })
    }

    /// Point the handler at another API base (used by tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the delay between page requests
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.walker = self.walker.with_delay(delay);
        self.zone_walker = self.zone_walker.with_delay(delay);
        self
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            CloudflareAuth::ApiToken(token) => request.bearer_auth(token.expose()),
            CloudflareAuth::GlobalApiKey { key, email } => request
                .header("X-Auth-Key", key.expose())
                .header("X-Auth-Email", email),
        }
    }

    /// Send one API call and unwrap the v4 envelope
    async fn call<T: DeserializeOwned>(
        &self,
        ctx: &CancellationToken,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<(T, Option<u64>)> {
        let request = self.authorize(request);

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

            let envelope: Envelope<T> = response
                .json()
                .await
                .map_err(|e| Error::provider(PROVIDER, format!("Failed to parse response: {}", e)))?;

            if !envelope.success {
                let messages: Vec<String> = envelope
                    .errors
                    .iter()
                    .map(|m| format!("{} ({})", m.message, m.code))
                    .collect();
                return Err(Error::provider(
                    PROVIDER,
                    format!("{} failed: {}", operation, messages.join("; ")),
                ));
            }

            let total = envelope.result_info.and_then(|info| info.total_count);
            let result = envelope.result.ok_or_else(|| {
                Error::provider(PROVIDER, format!("{}: response has no result", operation))
            })?;
            Ok((result, total))
        })
        .await
    }

    async fn zones_page(&self, ctx: &CancellationToken, index: u32) -> Result<Page<Zone>> {
        let page = (index + 1).to_string();
        let per_page = self.zone_walker.page_size().to_string();
        let request = self.client.get(format!("{}/zones", self.base_url)).query(&[
            ("name", self.domain.as_str()),
            ("page", page.as_str()),
            ("per_page", per_page.as_str()),
        ]);
        let (zones, total) = self.call(ctx, "list zones", request).await?;
        Ok(Page::new(zones, total))
    }

    async fn records_page(
        &self,
        ctx: &CancellationToken,
        zone_id: &str,
        index: u32,
    ) -> Result<Page<DnsRecord>> {
        let page = (index + 1).to_string();
        let per_page = self.walker.page_size().to_string();
        let request = self
            .client
            .get(format!("{}/zones/{}/dns_records", self.base_url, zone_id))
            .query(&[
                ("type", self.record_type),
                ("name", self.fqdn.as_str()),
                ("page", page.as_str()),
                ("per_page", per_page.as_str()),
            ]);
        let (records, total) = self.call(ctx, "list DNS records", request).await?;
        Ok(Page::new(records, total))
    }

    async fn resolve_zone_id(&mut self, ctx: &CancellationToken) -> Result<String> {
        if let Some(zone_id) = &self.zone_id {
            return Ok(zone_id.clone());
        }

        tracing::debug!("Looking up zone ID for domain: {}", self.domain);
        let found = {
            let this = &*self;
            this.zone_walker
                .find(ctx, move |i| this.zones_page(ctx, i), move |z| z.name == this.domain)
                .await?
        };

        let zone = found.ok_or_else(|| {
            Error::not_found(format!("no DNS zone found for domain {}", self.domain))
        })?;

        tracing::debug!("Found zone ID: {}", zone.id);
        self.zone_id = Some(zone.id.clone());
        Ok(zone.id)
    }

    async fn resolve_record_id(
        &mut self,
        ctx: &CancellationToken,
        zone_id: &str,
    ) -> Result<Option<String>> {
        if let Some(record_id) = &self.record_id {
            return Ok(Some(record_id.clone()));
        }

        tracing::debug!("Looking up record ID: {} (type: {})", self.fqdn, self.record_type);
        let found = {
            let this = &*self;
            this.walker
                .find(
                    ctx,
                    move |i| this.records_page(ctx, zone_id, i),
                    move |r| r.name == this.fqdn,
                )
                .await?
        };

        if let Some(record) = &found {
            tracing::debug!("Found record ID: {}", record.id);
            self.record_id = Some(record.id.clone());
        }
        Ok(found.map(|r| r.id))
    }
}

#[async_trait]
impl DnsUpdateHandler for CloudflareHandler {
    async fn get(&mut self, ctx: &CancellationToken) -> Result<String> {
        let zone_id = self.resolve_zone_id(ctx).await?;

        let Some(record_id) = self.resolve_record_id(ctx, &zone_id).await? else {
            tracing::debug!("DNS record {} does not exist", self.fqdn);
            return Ok(String::new());
        };

        let request = self.client.get(format!(
            "{}/zones/{}/dns_records/{}",
            self.base_url, zone_id, record_id
        ));
        match self.call::<DnsRecord>(ctx, "get DNS record", request).await {
            Ok((record, _)) => Ok(record.content),
            Err(Error::NotFound(_)) => {
                tracing::debug!("DNS record {} vanished, forgetting its ID", record_id);
                self.record_id = None;
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn create(&mut self, ctx: &CancellationToken, address: &str) -> Result<()> {
        let zone_id = self
            .zone_id
            .clone()
            .ok_or_else(|| Error::missing_identifier("cloudflare zone ID is unknown"))?;

        tracing::info!("Creating Cloudflare DNS record: {} -> {}", self.fqdn, address);
        let request = self
            .client
            .post(format!("{}/zones/{}/dns_records", self.base_url, zone_id))
            .json(&json!({
                "type": self.record_type,
                "name": self.subdomain,
                "content": address,
                "ttl": CLOUDFLARE_TTL,
                "proxied": false,
                "comment": RECORD_COMMENT,
            }));

        let (record, _): (DnsRecord, _) = self.call(ctx, "create DNS record", request).await?;
        self.record_id = Some(record.id);
        Ok(())
    }

    async fn update(&mut self, ctx: &CancellationToken, new_address: &str) -> Result<()> {
        let zone_id = self
            .zone_id
            .clone()
            .ok_or_else(|| Error::missing_identifier("cloudflare zone ID is unknown"))?;
        let record_id = self
            .record_id
            .clone()
            .ok_or_else(|| Error::missing_identifier("cloudflare record ID is unknown"))?;

        tracing::info!("Updating Cloudflare DNS record: {} -> {}", self.fqdn, new_address);
        let request = self
            .client
            .put(format!(
                "{}/zones/{}/dns_records/{}",
                self.base_url, zone_id, record_id
            ))
            .json(&json!({
                "type": self.record_type,
                "name": self.subdomain,
                "content": new_address,
                "ttl": CLOUDFLARE_TTL,
                "proxied": false,
                "comment": RECORD_COMMENT,
            }));

        let _: (DnsRecord, _) = self.call(ctx, "update DNS record", request).await?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}
