// # Third-Party HTTP Address Detector
//
// This crate asks an external "what is my IP" service for the address to
// publish.
//
// ## Behavior
//
// - One GET per pass, with configured query parameters, headers and optional
//   basic auth, bounded by a short timeout
// - A JSON response (by content type) or a configured path selects JSON
//   extraction with a jq program; otherwise the trimmed body is the address
// - The result must be a usable address of the record's family; a local
//   address is rejected only under [`LocalAddressPolicy::Ignore`]

pub mod json_path;

pub use json_path::JsonPath;

use ddns_core::address::{self, AddressFamily, LocalAddressPolicy};
use ddns_core::config::{Secret, ThirdPartyDetection};
use ddns_core::timeout::{DETECTION_TIMEOUT, bounded};
use ddns_core::traits::AddressDetector;
use ddns_core::{Error, Result};
use reqwest::header::CONTENT_TYPE;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Detects the public address through a third-party HTTP service
#[derive(Debug, Clone)]
pub struct ThirdPartyDetector {
    client: reqwest::Client,
    url: String,
    json_path: Option<JsonPath>,
    params: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
    username: Option<String>,
    password: Option<Secret>,
    family: AddressFamily,
    policy: LocalAddressPolicy,
}

impl ThirdPartyDetector {
    /// Create a detector from its configuration block
    ///
    /// # Returns
    ///
    /// - `Err(Error::Config)`: The extraction path does not parse
    pub fn from_config(
        config: &ThirdPartyDetection,
        family: AddressFamily,
        policy: LocalAddressPolicy,
    ) -> Result<Self> {
        let json_path = config
            .json_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(str::parse::<JsonPath>)
            .transpose()?;

        let client = reqwest::Client::builder()
            .timeout(DETECTION_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            json_path,
            params: config.params.clone(),
            headers: config.headers.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            family,
            policy,
        })
    }

    async fn request(&self) -> Result<String> {
        let mut request = self.client.get(&self.url);
        if !self.params.is_empty() {
            request = request.query(&self.params);
        }
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref().map(Secret::expose));
        }

        debug!("requesting address from {}", self.url);
        let response = request
            .send()
            .await
            .map_err(|e| Error::http(format!("request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::detection(format!(
                "{} returned HTTP {}",
                self.url, status
            )));
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));

        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("failed to read response body: {}", e)))?;

        self.extract(&body, is_json)
    }

    fn extract(&self, body: &str, is_json: bool) -> Result<String> {
        if !is_json && self.json_path.is_none() {
            debug!("using response body as address");
            return Ok(body.trim().to_string());
        }

        let path = self
            .json_path
            .as_ref()
            .ok_or_else(|| Error::detection("JSON response but no jsonPath configured"))?;

        if body.trim().is_empty() {
            return Err(Error::detection("response body is empty"));
        }

        let doc: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| Error::detection(format!("malformed JSON response: {}", e)))?;

        debug!("extracting address with json path {}", path);
        path.extract_string(&doc)
    }
}

#[async_trait::async_trait]
impl AddressDetector for ThirdPartyDetector {
    async fn detect(&self, ctx: &CancellationToken) -> Result<String> {
        let raw = bounded(ctx, DETECTION_TIMEOUT, "third-party detection", self.request()).await?;
        let accepted = address::accept(&raw, self.family, self.policy)?;

        debug!("address detected: {}", accepted);
        Ok(accepted)
    }

    fn method(&self) -> &'static str {
        "api"
    }
}
