//! Configuration types for the DDNS system
//!
//! These are the already-resolved, immutable inputs of the core: one
//! [`RecordSpec`] per managed record, each owning exactly one detection
//! method and exactly one provider. Loading and cross-reference resolution
//! happen outside this crate.

use crate::address::{AddressFamily, LocalAddressPolicy};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Marker used in place of a subdomain for the zone apex
pub const APEX: &str = "@";

/// A credential string that never shows up in `Debug` output
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a credential
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value (for signing or auth headers only)
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<REDACTED>")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// One reconciliation target
#[derive(Debug, Clone)]
pub struct RecordSpec {
    /// Unique name within a loaded configuration
    pub name: String,
    /// Registered domain, e.g. `example.com`
    pub domain: String,
    /// Host label(s) under `domain`, or [`APEX`]
    pub subdomain: String,
    /// Which address family is published
    pub family: AddressFamily,
    /// Cron expression (5, 6 or 7 fields)
    pub cron: String,
    /// How the address to publish is found
    pub detection: DetectionConfig,
    /// Where the record lives
    pub provider: ProviderConfig,
}

impl RecordSpec {
    /// Whether this spec targets the zone apex
    pub fn is_apex(&self) -> bool {
        self.subdomain == APEX
    }

    /// Fully-qualified record name without the trailing dot
    pub fn fqdn(&self) -> String {
        if self.is_apex() {
            self.domain.clone()
        } else {
            format!("{}.{}", self.subdomain, self.domain)
        }
    }

    /// `A` or `AAAA`
    pub fn record_type(&self) -> &'static str {
        self.family.record_type()
    }

    /// Validate the record and everything it owns
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("record name cannot be empty"));
        }

        validate_domain(&self.domain)
            .map_err(|e| Error::config(format!("record {}: {}", self.name, e)))?;
        validate_subdomain(&self.subdomain)
            .map_err(|e| Error::config(format!("record {}: {}", self.name, e)))?;

        crate::scheduler::parse_schedule(&self.cron)
            .map_err(|e| Error::config(format!("record {}: {}", self.name, e)))?;

        self.detection.validate()?;
        self.provider.validate()?;

        Ok(())
    }
}

/// Check a registered domain of the form `label.tld`
pub fn validate_domain(domain: &str) -> std::result::Result<(), String> {
    let Some((label, tld)) = domain.split_once('.') else {
        return Err(format!("{} is not a valid domain", domain));
    };

    let label_ok = !label.is_empty()
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    let tld_ok = tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic());

    if label_ok && tld_ok {
        Ok(())
    } else {
        Err(format!("{} is not a valid domain", domain))
    }
}

/// Check a subdomain: [`APEX`] or dot-separated labels
pub fn validate_subdomain(subdomain: &str) -> std::result::Result<(), String> {
    if subdomain.is_empty() {
        return Err("subdomain cannot be empty, use \"@\" for the zone apex".to_string());
    }
    if subdomain == APEX {
        return Ok(());
    }

    for label in subdomain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(format!("{} is not a valid subdomain", subdomain));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            || label.starts_with('-')
            || label.ends_with('-')
        {
            return Err(format!("{} is not a valid subdomain", subdomain));
        }
    }

    Ok(())
}

/// Address detection configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Treatment of local addresses
    pub policy: LocalAddressPolicy,
    /// The detection strategy
    pub method: DetectionMethod,
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        match &self.method {
            DetectionMethod::Interface(iface) => {
                if iface.name.trim().is_empty() {
                    return Err(Error::config("interface name cannot be empty"));
                }
            }
            DetectionMethod::ThirdParty(api) => {
                if api.url.trim().is_empty() {
                    return Err(Error::config("detection url cannot be empty"));
                }
                if !api.url.starts_with("http://") && !api.url.starts_with("https://") {
                    return Err(Error::config(format!(
                        "detection url must use http or https: {}",
                        api.url
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Detection strategy
#[derive(Debug, Clone)]
pub enum DetectionMethod {
    /// Read the addresses assigned to a local network interface
    Interface(InterfaceDetection),
    /// Ask a third-party HTTP service
    ThirdParty(ThirdPartyDetection),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDetection {
    /// Interface name, e.g. `eth0`
    pub name: String,
}

/// Third-party lookup service settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThirdPartyDetection {
    pub url: String,
    /// Extraction path for JSON responses (`.ip`, `.data[0].addr`, `/ip`)
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default, rename = "customHeaders")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<Secret>,
}

/// Provider configuration, one variant per supported backend
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    Cloudflare(CloudflareConfig),
    AliCloud(AliCloudConfig),
    DnsPod(DnsPodConfig),
    HuaweiCloud(HuaweiCloudConfig),
    JdCloud(JdCloudConfig),
    Rfc2136(Rfc2136Config),
}

impl ProviderConfig {
    /// Short backend name used in logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderConfig::Cloudflare(_) => "cloudflare",
            ProviderConfig::AliCloud(_) => "alicloud",
            ProviderConfig::DnsPod(_) => "dnspod",
            ProviderConfig::HuaweiCloud(_) => "huaweicloud",
            ProviderConfig::JdCloud(_) => "jdcloud",
            ProviderConfig::Rfc2136(_) => "rfc2136",
        }
    }

    /// Validate the provider configuration
    pub fn validate(&self) -> Result<()> {
        match self {
            ProviderConfig::Cloudflare(c) => c.auth().map(|_| ()),
            ProviderConfig::AliCloud(c) => {
                require("alicloud", "accessKeyId", &c.access_key_id)?;
                require_secret("alicloud", "accessKeySecret", &c.access_key_secret)
            }
            ProviderConfig::DnsPod(c) => {
                require("dnspod", "secretId", &c.secret_id)?;
                require_secret("dnspod", "secretKey", &c.secret_key)
            }
            ProviderConfig::HuaweiCloud(c) => {
                require("huawei", "accessKey", &c.access_key)?;
                require_secret("huawei", "secretAccessKey", &c.secret_access_key)?;
                require("huawei", "region", &c.region)
            }
            ProviderConfig::JdCloud(c) => {
                require("jd", "accessKey", &c.access_key)?;
                require_secret("jd", "secretKey", &c.secret_key)
            }
            ProviderConfig::Rfc2136(c) => c.validate(),
        }
    }
}

fn require(provider: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::config(format!("{}: {} cannot be empty", provider, field)));
    }
    Ok(())
}

fn require_secret(provider: &str, field: &str, value: &Secret) -> Result<()> {
    if value.is_empty() {
        return Err(Error::config(format!("{}: {} cannot be empty", provider, field)));
    }
    Ok(())
}

/// Cloudflare credentials: an API token, or a global API key plus account email
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudflareConfig {
    #[serde(default)]
    pub api_token: Option<Secret>,
    #[serde(default)]
    pub global_api_key: Option<Secret>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Resolved Cloudflare authentication mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudflareAuth {
    ApiToken(Secret),
    GlobalApiKey { key: Secret, email: String },
}

impl CloudflareConfig {
    /// Pick the authentication mode; an API token takes precedence
    pub fn auth(&self) -> Result<CloudflareAuth> {
        if let Some(token) = self.api_token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(CloudflareAuth::ApiToken(token.clone()));
        }

        match (&self.global_api_key, &self.email) {
            (Some(key), Some(email)) if !key.is_empty() && !email.trim().is_empty() => {
                Ok(CloudflareAuth::GlobalApiKey {
                    key: key.clone(),
                    email: email.clone(),
                })
            }
            _ => Err(Error::config(
                "cloudflare: either apiToken or globalApiKey with email is required",
            )),
        }
    }
}

fn default_alicloud_line() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliCloudConfig {
    pub access_key_id: String,
    pub access_key_secret: Secret,
    #[serde(default)]
    pub region_id: Option<String>,
    /// Resolve line, `default` unless configured
    #[serde(default = "default_alicloud_line")]
    pub line: String,
}

fn default_dnspod_line_id() -> String {
    "0".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsPodConfig {
    pub secret_id: String,
    pub secret_key: Secret,
    #[serde(default)]
    pub region: Option<String>,
    /// Record line id, `0` is the default line
    #[serde(default = "default_dnspod_line_id")]
    pub line_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HuaweiCloudConfig {
    pub access_key: String,
    pub secret_access_key: Secret,
    pub region: String,
}

fn default_jd_view_id() -> i64 {
    -1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JdCloudConfig {
    pub access_key: String,
    pub secret_key: Secret,
    /// Resolution view, `-1` is the default view
    #[serde(default = "default_jd_view_id")]
    pub view_id: i64,
}

fn default_dns_port() -> u16 {
    53
}

/// RFC2136 dynamic update target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rfc2136Config {
    /// Server address (IP literal)
    pub address: String,
    #[serde(default = "default_dns_port")]
    pub port: u16,
    #[serde(default)]
    pub use_tcp: bool,
    #[serde(default)]
    pub tsig: Option<TsigConfig>,
    #[serde(default)]
    pub gss_tsig: Option<GssTsigConfig>,
}

impl Rfc2136Config {
    pub fn validate(&self) -> Result<()> {
        require("rfc2136", "address", &self.address)?;

        if self.gss_tsig.is_some() {
            return Err(Error::config(
                "rfc2136: gssTsig authentication is not supported, use tsig",
            ));
        }

        if let Some(tsig) = &self.tsig {
            require("rfc2136", "tsig.keyName", &tsig.key_name)?;
            require_secret("rfc2136", "tsig.key", &tsig.key)?;
        }

        Ok(())
    }
}

fn default_tsig_algorithm() -> String {
    "hmac-sha256".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TsigConfig {
    pub key_name: String,
    /// Base64-encoded shared secret
    pub key: Secret,
    #[serde(default = "default_tsig_algorithm")]
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GssTsigConfig {
    pub domain: String,
    pub username: String,
    pub password: Secret,
}
