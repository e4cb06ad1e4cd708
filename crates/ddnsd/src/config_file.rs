//! Configuration file loading
//!
//! The file holds three lists: `ddns` records, `detection` methods and
//! `provider` credentials. Records point at one entry of each other list by
//! name. Loading validates every entry and resolves both references into
//! self-contained [`RecordSpec`]s for the core.
//!
//! ```yaml
//! ddns:
//!   - name: home-v4
//!     domain: example.com
//!     subdomain: home
//!     stack: IPv4
//!     cron: "*/5 * * * *"
//!     providerRef: cf
//!     detectionRef: wan
//! detection:
//!   - name: wan
//!     localAddressPolicy: Ignore
//!     interface:
//!       name: eth0
//! provider:
//!   - name: cf
//!     cloudflare:
//!       apiToken: "..."
//! ```

use anyhow::{Context, Result, bail};
use ddns_core::config::{
    AliCloudConfig, CloudflareConfig, DnsPodConfig, HuaweiCloudConfig, InterfaceDetection,
    JdCloudConfig, Rfc2136Config, ThirdPartyDetection,
};
use ddns_core::{
    AddressFamily, DetectionConfig, DetectionMethod, LocalAddressPolicy, ProviderConfig,
    RecordSpec,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Raw file contents, before validation
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub ddns: Vec<DdnsEntry>,
    #[serde(default)]
    pub detection: Vec<DetectionEntry>,
    #[serde(default)]
    pub provider: Vec<ProviderEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DdnsEntry {
    pub name: String,
    pub domain: String,
    /// `@` for the zone apex
    pub subdomain: String,
    pub stack: AddressFamily,
    pub cron: String,
    pub provider_ref: String,
    pub detection_ref: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEntry {
    pub name: String,
    #[serde(default)]
    pub local_address_policy: LocalAddressPolicy,
    pub interface: Option<InterfaceDetection>,
    pub api: Option<ThirdPartyDetection>,
}

impl DetectionEntry {
    fn into_config(self) -> Result<DetectionConfig> {
        let method = match (self.interface, self.api) {
            (Some(interface), None) => DetectionMethod::Interface(interface),
            (None, Some(mut api)) => {
                if api.json_path.as_deref().is_some_and(|p| p.trim().is_empty()) {
                    api.json_path = None;
                }
                DetectionMethod::ThirdParty(api)
            }
            (None, None) => bail!("detection {}: must specify a detection method", self.name),
            (Some(_), Some(_)) => {
                bail!("detection {}: only one of interface or api can be used", self.name)
            }
        };

        let config = DetectionConfig {
            policy: self.local_address_policy,
            method,
        };
        config
            .validate()
            .with_context(|| format!("detection {}", self.name))?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub cloudflare: Option<CloudflareConfig>,
    pub alicloud: Option<AliCloudConfig>,
    pub dnspod: Option<DnsPodConfig>,
    pub huawei: Option<HuaweiCloudConfig>,
    pub jd: Option<JdCloudConfig>,
    pub rfc2136: Option<Rfc2136Config>,
}

impl ProviderEntry {
    fn into_config(self) -> Result<ProviderConfig> {
        let name = self.name;
        let mut found: Vec<ProviderConfig> = [
            self.cloudflare.map(ProviderConfig::Cloudflare),
            self.alicloud.map(ProviderConfig::AliCloud),
            self.dnspod.map(ProviderConfig::DnsPod),
            self.huawei.map(ProviderConfig::HuaweiCloud),
            self.jd.map(ProviderConfig::JdCloud),
            self.rfc2136.map(ProviderConfig::Rfc2136),
        ]
        .into_iter()
        .flatten()
        .collect();

        let config = match found.len() {
            0 => bail!("provider {}: no provider specified", name),
            1 => found.remove(0),
            _ => bail!("provider {}: only one provider can be used per entry", name),
        };

        config
            .validate()
            .with_context(|| format!("provider {}", name))?;
        Ok(config)
    }
}

impl FileConfig {
    /// Parse `content` according to the file extension of `path`
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("yaml" | "yml") => serde_yaml::from_str(content)
                .with_context(|| format!("failed to parse YAML config {}", path.display())),
            Some("json") => serde_json::from_str(content)
                .with_context(|| format!("failed to parse JSON config {}", path.display())),
            _ => bail!(
                "config file {} has an unknown type, use .yaml, .yml or .json",
                path.display()
            ),
        }
    }

    /// Validate every entry and resolve references
    ///
    /// # Returns
    ///
    /// One [`RecordSpec`] per `ddns` entry, in file order.
    pub fn resolve(self) -> Result<Vec<RecordSpec>> {
        if self.ddns.is_empty() {
            bail!("must have at least 1 ddns entry");
        }
        if self.detection.is_empty() {
            bail!("must have at least 1 detection entry");
        }
        if self.provider.is_empty() {
            bail!("must have at least 1 provider entry");
        }

        let mut detections = HashMap::new();
        for entry in self.detection {
            let name = entry.name.clone();
            if detections.contains_key(&name) {
                bail!("detection {} is defined more than once", name);
            }
            detections.insert(name, entry.into_config()?);
        }

        let mut providers = HashMap::new();
        for entry in self.provider {
            let name = entry.name.clone();
            if providers.contains_key(&name) {
                bail!("provider {} is defined more than once", name);
            }
            providers.insert(name, entry.into_config()?);
        }

        let mut names = std::collections::HashSet::new();
        let mut specs = Vec::with_capacity(self.ddns.len());
        for entry in self.ddns {
            if !names.insert(entry.name.clone()) {
                bail!("ddns {} is defined more than once", entry.name);
            }

            let detection = detections.get(&entry.detection_ref).with_context(|| {
                format!(
                    "ddns {} references unknown detection {}",
                    entry.name, entry.detection_ref
                )
            })?;
            let provider = providers.get(&entry.provider_ref).with_context(|| {
                format!(
                    "ddns {} references unknown provider {}",
                    entry.name, entry.provider_ref
                )
            })?;

            let spec = RecordSpec {
                name: entry.name,
                domain: entry.domain,
                subdomain: entry.subdomain,
                family: entry.stack,
                cron: entry.cron,
                detection: detection.clone(),
                provider: provider.clone(),
            };
            spec.validate()?;
            specs.push(spec);
        }

        Ok(specs)
    }
}

/// Read, parse and resolve the configuration file at `path`
pub fn load(path: &Path) -> Result<Vec<RecordSpec>> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("cannot access config file {}", path.display()))?;
    if metadata.is_dir() {
        bail!("config path {} points to a directory", path.display());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    FileConfig::parse(path, &content)?.resolve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
ddns:
  - name: home-v4
    domain: example.com
    subdomain: home
    stack: IPv4
    cron: "*/5 * * * *"
    providerRef: cf
    detectionRef: wan
  - name: apex-v6
    domain: example.com
    subdomain: "@"
    stack: IPv6
    cron: "0 */10 * * * *"
    providerRef: ns
    detectionRef: api
detection:
  - name: wan
    interface:
      name: eth0
  - name: api
    localAddressPolicy: Prefer
    api:
      url: https://api64.ipify.org
      jsonPath: .ip
      params:
        format: json
      customHeaders:
        X-Client: ddnsd
provider:
  - name: cf
    cloudflare:
      apiToken: token-value
  - name: ns
    rfc2136:
      address: 192.0.2.53
      tsig:
        keyName: ddns-key.
        key: c2VjcmV0
"#;

    fn write(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn resolve_yaml(content: &str) -> Result<Vec<RecordSpec>> {
        FileConfig::parse(Path::new("config.yaml"), content)?.resolve()
    }

    #[test]
    fn loads_yaml_and_resolves_references() {
        let file = write(".yaml", YAML);
        let specs = load(file.path()).unwrap();

        assert_eq!(specs.len(), 2);

        let home = &specs[0];
        assert_eq!(home.fqdn(), "home.example.com");
        assert_eq!(home.family, AddressFamily::V4);
        assert_eq!(home.detection.policy, LocalAddressPolicy::Ignore);
        assert!(matches!(home.provider, ProviderConfig::Cloudflare(_)));

        let apex = &specs[1];
        assert!(apex.is_apex());
        assert_eq!(apex.record_type(), "AAAA");
        assert_eq!(apex.detection.policy, LocalAddressPolicy::Prefer);
        match &apex.detection.method {
            DetectionMethod::ThirdParty(api) => {
                assert_eq!(api.json_path.as_deref(), Some(".ip"));
                assert_eq!(api.params.get("format").map(String::as_str), Some("json"));
                assert_eq!(api.headers.get("X-Client").map(String::as_str), Some("ddnsd"));
            }
            other => panic!("unexpected detection {:?}", other),
        }
        match &apex.provider {
            ProviderConfig::Rfc2136(ns) => {
                assert_eq!(ns.port, 53);
                assert!(!ns.use_tcp);
                assert_eq!(ns.tsig.as_ref().unwrap().algorithm, "hmac-sha256");
            }
            other => panic!("unexpected provider {:?}", other),
        }
    }

    #[test]
    fn loads_json() {
        let json = r#"{
            "ddns": [{
                "name": "office", "domain": "example.org", "subdomain": "office",
                "stack": "IPv4", "cron": "*/1 * * * *",
                "providerRef": "jd", "detectionRef": "lan"
            }],
            "detection": [{"name": "lan", "localAddressPolicy": "Allow", "interface": {"name": "br0"}}],
            "provider": [{"name": "jd", "jd": {"accessKey": "ak", "secretKey": "sk"}}]
        }"#;
        let file = write(".json", json);
        let specs = load(file.path()).unwrap();

        assert_eq!(specs.len(), 1);
        match &specs[0].provider {
            ProviderConfig::JdCloud(jd) => assert_eq!(jd.view_id, -1),
            other => panic!("unexpected provider {:?}", other),
        }
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let file = write(".toml", YAML);
        let err = load(file.path()).unwrap_err();
        assert!(err.to_string().contains("unknown type"));
    }

    #[test]
    fn directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("directory"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let doubled = YAML.replace("name: apex-v6", "name: home-v4");
        let err = resolve_yaml(&doubled).unwrap_err();
        assert!(err.to_string().contains("home-v4 is defined more than once"));
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let dangling = YAML.replace("providerRef: cf", "providerRef: nope");
        let err = resolve_yaml(&dangling).unwrap_err();
        assert!(err.to_string().contains("unknown provider nope"));
    }

    #[test]
    fn provider_entry_needs_exactly_one_backend() {
        let two = YAML.replace(
            "    cloudflare:\n      apiToken: token-value\n",
            "    cloudflare:\n      apiToken: token-value\n    jd:\n      accessKey: a\n      secretKey: b\n",
        );
        let err = resolve_yaml(&two).unwrap_err();
        assert!(format!("{:#}", err).contains("only one provider"));

        let none = YAML.replace("    cloudflare:\n      apiToken: token-value\n", "");
        let err = resolve_yaml(&none).unwrap_err();
        assert!(format!("{:#}", err).contains("no provider specified"));
    }

    #[test]
    fn detection_entry_needs_a_method() {
        let bare = YAML.replace("    interface:\n      name: eth0\n", "");
        let err = resolve_yaml(&bare).unwrap_err();
        assert!(err.to_string().contains("must specify a detection method"));
    }

    #[test]
    fn invalid_record_fields_are_rejected() {
        let bad_domain = YAML.replace("domain: example.com\n    subdomain: home", "domain: example\n    subdomain: home");
        assert!(resolve_yaml(&bad_domain).is_err());

        let bad_cron = YAML.replace("\"*/5 * * * *\"", "\"every five minutes\"");
        assert!(resolve_yaml(&bad_cron).is_err());

        let no_stack = YAML.replace("    stack: IPv4\n", "");
        assert!(resolve_yaml(&no_stack).is_err());
    }

    #[test]
    fn empty_lists_are_rejected() {
        let err = resolve_yaml("ddns: []\ndetection: []\nprovider: []\n").unwrap_err();
        assert!(err.to_string().contains("at least 1 ddns entry"));
    }
}
