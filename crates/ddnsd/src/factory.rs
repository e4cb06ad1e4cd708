//! Builds detectors and handlers from resolved record specs
//!
//! Backends are behind cargo features; a record that needs one that was not
//! compiled in fails at startup.

use anyhow::{Context, Result, bail};
use ddns_core::{
    AddressDetector, DetectionMethod, DnsUpdateHandler, ProviderConfig, RecordSpec,
    ReconciliationInstance,
};
use std::sync::Arc;

/// Build one instance per spec, in order
pub fn build_instances(specs: Vec<RecordSpec>) -> Result<Vec<ReconciliationInstance>> {
    specs
        .into_iter()
        .map(|spec| build_instance(Arc::new(spec)))
        .collect()
}

pub fn build_instance(spec: Arc<RecordSpec>) -> Result<ReconciliationInstance> {
    let detector =
        build_detector(&spec).with_context(|| format!("record {}: detection", spec.name))?;
    let handler = build_handler(&spec)
        .with_context(|| format!("record {}: provider {}", spec.name, spec.provider.kind()))?;

    Ok(ReconciliationInstance::new(spec, detector, handler))
}

fn detection_kind(method: &DetectionMethod) -> &'static str {
    match method {
        DetectionMethod::Interface(_) => "interface",
        DetectionMethod::ThirdParty(_) => "api",
    }
}

fn build_detector(spec: &RecordSpec) -> Result<Box<dyn AddressDetector>> {
    let policy = spec.detection.policy;

    match &spec.detection.method {
        #[cfg(feature = "iface")]
        DetectionMethod::Interface(config) => Ok(Box::new(
            ddns_ip_iface::InterfaceDetector::from_config(config, spec.family, policy),
        )),
        #[cfg(feature = "http")]
        DetectionMethod::ThirdParty(config) => Ok(Box::new(
            ddns_ip_http::ThirdPartyDetector::from_config(config, spec.family, policy)?,
        )),
        #[allow(unreachable_patterns)]
        other => bail!(
            "{} detection is not compiled into this build",
            detection_kind(other)
        ),
    }
}

fn build_handler(spec: &RecordSpec) -> Result<Box<dyn DnsUpdateHandler>> {
    match &spec.provider {
        #[cfg(feature = "cloudflare")]
        ProviderConfig::Cloudflare(config) => Ok(Box::new(
            ddns_provider_cloudflare::CloudflareHandler::new(spec, config)?,
        )),
        #[cfg(feature = "alicloud")]
        ProviderConfig::AliCloud(config) => Ok(Box::new(
            ddns_provider_alicloud::AliCloudHandler::new(spec, config)?,
        )),
        #[cfg(feature = "dnspod")]
        ProviderConfig::DnsPod(config) => Ok(Box::new(
            ddns_provider_dnspod::DnsPodHandler::new(spec, config)?,
        )),
        #[cfg(feature = "huaweicloud")]
        ProviderConfig::HuaweiCloud(config) => Ok(Box::new(
            ddns_provider_huaweicloud::HuaweiCloudHandler::new(spec, config)?,
        )),
        #[cfg(feature = "jdcloud")]
        ProviderConfig::JdCloud(config) => Ok(Box::new(
            ddns_provider_jdcloud::JdCloudHandler::new(spec, config)?,
        )),
        #[cfg(feature = "rfc2136")]
        ProviderConfig::Rfc2136(config) => Ok(Box::new(
            ddns_provider_rfc2136::Rfc2136Handler::new(spec, config)?,
        )),
        #[allow(unreachable_patterns)]
        other => bail!("{} support is not compiled into this build", other.kind()),
    }
}
