// # DNS Update Handler Trait
//
// Defines the interface for reading and writing one record on one backend.
//
// ## Implementations
//
// - Cloudflare: `ddns-provider-cloudflare`
// - Alibaba Cloud DNS: `ddns-provider-alicloud`
// - DNSPod: `ddns-provider-dnspod`
// - Huawei Cloud DNS: `ddns-provider-huaweicloud`
// - JD Cloud DNS: `ddns-provider-jdcloud`
// - RFC2136 dynamic update: `ddns-provider-rfc2136`

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Remark attached to records on backends that support one
pub const RECORD_COMMENT: &str = "Created/Updated by ddns";

/// Trait for DNS backend handlers
///
/// A handler is bound to exactly one record (domain, subdomain, type) at
/// construction time. It may cache backend identifiers (zone id, domain id,
/// record id) for the rest of the process; that is the only state it keeps.
///
/// # Contract
///
/// - `get` returns an empty string, not an error, when the record does not exist.
/// - `get` resolves and caches identifiers on first use and reuses them afterwards.
/// - Lookups match name and type exactly and walk every page of list results.
/// - `create` fails with [`Error::MissingIdentifier`](crate::Error::MissingIdentifier)
///   when a prerequisite identifier was never resolved.
/// - `update` fails the same way when no record identifier is known.
/// - Every outbound call is bounded by a per-call timeout and by `ctx`.
///
/// Handlers never retry. The schedule is the retry mechanism.
#[async_trait]
pub trait DnsUpdateHandler: Send + Sync {
    /// Current address of the record, or `""` if it does not exist
    async fn get(&mut self, ctx: &CancellationToken) -> crate::Result<String>;

    /// Create the record with `address`
    async fn create(&mut self, ctx: &CancellationToken, address: &str) -> crate::Result<()>;

    /// Point the existing record at `new_address`
    async fn update(&mut self, ctx: &CancellationToken, new_address: &str) -> crate::Result<()>;

    /// Backend name (e.g. "cloudflare", "rfc2136")
    fn provider_name(&self) -> &'static str;
}
