// # Address Detector Trait
//
// Defines the interface for finding the address a record should point at.
//
// ## Implementations
//
// - Network interface inspection: `ddns-ip-iface` crate
// - Third-party HTTP lookup: `ddns-ip-http` crate
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::AddressDetector;
// use tokio_util::sync::CancellationToken;
//
// async fn current(detector: &dyn AddressDetector) -> ddns_core::Result<String> {
//     let ctx = CancellationToken::new();
//     detector.detect(&ctx).await
// }
// ```

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Trait for address detection strategies
///
/// A detector is consulted once per reconcile pass. It owns its own family
/// filter and [`LocalAddressPolicy`](crate::LocalAddressPolicy), so the value
/// it returns is always publishable as-is.
///
/// # Cancellation
///
/// `detect` must return promptly with a cancellation error once `ctx` is
/// cancelled, and must bound its own network calls.
#[async_trait]
pub trait AddressDetector: Send + Sync {
    /// Detect the address to publish
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: A valid address of the configured family
    /// - `Err(Error)`: Transport failure, timeout, invalid payload or policy violation
    async fn detect(&self, ctx: &CancellationToken) -> crate::Result<String>;

    /// Short strategy name (for logging)
    fn method(&self) -> &'static str;
}
