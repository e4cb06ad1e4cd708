// # Interface Address Detector
//
// This crate detects the address to publish by reading the addresses
// assigned to a named local network interface.
//
// ## How it works
//
// 1. Enumerate interface addresses with `getifaddrs(3)` (through `nix`) on a blocking thread
// 2. Keep addresses of the named interface while it is up, in kernel order
// 3. Drop addresses of the wrong family or unusable kind (loopback, link-local, ...)
// 4. Pick one with the record's [`LocalAddressPolicy`]
//
// ## Platform Support
//
// Enumeration is available on Unix targets. Elsewhere every detection fails
// with a detection error.

use ddns_core::address::{self, AddressFamily, LocalAddressPolicy};
use ddns_core::config::InterfaceDetection;
use ddns_core::timeout::{DETECTION_TIMEOUT, bounded};
use ddns_core::traits::AddressDetector;
use ddns_core::{Error, Result};
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Detects the address of a local network interface
#[derive(Debug, Clone)]
pub struct InterfaceDetector {
    interface: String,
    family: AddressFamily,
    policy: LocalAddressPolicy,
}

impl InterfaceDetector {
    /// Create a detector
    ///
    /// # Parameters
    ///
    /// - `interface`: Interface name, e.g. `eth0`
    /// - `family`: Address family of the managed record
    /// - `policy`: How local addresses compete with public ones
    pub fn new(interface: impl Into<String>, family: AddressFamily, policy: LocalAddressPolicy) -> Self {
        Self {
            interface: interface.into(),
            family,
            policy,
        }
    }

    /// Create a detector from its configuration block
    pub fn from_config(
        config: &InterfaceDetection,
        family: AddressFamily,
        policy: LocalAddressPolicy,
    ) -> Self {
        Self::new(config.name.clone(), family, policy)
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Select an address from the interface's addresses
    fn choose(&self, addresses: &[IpAddr]) -> Result<String> {
        for addr in addresses {
            debug!(interface = %self.interface, "candidate address {}", addr);
        }

        address::select(
            addresses.iter().map(|a| a.to_string()),
            self.family,
            self.policy,
        )
        .map_err(|e| Error::detection(format!("interface {}: {}", self.interface, e)))
    }
}

#[async_trait::async_trait]
impl AddressDetector for InterfaceDetector {
    async fn detect(&self, ctx: &CancellationToken) -> Result<String> {
        let name = self.interface.clone();

        let addresses = bounded(ctx, DETECTION_TIMEOUT, "interface enumeration", async move {
            tokio::task::spawn_blocking(move || sys::addresses_of(&name))
                .await
                .map_err(|e| Error::detection(format!("interface enumeration aborted: {}", e)))?
        })
        .await?;

        let addresses = addresses.ok_or_else(|| {
            Error::detection(format!("interface {} not found or down", self.interface))
        })?;

        let chosen = self.choose(&addresses)?;
        debug!(interface = %self.interface, "address selected: {}", chosen);
        Ok(chosen)
    }

    fn method(&self) -> &'static str {
        "interface"
    }
}

#[cfg(unix)]
mod sys {
    use ddns_core::{Error, Result};
    use nix::ifaddrs::getifaddrs;
    use nix::net::if_::InterfaceFlags;
    use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};

    /// Addresses of `name` in enumeration order, or `None` if it is absent or down
    pub(crate) fn addresses_of(name: &str) -> Result<Option<Vec<IpAddr>>> {
        let entries = getifaddrs().map_err(|e| Error::Network(e.into()))?;

        let mut found = false;
        let mut addresses = Vec::new();

        for entry in entries.filter(|e| e.interface_name == name) {
            if !entry.flags.contains(InterfaceFlags::IFF_UP) {
                continue;
            }
            found = true;

            let Some(address) = entry.address else {
                continue;
            };
            if let Some(v4) = address.as_sockaddr_in() {
                addresses.push(IpAddr::V4(*SocketAddrV4::from(*v4).ip()));
            } else if let Some(v6) = address.as_sockaddr_in6() {
                addresses.push(IpAddr::V6(*SocketAddrV6::from(*v6).ip()));
            }
        }

        Ok(found.then_some(addresses))
    }
}

#[cfg(not(unix))]
mod sys {
    use ddns_core::{Error, Result};
    use std::net::IpAddr;

    pub(crate) fn addresses_of(_name: &str) -> Result<Option<Vec<IpAddr>>> {
        Err(Error::detection(
            "interface detection is only supported on Unix platforms",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ips(list: &[&str]) -> Vec<IpAddr> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn first_public_address_wins_under_ignore() {
        let detector = InterfaceDetector::new("eth0", AddressFamily::V4, LocalAddressPolicy::Ignore);
        let addresses = ips(&["192.168.1.10", "203.0.113.7", "203.0.113.8"]);

        assert_eq!(detector.choose(&addresses).unwrap(), "203.0.113.7");
    }

    #[test]
    fn local_address_preferred_when_asked() {
        let detector = InterfaceDetector::new("eth0", AddressFamily::V4, LocalAddressPolicy::Prefer);
        let addresses = ips(&["203.0.113.7", "10.0.0.2"]);

        assert_eq!(detector.choose(&addresses).unwrap(), "10.0.0.2");
    }

    #[test]
    fn wrong_family_and_link_local_are_dropped() {
        let detector = InterfaceDetector::new("eth0", AddressFamily::V6, LocalAddressPolicy::Allow);
        let addresses = ips(&["203.0.113.7", "fe80::1", "fd00::5", "2001:db8::5"]);

        assert_eq!(detector.choose(&addresses).unwrap(), "2001:db8::5");
    }

    #[test]
    fn only_local_addresses_fail_under_ignore() {
        let detector = InterfaceDetector::new("eth0", AddressFamily::V4, LocalAddressPolicy::Ignore);
        let err = detector.choose(&ips(&["192.168.1.10"])).unwrap_err();

        assert!(matches!(err, Error::Detection(_)));
    }

    #[tokio::test]
    #[cfg(target_os = "linux")]
    async fn loopback_has_no_publishable_address() {
        let detector = InterfaceDetector::new("lo", AddressFamily::V4, LocalAddressPolicy::Allow);
        let err = detector.detect(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, Error::Detection(_)));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn loopback_enumerates_its_address() {
        let addresses = sys::addresses_of("lo").unwrap().unwrap();

        assert!(addresses.contains(&"127.0.0.1".parse::<IpAddr>().unwrap()));
        assert_eq!(sys::addresses_of("ddns-test-missing0").unwrap(), None);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn missing_interface_is_a_detection_error() {
        let detector = InterfaceDetector::new(
            "ddns-test-missing0",
            AddressFamily::V4,
            LocalAddressPolicy::Allow,
        );
        let err = detector.detect(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, Error::Detection(msg) if msg.contains("not found")));
    }
}
