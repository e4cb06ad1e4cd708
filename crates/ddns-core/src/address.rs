//! Address family classification and local-address policy
//!
//! Pure functions shared by every detector: decide whether a textual address
//! is publishable for a family, whether it is public or local, and which
//! candidate wins under a [`LocalAddressPolicy`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Address family of a managed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    /// IPv4, published as an `A` record
    #[serde(rename = "IPv4", alias = "ipv4", alias = "v4")]
    V4,
    /// IPv6, published as an `AAAA` record
    #[serde(rename = "IPv6", alias = "ipv6", alias = "v6")]
    V6,
}

impl AddressFamily {
    /// DNS record type for this family
    pub fn record_type(self) -> &'static str {
        match self {
            AddressFamily::V4 => "A",
            AddressFamily::V6 => "AAAA",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => f.write_str("IPv4"),
            AddressFamily::V6 => f.write_str("IPv6"),
        }
    }
}

/// How local (private, ULA) addresses compete with public ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LocalAddressPolicy {
    /// Only public addresses are acceptable
    #[default]
    Ignore,
    /// Public addresses win; a local address is used when no public one exists
    Allow,
    /// Local addresses win; a public address is used when no local one exists
    Prefer,
}

impl LocalAddressPolicy {
    /// Pick the address to publish from ordered public and local candidates
    ///
    /// The first candidate of the winning category is returned; candidates are
    /// never sorted.
    pub fn choose<S: AsRef<str>>(self, public: &[S], local: &[S]) -> Result<String> {
        let first = |set: &[S]| set.first().map(|a| a.as_ref().to_string());

        let chosen = match self {
            LocalAddressPolicy::Ignore => {
                return first(public)
                    .ok_or_else(|| Error::detection("no public address found"));
            }
            LocalAddressPolicy::Allow => first(public).or_else(|| first(local)),
            LocalAddressPolicy::Prefer => first(local).or_else(|| first(public)),
        };

        chosen.ok_or_else(|| Error::detection("no usable address found"))
    }
}

/// Routing class of a valid address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    /// Globally routable
    Public,
    /// Private, unique-local or otherwise site-scoped
    Local,
}

// (network, prefix length)
const V4_UNUSABLE: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(255, 255, 255, 255), 32),
];

const V4_LOCAL: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(198, 18, 0, 0), 15),
];

const V6_UNUSABLE: &[(Ipv6Addr, u8)] = &[
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0), 128),
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1), 128),
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0, 0), 96),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
    (Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8),
];

const V6_LOCAL: &[(Ipv6Addr, u8)] = &[(Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7)];

fn v4_in(addr: Ipv4Addr, blocks: &[(Ipv4Addr, u8)]) -> bool {
    let bits = u32::from(addr);
    blocks.iter().any(|&(net, len)| {
        let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
        bits & mask == u32::from(net) & mask
    })
}

fn v6_in(addr: Ipv6Addr, blocks: &[(Ipv6Addr, u8)]) -> bool {
    let bits = u128::from(addr);
    blocks.iter().any(|&(net, len)| {
        let mask = if len == 0 { 0 } else { u128::MAX << (128 - len) };
        bits & mask == u128::from(net) & mask
    })
}

/// Parse a dotted-quad, rejecting leading zeros in any octet
fn parse_v4(address: &str) -> Option<Ipv4Addr> {
    let leading_zero = address
        .split('.')
        .any(|octet| octet.len() > 1 && octet.starts_with('0'));
    if leading_zero {
        return None;
    }
    address.parse().ok()
}

/// Classify `address` for `family`
///
/// Returns `None` when the text is not a syntactically valid address of that
/// family, or when it falls in an unusable range (unspecified, loopback,
/// link-local, multicast, broadcast).
pub fn classify(address: &str, family: AddressFamily) -> Option<AddressClass> {
    match family {
        AddressFamily::V4 => {
            let addr = parse_v4(address)?;
            if v4_in(addr, V4_UNUSABLE) {
                None
            } else if v4_in(addr, V4_LOCAL) {
                Some(AddressClass::Local)
            } else {
                Some(AddressClass::Public)
            }
        }
        AddressFamily::V6 => {
            let addr: Ipv6Addr = address.parse().ok()?;
            if v6_in(addr, V6_UNUSABLE) {
                None
            } else if v6_in(addr, V6_LOCAL) {
                Some(AddressClass::Local)
            } else {
                Some(AddressClass::Public)
            }
        }
    }
}

/// Validate a single externally reported address against family and policy
///
/// A local address is only rejected under [`LocalAddressPolicy::Ignore`].
pub fn accept(address: &str, family: AddressFamily, policy: LocalAddressPolicy) -> Result<String> {
    match classify(address, family) {
        None => Err(Error::invalid_address(format!(
            "{:?} is not a usable {} address",
            address, family
        ))),
        Some(AddressClass::Local) if policy == LocalAddressPolicy::Ignore => Err(
            Error::detection(format!("local address {} is ignored by policy", address)),
        ),
        Some(_) => Ok(address.to_string()),
    }
}

/// Partition candidates into (public, local) keeping their order
///
/// Unusable or wrong-family candidates are dropped.
pub fn partition<I, S>(candidates: I, family: AddressFamily) -> (Vec<String>, Vec<String>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut public = Vec::new();
    let mut local = Vec::new();

    for candidate in candidates {
        let candidate = candidate.as_ref();
        match classify(candidate, family) {
            Some(AddressClass::Public) => public.push(candidate.to_string()),
            Some(AddressClass::Local) => local.push(candidate.to_string()),
            None => tracing::debug!("ignoring unusable address {}", candidate),
        }
    }

    (public, local)
}

/// Partition candidates and pick one under `policy`
pub fn select<I, S>(candidates: I, family: AddressFamily, policy: LocalAddressPolicy) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let (public, local) = partition(candidates, family);
    policy.choose(&public, &local)
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: &[&str] = &["203.0.113.5"];
    const L: &[&str] = &["192.168.1.5"];
    const NONE: &[&str] = &[];

    #[test]
    fn ignore_picks_public() {
        assert_eq!(LocalAddressPolicy::Ignore.choose(P, L).unwrap(), "203.0.113.5");
    }

    #[test]
    fn allow_picks_public_when_present() {
        assert_eq!(LocalAddressPolicy::Allow.choose(P, L).unwrap(), "203.0.113.5");
        assert_eq!(LocalAddressPolicy::Allow.choose(NONE, L).unwrap(), "192.168.1.5");
    }

    #[test]
    fn prefer_picks_local() {
        assert_eq!(LocalAddressPolicy::Prefer.choose(P, L).unwrap(), "192.168.1.5");
        assert_eq!(LocalAddressPolicy::Prefer.choose(NONE, L).unwrap(), "192.168.1.5");
        assert_eq!(LocalAddressPolicy::Prefer.choose(P, NONE).unwrap(), "203.0.113.5");
    }

    #[test]
    fn ignore_without_public_fails() {
        let err = LocalAddressPolicy::Ignore.choose(NONE, L).unwrap_err();
        assert!(matches!(err, Error::Detection(_)));
        assert!(LocalAddressPolicy::Allow.choose(NONE, NONE).is_err());
    }

    #[test]
    fn first_in_enumeration_order_wins() {
        let picked = select(
            ["198.51.100.9", "203.0.113.5", "10.0.0.1"],
            AddressFamily::V4,
            LocalAddressPolicy::Ignore,
        )
        .unwrap();
        assert_eq!(picked, "198.51.100.9");
    }

    #[test]
    fn classify_v4() {
        assert_eq!(classify("203.0.113.5", AddressFamily::V4), Some(AddressClass::Public));
        assert_eq!(classify("10.1.2.3", AddressFamily::V4), Some(AddressClass::Local));
        assert_eq!(classify("172.31.255.1", AddressFamily::V4), Some(AddressClass::Local));
        assert_eq!(classify("172.32.0.1", AddressFamily::V4), Some(AddressClass::Public));
        assert_eq!(classify("198.19.0.1", AddressFamily::V4), Some(AddressClass::Local));
        assert_eq!(classify("127.0.0.1", AddressFamily::V4), None);
        assert_eq!(classify("0.0.0.0", AddressFamily::V4), None);
        assert_eq!(classify("169.254.10.1", AddressFamily::V4), None);
        assert_eq!(classify("239.1.1.1", AddressFamily::V4), None);
        assert_eq!(classify("255.255.255.255", AddressFamily::V4), None);
        assert_eq!(classify("01.2.3.4", AddressFamily::V4), None);
        assert_eq!(classify("1.2.3", AddressFamily::V4), None);
    }

    #[test]
    fn classify_v6() {
        assert_eq!(classify("2001:db8::1", AddressFamily::V6), Some(AddressClass::Public));
        assert_eq!(classify("fd00::1", AddressFamily::V6), Some(AddressClass::Local));
        assert_eq!(classify("::1", AddressFamily::V6), None);
        assert_eq!(classify("::", AddressFamily::V6), None);
        assert_eq!(classify("fe80::1", AddressFamily::V6), None);
        assert_eq!(classify("ff02::1", AddressFamily::V6), None);
        assert_eq!(classify("1.2.3.4", AddressFamily::V6), None);
    }

    #[test]
    fn wrong_family_is_rejected() {
        let err = accept("2001:db8::1", AddressFamily::V4, LocalAddressPolicy::Allow).unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(_)));
    }

    #[test]
    fn local_accepted_under_prefer() {
        assert_eq!(
            accept("10.0.0.1", AddressFamily::V4, LocalAddressPolicy::Prefer).unwrap(),
            "10.0.0.1"
        );
        assert_eq!(
            select(["10.0.0.1"], AddressFamily::V4, LocalAddressPolicy::Prefer).unwrap(),
            "10.0.0.1"
        );
        assert!(accept("10.0.0.1", AddressFamily::V4, LocalAddressPolicy::Ignore).is_err());
    }

    #[test]
    fn family_serde_names() {
        let v4: AddressFamily = serde_json::from_str("\"IPv4\"").unwrap();
        let v6: AddressFamily = serde_json::from_str("\"v6\"").unwrap();
        assert_eq!(v4, AddressFamily::V4);
        assert_eq!(v6, AddressFamily::V6);
        assert_eq!(v6.record_type(), "AAAA");
    }
}
