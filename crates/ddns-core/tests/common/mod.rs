//! Test doubles and common utilities for architecture contract tests
//!
//! This module provides minimal detectors and handlers that record how the
//! core drives them, without talking to any real backend.

#![allow(dead_code)]

use ddns_core::config::{
    CloudflareConfig, DetectionConfig, DetectionMethod, InterfaceDetection, ProviderConfig,
    RecordSpec,
};
use ddns_core::error::{Error, Result};
use ddns_core::timeout::bounded;
use ddns_core::traits::{AddressDetector, DnsUpdateHandler};
use ddns_core::{AddressFamily, LocalAddressPolicy, Secret};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Build a minimal record spec
pub fn record_spec(name: &str, cron: &str) -> Arc<RecordSpec> {
    Arc::new(RecordSpec {
        name: name.to_string(),
        domain: "example.com".to_string(),
        subdomain: name.to_string(),
        family: AddressFamily::V4,
        cron: cron.to_string(),
        detection: DetectionConfig {
            policy: LocalAddressPolicy::Ignore,
            method: DetectionMethod::Interface(InterfaceDetection {
                name: "eth0".to_string(),
            }),
        },
        provider: ProviderConfig::Cloudflare(CloudflareConfig {
            api_token: Some(Secret::new("test-token")),
            ..Default::default()
        }),
    })
}

/// A detector returning a fixed address
pub struct StaticDetector {
    address: Arc<Mutex<String>>,
    calls: Arc<AtomicUsize>,
}

impl StaticDetector {
    pub fn new(address: &str) -> Self {
        Self {
            address: Arc::new(Mutex::new(address.to_string())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle for changing the address after the detector was moved
    pub fn address_handle(&self) -> Arc<Mutex<String>> {
        self.address.clone()
    }

    pub fn calls_handle(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait::async_trait]
impl AddressDetector for StaticDetector {
    async fn detect(&self, _ctx: &CancellationToken) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.address.lock().unwrap().clone())
    }

    fn method(&self) -> &'static str {
        "static"
    }
}

/// A detector that always fails
pub struct FailingDetector;

#[async_trait::async_trait]
impl AddressDetector for FailingDetector {
    async fn detect(&self, _ctx: &CancellationToken) -> Result<String> {
        Err(Error::detection("no public address found"))
    }

    fn method(&self) -> &'static str {
        "failing"
    }
}

/// A detector whose lookup takes far longer than its budget
pub struct SlowDetector {
    pub budget: Duration,
}

#[async_trait::async_trait]
impl AddressDetector for SlowDetector {
    async fn detect(&self, ctx: &CancellationToken) -> Result<String> {
        bounded(ctx, self.budget, "slow lookup", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("203.0.113.1".to_string())
        })
        .await
    }

    fn method(&self) -> &'static str {
        "slow"
    }
}

/// Shared view of what a [`MockHandler`] was asked to do
#[derive(Clone, Default)]
pub struct HandlerState {
    pub remote: Arc<Mutex<String>>,
    pub zone_lookups: Arc<AtomicUsize>,
    pub get_calls: Arc<AtomicUsize>,
    pub created: Arc<Mutex<Vec<String>>>,
    pub updated: Arc<Mutex<Vec<String>>>,
}

impl HandlerState {
    pub fn create_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn update_count(&self) -> usize {
        self.updated.lock().unwrap().len()
    }

    pub fn remote(&self) -> String {
        self.remote.lock().unwrap().clone()
    }
}

/// In-memory handler that caches a zone id like the REST backends do
pub struct MockHandler {
    state: HandlerState,
    zone_id: Option<String>,
    record_id: Option<String>,
    fail_get: bool,
}

impl MockHandler {
    /// Handler whose remote record currently holds `remote` ("" = absent)
    pub fn new(remote: &str) -> (Self, HandlerState) {
        let state = HandlerState::default();
        *state.remote.lock().unwrap() = remote.to_string();

        let handler = Self {
            state: state.clone(),
            zone_id: None,
            record_id: None,
            fail_get: false,
        };
        (handler, state)
    }

    pub fn failing_get() -> (Self, HandlerState) {
        let (mut handler, state) = Self::new("");
        handler.fail_get = true;
        (handler, state)
    }
}

#[async_trait::async_trait]
impl DnsUpdateHandler for MockHandler {
    async fn get(&mut self, _ctx: &CancellationToken) -> Result<String> {
        self.state.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get {
            return Err(Error::provider("mock", "backend unavailable"));
        }

        if self.zone_id.is_none() {
            self.state.zone_lookups.fetch_add(1, Ordering::SeqCst);
            self.zone_id = Some("zone-1".to_string());
        }

        let remote = self.state.remote();
        if !remote.is_empty() {
            self.record_id = Some("record-1".to_string());
        }
        Ok(remote)
    }

    async fn create(&mut self, _ctx: &CancellationToken, address: &str) -> Result<()> {
        if self.zone_id.is_none() {
            return Err(Error::missing_identifier("zone id"));
        }
        self.state.created.lock().unwrap().push(address.to_string());
        *self.state.remote.lock().unwrap() = address.to_string();
        self.record_id = Some("record-1".to_string());
        Ok(())
    }

    async fn update(&mut self, _ctx: &CancellationToken, new_address: &str) -> Result<()> {
        if self.record_id.is_none() {
            return Err(Error::missing_identifier("record id"));
        }
        self.state.updated.lock().unwrap().push(new_address.to_string());
        *self.state.remote.lock().unwrap() = new_address.to_string();
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
