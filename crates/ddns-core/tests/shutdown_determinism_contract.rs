//! Architectural Contract Test: Manager Lifecycle & Shutdown Determinism
//!
//! This test verifies that the instance manager schedules every record and
//! stops within its grace period once the root token is cancelled.
//!
//! Constraints verified:
//! - Duplicate or missing records are rejected at construction
//! - Every instance is reconciled by its own job
//! - Cancelling the root token makes `run` return promptly
//! - Pass errors never escape the manager
//!
//! If this test fails, the daemon may hang or exit on a single bad record.

mod common;

use common::*;
use ddns_core::{CancellationToken, Error, InstanceManager, ReconciliationInstance};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

const EVERY_SECOND: &str = "* * * * * *";

fn instance(name: &str, address: &str) -> (ReconciliationInstance, HandlerState) {
    let (handler, state) = MockHandler::new("");
    let instance = ReconciliationInstance::new(
        record_spec(name, EVERY_SECOND),
        Box::new(StaticDetector::new(address)),
        Box::new(handler),
    );
    (instance, state)
}

#[test]
fn duplicate_names_are_rejected() {
    let (a, _) = instance("home", "198.51.100.1");
    let (b, _) = instance("home", "198.51.100.2");

    let result = InstanceManager::new(vec![a, b]);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn empty_configuration_is_rejected() {
    assert!(matches!(InstanceManager::new(Vec::new()), Err(Error::Config(_))));
}

#[tokio::test]
async fn every_record_is_reconciled_then_shutdown_is_prompt() {
    let (a, state_a) = instance("home", "198.51.100.1");
    let (b, state_b) = instance("office", "198.51.100.2");

    let manager = InstanceManager::new(vec![a, b])
        .unwrap()
        .with_grace(Duration::from_secs(2));
    assert_eq!(manager.names(), ["home".to_string(), "office".to_string()]);

    let ctx = CancellationToken::new();
    let handle = tokio::spawn(manager.run(ctx.clone()));

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let started = Instant::now();
    ctx.cancel();
    handle.await.unwrap().unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(state_a.create_count(), 1);
    assert_eq!(state_b.create_count(), 1);
    assert_eq!(state_a.remote(), "198.51.100.1");
    assert_eq!(state_b.remote(), "198.51.100.2");
}

#[tokio::test]
async fn failing_record_does_not_stop_the_others() {
    let (handler, failing_state) = MockHandler::failing_get();
    let failing = ReconciliationInstance::new(
        record_spec("broken", EVERY_SECOND),
        Box::new(StaticDetector::new("198.51.100.3")),
        Box::new(handler),
    );
    let (healthy, healthy_state) = instance("home", "198.51.100.1");

    let manager = InstanceManager::new(vec![failing, healthy]).unwrap();
    let ctx = CancellationToken::new();
    let handle = tokio::spawn(manager.run(ctx.clone()));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    ctx.cancel();

    assert!(handle.await.unwrap().is_ok());
    assert!(failing_state.get_calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(healthy_state.create_count(), 1);
}
