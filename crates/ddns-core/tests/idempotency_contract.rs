//! Architectural Contract Test: Idempotency & Identifier Caching
//!
//! This test verifies that repeated passes converge and that handlers reuse
//! the identifiers they resolved.
//!
//! Constraints verified:
//! - Same detected and recorded address → no create/update, pass after pass
//! - After a create, the next get does not re-resolve cached identifiers
//! - A later address change produces exactly one update
//!
//! If this test fails, reconciliation is not idempotent.

mod common;

use common::*;
use ddns_core::{CancellationToken, ReconcileOutcome, ReconciliationInstance};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn repeated_passes_write_once() {
    let (handler, state) = MockHandler::new("");
    let mut instance = ReconciliationInstance::new(
        record_spec("home", "*/5 * * * *"),
        Box::new(StaticDetector::new("198.51.100.7")),
        Box::new(handler),
    );
    let ctx = CancellationToken::new();

    for _ in 0..5 {
        instance.do_update(&ctx).await.unwrap();
    }

    assert_eq!(state.create_count(), 1);
    assert_eq!(state.update_count(), 0);
    assert_eq!(state.get_calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn create_then_get_reuses_cached_identifiers() {
    let (handler, state) = MockHandler::new("");
    let mut instance = ReconciliationInstance::new(
        record_spec("home", "*/5 * * * *"),
        Box::new(StaticDetector::new("198.51.100.7")),
        Box::new(handler),
    );
    let ctx = CancellationToken::new();

    let first = instance.do_update(&ctx).await.unwrap();
    let second = instance.do_update(&ctx).await.unwrap();

    assert!(matches!(first, ReconcileOutcome::Created { .. }));
    assert!(matches!(second, ReconcileOutcome::Unchanged { .. }));
    assert_eq!(state.zone_lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn address_change_updates_exactly_once() {
    let detector = StaticDetector::new("198.51.100.7");
    let address = detector.address_handle();
    let (handler, state) = MockHandler::new("198.51.100.7");
    let mut instance = ReconciliationInstance::new(
        record_spec("home", "*/5 * * * *"),
        Box::new(detector),
        Box::new(handler),
    );
    let ctx = CancellationToken::new();

    instance.do_update(&ctx).await.unwrap();
    *address.lock().unwrap() = "198.51.100.8".to_string();
    instance.do_update(&ctx).await.unwrap();
    instance.do_update(&ctx).await.unwrap();

    assert_eq!(*state.updated.lock().unwrap(), vec!["198.51.100.8".to_string()]);
    assert_eq!(state.remote(), "198.51.100.8");
}
