//! Architectural Contract Test: Bounded Calls & Cancellation
//!
//! This test verifies that slow backends cannot hang a pass.
//!
//! Constraints verified:
//! - A call exceeding its bound returns a cancellation error
//! - A cancelled root token interrupts an in-flight call promptly
//! - Nothing is written after an interrupted step
//!
//! If this test fails, shutdown can hang on a stuck backend.

mod common;

use common::*;
use ddns_core::{CancellationToken, ReconciliationInstance};
use std::time::{Duration, Instant};

#[tokio::test]
async fn slow_detection_times_out() {
    let (handler, state) = MockHandler::new("");
    let mut instance = ReconciliationInstance::new(
        record_spec("home", "*/5 * * * *"),
        Box::new(SlowDetector {
            budget: Duration::from_millis(50),
        }),
        Box::new(handler),
    );

    let started = Instant::now();
    let err = instance.do_update(&CancellationToken::new()).await.unwrap_err();

    assert!(err.is_cancellation(), "expected cancellation error, got {}", err);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(state.create_count(), 0);
}

#[tokio::test]
async fn root_cancellation_interrupts_pass() {
    let (handler, state) = MockHandler::new("");
    let mut instance = ReconciliationInstance::new(
        record_spec("home", "*/5 * * * *"),
        Box::new(SlowDetector {
            budget: Duration::from_secs(3600),
        }),
        Box::new(handler),
    );

    let ctx = CancellationToken::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = instance.do_update(&ctx).await.unwrap_err();

    assert!(err.is_cancellation());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(state.create_count(), 0);
}
