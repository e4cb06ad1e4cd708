//! Liveness endpoint
//!
//! `GET /ping` answers `pong`. The server runs beside the instance manager,
//! stops accepting connections once the root token is cancelled and gets a
//! short drain period before it is aborted.

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";

/// Time allowed for open connections after cancellation
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn router() -> Router {
    Router::new().route("/ping", get(ping))
}

async fn ping() -> &'static str {
    "pong"
}

/// A bound, not yet serving, health endpoint
pub struct HealthServer {
    listener: TcpListener,
}

impl HealthServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind health endpoint on {}", addr))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("health endpoint has no local address")
    }

    /// Serve until `ctx` is cancelled
    pub fn spawn(self, ctx: CancellationToken) -> HealthHandle {
        match self.local_addr() {
            Ok(addr) => info!("Health endpoint listening on {}", addr),
            Err(e) => warn!("{:#}", e),
        }

        let listener = self.listener;
        let task = tokio::spawn(async move {
            axum::serve(listener, router())
                .with_graceful_shutdown(async move { ctx.cancelled().await })
                .await
                .context("health endpoint failed")
        });

        HealthHandle { task }
    }
}

/// Running health endpoint
pub struct HealthHandle {
    task: JoinHandle<Result<()>>,
}

impl HealthHandle {
    /// Wait for the server to drain after its token was cancelled
    pub async fn stop(mut self) {
        match tokio::time::timeout(DRAIN_TIMEOUT, &mut self.task).await {
            Ok(Ok(Ok(()))) => info!("Health endpoint stopped"),
            Ok(Ok(Err(e))) => error!("{:#}", e),
            Ok(Err(e)) => error!("Health endpoint task failed: {}", e),
            Err(_) => {
                warn!("Health endpoint still busy after {:?}, aborting", DRAIN_TIMEOUT);
                self.task.abort();
            }
        }
    }

    pub fn abort(self) {
        self.task.abort();
    }
}
