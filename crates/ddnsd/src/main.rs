// # ddnsd - DDNS Daemon
//
// Thin integration layer: reads the environment and the configuration file,
// builds one reconciliation instance per record and hands them to the
// core's instance manager until a shutdown signal arrives. No DNS or
// detection logic lives here.
//
// ## Configuration
//
// ### Environment
// - `DDNS_CONFIG`: Path to the configuration file (default `/etc/ddns/config.yaml`)
// - `DDNS_LOG_LEVEL`: trace, debug, info, warn or error (default info)
// - `DDNS_SHUTDOWN_GRACE_SECS`: Time allowed for in-flight passes on shutdown (1-300, default 10)
// - `DDNS_HEALTH_ADDR`: Listen address of the `/ping` liveness endpoint (default `0.0.0.0:8080`)
//
// ### File
// YAML (`.yaml`, `.yml`) or JSON (`.json`) with `ddns`, `detection` and
// `provider` lists; see `config_file`.
//
// ## Example
//
// ```bash
// export DDNS_CONFIG=/etc/ddns/config.yaml
// export DDNS_LOG_LEVEL=debug
//
// ddnsd
// ```

mod config_file;
mod factory;
mod health;

use anyhow::{Context, Result};
use ddns_core::{CronScheduler, InstanceManager, ReconciliationInstance};
use health::{DEFAULT_HEALTH_ADDR, HealthServer};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

const DEFAULT_CONFIG_PATH: &str = "/etc/ddns/config.yaml";
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error, or a second signal during shutdown
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DdnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error, startup failure or forced shutdown
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DdnsExitCode> for ExitCode {
    fn from(code: DdnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// How the daemon stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    /// The manager drained within its grace period
    Graceful,
    /// A second signal arrived before the manager finished
    Forced,
}

/// Settings taken from the environment
#[derive(Debug)]
struct DaemonConfig {
    config_path: PathBuf,
    log_level: String,
    shutdown_grace_secs: u64,
    health_addr: String,
}

impl DaemonConfig {
    /// Load settings from environment variables
    fn from_env() -> Result<Self> {
        let shutdown_grace_secs = match env::var("DDNS_SHUTDOWN_GRACE_SECS") {
            Ok(raw) => raw.trim().parse().with_context(|| {
                format!("DDNS_SHUTDOWN_GRACE_SECS must be a number of seconds. Got: {}", raw)
            })?,
            Err(_) => DEFAULT_SHUTDOWN_GRACE_SECS,
        };

        Ok(Self {
            config_path: env::var("DDNS_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
            log_level: env::var("DDNS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            shutdown_grace_secs,
            health_addr: env::var("DDNS_HEALTH_ADDR")
                .unwrap_or_else(|_| DEFAULT_HEALTH_ADDR.to_string()),
        })
    }

    /// Validate the settings
    fn validate(&self) -> Result<()> {
        if self.config_path.as_os_str().is_empty() {
            anyhow::bail!("DDNS_CONFIG cannot be empty");
        }

        if !(1..=300).contains(&self.shutdown_grace_secs) {
            anyhow::bail!(
                "DDNS_SHUTDOWN_GRACE_SECS must be between 1 and 300 seconds. Got: {}",
                self.shutdown_grace_secs
            );
        }

        self.level()?;
        self.health_addr()?;
        Ok(())
    }

    fn level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "DDNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }

    fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    fn health_addr(&self) -> Result<SocketAddr> {
        self.health_addr.trim().parse().with_context(|| {
            format!("DDNS_HEALTH_ADDR must be an ip:port address. Got: {}", self.health_addr)
        })
    }
}

fn main() -> ExitCode {
    let config = match DaemonConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return DdnsExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return DdnsExitCode::ConfigError.into();
    }

    let log_level = config.level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DdnsExitCode::ConfigError.into();
    }

    info!("Starting ddnsd daemon");

    let specs = match config_file::load(&config.config_path) {
        Ok(specs) => specs,
        Err(e) => {
            error!("Failed to load {}: {:#}", config.config_path.display(), e);
            return DdnsExitCode::ConfigError.into();
        }
    };
    info!(
        "Configuration loaded from {}: {} record(s)",
        config.config_path.display(),
        specs.len()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DdnsExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        let instances = match factory::build_instances(specs) {
            Ok(instances) => instances,
            Err(e) => {
                error!("Failed to set up records: {:#}", e);
                return DdnsExitCode::ConfigError;
            }
        };

        let health = match config.health_addr() {
            Ok(addr) => HealthServer::bind(addr).await,
            Err(e) => Err(e),
        };
        let health = match health {
            Ok(health) => health,
            Err(e) => {
                error!("Failed to start health endpoint: {:#}", e);
                return DdnsExitCode::ConfigError;
            }
        };

        match run_daemon(instances, config.shutdown_grace(), health).await {
            Ok(Shutdown::Graceful) => DdnsExitCode::CleanShutdown,
            Ok(Shutdown::Forced) => DdnsExitCode::ConfigError,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                DdnsExitCode::RuntimeError
            }
        }
    });

    // Blocking lookups may still sit in the pool after a forced stop
    rt.shutdown_timeout(Duration::from_secs(1));

    result.into()
}

/// Run the instance manager and the health endpoint until a shutdown signal
async fn run_daemon(
    instances: Vec<ReconciliationInstance>,
    grace: Duration,
    health: HealthServer,
) -> Result<Shutdown> {
    let mut signals = ShutdownSignals::install()?;
    let root = CancellationToken::new();

    let manager =
        InstanceManager::with_scheduler(instances, CronScheduler::with_token(root.child_token()))?
            .with_grace(grace);
    for name in manager.names() {
        info!("Managing record: {}", name);
    }

    let health = health.spawn(root.child_token());
    let mut task = tokio::spawn(manager.run(root.clone()));

    tokio::select! {
        signal = signals.recv() => {
            info!("Received shutdown signal: {}", signal);
        }
        joined = &mut task => {
            root.cancel();
            health.stop().await;
            joined.context("instance manager task failed")??;
            anyhow::bail!("instance manager stopped unexpectedly");
        }
    }

    info!("Shutting down daemon (grace {:?})", grace);
    root.cancel();

    tokio::select! {
        joined = &mut task => {
            health.stop().await;
            joined.context("instance manager task failed")??;
            info!("Shutdown complete");
            Ok(Shutdown::Graceful)
        }
        signal = signals.recv() => {
            warn!("Received {} during shutdown, exiting immediately", signal);
            task.abort();
            health.abort();
            Ok(Shutdown::Forced)
        }
    }
}

/// SIGTERM and SIGINT listeners, kept alive for the whole shutdown
#[cfg(unix)]
struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn install() -> Result<Self> {
        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;
        Ok(Self { sigterm, sigint })
    }

    /// Wait for the next signal and return its name
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }
}

/// Fallback for non-Unix platforms (CTRL-C only)
#[cfg(not(unix))]
struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to wait for CTRL-C: {}", e);
        }
        "CTRL-C"
    }
}
