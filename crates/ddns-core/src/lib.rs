// # ddns-core
//
// Core library for cron-driven DNS record reconciliation.
//
// ## Architecture Overview
//
// This library keeps DNS records pointed at a host's current address:
// - **AddressDetector**: Trait for finding the address that should be published
// - **DnsUpdateHandler**: Trait for reading/creating/updating one record on a backend
// - **ReconciliationInstance**: One record's Detect → Get → Create/Update/Skip pass
// - **InstanceManager**: Schedules one job per instance and shuts down gracefully
// - **Scheduler**: Cron-driven job runner with skip-if-running semantics
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from backend implementations
// 2. **Sum-typed configuration**: Exactly one provider and one detection method per record
// 3. **Stateless passes**: The backend is re-read on every pass; handlers only cache ids
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Bounded calls**: Every outbound call observes a timeout and the root cancellation token

pub mod address;
pub mod config;
pub mod error;
pub mod instance;
pub mod manager;
pub mod pagination;
pub mod scheduler;
pub mod timeout;
pub mod traits;

// Re-export core types for convenience
pub use address::{AddressFamily, LocalAddressPolicy};
pub use config::{DetectionConfig, DetectionMethod, ProviderConfig, RecordSpec, Secret};
pub use error::{Error, Result};
pub use instance::{Phase, ReconcileOutcome, ReconciliationInstance};
pub use manager::InstanceManager;
pub use scheduler::{CronScheduler, Scheduler};
pub use traits::{AddressDetector, DnsUpdateHandler};

pub use tokio_util::sync::CancellationToken;
