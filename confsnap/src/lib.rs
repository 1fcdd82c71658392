//! # Confsnap
//!
//! Concurrent configuration snapshot collector for network device fleets.
//!
//! Confsnap logs into every device of an inventory, requests the running
//! configuration in several output formats, and writes each one to a
//! timestamped file. Devices are collected in parallel under a
//! concurrency limit and an optional run deadline; a device that fails
//! never stops the others.
//!
//! ## Features
//!
//! - Async SSH CLI sessions via russh, with scrapli-style prompt matching
//! - Juniper Junos support (XML, `set` and curly-brace text)
//! - Per-step timeouts, bounded retries for transient failures
//! - Atomic, collision-free artifact publishing
//! - A run report with one result per device and format
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use confsnap::inventory::{Credentials, DeviceDescriptor, Inventory};
//! use confsnap::platform::PlatformDefinition;
//! use confsnap::{FleetOrchestrator, LogObserver, OutputKind, SshConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), confsnap::Error> {
//!     let credentials = Arc::new(Credentials::password("root", "secret"));
//!     let inventory: Inventory = [
//!         DeviceDescriptor::new("PE0", "10.1.1.0", credentials.clone()),
//!         DeviceDescriptor::new("PE1", "10.1.1.1", credentials),
//!     ]
//!     .into_iter()
//!     .collect();
//!
//!     let connector = SshConnector::new(PlatformDefinition::by_name("juniper_junos")?);
//!     let report = FleetOrchestrator::new(connector, "backups")
//!         .observer(Arc::new(LogObserver))
//!         .run(&inventory, &OutputKind::ALL)
//!         .await?;
//!
//!     for result in report.iter() {
//!         println!("{} {}: {:?}", result.device, result.kind, result.outcome);
//!     }
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod channel;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fleet;
pub mod inventory;
pub mod observer;
pub mod platform;
pub mod report;
pub mod session;
pub mod task;
pub mod transport;

// Re-export main types for convenience
pub use artifact::ArtifactWriter;
pub use config::{CollectorSettings, FleetFile};
pub use error::{Error, Result};
pub use fetch::OutputKind;
pub use fleet::FleetOrchestrator;
pub use inventory::{Credentials, DeviceDescriptor, Inventory};
pub use observer::{LogObserver, NoopObserver, RunObserver};
pub use platform::PlatformDefinition;
pub use report::{DeviceStatus, FailureKind, FetchResult, Outcome, RunReport, RunSummary};
pub use session::{CliSession, Connector, Session, SshConnector};
pub use task::{DeviceTask, TaskPolicy};
