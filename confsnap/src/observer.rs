//! Run observers: the logging and reporting sink handed to the orchestrator.
//!
//! Nothing in the collector logs through global configuration of its own;
//! progress is reported to a [`RunObserver`] the caller constructs and
//! passes in. [`LogObserver`] forwards to the `log` facade.

use log::{error, info, warn};

use crate::error::Error;
use crate::fetch::OutputKind;
use crate::inventory::DeviceDescriptor;
use crate::report::{FetchResult, Outcome, RunReport};
use crate::task::Step;

/// Receives progress events from a run.
///
/// Called concurrently from device tasks; implementations must be cheap
/// and must not block.
#[allow(unused_variables)]
pub trait RunObserver: Send + Sync {
    fn run_started(&self, run_id: &str, devices: usize, kinds: &[OutputKind]) {}

    fn device_started(&self, device: &DeviceDescriptor) {}

    fn connected(&self, device: &DeviceDescriptor) {}

    /// A step failed transiently and will be attempted again.
    fn retrying(&self, device: &str, step: Step, attempt: u32, error: &Error) {}

    /// A fetch request reached its final outcome.
    fn fetch_resolved(&self, result: &FetchResult) {}

    /// The close step ran; `error` is set if it failed.
    fn session_closed(&self, device: &str, error: Option<&Error>) {}

    fn device_finished(&self, device: &str, results: &[FetchResult]) {}

    fn run_finished(&self, report: &RunReport) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Observer that logs progress through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn run_started(&self, run_id: &str, devices: usize, kinds: &[OutputKind]) {
        let kinds: Vec<&str> = kinds.iter().map(|k| k.extension()).collect();
        info!(
            "run {}: collecting [{}] from {} device(s)",
            run_id,
            kinds.join(", "),
            devices
        );
    }

    fn device_started(&self, device: &DeviceDescriptor) {
        info!(
            "connecting to {} ({}:{})",
            device.name, device.address, device.port
        );
    }

    fn connected(&self, device: &DeviceDescriptor) {
        info!("connected to {} ({})", device.name, device.address);
    }

    fn retrying(&self, device: &str, step: Step, attempt: u32, error: &Error) {
        warn!("{}: {} attempt {} failed, retrying: {}", device, step, attempt, error);
    }

    fn fetch_resolved(&self, result: &FetchResult) {
        match &result.outcome {
            Outcome::Stored { path, bytes, .. } => info!(
                "{}: {} configuration stored in {} ({} bytes)",
                result.device,
                result.kind,
                path.display(),
                bytes
            ),
            Outcome::Failed { error, message } => error!(
                "{}: could not collect {} configuration ({}): {}",
                result.device, result.kind, error, message
            ),
        }
    }

    fn session_closed(&self, device: &str, error: Option<&Error>) {
        match error {
            None => info!("closed connection with {}", device),
            Some(e) => warn!("could not close the connection with {}: {}", device, e),
        }
    }

    fn run_finished(&self, report: &RunReport) {
        let summary = report.summary();
        info!(
            "run {}: {}/{} configurations stored, {} device(s) complete, {} partial, {} failed",
            report.run_id,
            summary.stored,
            summary.fetches,
            summary.complete.len(),
            summary.partial.len(),
            summary.failed_devices.len()
        );
    }
}
