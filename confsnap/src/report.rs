//! Fetch results and the run report.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use log::warn;
use serde::Serialize;

use crate::error::Error;
use crate::fetch::OutputKind;
use crate::inventory::{DeviceDescriptor, Inventory};
use crate::observer::RunObserver;
use crate::task::Step;

/// Why a fetch did not produce an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Device unreachable or login rejected.
    Connect,
    /// The device did not return the requested output.
    Request,
    /// The artifact could not be stored locally.
    Write,
    /// The run deadline elapsed before the fetch resolved.
    Timeout,
    /// The device task died without resolving the fetch.
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Connect => "connect",
            FailureKind::Request => "request",
            FailureKind::Write => "write",
            FailureKind::Timeout => "timeout",
            FailureKind::Internal => "internal",
        })
    }
}

/// Outcome of one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Stored {
        path: PathBuf,
        bytes: usize,
        content_type: &'static str,
    },
    Failed {
        error: FailureKind,
        message: String,
    },
}

/// Result of one (device, kind) fetch request.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub device: String,
    pub kind: OutputKind,
    pub outcome: Outcome,
    pub timestamp: DateTime<Local>,

    /// Fetch attempts made (0 when the fetch was never attempted).
    pub attempts: u32,
}

impl FetchResult {
    /// Successful fetch stored at `path`.
    pub fn stored(device: &str, kind: OutputKind, path: PathBuf, bytes: usize, attempts: u32) -> Self {
        Self {
            device: device.to_string(),
            kind,
            outcome: Outcome::Stored {
                path,
                bytes,
                content_type: kind.content_type(),
            },
            timestamp: Local::now(),
            attempts,
        }
    }

    /// Failed fetch.
    pub fn failed(
        device: &str,
        kind: OutputKind,
        error: FailureKind,
        message: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            device: device.to_string(),
            kind,
            outcome: Outcome::Failed {
                error,
                message: message.into(),
            },
            timestamp: Local::now(),
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Stored { .. })
    }

    /// Failure classification, if the fetch failed.
    pub fn failure(&self) -> Option<FailureKind> {
        match self.outcome {
            Outcome::Failed { error, .. } => Some(error),
            Outcome::Stored { .. } => None,
        }
    }

    /// Artifact location, if the fetch succeeded.
    pub fn path(&self) -> Option<&PathBuf> {
        match &self.outcome {
            Outcome::Stored { path, .. } => Some(path),
            Outcome::Failed { .. } => None,
        }
    }
}

/// Per-device verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Every requested kind was stored.
    Complete,
    /// Some kinds were stored, some failed.
    Partial,
    /// No kind was stored.
    Failed,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceStatus::Complete => "complete",
            DeviceStatus::Partial => "partial",
            DeviceStatus::Failed => "failed",
        })
    }
}

fn status_of(results: &[FetchResult]) -> DeviceStatus {
    let stored = results.iter().filter(|r| r.is_success()).count();
    if stored == results.len() {
        DeviceStatus::Complete
    } else if stored == 0 {
        DeviceStatus::Failed
    } else {
        DeviceStatus::Partial
    }
}

/// Aggregate outcome of one run.
///
/// Devices are listed in inventory order and each device's results in
/// requested kind order, whatever order the tasks finished in.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub deadline_exceeded: bool,
    pub devices: IndexMap<String, Vec<FetchResult>>,
}

impl RunReport {
    /// Results for one device.
    pub fn results(&self, device: &str) -> Option<&[FetchResult]> {
        self.devices.get(device).map(Vec::as_slice)
    }

    /// All results, device by device.
    pub fn iter(&self) -> impl Iterator<Item = &FetchResult> {
        self.devices.values().flatten()
    }

    /// Number of results across all devices.
    pub fn total_results(&self) -> usize {
        self.devices.values().map(Vec::len).sum()
    }

    pub fn device_status(&self, device: &str) -> Option<DeviceStatus> {
        self.devices.get(device).map(|r| status_of(r))
    }

    /// True when no device stored anything although something was requested.
    pub fn all_failed(&self) -> bool {
        self.total_results() > 0
            && self
                .devices
                .values()
                .all(|r| status_of(r) == DeviceStatus::Failed)
    }

    /// Process exit status: 0 all stored, 2 some failures, 1 nothing stored.
    pub fn exit_code(&self) -> u8 {
        if self.all_failed() {
            1
        } else if self.iter().all(FetchResult::is_success) {
            0
        } else {
            2
        }
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            devices: self.devices.len(),
            fetches: 0,
            stored: 0,
            failed: 0,
            complete: Vec::new(),
            partial: Vec::new(),
            failed_devices: Vec::new(),
        };

        for (device, results) in &self.devices {
            summary.fetches += results.len();
            summary.stored += results.iter().filter(|r| r.is_success()).count();
            match status_of(results) {
                DeviceStatus::Complete => summary.complete.push(device.clone()),
                DeviceStatus::Partial => summary.partial.push(device.clone()),
                DeviceStatus::Failed => summary.failed_devices.push(device.clone()),
            }
        }
        summary.failed = summary.fetches - summary.stored;
        summary
    }
}

/// Counts and device lists derived from a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub devices: usize,
    pub fetches: usize,
    pub stored: usize,
    pub failed: usize,
    pub complete: Vec<String>,
    pub partial: Vec<String>,
    pub failed_devices: Vec<String>,
}

/// Incrementally assembled report; the run's single synchronization point.
///
/// Sits between the device tasks and the caller's observer: every
/// resolved fetch is appended under a mutex, then forwarded.
pub(crate) struct ReportBuilder {
    run_id: String,
    started_at: DateTime<Local>,
    devices: Vec<String>,
    kinds: Vec<OutputKind>,
    results: Mutex<HashMap<String, Vec<FetchResult>>>,
    inner: Arc<dyn RunObserver>,
}

impl ReportBuilder {
    pub(crate) fn new(
        run_id: impl Into<String>,
        inventory: &Inventory,
        kinds: &[OutputKind],
        inner: Arc<dyn RunObserver>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Local::now(),
            devices: inventory.devices().iter().map(|d| d.name.clone()).collect(),
            kinds: kinds.to_vec(),
            results: Mutex::new(HashMap::new()),
            inner,
        }
    }

    /// Record `error` for every kind of `device` that has no result yet.
    pub(crate) fn resolve_remaining(&self, device: &str, error: FailureKind, message: &str) {
        let missing: Vec<OutputKind> = {
            let results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
            let done = results.get(device);
            self.kinds
                .iter()
                .copied()
                .filter(|k| !done.is_some_and(|r| r.iter().any(|x| x.kind == *k)))
                .collect()
        };

        for kind in missing {
            self.fetch_resolved(&FetchResult::failed(device, kind, error, message, 0));
        }
    }

    /// Freeze the report, filling any unresolved pair.
    pub(crate) fn finish(&self, deadline_exceeded: bool) -> RunReport {
        let (error, message) = if deadline_exceeded {
            (FailureKind::Timeout, "run deadline elapsed before the fetch resolved")
        } else {
            (FailureKind::Internal, "device task ended without resolving the fetch")
        };
        for device in &self.devices {
            self.resolve_remaining(device, error, message);
        }

        let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        let devices = self
            .devices
            .iter()
            .map(|device| {
                let mut entries = results.remove(device).unwrap_or_default();
                entries.sort_by_key(|r| self.kinds.iter().position(|k| *k == r.kind));
                (device.clone(), entries)
            })
            .collect();

        RunReport {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            finished_at: Local::now(),
            deadline_exceeded,
            devices,
        }
    }
}

impl RunObserver for ReportBuilder {
    fn run_started(&self, run_id: &str, devices: usize, kinds: &[OutputKind]) {
        self.inner.run_started(run_id, devices, kinds);
    }

    fn device_started(&self, device: &DeviceDescriptor) {
        self.inner.device_started(device);
    }

    fn connected(&self, device: &DeviceDescriptor) {
        self.inner.connected(device);
    }

    fn retrying(&self, device: &str, step: Step, attempt: u32, error: &Error) {
        self.inner.retrying(device, step, attempt, error);
    }

    fn fetch_resolved(&self, result: &FetchResult) {
        {
            let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
            let entries = results.entry(result.device.clone()).or_default();
            if entries.iter().any(|r| r.kind == result.kind) {
                warn!(
                    "{}: ignoring second result for {} configuration",
                    result.device, result.kind
                );
                return;
            }
            entries.push(result.clone());
        }
        self.inner.fetch_resolved(result);
    }

    fn session_closed(&self, device: &str, error: Option<&Error>) {
        self.inner.session_closed(device, error);
    }

    fn device_finished(&self, device: &str, results: &[FetchResult]) {
        self.inner.device_finished(device, results);
    }

    fn run_finished(&self, report: &RunReport) {
        self.inner.run_finished(report);
    }
}
