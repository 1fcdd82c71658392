//! Fleet orchestrator: runs device tasks concurrently and builds the report.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use log::{debug, error, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::artifact::ArtifactWriter;
use crate::error::{ConfigError, Result};
use crate::fetch::{OutputKind, dedup_kinds};
use crate::inventory::Inventory;
use crate::observer::{NoopObserver, RunObserver};
use crate::report::{FailureKind, ReportBuilder, RunReport};
use crate::session::Connector;
use crate::task::{DeviceTask, TaskPolicy};

/// Default number of devices collected at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Extra time granted after the deadline on top of the close timeout.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Collects configuration from a whole inventory.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use confsnap::{FleetOrchestrator, LogObserver, OutputKind, SshConnector};
/// use confsnap::inventory::{Credentials, DeviceDescriptor, Inventory};
/// use confsnap::platform::PlatformDefinition;
///
/// # async fn example() -> Result<(), confsnap::Error> {
/// let credentials = Arc::new(Credentials::password("root", "secret"));
/// let mut inventory = Inventory::new();
/// inventory.push(DeviceDescriptor::new("PE0", "10.1.1.0", credentials))?;
///
/// let connector = SshConnector::new(PlatformDefinition::by_name("juniper_junos")?);
/// let report = FleetOrchestrator::new(connector, "backups")
///     .concurrency(8)
///     .deadline(Duration::from_secs(600))
///     .observer(Arc::new(LogObserver))
///     .run(&inventory, &OutputKind::ALL)
///     .await?;
///
/// println!("{} of {} stored", report.summary().stored, report.total_results());
/// # Ok(())
/// # }
/// ```
pub struct FleetOrchestrator<C: Connector> {
    connector: Arc<C>,
    output_dir: PathBuf,
    concurrency: usize,
    deadline: Option<Duration>,
    policy: TaskPolicy,
    observer: Arc<dyn RunObserver>,
}

impl<C: Connector> FleetOrchestrator<C> {
    /// Create an orchestrator writing artifacts into `output_dir`.
    pub fn new(connector: C, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            connector: Arc::new(connector),
            output_dir: output_dir.into(),
            concurrency: DEFAULT_CONCURRENCY,
            deadline: None,
            policy: TaskPolicy::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Maximum number of devices in flight.
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit;
        self
    }

    /// Overall run deadline.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Per-device timeouts and retries.
    pub fn policy(mut self, policy: TaskPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sink for progress events.
    pub fn observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Collect `kinds` from every device in `inventory`.
    ///
    /// Only setup problems (bad inventory, bad settings, unusable output
    /// directory) are returned as errors, and only before any device is
    /// contacted. Once dispatch begins the run always produces a report
    /// with one result per device and kind.
    pub async fn run(&self, inventory: &Inventory, kinds: &[OutputKind]) -> Result<RunReport> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid {
                message: "concurrency must be at least 1".to_string(),
            }
            .into());
        }
        inventory.validate()?;

        let kinds: Arc<[OutputKind]> = dedup_kinds(kinds).into();
        let run_id = Uuid::new_v4().simple().to_string();
        let writer = ArtifactWriter::create(&self.output_dir, run_id.as_str()).await?;

        let builder = Arc::new(ReportBuilder::new(
            run_id.as_str(),
            inventory,
            &kinds,
            self.observer.clone(),
        ));
        builder.run_started(&run_id, inventory.len(), &kinds);

        let task = Arc::new(DeviceTask::new(
            self.connector.clone(),
            writer,
            self.policy.clone(),
            builder.clone(),
        ));
        let cancel = CancellationToken::new();
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for device in inventory.devices().iter().cloned() {
            let task = task.clone();
            let builder = builder.clone();
            let kinds = kinds.clone();
            let cancel = cancel.clone();
            let permits = permits.clone();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    permit = permits.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };

                let outcome = AssertUnwindSafe(task.run(&device, &kinds, &cancel))
                    .catch_unwind()
                    .await;
                if outcome.is_err() {
                    error!("{}: device task panicked", device.name);
                    builder.resolve_remaining(
                        &device.name,
                        FailureKind::Internal,
                        "device task panicked",
                    );
                }
            });
        }

        let deadline_exceeded = match self.deadline {
            None => {
                drain(&mut tasks).await;
                false
            }
            Some(deadline) => {
                let finished = tokio::time::timeout(deadline, drain(&mut tasks)).await.is_ok();
                if !finished {
                    warn!(
                        "run {}: deadline of {:?} elapsed, cancelling {} device task(s)",
                        run_id,
                        deadline,
                        tasks.len()
                    );
                    cancel.cancel();
                    self.wind_down(&mut tasks).await;
                }
                !finished
            }
        };

        let report = builder.finish(deadline_exceeded);
        builder.run_finished(&report);
        Ok(report)
    }

    /// Give cancelled tasks time to record timeouts and close, then abort.
    async fn wind_down(&self, tasks: &mut JoinSet<()>) {
        let grace = self.policy.close_timeout + CANCEL_GRACE;
        if tokio::time::timeout(grace, drain(tasks)).await.is_err() {
            warn!("aborting {} device task(s) that ignored cancellation", tasks.len());
            tasks.abort_all();
            drain(tasks).await;
        }
    }
}

/// Wait for every task in the set.
async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            debug!("device task ended abnormally: {}", e);
        }
    }
}
