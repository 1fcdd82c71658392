//! Per-device collection task.
//!
//! One task drives one device through
//!
//! ```text
//! Connecting ─► Fetching(kind) ─► Persisting(kind) ─┬─► Closing ─► Done
//!                    ▲                              │
//!                    └──────── next kind ───────────┘
//! ```
//!
//! A failed step moves the task to `Errored(step, cause)` for that kind
//! only; the next kind is still attempted. A failed connect resolves every
//! kind at once. Whatever happens after a session was opened, the close
//! step runs exactly once.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::artifact::ArtifactWriter;
use crate::error::{ArtifactError, Error, TransportError};
use crate::fetch::{self, Fetched, OutputKind, RequestError};
use crate::inventory::DeviceDescriptor;
use crate::observer::RunObserver;
use crate::report::{FailureKind, FetchResult};
use crate::session::{Connector, Session};

/// Timeouts and retry limits for one device task.
#[derive(Debug, Clone)]
pub struct TaskPolicy {
    /// Limit for one connect attempt.
    pub connect_timeout: Duration,

    /// Limit for one fetch attempt.
    pub request_timeout: Duration,

    /// Limit for writing and publishing one artifact.
    pub write_timeout: Duration,

    /// Limit for the close step.
    pub close_timeout: Duration,

    /// Extra connect attempts after a transient failure.
    pub connect_retries: u32,

    /// Extra fetch attempts per kind after a transient failure.
    pub fetch_retries: u32,

    /// Fixed pause between attempts.
    pub retry_backoff: Duration,
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            write_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            connect_retries: 1,
            fetch_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// A step of the device task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    Fetch(OutputKind),
    Persist(OutputKind),
    Close,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Connect => f.write_str("connect"),
            Step::Fetch(kind) => write!(f, "fetch {kind}"),
            Step::Persist(kind) => write!(f, "persist {kind}"),
            Step::Close => f.write_str("close"),
        }
    }
}

/// Device task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Connecting,
    Fetching(OutputKind),
    Persisting(OutputKind),
    Closing,
    Done,
    Errored { step: Step, cause: FailureKind },
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Connecting => f.write_str("connecting"),
            TaskState::Fetching(kind) => write!(f, "fetching({kind})"),
            TaskState::Persisting(kind) => write!(f, "persisting({kind})"),
            TaskState::Closing => f.write_str("closing"),
            TaskState::Done => f.write_str("done"),
            TaskState::Errored { step, cause } => write!(f, "errored({step}, {cause})"),
        }
    }
}

/// Why a guarded step did not produce a value.
enum StepError<E> {
    Failed(E),
    TimedOut(Duration),
    Cancelled,
}

/// Run `fut` under a step timeout, giving up early if `cancel` fires.
async fn guarded<T, E>(
    fut: impl Future<Output = Result<T, E>>,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<T, StepError<E>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StepError::Cancelled),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StepError::Failed(e)),
            Err(_) => Err(StepError::TimedOut(limit)),
        },
    }
}

const DEADLINE_MESSAGE: &str = "run deadline elapsed";

/// Collects the requested kinds from one device.
pub struct DeviceTask<C: Connector> {
    connector: Arc<C>,
    writer: ArtifactWriter,
    policy: TaskPolicy,
    observer: Arc<dyn RunObserver>,
}

impl<C: Connector> DeviceTask<C> {
    pub fn new(
        connector: Arc<C>,
        writer: ArtifactWriter,
        policy: TaskPolicy,
        observer: Arc<dyn RunObserver>,
    ) -> Self {
        Self {
            connector,
            writer,
            policy,
            observer,
        }
    }

    /// Collect `kinds` from `device`.
    ///
    /// Returns exactly one result per entry of `kinds`, in order. Each
    /// result is also reported to the observer as soon as it resolves.
    pub async fn run(
        &self,
        device: &DeviceDescriptor,
        kinds: &[OutputKind],
        cancel: &CancellationToken,
    ) -> Vec<FetchResult> {
        // One instant for every artifact of this device
        let stamp = Local::now();
        let mut state = TaskState::Connecting;
        let mut results = Vec::with_capacity(kinds.len());

        self.observer.device_started(device);
        debug!("{}: {}", device.name, state);

        let mut session = match self.connect(device, cancel).await {
            Ok(session) => session,
            Err((cause, message)) => {
                self.advance(&device.name, &mut state, TaskState::Errored {
                    step: Step::Connect,
                    cause,
                });
                for &kind in kinds {
                    self.record(
                        &mut results,
                        FetchResult::failed(&device.name, kind, cause, message.as_str(), 0),
                    );
                }
                self.advance(&device.name, &mut state, TaskState::Done);
                self.observer.device_finished(&device.name, &results);
                return results;
            }
        };
        self.observer.connected(device);

        for &kind in kinds {
            let result = self
                .collect(&mut session, device, &stamp, kind, cancel, &mut state)
                .await;
            self.record(&mut results, result);
        }

        self.advance(&device.name, &mut state, TaskState::Closing);
        self.close(&mut session, &device.name).await;
        self.advance(&device.name, &mut state, TaskState::Done);

        self.observer.device_finished(&device.name, &results);
        results
    }

    /// Open a session, retrying transient failures.
    async fn connect(
        &self,
        device: &DeviceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<C::Session, (FailureKind, String)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match guarded(
                self.connector.open(device),
                self.policy.connect_timeout,
                cancel,
            )
            .await
            {
                Ok(session) => return Ok(session),
                Err(StepError::Cancelled) => {
                    return Err((FailureKind::Timeout, format!("{DEADLINE_MESSAGE} while connecting")));
                }
                Err(StepError::TimedOut(after)) => Error::from(TransportError::Timeout(after)),
                Err(StepError::Failed(e)) => e,
            };

            if error.is_transient() && attempt <= self.policy.connect_retries {
                self.observer
                    .retrying(&device.name, Step::Connect, attempt, &error);
                if !self.backoff(cancel).await {
                    return Err((FailureKind::Timeout, format!("{DEADLINE_MESSAGE} while connecting")));
                }
                continue;
            }

            return Err((FailureKind::Connect, error.to_string()));
        }
    }

    /// Fetch and persist one kind. Never fails; failures become results.
    async fn collect(
        &self,
        session: &mut C::Session,
        device: &DeviceDescriptor,
        stamp: &DateTime<Local>,
        kind: OutputKind,
        cancel: &CancellationToken,
        state: &mut TaskState,
    ) -> FetchResult {
        let name = device.name.as_str();
        self.advance(name, state, TaskState::Fetching(kind));

        let (fetched, attempts) = match self.fetch_with_retry(session, name, kind, cancel).await {
            Ok(done) => done,
            Err((cause, message, attempts)) => {
                self.advance(name, state, TaskState::Errored {
                    step: Step::Fetch(kind),
                    cause,
                });
                return FetchResult::failed(name, kind, cause, message, attempts);
            }
        };

        self.advance(name, state, TaskState::Persisting(kind));
        let staged = guarded(
            self.writer.stage(name, stamp, kind, &fetched.bytes),
            self.policy.write_timeout,
            cancel,
        )
        .await;

        // Once staged, publishing runs to completion so the result always
        // matches what is on disk
        let (cause, message) = match staged {
            Ok(staged) => match staged.commit().await {
                Ok(path) => {
                    return FetchResult::stored(name, kind, path, fetched.bytes.len(), attempts);
                }
                Err(e) => (FailureKind::Write, e.to_string()),
            },
            Err(StepError::Cancelled) => (
                FailureKind::Timeout,
                format!("{DEADLINE_MESSAGE} while writing"),
            ),
            Err(StepError::TimedOut(after)) => {
                (FailureKind::Write, ArtifactError::Timeout(after).to_string())
            }
            Err(StepError::Failed(e)) => (FailureKind::Write, e.to_string()),
        };

        self.advance(name, state, TaskState::Errored {
            step: Step::Persist(kind),
            cause,
        });
        FetchResult::failed(name, kind, cause, message, attempts)
    }

    async fn fetch_with_retry(
        &self,
        session: &mut C::Session,
        device: &str,
        kind: OutputKind,
        cancel: &CancellationToken,
    ) -> Result<(Fetched, u32), (FailureKind, String, u32)> {
        let mut attempts = 0;
        loop {
            if cancel.is_cancelled() {
                return Err((FailureKind::Timeout, DEADLINE_MESSAGE.to_string(), attempts));
            }

            attempts += 1;
            let error = match guarded(
                fetch::fetch(&mut *session, kind),
                self.policy.request_timeout,
                cancel,
            )
            .await
            {
                Ok(fetched) => return Ok((fetched, attempts)),
                Err(StepError::Cancelled) => {
                    return Err((
                        FailureKind::Timeout,
                        format!("{DEADLINE_MESSAGE} while fetching"),
                        attempts,
                    ));
                }
                Err(StepError::TimedOut(after)) => RequestError {
                    kind,
                    cause: TransportError::Timeout(after).into(),
                },
                Err(StepError::Failed(e)) => e,
            };

            if error.is_transient() && attempts <= self.policy.fetch_retries {
                self.observer
                    .retrying(device, Step::Fetch(kind), attempts, &error.cause);
                if !self.backoff(cancel).await {
                    return Err((FailureKind::Timeout, DEADLINE_MESSAGE.to_string(), attempts));
                }
                continue;
            }

            return Err((FailureKind::Request, error.to_string(), attempts));
        }
    }

    /// Close the session once. Failures are reported, never escalated.
    async fn close(&self, session: &mut C::Session, device: &str) {
        let error = match tokio::time::timeout(self.policy.close_timeout, session.close()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(TransportError::Timeout(self.policy.close_timeout).into()),
        };
        self.observer.session_closed(device, error.as_ref());
    }

    /// Sleep the retry backoff. Returns false if cancelled meanwhile.
    async fn backoff(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.policy.retry_backoff) => true,
        }
    }

    fn record(&self, results: &mut Vec<FetchResult>, result: FetchResult) {
        self.observer.fetch_resolved(&result);
        results.push(result);
    }

    fn advance(&self, device: &str, state: &mut TaskState, next: TaskState) {
        debug!("{}: {} -> {}", device, state, next);
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guarded_times_out() {
        let cancel = CancellationToken::new();
        let res: Result<(), StepError<()>> = guarded(
            std::future::pending(),
            Duration::from_millis(10),
            &cancel,
        )
        .await;
        assert!(matches!(res, Err(StepError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_guarded_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = guarded(async { Ok::<_, ()>(1) }, Duration::from_secs(1), &cancel).await;
        assert!(matches!(res, Err(StepError::Cancelled)));
    }

    #[test]
    fn test_state_display() {
        let state = TaskState::Errored {
            step: Step::Fetch(OutputKind::SetStyle),
            cause: FailureKind::Request,
        };
        assert_eq!(state.to_string(), "errored(fetch set, request)");
        assert_eq!(TaskState::Persisting(OutputKind::RawCli).to_string(), "persisting(cnf)");
    }
}
