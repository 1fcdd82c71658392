//! Scripted in-memory devices for orchestrator tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use confsnap::error::{ChannelError, SessionError, TransportError};
use confsnap::{
    Connector, Credentials, DeviceDescriptor, FetchResult, Inventory, OutputKind, RunObserver,
    Session,
};

/// What a connect attempt does.
#[derive(Debug, Clone, Copy)]
pub enum ConnectReply {
    /// Connection dropped, worth retrying.
    Transient,
    /// Login rejected.
    Refused,
    /// Never answers.
    Hang,
}

/// What a request attempt does.
#[derive(Debug, Clone)]
pub enum Reply {
    Config(String),
    /// Connection dropped, worth retrying.
    Transient,
    /// Device rejected the command.
    Refused,
    /// Shell channel went away.
    Dropped,
    /// Never answers.
    Hang,
    Panic,
}

/// Side effect run when a request for one kind arrives.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Scripted behaviour of one device.
///
/// Attempts beyond the end of a script succeed.
#[derive(Clone, Default)]
pub struct Script {
    pub connect: Vec<ConnectReply>,
    pub replies: HashMap<OutputKind, Vec<Reply>>,
    pub hooks: HashMap<OutputKind, Hook>,
    pub delay: Duration,
    pub close_hangs: bool,
}

impl Script {
    pub fn connect(mut self, replies: &[ConnectReply]) -> Self {
        self.connect = replies.to_vec();
        self
    }

    pub fn reply(mut self, kind: OutputKind, replies: &[Reply]) -> Self {
        self.replies.insert(kind, replies.to_vec());
        self
    }

    pub fn on_request(mut self, kind: OutputKind, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.insert(kind, Arc::new(hook));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Everything the mock devices were asked to do.
#[derive(Debug, Default)]
pub struct CallLog {
    connects: Mutex<HashMap<String, u32>>,
    requests: Mutex<HashMap<(String, OutputKind), u32>>,
    closes: Mutex<HashMap<String, u32>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl CallLog {
    pub fn connects(&self, device: &str) -> u32 {
        self.connects.lock().unwrap().get(device).copied().unwrap_or(0)
    }

    pub fn requests(&self, device: &str, kind: OutputKind) -> u32 {
        self.requests
            .lock()
            .unwrap()
            .get(&(device.to_string(), kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_requests(&self, device: &str) -> u32 {
        OutputKind::ALL.iter().map(|k| self.requests(device, *k)).sum()
    }

    pub fn closes(&self, device: &str) -> u32 {
        self.closes.lock().unwrap().get(device).copied().unwrap_or(0)
    }

    /// Most sessions open at the same time.
    pub fn peak_sessions(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn bump(map: &Mutex<HashMap<String, u32>>, device: &str) -> u32 {
        let mut map = map.lock().unwrap();
        let count = map.entry(device.to_string()).or_default();
        *count += 1;
        *count
    }
}

pub struct MockConnector {
    scripts: HashMap<String, Script>,
    pub log: Arc<CallLog>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            log: Arc::new(CallLog::default()),
        }
    }

    pub fn script(mut self, device: &str, script: Script) -> Self {
        self.scripts.insert(device.to_string(), script);
        self
    }
}

impl Connector for MockConnector {
    type Session = MockSession;

    async fn open(&self, device: &DeviceDescriptor) -> confsnap::Result<MockSession> {
        let attempt = CallLog::bump(&self.log.connects, &device.name) as usize;
        let script = self.scripts.get(&device.name).cloned().unwrap_or_default();

        match script.connect.get(attempt - 1) {
            Some(ConnectReply::Transient) => return Err(TransportError::Disconnected.into()),
            Some(ConnectReply::Refused) => {
                return Err(TransportError::AuthenticationFailed {
                    user: device.credentials.username.clone(),
                }
                .into());
            }
            Some(ConnectReply::Hang) => std::future::pending::<()>().await,
            None => {}
        }

        let active = self.log.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.peak.fetch_max(active, Ordering::SeqCst);

        Ok(MockSession {
            device: device.name.clone(),
            script,
            log: self.log.clone(),
            closed: false,
        })
    }
}

pub struct MockSession {
    device: String,
    script: Script,
    log: Arc<CallLog>,
    closed: bool,
}

impl Session for MockSession {
    async fn request(&mut self, kind: OutputKind) -> confsnap::Result<Vec<u8>> {
        let attempt = {
            let mut requests = self.log.requests.lock().unwrap();
            let count = requests.entry((self.device.clone(), kind)).or_default();
            *count += 1;
            *count as usize
        };
        tokio::time::sleep(self.script.delay).await;
        if let Some(hook) = self.script.hooks.get(&kind) {
            hook();
        }

        let reply = self
            .script
            .replies
            .get(&kind)
            .and_then(|replies| replies.get(attempt - 1))
            .cloned()
            .unwrap_or_else(|| Reply::Config(config_text(&self.device, kind)));

        match reply {
            Reply::Config(text) => Ok(text.into_bytes()),
            Reply::Transient => Err(TransportError::Disconnected.into()),
            Reply::Refused => Err(SessionError::CommandFailed {
                command: format!("show configuration ({kind})"),
                message: "syntax error".to_string(),
            }
            .into()),
            Reply::Dropped => Err(ChannelError::Closed.into()),
            Reply::Hang => std::future::pending().await,
            Reply::Panic => panic!("scripted panic on {}", self.device),
        }
    }

    async fn close(&mut self) -> confsnap::Result<()> {
        CallLog::bump(&self.log.closes, &self.device);
        if !self.closed {
            self.closed = true;
            self.log.active.fetch_sub(1, Ordering::SeqCst);
        }
        if self.script.close_hangs {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Configuration text a mock device returns for `kind`.
pub fn config_text(device: &str, kind: OutputKind) -> String {
    format!("## {device} {kind}\nsystem {{ host-name {device}; }}\n")
}

pub fn inventory(names: &[&str]) -> Inventory {
    let credentials = Arc::new(Credentials::password("root", "root123"));
    let mut inventory = Inventory::new();
    for (i, name) in names.iter().enumerate() {
        inventory
            .push(DeviceDescriptor::new(
                *name,
                format!("10.1.1.{i}"),
                credentials.clone(),
            ))
            .unwrap();
    }
    inventory
}

/// Records device completion order.
#[derive(Default)]
pub struct FinishOrder(pub Mutex<Vec<String>>);

impl RunObserver for FinishOrder {
    fn device_finished(&self, device: &str, _results: &[FetchResult]) {
        self.0.lock().unwrap().push(device.to_string());
    }
}
