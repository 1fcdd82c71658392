//! SSH CLI session: scrape configuration from an interactive shell.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use super::{Connector, Session};
use crate::channel::PtyChannel;
use crate::error::{Result, SessionError};
use crate::fetch::OutputKind;
use crate::inventory::DeviceDescriptor;
use crate::platform::PlatformDefinition;
use crate::transport::{HostKeyVerification, SshConfig, SshTransport};

/// Opens [`CliSession`]s over SSH.
///
/// # Example
///
/// ```rust,no_run
/// use confsnap::platform::PlatformDefinition;
/// use confsnap::session::SshConnector;
///
/// # fn example() -> Result<(), confsnap::Error> {
/// let connector = SshConnector::new(PlatformDefinition::by_name("juniper_junos")?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SshConnector {
    platform: Arc<PlatformDefinition>,
    connect_timeout: Duration,
    command_timeout: Duration,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    search_depth: usize,
}

impl SshConnector {
    /// Create a connector for the given platform with default settings.
    pub fn new(platform: PlatformDefinition) -> Self {
        Self {
            platform: Arc::new(platform),
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(120),
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            search_depth: 1000,
        }
    }

    /// Set the connect + authenticate timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how long a command may run before its prompt must appear.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the host key verification mode.
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Use a specific known_hosts file.
    pub fn known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    fn ssh_config(&self, device: &DeviceDescriptor) -> SshConfig {
        SshConfig {
            host: device.address.clone(),
            port: device.port,
            credentials: device.credentials.clone(),
            timeout: self.connect_timeout,
            terminal_width: self.platform.terminal_width,
            terminal_height: self.platform.terminal_height,
            host_key_verification: self.host_key_verification,
            known_hosts_path: self.known_hosts_path.clone(),
        }
    }
}

impl Connector for SshConnector {
    type Session = CliSession;

    async fn open(&self, device: &DeviceDescriptor) -> Result<CliSession> {
        let transport = SshTransport::connect(self.ssh_config(device)).await?;
        let channel = match transport.open_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = transport.close().await;
                return Err(e);
            }
        };

        let mut session = CliSession {
            device: device.name.clone(),
            transport: Some(transport),
            channel: PtyChannel::new(channel, self.search_depth),
            platform: self.platform.clone(),
            timeout: self.command_timeout,
            in_sync: false,
        };

        if let Err(e) = session.prepare(self.connect_timeout).await {
            let _ = session.close().await;
            return Err(e);
        }

        debug!("{}: CLI session ready", device.name);
        Ok(session)
    }
}

/// Interactive CLI session on one device.
pub struct CliSession {
    device: String,
    transport: Option<SshTransport>,
    channel: PtyChannel,
    platform: Arc<PlatformDefinition>,
    timeout: Duration,

    /// False when a previous read was cut short and unread output may
    /// still be in flight.
    in_sync: bool,
}

impl CliSession {
    /// Wait for the login prompt and run the platform's on-open commands.
    async fn prepare(&mut self, timeout: Duration) -> Result<()> {
        self.channel.read_until(&self.platform.prompt, timeout).await?;
        self.in_sync = true;

        let platform = self.platform.clone();
        for command in &platform.on_open_commands {
            self.run_command(command).await?;
        }
        Ok(())
    }

    /// Send a command and return its normalized output.
    pub async fn run_command(&mut self, command: &str) -> Result<String> {
        if self.transport.is_none() {
            return Err(SessionError::Closed.into());
        }

        if !self.in_sync {
            debug!("{}: draining output of an interrupted command", self.device);
            self.channel.read_until(&self.platform.prompt, self.timeout).await?;
            self.in_sync = true;
        }

        self.channel.clear_buffer();
        self.channel.send(command).await?;

        self.in_sync = false;
        let read = self.channel.read_until(&self.platform.prompt, self.timeout).await?;
        self.in_sync = true;

        let output = self.platform.normalize_output(&read.as_str(), command);
        if let Some(message) = self.platform.detect_failure(&output) {
            return Err(SessionError::CommandFailed {
                command: command.to_string(),
                message,
            }
            .into());
        }

        Ok(output)
    }
}

impl Session for CliSession {
    async fn request(&mut self, kind: OutputKind) -> Result<Vec<u8>> {
        let command = self.platform.commands.for_kind(kind).to_string();
        debug!("{}: {}", self.device, command);
        self.run_command(&command).await.map(String::into_bytes)
    }

    async fn close(&mut self) -> Result<()> {
        let Some(transport) = self.transport.take() else {
            return Ok(());
        };

        if let Err(e) = self.channel.close().await {
            warn!("{}: closing channel failed: {}", self.device, e);
        }
        transport.close().await
    }
}
