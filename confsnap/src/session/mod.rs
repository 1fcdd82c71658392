//! Session boundary to the device management transport.
//!
//! The collector only needs three things from a device: open a session,
//! request one output kind, close. Anything that can do that plugs in
//! through [`Connector`] and [`Session`]; [`SshConnector`] drives the
//! device CLI over SSH.

mod ssh;

pub use ssh::{CliSession, SshConnector};

use std::future::Future;

use crate::error::Result;
use crate::fetch::OutputKind;
use crate::inventory::DeviceDescriptor;

/// Opens sessions to devices.
pub trait Connector: Send + Sync + 'static {
    /// Session type produced by this connector.
    type Session: Session + 'static;

    /// Connect and authenticate to the device.
    fn open(
        &self,
        device: &DeviceDescriptor,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// One authenticated connection to a device.
pub trait Session: Send {
    /// Request the configuration in one output format.
    fn request(&mut self, kind: OutputKind) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Close the session.
    ///
    /// Must be idempotent. Callers treat a failure as cleanup noise, not as
    /// a failed collection.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
