//! Relay client module
//!
//! Injects exactly one probe per call into the outbound relay. There is no
//! retry: a failed send ends the verification of that address.

mod smtp;

pub use smtp::SmtpRelay;

use crate::error::Result;
use crate::probe::ProbeMessage;
use async_trait::async_trait;

/// Outbound transport for probe messages
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Open a session, send the probe to `probe.destination`, close the session.
    async fn send(&self, probe: &ProbeMessage) -> Result<()>;
}
