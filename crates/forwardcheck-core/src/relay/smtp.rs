//! SMTP submission relay

use super::RelayTransport;
use crate::error::{Result, VerifyError};
use crate::probe::ProbeMessage;
use async_trait::async_trait;
use forwardcheck_common::config::SmtpConfig;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{debug, info};

/// Relay client speaking SMTP submission with mandatory STARTTLS
///
/// A new transport is built for every send, so each probe gets its own
/// connection which is closed once the message is accepted.
pub struct SmtpRelay {
    host: String,
    port: u16,
    username: String,
    password: String,
    sender: Mailbox,
    timeout: Duration,
}

impl SmtpRelay {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let sender: Mailbox = config.sender.parse().map_err(|e| {
            VerifyError::Transport(format!("Invalid sender address '{}': {}", config.sender, e))
        })?;

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            sender,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Build the RFC 5322 message for a probe
    fn build_message(&self, probe: &ProbeMessage) -> Result<Message> {
        let to: Mailbox = probe.destination.parse().map_err(|e| {
            VerifyError::Transport(format!(
                "Invalid destination address '{}': {}",
                probe.destination, e
            ))
        })?;

        Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(&probe.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(probe.body.clone())
            .map_err(|e| VerifyError::Transport(format!("Failed to build probe: {}", e)))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
            .map_err(|e| {
                VerifyError::Transport(format!("Failed to create SMTP transport: {}", e))
            })?
            .port(self.port)
            .credentials(Credentials::new(
                self.username.clone(),
                self.password.clone(),
            ))
            .timeout(Some(self.timeout))
            .build();

        Ok(transport)
    }
}

#[async_trait]
impl RelayTransport for SmtpRelay {
    async fn send(&self, probe: &ProbeMessage) -> Result<()> {
        let email = self.build_message(probe)?;
        let mailer = self.transport()?;

        info!(
            relay = %self.host,
            address = %probe.destination,
            "Sending probe"
        );

        let response = mailer
            .send(email)
            .await
            .map_err(|e| VerifyError::Transport(e.to_string()))?;

        debug!(
            address = %probe.destination,
            code = %response.code(),
            "Probe accepted by relay"
        );
        Ok(())
    }
}
