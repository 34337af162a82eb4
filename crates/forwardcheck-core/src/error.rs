//! Per-address verification errors

use forwardcheck_common::FailureKind;
use thiserror::Error;

/// Error that ends the verification of a single address
#[derive(Error, Debug)]
pub enum VerifyError {
    /// Relay unreachable, authentication failed or the send was rejected
    #[error("Relay error: {0}")]
    Transport(String),

    /// Could not connect, log in to, or select the mailbox
    #[error("Mailbox session error: {0}")]
    MailboxSession(String),

    /// A command on an open mailbox session failed
    #[error("Mailbox query error: {0}")]
    MailboxQuery(String),

    /// Abandoned because of shutdown
    #[error("Verification cancelled")]
    Cancelled,
}

/// Result type alias for verification operations
pub type Result<T> = std::result::Result<T, VerifyError>;

impl VerifyError {
    pub fn kind(&self) -> FailureKind {
        match self {
            VerifyError::Transport(_) => FailureKind::Transport,
            VerifyError::MailboxSession(_) => FailureKind::MailboxSession,
            VerifyError::MailboxQuery(_) => FailureKind::MailboxQuery,
            VerifyError::Cancelled => FailureKind::Cancelled,
        }
    }
}
