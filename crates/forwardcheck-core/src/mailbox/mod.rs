//! Mailbox module
//!
//! Session abstraction over the destination mailbox, the IMAP
//! implementation, and the poller that drives verification cycles.

mod imap;
mod poller;
mod tls;

pub use imap::{ImapConnector, ImapMailbox};
pub use poller::{
    MailboxPoller, MatchPredicate, PollSettings, PollState, PollSummary, VerificationAttempt,
};
pub use tls::client_connector;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forwardcheck_common::{MatchStrategy, TimestampSource};

/// Mailbox-assigned message identifier (IMAP UID)
pub type Uid = u32;

/// Coarse server-side candidate filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFilter {
    Unseen,
    SubjectContains(String),
}

impl SearchFilter {
    pub fn for_strategy(strategy: MatchStrategy, subject_base: &str) -> Self {
        match strategy {
            MatchStrategy::Unseen => SearchFilter::Unseen,
            MatchStrategy::SubjectContains => SearchFilter::SubjectContains(subject_base.to_string()),
        }
    }
}

/// Minimal view of one mailbox message, valid for a single poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMessage {
    pub uid: Uid,
    pub subject: Option<String>,
    /// Server receipt time
    pub internal_date: Option<DateTime<Utc>>,
    /// Parsed Date header
    pub date_header: Option<DateTime<Utc>>,
    /// Set by the poller when the message is flagged for deletion
    pub deletable: bool,
}

impl CandidateMessage {
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            subject: None,
            internal_date: None,
            date_header: None,
            deletable: false,
        }
    }

    pub fn timestamp(&self, source: TimestampSource) -> Option<DateTime<Utc>> {
        match source {
            TimestampSource::InternalDate => self.internal_date,
            TimestampSource::DateHeader => self.date_header,
        }
    }
}

/// An authenticated session with the mailbox selected
#[async_trait]
pub trait MailboxSession: Send {
    /// Ask the server to surface newly arrived messages (NOOP)
    async fn refresh(&mut self) -> Result<()>;

    /// Identifiers of messages matching the coarse filter, ascending
    async fn search(&mut self, filter: &SearchFilter) -> Result<Vec<Uid>>;

    /// Subject and timestamps of the given messages; never the body
    async fn fetch_candidates(&mut self, uids: &[Uid]) -> Result<Vec<CandidateMessage>>;

    /// Set \Deleted on the given messages
    async fn flag_deleted(&mut self, uids: &[Uid]) -> Result<()>;

    /// Remove flagged messages, returning how many were removed
    async fn expunge(&mut self) -> Result<usize>;

    async fn logout(&mut self) -> Result<()>;
}

/// Opens a fresh session per verification
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn MailboxSession>>;
}
