//! forwardcheck Core - Email forwarding verification engine
//!
//! This crate sends a tagged probe through an outbound relay, polls the
//! destination mailbox until the probe (or a forwarded copy) shows up, and
//! collects a per-address report. It also provides the reporters and the
//! periodic scheduler used by the `forwardcheck` binary.

pub mod engine;
pub mod error;
pub mod mailbox;
pub mod probe;
pub mod relay;
pub mod report;
pub mod scheduled;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineSettings, VerificationEngine};
pub use error::{Result, VerifyError};
pub use mailbox::{
    CandidateMessage, ImapConnector, MailboxConnector, MailboxPoller, MailboxSession,
    MatchPredicate, PollSettings, PollState, PollSummary, SearchFilter, VerificationAttempt,
};
pub use probe::{ProbeMessage, ProbeTagger, RunMarker};
pub use relay::{RelayTransport, SmtpRelay};
pub use report::{build_reporter, MqttReporter, Reporter, StdoutReporter, WebhookReporter};
pub use scheduled::{JobSpec, VerificationScheduler};
