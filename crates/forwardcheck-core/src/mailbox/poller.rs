//! Mailbox Poller - The verification state machine
//!
//! Each cycle checks the deadline, sleeps one poll interval, refreshes the
//! mailbox, searches for candidates, evaluates the match predicate, and
//! optionally flags and expunges inspected messages.

use super::{CandidateMessage, MailboxSession, SearchFilter, Uid};
use crate::error::{Result, VerifyError};
use crate::probe::ProbeMessage;
use chrono::{DateTime, DurationRound, Utc};
use forwardcheck_common::config::Config;
use forwardcheck_common::{DeletionPolicy, MatchStrategy, Outcome, TimestampSource};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mailbox timestamps carry whole seconds only
fn timestamp_resolution() -> chrono::Duration {
    chrono::Duration::seconds(1)
}

/// Exact-subject and freshness check bound to one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPredicate {
    subject: String,
    not_after: DateTime<Utc>,
}

impl MatchPredicate {
    /// Bind to a probe. The reference time is the start of the second
    /// before the probe origin, since mailbox timestamps are truncated.
    pub fn for_probe(probe: &ProbeMessage) -> Self {
        let origin = probe
            .origin
            .duration_trunc(timestamp_resolution())
            .unwrap_or(probe.origin);
        Self {
            subject: probe.subject.clone(),
            not_after: origin - timestamp_resolution(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Subject equal to the probe subject and timestamp strictly newer than the reference
    pub fn matches(&self, subject: Option<&str>, timestamp: Option<DateTime<Utc>>) -> bool {
        let subject_ok = subject.map(str::trim) == Some(self.subject.as_str());
        let fresh = timestamp.map_or(false, |ts| ts > self.not_after);
        subject_ok && fresh
    }
}

/// One address's verification window
#[derive(Debug)]
pub struct VerificationAttempt {
    destination: String,
    predicate: MatchPredicate,
    started: Instant,
    timeout: Duration,
    poll_interval: Duration,
    timestamp_source: TimestampSource,
    /// Subjects of sibling probes in the same run; never flagged by this attempt
    protected: HashSet<String>,
}

impl VerificationAttempt {
    pub fn begin(
        probe: &ProbeMessage,
        timeout: Duration,
        poll_interval: Duration,
        timestamp_source: TimestampSource,
    ) -> Self {
        Self {
            destination: probe.destination.clone(),
            predicate: MatchPredicate::for_probe(probe),
            started: Instant::now(),
            timeout,
            poll_interval,
            timestamp_source,
            protected: HashSet::new(),
        }
    }

    pub fn with_protected_subjects<I>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.protected = subjects
            .into_iter()
            .filter(|s| s != self.predicate.subject())
            .collect();
        self
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() > self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn matches(&self, candidate: &CandidateMessage) -> bool {
        self.predicate.matches(
            candidate.subject.as_deref(),
            candidate.timestamp(self.timestamp_source),
        )
    }

    pub fn is_protected(&self, candidate: &CandidateMessage) -> bool {
        candidate
            .subject
            .as_deref()
            .map_or(false, |s| self.protected.contains(s.trim()))
    }
}

/// Poller state. A failed poll is reported as `Err` from [`MailboxPoller::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling,
    Confirmed,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub state: PollState,
    pub cycles: u32,
}

impl PollSummary {
    pub fn outcome(&self) -> Outcome {
        match self.state {
            PollState::Confirmed => Outcome::Confirmed,
            PollState::Polling | PollState::TimedOut => Outcome::NotConfirmed,
        }
    }
}

/// Candidate filter, cleanup behavior and command bound
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub strategy: MatchStrategy,
    pub subject_base: String,
    /// `None` disables cleanup
    pub cleanup: Option<DeletionPolicy>,
    /// Longest a single poll cycle may wait on the mailbox
    pub command_timeout: Duration,
}

impl PollSettings {
    pub fn from_config(config: &Config, subject_base: &str) -> Self {
        Self {
            strategy: config.check.match_strategy,
            subject_base: subject_base.to_string(),
            cleanup: config.check.cleanup(),
            command_timeout: config.imap.timeout(),
        }
    }
}

/// Drives [`VerificationAttempt`]s against an open mailbox session
#[derive(Debug, Clone)]
pub struct MailboxPoller {
    filter: SearchFilter,
    cleanup: Option<DeletionPolicy>,
    command_timeout: Duration,
}

impl MailboxPoller {
    pub fn new(settings: PollSettings) -> Self {
        Self {
            filter: SearchFilter::for_strategy(settings.strategy, &settings.subject_base),
            cleanup: settings.cleanup,
            command_timeout: settings.command_timeout,
        }
    }

    pub fn cleanup(&self) -> Option<DeletionPolicy> {
        self.cleanup
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Poll until the probe is found, the deadline passes, or a command fails
    ///
    /// Both the sleep and each cycle's mailbox commands are abandoned when
    /// `cancel` fires. A cycle that outlives the command timeout fails the poll.
    pub async fn poll(
        &self,
        session: &mut dyn MailboxSession,
        attempt: &VerificationAttempt,
        cancel: &CancellationToken,
    ) -> Result<PollSummary> {
        let mut cycles = 0;

        loop {
            if attempt.is_expired() {
                info!(
                    address = %attempt.destination(),
                    elapsed_ms = attempt.elapsed().as_millis() as u64,
                    cycles,
                    "Probe not observed before deadline"
                );
                return Ok(PollSummary {
                    state: PollState::TimedOut,
                    cycles,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(VerifyError::Cancelled),
                _ = tokio::time::sleep(attempt.poll_interval()) => {}
            }

            cycles += 1;
            let cycle = tokio::time::timeout(self.command_timeout, self.run_cycle(session, attempt));
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(VerifyError::Cancelled),
                r = cycle => r.unwrap_or_else(|_| {
                    Err(VerifyError::MailboxQuery(format!(
                        "Mailbox did not answer within {}s",
                        self.command_timeout.as_secs()
                    )))
                }),
            };
            let state = result.map_err(|e| {
                warn!(address = %attempt.destination(), cycle = cycles, "Poll cycle failed: {}", e);
                e
            })?;

            if state == PollState::Confirmed {
                info!(
                    address = %attempt.destination(),
                    elapsed_ms = attempt.elapsed().as_millis() as u64,
                    cycles,
                    "Probe observed"
                );
                return Ok(PollSummary { state, cycles });
            }
        }
    }

    /// One refresh, search, match and cleanup pass
    pub async fn run_cycle(
        &self,
        session: &mut dyn MailboxSession,
        attempt: &VerificationAttempt,
    ) -> Result<PollState> {
        session.refresh().await?;

        let uids = session.search(&self.filter).await?;
        let mut candidates = session.fetch_candidates(&uids).await?;

        let mut matched = false;
        for candidate in candidates.iter_mut() {
            let is_match = attempt.matches(candidate);
            matched |= is_match;
            candidate.deletable = match self.cleanup {
                None => false,
                Some(DeletionPolicy::MatchedOnly) => is_match,
                Some(DeletionPolicy::AllInspected) => is_match || !attempt.is_protected(candidate),
            };
        }

        let flagged: Vec<Uid> = candidates
            .iter()
            .filter(|c| c.deletable)
            .map(|c| c.uid)
            .collect();

        debug!(
            address = %attempt.destination(),
            candidates = candidates.len(),
            flagged = flagged.len(),
            matched,
            "Poll cycle"
        );

        if !flagged.is_empty() {
            session.flag_deleted(&flagged).await?;
            let removed = session.expunge().await?;
            debug!(address = %attempt.destination(), removed, "Expunged inspected messages");
        }

        Ok(if matched {
            PollState::Confirmed
        } else {
            PollState::Polling
        })
    }
}
