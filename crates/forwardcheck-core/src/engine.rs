//! Verification Engine - Tagger, relay and poller for one or many addresses

use crate::error::{Result, VerifyError};
use crate::mailbox::{
    ImapConnector, MailboxConnector, MailboxPoller, MailboxSession, PollSettings, PollSummary,
    VerificationAttempt,
};
use crate::probe::{ProbeMessage, ProbeTagger, RunMarker};
use crate::relay::{RelayTransport, SmtpRelay};
use forwardcheck_common::{Config, Outcome, Report, TimestampSource};
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Engine-wide knobs that do not vary per batch
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub timestamp_source: TimestampSource,
    /// Maximum simultaneous verifications (mailbox sessions)
    pub concurrency: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timestamp_source: TimestampSource::default(),
            concurrency: 1,
        }
    }
}

/// Runs verifications; holds no session state between calls
pub struct VerificationEngine {
    tagger: ProbeTagger,
    relay: Arc<dyn RelayTransport>,
    mailbox: Arc<dyn MailboxConnector>,
    poller: MailboxPoller,
    settings: EngineSettings,
}

impl VerificationEngine {
    pub fn new(
        tagger: ProbeTagger,
        relay: Arc<dyn RelayTransport>,
        mailbox: Arc<dyn MailboxConnector>,
        poller: MailboxPoller,
        settings: EngineSettings,
    ) -> Self {
        Self {
            tagger,
            relay,
            mailbox,
            poller,
            settings,
        }
    }

    /// Build an engine wired to the SMTP relay and IMAP mailbox from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let tagger = ProbeTagger::from_config(&config.check);
        let poller = MailboxPoller::new(PollSettings::from_config(config, tagger.subject_base()));

        Ok(Self::new(
            tagger,
            Arc::new(SmtpRelay::new(&config.smtp)?),
            Arc::new(ImapConnector::new(&config.imap)),
            poller,
            EngineSettings {
                timestamp_source: config.check.timestamp_source,
                concurrency: config.check.concurrency.max(1),
            },
        ))
    }

    /// Verify one address, returning the boolean projection
    pub async fn check_one(
        &self,
        address: &str,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        let run = RunMarker::generate();
        let probe = self.tagger.tag(address, &run);
        self.outcome_for(probe, Vec::new(), timeout, poll_interval, cancel)
            .await
            .is_confirmed()
    }

    /// Verify every address and collect a report in input order
    ///
    /// Repeated addresses are verified once. Individual failures are
    /// recorded as outcomes and never abort the batch.
    pub async fn check_many(
        &self,
        addresses: &[String],
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Report {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(addresses.len());
        for address in addresses {
            if seen.insert(address.as_str()) {
                unique.push(address.as_str());
            } else {
                warn!(address = %address, "Duplicate address in batch, verifying once");
            }
        }

        let run = RunMarker::generate();
        let siblings: Vec<String> = unique
            .iter()
            .map(|address| self.tagger.subject_for(address, &run))
            .collect();

        info!(
            run = %run,
            addresses = unique.len(),
            concurrency = self.settings.concurrency,
            "Starting verification batch"
        );

        let run = &run;
        let outcomes: Vec<(String, Outcome)> = stream::iter(unique)
            .map(|address| {
                let siblings = siblings.clone();
                async move {
                    // Origin is stamped when this address's turn comes, not at batch start
                    let probe = self.tagger.tag(address, run);
                    let outcome = self
                        .outcome_for(probe, siblings, timeout, poll_interval, cancel)
                        .await;
                    (address.to_string(), outcome)
                }
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut report = Report::new();
        for (address, outcome) in outcomes {
            if let Err(e) = report.insert(address, outcome) {
                error!("Report insertion failed: {}", e);
            }
        }

        info!(
            run = %run,
            confirmed = report.confirmed_count(),
            errors = report.error_count(),
            total = report.len(),
            "Verification batch finished"
        );
        report
    }

    async fn outcome_for(
        &self,
        probe: ProbeMessage,
        siblings: Vec<String>,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Outcome {
        let address = probe.destination.clone();
        match self
            .verify(probe, siblings, timeout, poll_interval, cancel)
            .await
        {
            Ok(summary) => summary.outcome(),
            Err(e) => {
                match &e {
                    VerifyError::Cancelled => warn!(address = %address, "Verification abandoned"),
                    _ => error!(address = %address, kind = %e.kind(), "Verification failed: {}", e),
                }
                Outcome::Error(e.kind())
            }
        }
    }

    /// Open the mailbox, send the probe, and poll; the session is always logged out
    pub async fn verify(
        &self,
        probe: ProbeMessage,
        siblings: Vec<String>,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<PollSummary> {
        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled);
        }

        // No probe goes out unless the mailbox can be watched
        let mut session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(VerifyError::Cancelled),
            opened = self.mailbox.open() => opened?,
        };

        let result = self
            .send_and_poll(session.as_mut(), &probe, siblings, timeout, poll_interval, cancel)
            .await;

        match tokio::time::timeout(self.poller.command_timeout(), session.logout()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(address = %probe.destination, "Mailbox logout failed: {}", e),
            Err(_) => debug!(address = %probe.destination, "Mailbox logout timed out"),
        }
        result
    }

    async fn send_and_poll(
        &self,
        session: &mut dyn MailboxSession,
        probe: &ProbeMessage,
        siblings: Vec<String>,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<PollSummary> {
        self.relay.send(probe).await?;

        let attempt = VerificationAttempt::begin(
            probe,
            timeout,
            poll_interval,
            self.settings.timestamp_source,
        )
        .with_protected_subjects(siblings);

        self.poller.poll(session, &attempt, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMailbox, FakeRelay};
    use forwardcheck_common::{DeletionPolicy, FailureKind, MatchStrategy};
    use pretty_assertions::assert_eq;

    const BASE: &str = "Forward Test";

    fn engine(relay: FakeRelay, mailbox: &FakeMailbox, concurrency: usize) -> (VerificationEngine, Arc<FakeRelay>) {
        engine_with_cleanup(relay, mailbox, concurrency, None)
    }

    fn engine_with_cleanup(
        relay: FakeRelay,
        mailbox: &FakeMailbox,
        concurrency: usize,
        cleanup: Option<DeletionPolicy>,
    ) -> (VerificationEngine, Arc<FakeRelay>) {
        let relay = Arc::new(relay);
        let engine = VerificationEngine::new(
            ProbeTagger::new(BASE, "body"),
            relay.clone(),
            Arc::new(mailbox.clone()),
            MailboxPoller::new(PollSettings {
                strategy: MatchStrategy::SubjectContains,
                subject_base: BASE.to_string(),
                cleanup,
                command_timeout: Duration::from_secs(30),
            }),
            EngineSettings {
                timestamp_source: TimestampSource::InternalDate,
                concurrency,
            },
        );
        (engine, relay)
    }

    fn addresses(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    const TIMEOUT: Duration = Duration::from_secs(60);
    const INTERVAL: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn test_relay_failure_isolated_to_address() {
        let mailbox = FakeMailbox::new();
        let (engine, relay) = engine(FakeRelay::new(&mailbox).failing_for("b@example.org"), &mailbox, 1);

        let report = engine
            .check_many(
                &addresses(&["a@example.org", "b@example.org"]),
                TIMEOUT,
                INTERVAL,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            report.booleans(),
            vec![("a@example.org", true), ("b@example.org", false)]
        );
        assert_eq!(
            report.get("b@example.org"),
            Some(Outcome::Error(FailureKind::Transport))
        );
        assert_eq!(relay.sent().len(), 1);
        let state = mailbox.state();
        assert_eq!(state.opens, 2);
        assert_eq!(state.logouts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_keeps_input_order_without_duplicates() {
        let mailbox = FakeMailbox::new();
        let (engine, relay) = engine(FakeRelay::new(&mailbox).dropping("m@example.org"), &mailbox, 1);

        let report = engine
            .check_many(
                &addresses(&["z@example.org", "m@example.org", "a@example.org", "z@example.org"]),
                Duration::from_secs(10),
                INTERVAL,
                &CancellationToken::new(),
            )
            .await;

        let keys: Vec<&str> = report.addresses().collect();
        assert_eq!(keys, vec!["z@example.org", "m@example.org", "a@example.org"]);
        assert_eq!(report.get("m@example.org"), Some(Outcome::NotConfirmed));
        assert_eq!(report.confirmed_count(), 2);
        assert_eq!(relay.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_share_run_marker() {
        let mailbox = FakeMailbox::new();
        let (engine, relay) = engine(FakeRelay::new(&mailbox), &mailbox, 1);

        engine
            .check_many(
                &addresses(&["a@example.org", "b@example.org"]),
                TIMEOUT,
                INTERVAL,
                &CancellationToken::new(),
            )
            .await;

        let sent = relay.sent();
        let marker = |subject: &str| subject.rsplit_once('[').map(|(_, m)| m.to_string());
        assert_eq!(marker(&sent[0].subject), marker(&sent[1].subject));
        assert_ne!(sent[0].subject, sent[1].subject);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_failure_still_logs_out() {
        let mailbox = FakeMailbox::new();
        mailbox.fail_search_on_refresh(1);
        let (engine, _relay) = engine(FakeRelay::new(&mailbox), &mailbox, 1);

        let report = engine
            .check_many(
                &addresses(&["a@example.org"]),
                TIMEOUT,
                INTERVAL,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            report.get("a@example.org"),
            Some(Outcome::Error(FailureKind::MailboxQuery))
        );
        assert_eq!(mailbox.state().logouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_mailbox_sends_nothing() {
        let mailbox = FakeMailbox::new();
        mailbox.fail_open();
        let (engine, relay) = engine(FakeRelay::new(&mailbox), &mailbox, 1);

        let report = engine
            .check_many(
                &addresses(&["a@example.org"]),
                TIMEOUT,
                INTERVAL,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            report.get("a@example.org"),
            Some(Outcome::Error(FailureKind::MailboxSession))
        );
        assert!(relay.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_batch_reports_interrupted() {
        let mailbox = FakeMailbox::new();
        let (engine, relay) = engine(FakeRelay::new(&mailbox), &mailbox, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = engine
            .check_many(&addresses(&["a@example.org", "b@example.org"]), TIMEOUT, INTERVAL, &cancel)
            .await;

        assert_eq!(report.len(), 2);
        assert!(report.was_interrupted());
        assert_eq!(report.confirmed_count(), 0);
        assert!(relay.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_batch_protects_sibling_probes() {
        let mailbox = FakeMailbox::new();
        let (engine, relay) = engine_with_cleanup(
            FakeRelay::new(&mailbox).delivering_after(1),
            &mailbox,
            2,
            Some(DeletionPolicy::AllInspected),
        );

        let report = engine
            .check_many(
                &addresses(&["a@example.org", "b@example.org", "c@example.org"]),
                TIMEOUT,
                INTERVAL,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.confirmed_count(), 3);
        assert_eq!(relay.sent().len(), 3);
        let state = mailbox.state();
        assert_eq!(state.opens, 3);
        assert_eq!(state.logouts, 3);
        assert!(state.messages.is_empty());
    }

    /// Relay that holds the thread on the first send, so wall-clock time passes
    struct SlowFirstSend {
        inner: FakeRelay,
        pause: std::time::Duration,
        sends: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RelayTransport for SlowFirstSend {
        async fn send(&self, probe: &ProbeMessage) -> Result<()> {
            if self.sends.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                std::thread::sleep(self.pause);
            }
            self.inner.send(probe).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_origin_stamped_when_address_starts() {
        let mailbox = FakeMailbox::new();
        let relay = Arc::new(SlowFirstSend {
            inner: FakeRelay::new(&mailbox),
            pause: std::time::Duration::from_millis(50),
            sends: Default::default(),
        });
        let engine = VerificationEngine::new(
            ProbeTagger::new(BASE, "body"),
            relay.clone(),
            Arc::new(mailbox.clone()),
            MailboxPoller::new(PollSettings {
                strategy: MatchStrategy::SubjectContains,
                subject_base: BASE.to_string(),
                cleanup: None,
                command_timeout: Duration::from_secs(30),
            }),
            EngineSettings {
                timestamp_source: TimestampSource::InternalDate,
                concurrency: 1,
            },
        );

        let report = engine
            .check_many(
                &addresses(&["a@example.org", "b@example.org"]),
                TIMEOUT,
                INTERVAL,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.confirmed_count(), 2);
        let sent = relay.inner.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].origin - sent[0].origin >= chrono::Duration::milliseconds(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_stalled_cycle_still_logs_out() {
        let mailbox = FakeMailbox::new();
        mailbox.hang_search_on_refresh(1);
        let (engine, relay) = engine(FakeRelay::new(&mailbox), &mailbox, 1);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            trigger.cancel();
        });

        let report = engine
            .check_many(&addresses(&["a@example.org"]), TIMEOUT, INTERVAL, &cancel)
            .await;

        assert_eq!(
            report.get("a@example.org"),
            Some(Outcome::Error(FailureKind::Cancelled))
        );
        assert_eq!(relay.sent().len(), 1);
        assert_eq!(mailbox.state().logouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_one() {
        let mailbox = FakeMailbox::new();
        let (engine, _relay) = engine(FakeRelay::new(&mailbox), &mailbox, 1);

        assert!(
            engine
                .check_one("a@example.org", TIMEOUT, INTERVAL, &CancellationToken::new())
                .await
        );
    }
}
