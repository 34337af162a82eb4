//! In-memory relay, mailbox and reporter used by the unit tests

use crate::error::{Result, VerifyError};
use crate::mailbox::{CandidateMessage, MailboxConnector, MailboxSession, SearchFilter, Uid};
use crate::probe::ProbeMessage;
use crate::relay::RelayTransport;
use crate::report::Reporter;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use forwardcheck_common::Report;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub uid: Uid,
    pub subject: String,
    pub internal_date: DateTime<Utc>,
    pub seen: bool,
    pub flagged: bool,
    /// Hidden until this many refreshes have happened
    pub visible_after: usize,
}

#[derive(Debug, Default)]
pub struct MailboxState {
    pub messages: Vec<StoredMessage>,
    next_uid: Uid,
    pub opens: usize,
    pub logouts: usize,
    pub refreshes: usize,
    pub searches: Vec<SearchFilter>,
    pub fetches: Vec<Vec<Uid>>,
    pub flagged: Vec<Uid>,
    /// Refresh count at the time of each expunge
    pub expunges: Vec<usize>,
    fail_search_on_refresh: Option<usize>,
    hang_search_on_refresh: Option<usize>,
    fail_open: bool,
}

impl MailboxState {
    pub fn uids(&self) -> Vec<Uid> {
        self.messages.iter().map(|m| m.uid).collect()
    }
}

/// Shared in-memory mailbox; every session sees the same state
#[derive(Debug, Clone, Default)]
pub struct FakeMailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap()
    }

    pub fn deliver(&self, subject: &str, internal_date: DateTime<Utc>) -> Uid {
        self.deliver_after(subject, internal_date, 0)
    }

    /// Deliver a message that becomes visible on the given refresh
    pub fn deliver_after(&self, subject: &str, internal_date: DateTime<Utc>, refreshes: usize) -> Uid {
        let mut state = self.state();
        state.next_uid += 1;
        let uid = state.next_uid;
        state.messages.push(StoredMessage {
            uid,
            subject: subject.to_string(),
            internal_date,
            seen: false,
            flagged: false,
            visible_after: refreshes,
        });
        uid
    }

    pub fn mark_seen(&self, uid: Uid) {
        let mut state = self.state();
        if let Some(message) = state.messages.iter_mut().find(|m| m.uid == uid) {
            message.seen = true;
        }
    }

    pub fn fail_search_on_refresh(&self, refresh: usize) {
        self.state().fail_search_on_refresh = Some(refresh);
    }

    /// Search never answers once this refresh has happened, like a stalled server
    pub fn hang_search_on_refresh(&self, refresh: usize) {
        self.state().hang_search_on_refresh = Some(refresh);
    }

    pub fn fail_open(&self) {
        self.state().fail_open = true;
    }

    pub fn session(&self) -> FakeSession {
        FakeSession {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl MailboxConnector for FakeMailbox {
    async fn open(&self) -> Result<Box<dyn MailboxSession>> {
        let mut state = self.state();
        if state.fail_open {
            return Err(VerifyError::MailboxSession("login rejected".to_string()));
        }
        state.opens += 1;
        Ok(Box::new(self.session()))
    }
}

pub struct FakeSession {
    state: Arc<Mutex<MailboxState>>,
}

impl FakeSession {
    fn state(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn refresh(&mut self) -> Result<()> {
        self.state().refreshes += 1;
        Ok(())
    }

    async fn search(&mut self, filter: &SearchFilter) -> Result<Vec<Uid>> {
        let stalled = {
            let state = self.state();
            state
                .hang_search_on_refresh
                .map_or(false, |n| state.refreshes >= n)
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state();
        state.searches.push(filter.clone());
        if state.fail_search_on_refresh == Some(state.refreshes) {
            return Err(VerifyError::MailboxQuery("connection reset".to_string()));
        }

        let refreshes = state.refreshes;
        let uids = state
            .messages
            .iter()
            .filter(|m| refreshes >= m.visible_after)
            .filter(|m| match filter {
                SearchFilter::Unseen => !m.seen,
                SearchFilter::SubjectContains(base) => {
                    m.subject.to_lowercase().contains(&base.to_lowercase())
                }
            })
            .map(|m| m.uid)
            .collect();
        Ok(uids)
    }

    async fn fetch_candidates(&mut self, uids: &[Uid]) -> Result<Vec<CandidateMessage>> {
        let mut state = self.state();
        state.fetches.push(uids.to_vec());
        Ok(state
            .messages
            .iter()
            .filter(|m| uids.contains(&m.uid))
            .map(|m| CandidateMessage {
                uid: m.uid,
                subject: Some(m.subject.clone()),
                internal_date: Some(m.internal_date),
                date_header: Some(m.internal_date),
                deletable: false,
            })
            .collect())
    }

    async fn flag_deleted(&mut self, uids: &[Uid]) -> Result<()> {
        let mut state = self.state();
        for message in state.messages.iter_mut().filter(|m| uids.contains(&m.uid)) {
            message.flagged = true;
        }
        state.flagged.extend_from_slice(uids);
        Ok(())
    }

    async fn expunge(&mut self) -> Result<usize> {
        let mut state = self.state();
        let before = state.messages.len();
        state.messages.retain(|m| !m.flagged);
        let refreshes = state.refreshes;
        state.expunges.push(refreshes);
        Ok(before - state.messages.len())
    }

    async fn logout(&mut self) -> Result<()> {
        self.state().logouts += 1;
        Ok(())
    }
}

/// Relay that records probes and delivers them into a [`FakeMailbox`]
pub struct FakeRelay {
    mailbox: FakeMailbox,
    failing: HashSet<String>,
    dropped: HashSet<String>,
    delay_refreshes: usize,
    sent: Mutex<Vec<ProbeMessage>>,
}

impl FakeRelay {
    pub fn new(mailbox: &FakeMailbox) -> Self {
        Self {
            mailbox: mailbox.clone(),
            failing: HashSet::new(),
            dropped: HashSet::new(),
            delay_refreshes: 0,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Reject sends to this address
    pub fn failing_for(mut self, address: &str) -> Self {
        self.failing.insert(address.to_string());
        self
    }

    /// Accept sends to this address but never deliver them
    pub fn dropping(mut self, address: &str) -> Self {
        self.dropped.insert(address.to_string());
        self
    }

    /// Delivered probes become visible this many refreshes after the send
    pub fn delivering_after(mut self, refreshes: usize) -> Self {
        self.delay_refreshes = refreshes;
        self
    }

    pub fn sent(&self) -> Vec<ProbeMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayTransport for FakeRelay {
    async fn send(&self, probe: &ProbeMessage) -> Result<()> {
        if self.failing.contains(&probe.destination) {
            return Err(VerifyError::Transport("550 relay denied".to_string()));
        }
        self.sent.lock().unwrap().push(probe.clone());

        if !self.dropped.contains(&probe.destination) {
            let visible_after = self.mailbox.state().refreshes + self.delay_refreshes;
            self.mailbox
                .deliver_after(&probe.subject, probe.origin + Duration::seconds(1), visible_after);
        }
        Ok(())
    }
}

/// Reporter that keeps every published report
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<Report>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn publish(&self, report: &Report) -> anyhow::Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}
