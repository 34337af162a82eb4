//! IMAP mailbox session over implicit TLS

use super::tls::{client_connector, server_name};
use super::{CandidateMessage, MailboxConnector, MailboxSession, SearchFilter, Uid};
use crate::error::{Result, VerifyError};
use async_imap::Session;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use forwardcheck_common::config::ImapConfig;
use futures_util::TryStreamExt;
use mail_parser::MessageParser;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch items for candidates: headers only, \Seen is left untouched
const CANDIDATE_QUERY: &str = "(UID INTERNALDATE BODY.PEEK[HEADER])";

/// Opens authenticated IMAP sessions with the configured mailbox selected
pub struct ImapConnector {
    host: String,
    port: u16,
    username: String,
    password: String,
    mailbox: String,
    timeout: Duration,
}

impl ImapConnector {
    pub fn new(config: &ImapConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            mailbox: config.mailbox.clone(),
            timeout: config.timeout(),
        }
    }

    async fn connect(&self) -> Result<TlsStream<TcpStream>> {
        let addr = (self.host.as_str(), self.port);
        let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                VerifyError::MailboxSession(format!(
                    "Timed out connecting to {}:{}",
                    self.host, self.port
                ))
            })?
            .map_err(|e| {
                VerifyError::MailboxSession(format!(
                    "Failed to connect to {}:{}: {}",
                    self.host, self.port, e
                ))
            })?;

        client_connector()
            .connect(server_name(&self.host)?, tcp)
            .await
            .map_err(|e| VerifyError::MailboxSession(format!("TLS handshake failed: {}", e)))
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn open(&self) -> Result<Box<dyn MailboxSession>> {
        let session = tokio::time::timeout(self.timeout, self.login_and_select())
            .await
            .map_err(|_| {
                VerifyError::MailboxSession(format!(
                    "Login to {}:{} did not complete within {}s",
                    self.host,
                    self.port,
                    self.timeout.as_secs()
                ))
            })??;

        info!(host = %self.host, mailbox = %self.mailbox, "Mailbox session opened");
        Ok(Box::new(ImapMailbox { session }))
    }
}

impl ImapConnector {
    async fn login_and_select(&self) -> Result<Session<TlsStream<TcpStream>>> {
        let stream = self.connect().await?;
        let client = async_imap::Client::new(stream);

        let mut session = client
            .login(&self.username, &self.password)
            .await
            .map_err(|(err, _client)| {
                VerifyError::MailboxSession(format!("Login failed: {}", err))
            })?;

        if let Err(e) = session.select(&self.mailbox).await {
            if let Err(logout) = session.logout().await {
                debug!(host = %self.host, "Mailbox logout failed: {}", logout);
            }
            return Err(VerifyError::MailboxSession(format!(
                "Failed to select '{}': {}",
                self.mailbox, e
            )));
        }
        Ok(session)
    }
}

/// Selected IMAP session
pub struct ImapMailbox {
    session: Session<TlsStream<TcpStream>>,
}

fn query_error(context: &str, e: async_imap::error::Error) -> VerifyError {
    VerifyError::MailboxQuery(format!("{} failed: {}", context, e))
}

#[async_trait]
impl MailboxSession for ImapMailbox {
    async fn refresh(&mut self) -> Result<()> {
        self.session
            .noop()
            .await
            .map_err(|e| query_error("NOOP", e))
    }

    async fn search(&mut self, filter: &SearchFilter) -> Result<Vec<Uid>> {
        let query = search_query(filter);
        let found = self
            .session
            .uid_search(&query)
            .await
            .map_err(|e| query_error("SEARCH", e))?;

        let mut uids: Vec<Uid> = found.into_iter().collect();
        uids.sort_unstable();
        debug!(query = %query, count = uids.len(), "Mailbox search");
        Ok(uids)
    }

    async fn fetch_candidates(&mut self, uids: &[Uid]) -> Result<Vec<CandidateMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let fetches: Vec<_> = self
            .session
            .uid_fetch(uid_set(uids), CANDIDATE_QUERY)
            .await
            .map_err(|e| query_error("FETCH", e))?
            .try_collect()
            .await
            .map_err(|e| query_error("FETCH", e))?;

        let mut candidates = Vec::with_capacity(fetches.len());
        for fetch in &fetches {
            let Some(uid) = fetch.uid else {
                warn!(seq = fetch.message, "Fetch response without UID, skipping");
                continue;
            };

            let (subject, date_header) = fetch
                .header()
                .map(parse_header_fields)
                .unwrap_or((None, None));

            candidates.push(CandidateMessage {
                uid,
                subject,
                internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
                date_header,
                deletable: false,
            });
        }
        Ok(candidates)
    }

    async fn flag_deleted(&mut self, uids: &[Uid]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }

        let _: Vec<_> = self
            .session
            .uid_store(uid_set(uids), "+FLAGS.SILENT (\\Deleted)")
            .await
            .map_err(|e| query_error("STORE", e))?
            .try_collect()
            .await
            .map_err(|e| query_error("STORE", e))?;
        Ok(())
    }

    async fn expunge(&mut self) -> Result<usize> {
        let removed: Vec<_> = self
            .session
            .expunge()
            .await
            .map_err(|e| query_error("EXPUNGE", e))?
            .try_collect()
            .await
            .map_err(|e| query_error("EXPUNGE", e))?;
        Ok(removed.len())
    }

    async fn logout(&mut self) -> Result<()> {
        self.session
            .logout()
            .await
            .map_err(|e| VerifyError::MailboxSession(format!("Logout failed: {}", e)))
    }
}

/// Build the UID SEARCH criteria for a filter
///
/// Non-ASCII subject bases cannot be sent as a quoted string, so those fall
/// back to searching every message and rely on the local subject check.
fn search_query(filter: &SearchFilter) -> String {
    match filter {
        SearchFilter::Unseen => "UNSEEN".to_string(),
        SearchFilter::SubjectContains(base) if base.is_ascii() => {
            format!("SUBJECT {}", quote(base))
        }
        SearchFilter::SubjectContains(_) => "ALL".to_string(),
    }
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

fn uid_set(uids: &[Uid]) -> String {
    uids.iter()
        .map(|uid| uid.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Extract the decoded Subject and Date headers from a raw header block
fn parse_header_fields(raw: &[u8]) -> (Option<String>, Option<DateTime<Utc>>) {
    let Some(message) = MessageParser::default().parse(raw) else {
        return (None, None);
    };

    let subject = message.subject().map(|s| s.trim().to_string());
    let date = message
        .date()
        .and_then(|d| Utc.timestamp_opt(d.to_timestamp(), 0).single());

    (subject, date)
}
