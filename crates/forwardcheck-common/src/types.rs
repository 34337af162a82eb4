//! Common types for forwardcheck

use crate::error::{Error, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Coarse server-side filter used to pick candidate messages before the
/// exact subject/timestamp match is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Messages without the \Seen flag
    Unseen,
    /// Messages whose subject contains the probe subject base
    #[default]
    SubjectContains,
}

/// Which inspected messages get flagged for deletion when cleanup is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPolicy {
    /// Every candidate inspected during a cycle, matched or not
    #[default]
    AllInspected,
    /// Only candidates that matched the probe
    MatchedOnly,
}

/// Where a candidate's timestamp is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    /// Server-side receipt time (IMAP INTERNALDATE)
    #[default]
    InternalDate,
    /// The message's own Date header
    DateHeader,
}

/// Why a verification could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Relay unreachable, authentication failure or rejected send
    Transport,
    /// Mailbox connect, login or select failed
    MailboxSession,
    /// Search, fetch, store or expunge failed on an open session
    MailboxQuery,
    /// Abandoned because of shutdown
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::MailboxSession => "mailbox_session",
            FailureKind::MailboxQuery => "mailbox_query",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of verifying one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The probe was observed in the mailbox
    Confirmed,
    /// The deadline passed without observing the probe
    NotConfirmed,
    /// The verification could not complete
    Error(FailureKind),
}

impl Outcome {
    /// Boolean projection: only a confirmed outcome is `true`.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Outcome::Confirmed)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Confirmed => "confirmed",
            Outcome::NotConfirmed => "not_confirmed",
            Outcome::Error(_) => "error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Error(kind) => write!(f, "error ({})", kind),
            other => f.write_str(other.as_str()),
        }
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Per-batch verification report.
///
/// Keys are unique and iteration follows insertion order, which the engine
/// keeps identical to the input address list. Serializes as the boolean
/// projection `{ address: confirmed }`; use [`Report::outcomes`] for the
/// tri-state view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    entries: Vec<(String, Outcome)>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Fails if the address is already present.
    pub fn insert(&mut self, address: impl Into<String>, outcome: Outcome) -> Result<()> {
        let address = address.into();
        if self.contains(&address) {
            return Err(Error::DuplicateAddress(address));
        }
        self.entries.push((address, outcome));
        Ok(())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.iter().any(|(a, _)| a == address)
    }

    pub fn get(&self, address: &str) -> Option<Outcome> {
        self.entries
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, o)| *o)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Outcome)> + '_ {
        self.entries.iter().map(|(a, o)| (a.as_str(), *o))
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(a, _)| a.as_str())
    }

    /// Boolean projection in insertion order
    pub fn booleans(&self) -> Vec<(&str, bool)> {
        self.iter().map(|(a, o)| (a, o.is_confirmed())).collect()
    }

    pub fn confirmed_count(&self) -> usize {
        self.entries.iter().filter(|(_, o)| o.is_confirmed()).count()
    }

    pub fn error_count(&self) -> usize {
        self.entries.iter().filter(|(_, o)| o.is_error()).count()
    }

    /// True if any verification in this batch was abandoned by shutdown.
    pub fn was_interrupted(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, o)| *o == Outcome::Error(FailureKind::Cancelled))
    }

    /// Tri-state view, serializing as `{ address: "confirmed" | "not_confirmed" | "error" }`.
    pub fn outcomes(&self) -> OutcomeMap<'_> {
        OutcomeMap(self)
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (address, outcome) in &self.entries {
            map.serialize_entry(address, &outcome.is_confirmed())?;
        }
        map.end()
    }
}

/// Borrowed tri-state serialization of a [`Report`]
pub struct OutcomeMap<'a>(&'a Report);

impl Serialize for OutcomeMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.entries.len()))?;
        for (address, outcome) in &self.0.entries {
            map.serialize_entry(address, outcome)?;
        }
        map.end()
    }
}

/// Split an address into local part and domain.
///
/// Only the shape `local@domain` is checked; deliverability is the relay's business.
pub fn parse_address(s: &str) -> Option<(&str, &str)> {
    let (local, domain) = s.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() || s.chars().any(char::is_whitespace) {
        return None;
    }
    Some((local, domain))
}
