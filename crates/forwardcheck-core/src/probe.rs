//! Probe Tagger - Builds the uniquely tagged probe message

use chrono::{DateTime, Utc};
use forwardcheck_common::config::CheckConfig;
use std::fmt;
use uuid::Uuid;

/// Marker shared by every probe of one verification run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunMarker(String);

impl RunMarker {
    /// Generate a fresh marker
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self(id[..12].to_string())
    }

    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A probe ready to be handed to the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeMessage {
    pub destination: String,
    pub subject: String,
    pub body: String,
    /// Creation time; candidates must be strictly newer to match
    pub origin: DateTime<Utc>,
}

/// Builds probe messages from a fixed subject base and body
#[derive(Debug, Clone)]
pub struct ProbeTagger {
    subject_base: String,
    body: String,
}

impl ProbeTagger {
    pub fn new(subject_base: impl Into<String>, body: impl Into<String>) -> Self {
        // Header injection guard: the subject base ends up in a header and a search query
        let subject_base = subject_base
            .into()
            .replace(['\r', '\n'], " ")
            .trim()
            .to_string();
        Self {
            subject_base,
            body: body.into(),
        }
    }

    pub fn from_config(check: &CheckConfig) -> Self {
        Self::new(check.subject_base.clone(), check.body.clone())
    }

    pub fn subject_base(&self) -> &str {
        &self.subject_base
    }

    /// Subject expected for `destination` within `run`
    pub fn subject_for(&self, destination: &str, run: &RunMarker) -> String {
        format!("{} - {} [{}]", self.subject_base, destination, run)
    }

    /// Create the probe for one address
    pub fn tag(&self, destination: &str, run: &RunMarker) -> ProbeMessage {
        ProbeMessage {
            destination: destination.to_string(),
            subject: self.subject_for(destination, run),
            body: self.body.clone(),
            origin: Utc::now(),
        }
    }
}
