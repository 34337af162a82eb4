//! Result Reporter - Publishes verification reports

mod mqtt;
mod webhook;

pub use mqtt::MqttReporter;
pub use webhook::WebhookReporter;

use anyhow::{Context, Result};
use async_trait::async_trait;
use forwardcheck_common::config::{ReportConfig, ReporterKind};
use forwardcheck_common::Report;
use std::sync::Arc;

/// Consumer of finished reports
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn publish(&self, report: &Report) -> Result<()>;
}

/// Prints the boolean projection as one JSON line
#[derive(Debug, Default)]
pub struct StdoutReporter;

impl StdoutReporter {
    pub fn render(report: &Report) -> Result<String> {
        serde_json::to_string(report).context("Failed to serialize report")
    }
}

#[async_trait]
impl Reporter for StdoutReporter {
    async fn publish(&self, report: &Report) -> Result<()> {
        println!("{}", Self::render(report)?);
        Ok(())
    }
}

/// Build the reporter selected in configuration
pub fn build_reporter(config: &ReportConfig) -> Result<Arc<dyn Reporter>> {
    match config.kind {
        ReporterKind::Stdout => Ok(Arc::new(StdoutReporter)),
        ReporterKind::Webhook => Ok(Arc::new(WebhookReporter::new(config)?)),
        ReporterKind::Mqtt => Ok(Arc::new(MqttReporter::new(config)?)),
    }
}
