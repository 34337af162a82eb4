//! Webhook reporter - Posts reports to an HTTP endpoint

use super::Reporter;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use forwardcheck_common::config::{PublishMode, ReportConfig};
use forwardcheck_common::Report;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Serialize)]
struct AggregatePayload<'a> {
    topic: &'a str,
    value: &'a Report,
    outcomes: forwardcheck_common::types::OutcomeMap<'a>,
}

#[derive(Serialize)]
struct AddressPayload {
    topic: String,
    value: bool,
}

/// Publishes reports as JSON POSTs
pub struct WebhookReporter {
    url: Url,
    topic_base: String,
    mode: PublishMode,
    timeout: Duration,
}

impl WebhookReporter {
    pub fn new(config: &ReportConfig) -> Result<Self> {
        let raw = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("Webhook reporter requires report.url"))?;
        let url = Url::parse(raw).with_context(|| format!("Invalid webhook URL '{}'", raw))?;

        Ok(Self {
            url,
            topic_base: config.topic_base.clone(),
            mode: config.mode,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, client: &Client, payload: &T) -> Result<()> {
        let response = client
            .post(self.url.clone())
            .json(payload)
            .send()
            .await
            .context("Webhook request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("Webhook returned status {}", response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl Reporter for WebhookReporter {
    async fn publish(&self, report: &Report) -> Result<()> {
        // One client per publish: the connection does not outlive the report
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        match self.mode {
            PublishMode::Aggregate => {
                let payload = AggregatePayload {
                    topic: &self.topic_base,
                    value: report,
                    outcomes: report.outcomes(),
                };
                self.post(&client, &payload).await?;
            }
            PublishMode::PerAddress => {
                for (address, confirmed) in report.booleans() {
                    let payload = AddressPayload {
                        topic: format!("{}/{}", self.topic_base, address),
                        value: confirmed,
                    };
                    self.post(&client, &payload).await?;
                    debug!(topic = %payload.topic, value = confirmed, "Published result");
                }
            }
        }

        info!(
            url = %self.url,
            addresses = report.len(),
            confirmed = report.confirmed_count(),
            "Report published"
        );
        Ok(())
    }
}
