//! MQTT reporter - Publishes reports to a broker

use super::Reporter;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use forwardcheck_common::config::{PublishMode, ReportConfig};
use forwardcheck_common::Report;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info};

const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Publishes reports with QoS 1, one broker connection per report
pub struct MqttReporter {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    topic_base: String,
    mode: PublishMode,
    timeout: Duration,
}

impl MqttReporter {
    pub fn new(config: &ReportConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(anyhow!("MQTT reporter requires report.host"));
        }

        let credentials = config.username.as_ref().map(|user| {
            (
                user.clone(),
                config.password.clone().unwrap_or_default(),
            )
        });

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            credentials,
            topic_base: config.topic_base.clone(),
            mode: config.mode,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Topic and payload pairs for a report, in publish order
    fn publications(&self, report: &Report) -> Result<Vec<(String, Vec<u8>)>> {
        match self.mode {
            PublishMode::Aggregate => {
                let payload = serde_json::to_vec(report).context("Failed to serialize report")?;
                Ok(vec![(self.topic_base.clone(), payload)])
            }
            PublishMode::PerAddress => Ok(report
                .booleans()
                .into_iter()
                .map(|(address, confirmed)| {
                    (
                        format!("{}/{}", self.topic_base, address),
                        confirmed.to_string().into_bytes(),
                    )
                })
                .collect()),
        }
    }

    fn options(&self) -> MqttOptions {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut options = MqttOptions::new(format!("forwardcheck-{}", &id[..8]), &self.host, self.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((user, password)) = &self.credentials {
            options.set_credentials(user, password);
        }
        options
    }

    /// Connect, publish, wait for every PUBACK, then disconnect
    async fn deliver(&self, publications: Vec<(String, Vec<u8>)>) -> Result<()> {
        let expected = publications.len();
        let (client, mut eventloop) = AsyncClient::new(self.options(), expected + 2);

        for (topic, payload) in publications {
            client
                .publish(topic, QoS::AtLeastOnce, false, payload)
                .await
                .context("Failed to queue MQTT publish")?;
        }

        let mut acked = 0;
        loop {
            let event = eventloop
                .poll()
                .await
                .with_context(|| format!("MQTT connection to {}:{} failed", self.host, self.port))?;

            match event {
                Event::Incoming(Packet::PubAck(_)) => {
                    acked += 1;
                    if acked == expected {
                        client
                            .disconnect()
                            .await
                            .context("Failed to queue MQTT disconnect")?;
                    }
                }
                Event::Outgoing(Outgoing::Disconnect) => return Ok(()),
                other => debug!(event = ?other, "MQTT event"),
            }
        }
    }
}

#[async_trait]
impl Reporter for MqttReporter {
    async fn publish(&self, report: &Report) -> Result<()> {
        let publications = self.publications(report)?;
        if publications.is_empty() {
            debug!("Empty report, nothing to publish");
            return Ok(());
        }
        let count = publications.len();

        tokio::time::timeout(self.timeout, self.deliver(publications))
            .await
            .map_err(|_| {
                anyhow!(
                    "MQTT publish to {}:{} did not complete within {}s",
                    self.host,
                    self.port,
                    self.timeout.as_secs()
                )
            })??;

        info!(
            broker = %format!("{}:{}", self.host, self.port),
            topic = %self.topic_base,
            messages = count,
            confirmed = report.confirmed_count(),
            "Report published"
        );
        Ok(())
    }
}
