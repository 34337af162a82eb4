//! Run Scheduler - Periodic verification runs

use crate::engine::VerificationEngine;
use crate::report::Reporter;
use forwardcheck_common::config::CheckConfig;
use forwardcheck_common::Report;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What a scheduled run verifies
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub addresses: Vec<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl JobSpec {
    pub fn from_config(check: &CheckConfig) -> Self {
        Self {
            addresses: check.emails.clone(),
            timeout: check.timeout(),
            poll_interval: check.poll_interval(),
        }
    }
}

/// Verification scheduler
pub struct VerificationScheduler {
    engine: Arc<VerificationEngine>,
    reporter: Arc<dyn Reporter>,
    job: JobSpec,
    /// Time between run starts
    interval: Duration,
    /// Run once immediately instead of waiting a full interval
    run_now: bool,
}

impl VerificationScheduler {
    pub fn new(engine: Arc<VerificationEngine>, reporter: Arc<dyn Reporter>, job: JobSpec) -> Self {
        Self {
            engine,
            reporter,
            job,
            interval: Duration::from_secs(3600),
            run_now: true,
        }
    }

    /// Set run interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set whether the first run starts immediately
    pub fn with_run_now(mut self, run_now: bool) -> Self {
        self.run_now = run_now;
        self
    }

    /// Run one batch and publish it. Interrupted batches are not published.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Report {
        let report = self
            .engine
            .check_many(
                &self.job.addresses,
                self.job.timeout,
                self.job.poll_interval,
                cancel,
            )
            .await;

        if report.was_interrupted() {
            warn!("Run interrupted by shutdown, report not published");
            return report;
        }

        if let Err(e) = self.reporter.publish(&report).await {
            error!("Failed to publish report: {:#}", e);
        }
        report
    }

    /// Run until cancelled, returning the number of runs started
    pub async fn run(&self, cancel: CancellationToken) -> u64 {
        let start = if self.run_now {
            Instant::now()
        } else {
            Instant::now() + self.interval
        };
        let mut ticker = interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Verification scheduler started (addresses: {}, interval: {}s, run_now: {})",
            self.job.addresses.len(),
            self.interval.as_secs(),
            self.run_now
        );

        let mut runs = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            runs += 1;
            self.run_once(&cancel).await;

            if cancel.is_cancelled() {
                break;
            }
        }

        info!("Verification scheduler stopped after {} runs", runs);
        runs
    }
}
