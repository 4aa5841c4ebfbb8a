//! Telemetry retention sweeper
//!
//! Purges download statistics older than the retention horizon, either on
//! a cron schedule or through the manual trigger. The sweeper is a two
//! state machine, Idle and Running: overlapping runs are refused rather
//! than queued, and a failed purge simply waits for the next interval
//! because the operation is idempotent.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use cron::Schedule;
use tracing::{error, info, warn};

use crate::{
    config::RetentionConfig, errors::AppError, models::SweepOutcome,
    repositories::StatisticsRepository,
};

pub struct RetentionSweeper {
    statistics: StatisticsRepository,
    retention_days: i64,
    cron: String,
    running: AtomicBool,
}

impl RetentionSweeper {
    pub fn new(statistics: StatisticsRepository, config: &RetentionConfig) -> Self {
        Self {
            statistics,
            retention_days: config.days,
            cron: config.cron.clone(),
            running: AtomicBool::new(false),
        }
    }

    /// Run one sweep now
    ///
    /// Refuses to overlap a sweep already in progress and reports that as
    /// [`SweepOutcome::Skipped`]. Always returns to Idle, even on failure.
    pub async fn run_once(&self) -> Result<SweepOutcome, AppError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Retention sweep already running, skipping");
            return Ok(SweepOutcome::Skipped);
        }

        let result = self.purge().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn purge(&self) -> Result<SweepOutcome, AppError> {
        let cutoff = Utc::now() - Duration::days(self.retention_days);

        match self.statistics.purge_before(cutoff).await {
            Ok(removed) => {
                info!(
                    "Retention sweep removed {} statistics older than {}",
                    removed, cutoff
                );
                Ok(SweepOutcome::Completed { cutoff })
            }
            Err(e) => {
                error!("Retention sweep failed: {}", e);
                Err(AppError::Repository(e))
            }
        }
    }

    /// Drive the sweeper on its cron schedule until the process exits
    ///
    /// Owned by the composition root; purge failures are logged and the
    /// loop waits for the next occurrence without retrying.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let schedule = Schedule::from_str(&self.cron)
            .map_err(|e| anyhow::anyhow!("invalid retention cron '{}': {}", self.cron, e))?;

        info!(
            "Retention sweeper scheduled with cron '{}' ({} day horizon)",
            self.cron, self.retention_days
        );

        loop {
            let now = Utc::now();
            let Some(next) = schedule.after(&now).next() else {
                warn!("Retention cron '{}' yields no further occurrences", self.cron);
                return Ok(());
            };

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            match self.run_once().await {
                Ok(SweepOutcome::Completed { .. }) => {}
                Ok(SweepOutcome::Skipped) => {
                    warn!("Scheduled retention sweep skipped: a sweep was already running");
                }
                Err(e) => {
                    error!("Scheduled retention sweep failed: {}", e);
                }
            }
        }
    }
}
