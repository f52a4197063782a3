//! Cron-driven daily trigger for the monitoring run and the stale sweep.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::MonitoringConfig;
use crate::error::MonitorError;

use super::{MonitoringScheduler, StaleOnboardingSweep};

pub fn parse_schedule(expression: &str) -> Result<Schedule, MonitorError> {
    Schedule::from_str(expression.trim()).map_err(|e| MonitorError::Schedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Next fire time strictly after `now`.
pub fn next_fire_after(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&now).next()
}

/// Spawn the daily loop. It exits when `shutdown` flips to `true` or its sender is dropped.
pub fn spawn_daily_check(
    scheduler: Arc<MonitoringScheduler>,
    sweep: Arc<StaleOnboardingSweep>,
    config: MonitoringConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>, MonitorError> {
    let schedule = parse_schedule(&config.schedule)?;
    config.batch.validate()?;

    Ok(tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = next_fire_after(&schedule, now) else {
                tracing::warn!(schedule = %config.schedule, "Schedule has no upcoming fire time; stopping");
                return;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tracing::info!(next = %next, "Next monitoring run scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Monitoring trigger shutting down");
                        return;
                    }
                    continue;
                }
            }

            match scheduler.run_daily_check(&config.batch).await {
                Ok(report) => tracing::info!(
                    total = report.total,
                    successful = report.successful,
                    failed = report.failed,
                    flagged = report.flagged_for_attention.len(),
                    "Scheduled monitoring run complete"
                ),
                Err(e) => tracing::error!("Scheduled monitoring run failed: {}", e),
            }

            if let Err(e) = sweep.run(config.stale_onboarding_after).await {
                tracing::error!("Stale onboarding sweep failed: {}", e);
            }
        }
    }))
}
