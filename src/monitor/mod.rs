//! Batch monitoring scheduler.
//!
//! A run loads every active subscription, splits them into fixed-size
//! batches and checks each batch through a bounded pool. Batches run one
//! after another with a pause in between to pace provider traffic. A failing
//! item never aborts the run; only failing to load subscriptions does.

pub mod report;
pub mod sweep;
pub mod trigger;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::config::BatchConfig;
use crate::db::{Database, MonitoringSubscriptionRecord};
use crate::error::MonitorError;
use crate::provider::{Movement, ProviderGateway};
use crate::retry::{RetryPolicy, retry_transient};

pub use report::{BatchRunReport, ItemReport, ItemStatus};
pub use sweep::{StaleOnboardingSweep, SweepReport};

pub struct MonitoringScheduler {
    db: Arc<dyn Database>,
    gateway: Arc<dyn ProviderGateway>,
}

impl MonitoringScheduler {
    pub fn new(db: Arc<dyn Database>, gateway: Arc<dyn ProviderGateway>) -> Self {
        Self { db, gateway }
    }

    pub async fn run_daily_check(
        &self,
        config: &BatchConfig,
    ) -> Result<BatchRunReport, MonitorError> {
        config.validate()?;
        let started_at = Utc::now();
        let clock = Instant::now();

        let subscriptions = self.db.list_active_subscriptions().await.map_err(|e| {
            tracing::error!("Monitoring run aborted: failed to load subscriptions: {}", e);
            MonitorError::LoadSubscriptions(e)
        })?;

        let lookback = chrono::Duration::from_std(config.lookback)
            .map_err(|e| MonitorError::InvalidConfig(format!("invalid lookback: {e}")))?;
        let since = started_at - lookback;
        let policy = config.retry_policy();
        let batch_count = subscriptions.len().div_ceil(config.batch_size);

        tracing::info!(
            subscriptions = subscriptions.len(),
            batches = batch_count,
            batch_size = config.batch_size,
            concurrent_checks = config.concurrent_checks,
            since = %since,
            "Starting monitoring run"
        );

        let mut report = BatchRunReport::new(started_at);
        for (index, batch) in subscriptions.chunks(config.batch_size).enumerate() {
            let items: Vec<ItemReport> = stream::iter(batch.iter().cloned())
                .map(|subscription| self.check_subscription(subscription, since, policy))
                .buffer_unordered(config.concurrent_checks)
                .collect()
                .await;

            let failed = items
                .iter()
                .filter(|item| item.status == ItemStatus::Failed)
                .count();
            tracing::info!(
                batch = index + 1,
                of = batch_count,
                size = items.len(),
                failed,
                "Monitoring batch finished"
            );
            report.record_batch(items);

            if index + 1 < batch_count && !config.batch_delay.is_zero() {
                tokio::time::sleep(config.batch_delay).await;
            }
        }

        report.finish(clock.elapsed());
        tracing::info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            with_new_movements = report.with_new_movements,
            success_pct = report.success_rate() * 100.0,
            duration_ms = report.duration_ms,
            "Monitoring run finished"
        );
        Ok(report)
    }

    async fn check_subscription(
        &self,
        subscription: MonitoringSubscriptionRecord,
        since: DateTime<Utc>,
        policy: RetryPolicy,
    ) -> ItemReport {
        let gateway = self.gateway.as_ref();
        let provider_id = subscription.provider_subscription_id.as_str();
        let outcome = retry_transient(policy, "fetch_tracking_updates", move || {
            gateway.fetch_tracking_updates(provider_id, since)
        })
        .await;

        let mut item = ItemReport {
            subscription_id: subscription.id,
            cnj: subscription.cnj.clone(),
            status: ItemStatus::Failed,
            attempts: outcome.attempts,
            new_movements: 0,
            error: None,
        };

        let movements = match outcome.result {
            Ok(movements) => movements,
            Err(e) => {
                tracing::warn!(
                    cnj = %subscription.cnj,
                    attempts = outcome.attempts,
                    "Monitoring check failed: {}",
                    e
                );
                item.error = Some(e.to_string());
                return item;
            }
        };

        let fresh = within_lookback(movements, since);
        if !fresh.is_empty() {
            match self.db.append_movements(&subscription.cnj, &fresh).await {
                Ok(added) => item.new_movements = added,
                Err(e) => {
                    tracing::warn!(cnj = %subscription.cnj, "Failed to store new movements: {}", e);
                    item.error = Some(e.to_string());
                    return item;
                }
            }
        }

        if let Err(e) = self
            .db
            .mark_subscription_checked(subscription.id, Utc::now())
            .await
        {
            tracing::warn!(cnj = %subscription.cnj, "Failed to stamp subscription check: {}", e);
        }

        if item.new_movements > 0 {
            tracing::info!(
                cnj = %subscription.cnj,
                new_movements = item.new_movements,
                "New movements found"
            );
        }
        item.status = ItemStatus::Succeeded;
        item
    }
}

/// Drop movements older than the lookback window.
pub fn within_lookback(movements: Vec<Movement>, since: DateTime<Utc>) -> Vec<Movement> {
    movements
        .into_iter()
        .filter(|movement| movement.occurred_at >= since)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement(id: &str, hours_ago: i64, now: DateTime<Utc>) -> Movement {
        Movement {
            id: id.to_string(),
            occurred_at: now - chrono::Duration::hours(hours_ago),
            content: id.to_string(),
            kind: None,
        }
    }

    #[test]
    fn lookback_keeps_recent_and_drops_old() {
        let now = Utc::now();
        let since = now - chrono::Duration::hours(24);
        let kept = within_lookback(
            vec![movement("recent", 23, now), movement("old", 25, now)],
            since,
        );

        let ids: Vec<_> = kept.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["recent"]);
    }
}
