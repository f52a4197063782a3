use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Succeeded,
    Failed,
}

/// Outcome of checking one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub subscription_id: Uuid,
    pub cnj: String,
    pub status: ItemStatus,
    /// Provider calls made, including the first.
    pub attempts: usize,
    pub new_movements: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one monitoring run. Logged and returned, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRunReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub with_new_movements: usize,
    pub batch_sizes: Vec<usize>,
    /// CNJs with new movements, for downstream notification.
    pub flagged_for_attention: Vec<String>,
    pub items: Vec<ItemReport>,
}

impl BatchRunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration_ms: 0,
            total: 0,
            successful: 0,
            failed: 0,
            with_new_movements: 0,
            batch_sizes: Vec::new(),
            flagged_for_attention: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn record_batch(&mut self, items: Vec<ItemReport>) {
        self.batch_sizes.push(items.len());
        for item in items {
            self.total += 1;
            match item.status {
                ItemStatus::Succeeded => self.successful += 1,
                ItemStatus::Failed => self.failed += 1,
            }
            if item.new_movements > 0 {
                self.with_new_movements += 1;
                self.flagged_for_attention.push(item.cnj.clone());
            }
            self.items.push(item);
        }
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    /// Share of successful items in `[0.0, 1.0]`. An empty run counts as fully successful.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.successful as f64 / self.total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(cnj: &str, status: ItemStatus, new_movements: usize) -> ItemReport {
        ItemReport {
            subscription_id: Uuid::new_v4(),
            cnj: cnj.to_string(),
            status,
            attempts: 1,
            new_movements,
            error: None,
        }
    }

    #[test]
    fn batches_accumulate_totals_and_flags() {
        let mut report = BatchRunReport::new(Utc::now());
        report.record_batch(vec![
            item("a", ItemStatus::Succeeded, 2),
            item("b", ItemStatus::Failed, 0),
        ]);
        report.record_batch(vec![item("c", ItemStatus::Succeeded, 0)]);
        report.finish(Duration::from_millis(1234));

        assert_eq!(report.total, 3);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.batch_sizes, vec![2, 1]);
        assert_eq!(report.flagged_for_attention, vec!["a".to_string()]);
        assert_eq!(report.duration_ms, 1234);
        assert!((report.success_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_run_is_vacuously_successful() {
        assert_eq!(BatchRunReport::new(Utc::now()).success_rate(), 1.0);
    }
}
