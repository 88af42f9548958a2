use crate::recovery::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Error counters owned by one retry executor
///
/// Counters only grow; [`ErrorStatistics::reset`] is the single way back to zero.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStatistics {
    pub total_errors: u64,
    pub errors_by_category: BTreeMap<ErrorCategory, u64>,
    pub errors_by_operation: BTreeMap<String, u64>,
    pub recovery_attempts: u64,
    pub successful_recoveries: u64,
    pub last_error_time: Option<DateTime<Utc>>,
}

impl ErrorStatistics {
    pub fn record_error(&mut self, category: ErrorCategory, operation: &str) {
        self.total_errors += 1;
        *self.errors_by_category.entry(category).or_insert(0) += 1;
        *self
            .errors_by_operation
            .entry(operation.to_string())
            .or_insert(0) += 1;
        self.last_error_time = Some(Utc::now());
    }

    pub fn record_recovery(&mut self, applied: bool) {
        self.recovery_attempts += 1;
        if applied {
            self.successful_recoveries += 1;
        }
    }

    pub fn category_count(&self, category: ErrorCategory) -> u64 {
        self.errors_by_category.get(&category).copied().unwrap_or(0)
    }

    pub fn operation_count(&self, operation: &str) -> u64 {
        self.errors_by_operation.get(operation).copied().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
