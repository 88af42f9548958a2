use serde::Serialize;
use std::time::Duration;

/// Aggregate numbers over every resolved batch
///
/// Updated once per batch, after all of its requests resolved.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStatistics {
    pub total_batches: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_batch_size: f64,
    pub largest_batch: usize,

    /// Sum over batches of (serial request time - batch wall time)
    pub estimated_time_saved: Duration,
}

impl BatchStatistics {
    pub(crate) fn record_batch(
        &mut self,
        size: usize,
        successes: u64,
        failures: u64,
        serial_time: Duration,
        wall_time: Duration,
    ) {
        self.total_batches += 1;
        self.total_requests += size as u64;
        self.successful_requests += successes;
        self.failed_requests += failures;
        self.average_batch_size = self.total_requests as f64 / self.total_batches as f64;
        self.largest_batch = self.largest_batch.max(size);
        self.estimated_time_saved += serial_time.saturating_sub(wall_time);
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}
