//! Generic retry driver

use crate::recovery::{
    classify, ErrorContext, ErrorStatistics, OperationContext, RecoveryCoordinator, RetryPolicy,
};
use crate::Result;
use parking_lot::Mutex;
use std::future::Future;
use tracing::{debug, info, warn};

/// Runs async operations under a [`RetryPolicy`]
///
/// On each failure the executor classifies the error, records it, and either
/// gives up (returning the original error untouched) or runs the matching
/// recovery action and backs off before the next attempt. An operation is
/// invoked at most `max_retries + 1` times. Validation, fatal and cancellation
/// errors are never retried.
pub struct RetryExecutor {
    policy: RetryPolicy,
    coordinator: RecoveryCoordinator,
    stats: Mutex<ErrorStatistics>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, coordinator: RecoveryCoordinator) -> Self {
        Self {
            policy,
            coordinator,
            stats: Mutex::new(ErrorStatistics::default()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds or the retry budget is spent
    ///
    /// # Arguments
    ///
    /// * `operation_name` - Name recorded in statistics and logs
    /// * `context` - Caller details copied into every [`ErrorContext`]
    /// * `operation` - Produces a fresh future per attempt
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - The first successful result
    /// * `Err(HarvestError)` - The last failure, unchanged
    pub async fn execute<T, F, Fut>(
        &self,
        operation_name: &str,
        context: &OperationContext,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let error_context = ErrorContext::new(context, operation_name, attempt);
            let category = classify(&error);
            self.stats.lock().record_error(category, operation_name);

            warn!(
                operation = operation_name,
                category = %category,
                retry_count = attempt,
                "Operation failed: {}",
                error
            );
            debug!(context = ?error_context, error = ?error, "Failure context");

            let retry = !error.is_fatal()
                && !error.is_validation()
                && self.policy.should_retry(category, attempt);

            if !retry {
                if attempt > 0 || self.policy.is_retryable(category) {
                    warn!(
                        operation = operation_name,
                        category = %category,
                        attempts = attempt + 1,
                        "Giving up"
                    );
                }
                return Err(error);
            }

            let applied = self
                .coordinator
                .attempt_recovery(&error, &error_context, category)
                .await;
            self.stats.lock().record_recovery(applied);

            let delay = self.policy.delay_for(attempt);
            debug!(
                operation = operation_name,
                delay_ms = delay.as_millis() as u64,
                "Backing off before retry"
            );
            tokio::time::sleep(delay).await;

            attempt += 1;
        }
    }

    /// Snapshot of the accumulated error counters
    pub fn error_statistics(&self) -> ErrorStatistics {
        self.stats.lock().clone()
    }

    pub fn reset_error_statistics(&self) {
        self.stats.lock().reset();
    }
}
