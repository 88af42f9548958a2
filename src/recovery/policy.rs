use crate::config::{secs, RetryConfig};
use crate::recovery::ErrorCategory;
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;

/// Retry budget and backoff curve for one run
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter_enabled: bool,
    pub retryable_categories: HashSet<ErrorCategory>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: secs(config.base_delay),
            max_delay: secs(config.max_delay),
            exponential_base: config.exponential_base,
            jitter_enabled: config.jitter,
            retryable_categories: config.retryable_categories.iter().copied().collect(),
        }
    }
}

impl RetryPolicy {
    /// Policy with the default curve and category set
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_exponential_base(mut self, exponential_base: f64) -> Self {
        self.exponential_base = exponential_base;
        self
    }

    pub fn with_jitter(mut self, jitter_enabled: bool) -> Self {
        self.jitter_enabled = jitter_enabled;
        self
    }

    pub fn with_retryable(mut self, categories: &[ErrorCategory]) -> Self {
        self.retryable_categories = categories.iter().copied().collect();
        self
    }

    pub fn is_retryable(&self, category: ErrorCategory) -> bool {
        self.retryable_categories.contains(&category)
    }

    /// Whether a failure on zero-based `attempt` earns another attempt
    pub fn should_retry(&self, category: ErrorCategory, attempt: u32) -> bool {
        self.is_retryable(category) && attempt < self.max_retries
    }

    /// `min(base_delay * exponential_base^attempt, max_delay)`, without jitter
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Backoff delay with jitter applied when enabled
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if self.jitter_enabled {
            delay.mul_f64(rand::rng().random_range(0.5..=1.0))
        } else {
            delay
        }
    }
}
