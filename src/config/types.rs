use crate::config::site::SiteConfig;
use crate::recovery::ErrorCategory;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Harvest
///
/// Every section is optional; a missing table falls back to its defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retry: RetryConfig,
    pub resources: ResourceConfig,
    pub batching: BatchingConfig,
    pub identity: IdentityConfig,
    #[serde(rename = "site")]
    pub sites: Vec<SiteConfig>,
}

/// Retry and recovery behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// First backoff delay (seconds)
    pub base_delay: f64,

    /// Backoff ceiling (seconds)
    pub max_delay: f64,

    /// Growth factor between attempts
    pub exponential_base: f64,

    /// Scale each delay by a random factor in [0.5, 1.0]
    pub jitter: bool,

    /// Categories that may be retried at all
    pub retryable_categories: Vec<ErrorCategory>,

    /// Unit wait used by recovery actions (seconds)
    pub recovery_wait: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: 1.0,
            max_delay: 60.0,
            exponential_base: 2.0,
            jitter: true,
            retryable_categories: ErrorCategory::default_retryable().to_vec(),
            recovery_wait: 1.0,
        }
    }
}

/// Browser, session and memory limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ResourceConfig {
    /// Memory ceiling for the whole process (megabytes)
    pub max_memory_mb: f64,

    /// Check the ceiling between workflow steps
    pub enable_memory_monitoring: bool,

    /// Idle pooled connections kept per host
    pub max_connections_per_host: usize,

    /// Block images, fonts and media in browser contexts
    pub block_assets: bool,

    pub viewport_width: u32,
    pub viewport_height: u32,

    /// HTTP session connect timeout (seconds)
    pub connect_timeout: f64,

    /// HTTP session request timeout (seconds)
    pub session_timeout: f64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 2048.0,
            enable_memory_monitoring: true,
            max_connections_per_host: 10,
            block_assets: true,
            viewport_width: 1366,
            viewport_height: 768,
            connect_timeout: 10.0,
            session_timeout: 30.0,
        }
    }
}

/// Request batching behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BatchingConfig {
    /// Requests per batch before an immediate dispatch
    pub batch_size: usize,

    /// Longest a partial batch waits before dispatch (seconds)
    pub batch_timeout: f64,

    /// Destination groups executing at once
    pub max_concurrent_batches: usize,

    /// Default per-request timeout (seconds)
    pub request_timeout: f64,

    /// Default per-request retry budget
    pub request_retries: u32,

    /// First per-request backoff delay (seconds)
    pub request_base_delay: f64,

    /// Per-request backoff ceiling (seconds)
    pub request_max_delay: f64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_timeout: 0.1,
            max_concurrent_batches: 5,
            request_timeout: 30.0,
            request_retries: 3,
            request_base_delay: 0.5,
            request_max_delay: 10.0,
        }
    }
}

impl BatchingConfig {
    pub fn batch_timeout(&self) -> Duration {
        secs(self.batch_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        secs(self.request_timeout)
    }
}

/// Seconds to a `Duration`, clamping negatives to zero and overflow to the max
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// Outbound identities used for rotation
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IdentityConfig {
    pub user_agents: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
            ],
        }
    }
}

impl Config {
    /// Looks up a registered site by id
    pub fn site(&self, id: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.id == id)
    }
}
