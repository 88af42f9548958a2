//! Sumi-Harvest: a resilient crawl-execution engine
//!
//! This crate drives structured-data extraction against flaky, throttling,
//! frequently-changing sites. It wraps every step of a crawl in classified
//! retries, keeps browser and HTTP resources on a strict acquire/release
//! discipline with a memory ceiling, and batches many small fetches into
//! bounded concurrent groups.

pub mod batching;
pub mod config;
pub mod recovery;
pub mod resources;
pub mod workflow;

use thiserror::Error;

/// Main error type for Sumi-Harvest operations
///
/// The first eight variants form the failure taxonomy; each maps to exactly one
/// [`recovery::ErrorCategory`]. The transport variants carry structured codes
/// that the classifier consults before falling back to message text.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Invalid parameter '{parameter}': {message}")]
    Validation { parameter: String, message: String },

    #[error("Parse error: {0}")]
    Parsing(String),

    #[error("{0}")]
    Unknown(String),

    /// Process-level memory breach; aborts the whole run
    #[error("Memory ceiling exceeded: {usage_mb:.1}MB in use, hard limit {limit_mb:.1}MB")]
    FatalResource { usage_mb: f64, limit_mb: f64 },

    #[error("Run cancelled during {operation}")]
    Cancelled { operation: String },

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Builds a validation error naming the offending parameter
    pub fn validation(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        HarvestError::Validation {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Errors that must end the run instead of the current step
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarvestError::FatalResource { .. } | HarvestError::Cancelled { .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, HarvestError::Validation { .. })
    }

    /// HTTP status carried by a transport error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            HarvestError::HttpStatus { status, .. } => Some(*status),
            HarvestError::Http { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Unknown site: {0}")]
    UnknownSite(String),
}

/// Result type alias for Sumi-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use batching::{BatchResponse, BatchStatistics, RequestBatchingEngine, RequestSpec};
pub use config::Config;
pub use recovery::{classify, ErrorCategory, ErrorStatistics, RetryExecutor, RetryPolicy};
pub use resources::{ResourceLifecycleManager, ResourceRegistry, ResourceUsage};
pub use workflow::{CrawlWorkflowController, ResultRecord, SearchParams};
