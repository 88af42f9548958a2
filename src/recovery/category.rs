//! Failure classification
//!
//! Transport failures that carry a structured code (HTTP status, reqwest error
//! kind, I/O error kind) are classified by that code alone; their messages embed
//! URLs, which are not evidence. Everything else goes through the declared kind
//! and the lower-cased message text in priority order. Rate limiting is checked
//! before timeouts because throttled upstreams frequently report the throttle as
//! a timeout.

use crate::HarvestError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimit,
    Authentication,
    Resource,
    Validation,
    Parsing,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 8] = [
        ErrorCategory::Network,
        ErrorCategory::Timeout,
        ErrorCategory::RateLimit,
        ErrorCategory::Authentication,
        ErrorCategory::Resource,
        ErrorCategory::Validation,
        ErrorCategory::Parsing,
        ErrorCategory::Unknown,
    ];

    /// Categories retried when the configuration does not say otherwise
    pub fn default_retryable() -> &'static [ErrorCategory] {
        &[
            ErrorCategory::Network,
            ErrorCategory::Timeout,
            ErrorCategory::RateLimit,
            ErrorCategory::Resource,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Parsing => "parsing",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a failure to its category
///
/// # Priority
///
/// | Category | Matches |
/// |----------|---------|
/// | RateLimit | declared, HTTP 429, "rate limit", "429" |
/// | Timeout | declared, transport timeout, "timeout", "timed out" |
/// | Network | declared, connect failure, "network", "connection" |
/// | Authentication | declared, HTTP 401/403, "auth", "401", "403" |
/// | Resource | declared (incl. fatal), "memory", "resource" |
/// | Validation | declared only |
/// | Parsing | declared, JSON/decode failure, "parse", "json" |
/// | Unknown | everything else |
///
/// An `HttpStatus` error is classified by its status code only. `Http` and
/// `Io` errors use their structured kind when one applies and fall back to the
/// text scan otherwise.
pub fn classify(error: &HarvestError) -> ErrorCategory {
    if let HarvestError::HttpStatus { status, .. } = error {
        return status_category(*status).unwrap_or(ErrorCategory::Unknown);
    }
    if let Some(category) = transport_category(error) {
        return category;
    }

    let declared = declared_category(error);
    let text = error.to_string().to_lowercase();
    let is = |category: ErrorCategory| declared == Some(category);
    let mentions = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if is(ErrorCategory::RateLimit) || mentions(&["rate limit", "429"]) {
        ErrorCategory::RateLimit
    } else if is(ErrorCategory::Timeout) || mentions(&["timeout", "timed out"]) {
        ErrorCategory::Timeout
    } else if is(ErrorCategory::Network) || mentions(&["network", "connection"]) {
        ErrorCategory::Network
    } else if is(ErrorCategory::Authentication) || mentions(&["auth", "401", "403"]) {
        ErrorCategory::Authentication
    } else if is(ErrorCategory::Resource) || mentions(&["memory", "resource"]) {
        ErrorCategory::Resource
    } else if is(ErrorCategory::Validation) {
        ErrorCategory::Validation
    } else if is(ErrorCategory::Parsing) || mentions(&["parse", "json"]) {
        ErrorCategory::Parsing
    } else {
        ErrorCategory::Unknown
    }
}

/// Category implied by the error's type
fn declared_category(error: &HarvestError) -> Option<ErrorCategory> {
    match error {
        HarvestError::Network(_) => Some(ErrorCategory::Network),
        HarvestError::Timeout(_) => Some(ErrorCategory::Timeout),
        HarvestError::RateLimit(_) => Some(ErrorCategory::RateLimit),
        HarvestError::Authentication(_) => Some(ErrorCategory::Authentication),
        HarvestError::Resource(_) | HarvestError::FatalResource { .. } => {
            Some(ErrorCategory::Resource)
        }
        HarvestError::Validation { .. } => Some(ErrorCategory::Validation),
        HarvestError::Parsing(_) | HarvestError::Json(_) => Some(ErrorCategory::Parsing),
        _ => None,
    }
}

/// Category from a transport error's structured code, if it has one
fn transport_category(error: &HarvestError) -> Option<ErrorCategory> {
    match error {
        HarvestError::Http { source, .. } => {
            if let Some(status) = source.status() {
                status_category(status.as_u16())
            } else if source.is_timeout() {
                Some(ErrorCategory::Timeout)
            } else if source.is_connect() || source.is_request() {
                Some(ErrorCategory::Network)
            } else if source.is_decode() {
                Some(ErrorCategory::Parsing)
            } else {
                None
            }
        }
        HarvestError::Io(e) => match e.kind() {
            std::io::ErrorKind::TimedOut => Some(ErrorCategory::Timeout),
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Some(ErrorCategory::Network),
            _ => None,
        },
        _ => None,
    }
}

fn status_category(status: u16) -> Option<ErrorCategory> {
    match status {
        429 => Some(ErrorCategory::RateLimit),
        408 | 504 => Some(ErrorCategory::Timeout),
        401 | 403 => Some(ErrorCategory::Authentication),
        500..=599 => Some(ErrorCategory::Network),
        _ => None,
    }
}
