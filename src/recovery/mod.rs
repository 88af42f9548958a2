//! Error classification, recovery and retry
//!
//! This module contains everything that decides what happens after a failure:
//! - `classify`: maps a failure onto a closed [`ErrorCategory`]
//! - `RecoveryCoordinator`: per-category remediation before the next attempt
//! - `RetryExecutor`: bounded attempts with exponential backoff and statistics

mod category;
mod context;
mod coordinator;
mod executor;
mod policy;
mod stats;

pub use category::{classify, ErrorCategory};
pub use context::{ErrorContext, OperationContext};
pub use coordinator::{RecoveryCoordinator, RecoveryTarget};
pub use executor::RetryExecutor;
pub use policy::RetryPolicy;
pub use stats::ErrorStatistics;
