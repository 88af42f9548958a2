//! Category-specific remediation between retries

use crate::recovery::{ErrorCategory, ErrorContext};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Side effects a recovery action can ask for
///
/// Each method returns whether there was anything to act on (a page to
/// refresh, a session to clear); `Ok(false)` is not a failure.
#[async_trait]
pub trait RecoveryTarget: Send + Sync {
    async fn refresh_page(&self) -> Result<bool>;

    /// Stops scripts still running in the page
    async fn cancel_scripts(&self) -> Result<bool>;

    /// Switches to the next outbound identity
    async fn rotate_identity(&self) -> Result<bool>;

    /// Drops cookies and storage, then reloads
    async fn clear_session(&self) -> Result<bool>;

    /// Forces a reclaim pass and re-checks the memory ceiling
    async fn reclaim_memory(&self) -> Result<bool>;
}

/// Picks and applies one remediation per failure category
///
/// | Category | Action |
/// |----------|--------|
/// | Network | wait, refresh page if open |
/// | Timeout | wait 2x, cancel in-flight scripts |
/// | RateLimit | wait 3x, rotate identity |
/// | Authentication | clear session and reload |
/// | Resource | reclaim memory, re-check ceiling |
/// | Parsing, Unknown | wait |
/// | Validation | nothing |
pub struct RecoveryCoordinator {
    unit_wait: Duration,
    target: Option<Arc<dyn RecoveryTarget>>,
}

impl RecoveryCoordinator {
    pub fn new(unit_wait: Duration) -> Self {
        Self {
            unit_wait,
            target: None,
        }
    }

    pub fn with_target(mut self, target: Arc<dyn RecoveryTarget>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn unit_wait(&self) -> Duration {
        self.unit_wait
    }

    /// Applies the remediation for `category`
    ///
    /// Returns whether the action ran to completion. A failing action is logged
    /// and reported as `false`; it never replaces `error`.
    pub async fn attempt_recovery(
        &self,
        error: &HarvestError,
        context: &ErrorContext,
        category: ErrorCategory,
    ) -> bool {
        debug!(
            operation = %context.operation,
            category = %category,
            retry_count = context.retry_count,
            "Attempting recovery after: {}",
            error
        );

        match self.apply(category).await {
            Ok(applied) => applied,
            Err(recovery_error) => {
                warn!(
                    operation = %context.operation,
                    category = %category,
                    "Recovery action failed: {}",
                    recovery_error
                );
                false
            }
        }
    }

    async fn apply(&self, category: ErrorCategory) -> Result<bool> {
        match category {
            ErrorCategory::Network => {
                self.wait(1).await;
                if let Some(target) = &self.target {
                    if target.refresh_page().await? {
                        debug!("Page refreshed after network failure");
                    }
                }
                Ok(true)
            }
            ErrorCategory::Timeout => {
                self.wait(2).await;
                if let Some(target) = &self.target {
                    if target.cancel_scripts().await? {
                        debug!("Cancelled in-flight scripts after timeout");
                    }
                }
                Ok(true)
            }
            ErrorCategory::RateLimit => {
                self.wait(3).await;
                if let Some(target) = &self.target {
                    if target.rotate_identity().await? {
                        info!("Rotated outbound identity after rate limit");
                    }
                }
                Ok(true)
            }
            ErrorCategory::Authentication => {
                if let Some(target) = &self.target {
                    target.clear_session().await?;
                }
                Ok(true)
            }
            ErrorCategory::Resource => {
                if let Some(target) = &self.target {
                    target.reclaim_memory().await?;
                }
                Ok(true)
            }
            ErrorCategory::Parsing | ErrorCategory::Unknown => {
                self.wait(1).await;
                Ok(true)
            }
            ErrorCategory::Validation => Ok(false),
        }
    }

    async fn wait(&self, multiplier: u32) {
        let wait = self.unit_wait * multiplier;
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
