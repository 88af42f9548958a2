use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Per-site run bookkeeping
#[derive(Debug, Clone, Default)]
pub struct SiteState {
    /// Runs started against this site
    pub run_count: u32,

    /// When the last run was let through
    pub last_run: Option<Instant>,
}

impl SiteState {
    /// Time left before another run may start, if any
    pub fn time_until_next_run(&self, min_interval: Duration, now: Instant) -> Option<Duration> {
        let last = self.last_run?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < min_interval).then(|| min_interval - elapsed)
    }

    pub fn record_run(&mut self, now: Instant) {
        self.run_count += 1;
        self.last_run = Some(now);
    }
}

/// Spaces runs against the same site by a minimum interval
///
/// Shared between controllers (usually behind an `Arc`); sites are tracked
/// independently.
#[derive(Debug, Default)]
pub struct SiteRateLimiter {
    sites: Mutex<HashMap<String, SiteState>>,
}

impl SiteRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `site_id` may run again, then claims the slot
    ///
    /// Returns how long the caller waited.
    pub async fn wait_turn(&self, site_id: &str, min_interval: Duration) -> Duration {
        let started = Instant::now();

        loop {
            let wait = {
                let mut sites = self.sites.lock();
                let state = sites.entry(site_id.to_string()).or_default();
                let now = Instant::now();
                match state.time_until_next_run(min_interval, now) {
                    Some(wait) => wait,
                    None => {
                        state.record_run(now);
                        return started.elapsed();
                    }
                }
            };

            debug!(site = site_id, wait_ms = wait.as_millis() as u64, "Waiting for site interval");
            tokio::time::sleep(wait).await;
        }
    }

    pub fn state(&self, site_id: &str) -> Option<SiteState> {
        self.sites.lock().get(site_id).cloned()
    }
}
