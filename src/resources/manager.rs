//! Acquire/release discipline for one crawl's resources

use crate::batching::RequestBatchingEngine;
use crate::config::{BatchingConfig, Config, ResourceConfig};
use crate::recovery::RecoveryTarget;
use crate::resources::browser::{BrowserContext, BrowserLauncher, BrowserSession, ContextOptions, PageDriver};
use crate::resources::memory::{MemoryProbe, ProcessMemoryProbe};
use crate::resources::registry::{ResourceKind, ResourceRegistry};
use crate::resources::session::build_session;
use crate::{HarvestError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Hard limit is this multiple of the configured ceiling
const HARD_LIMIT_FACTOR: f64 = 1.2;

const FALLBACK_USER_AGENT: &str = "sumi-harvest/1.0";

/// Counters and memory readings reported to monitoring
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub browser_count: usize,
    pub context_count: usize,
    pub page_count: usize,
    pub http_session_count: usize,
    pub memory_usage_mb: f64,
    pub peak_memory_mb: f64,
    pub is_closed: bool,
}

#[derive(Default)]
struct Slots {
    session: Option<Client>,
    browser: Option<Box<dyn BrowserSession>>,
    context: Option<Box<dyn BrowserContext>>,
    page: Option<Arc<dyn PageDriver>>,
    batcher: Option<RequestBatchingEngine>,
    acquired: bool,
}

#[derive(Debug, Default)]
struct MemoryReadings {
    current_mb: f64,
    peak_mb: f64,
}

/// Owns the HTTP session, browser, context, page and batcher of one run
///
/// Resources are acquired in the order session → browser → context → page →
/// batcher and released in exactly the reverse order. Without a
/// [`BrowserLauncher`] the manager runs HTTP-only: session and batcher.
pub struct ResourceLifecycleManager {
    config: ResourceConfig,
    batching: BatchingConfig,
    user_agents: Vec<String>,
    registry: Arc<ResourceRegistry>,
    launcher: Option<Arc<dyn BrowserLauncher>>,
    probe: Arc<dyn MemoryProbe>,
    slots: Mutex<Slots>,
    identity: AtomicUsize,
    closed: AtomicBool,
    memory: parking_lot::Mutex<MemoryReadings>,
}

impl ResourceLifecycleManager {
    pub fn new(config: &Config, registry: Arc<ResourceRegistry>) -> Self {
        Self {
            config: config.resources.clone(),
            batching: config.batching.clone(),
            user_agents: config.identity.user_agents.clone(),
            registry,
            launcher: None,
            probe: Arc::new(ProcessMemoryProbe::new()),
            slots: Mutex::new(Slots::default()),
            identity: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            memory: parking_lot::Mutex::new(MemoryReadings::default()),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn memory_monitoring_enabled(&self) -> bool {
        self.config.enable_memory_monitoring
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// User agent of the current outbound identity
    pub fn current_user_agent(&self) -> &str {
        if self.user_agents.is_empty() {
            return FALLBACK_USER_AGENT;
        }
        let index = self.identity.load(Ordering::SeqCst) % self.user_agents.len();
        &self.user_agents[index]
    }

    /// Acquires every resource of the run
    ///
    /// Calling it again while resources are held is a no-op; calling it after
    /// [`release`](Self::release) reopens the manager for the next run. If any
    /// step fails, whatever was already acquired is released before the error
    /// is returned.
    pub async fn acquire(&self) -> Result<()> {
        let mut slots = self.slots.lock().await;
        if slots.acquired {
            return Ok(());
        }
        self.closed.store(false, Ordering::SeqCst);

        if let Err(e) = self.acquire_into(&mut slots).await {
            warn!("Resource acquisition failed, releasing partial state: {}", e);
            self.teardown(&mut slots).await;
            return Err(e);
        }

        slots.acquired = true;
        debug!(
            browser = slots.browser.is_some(),
            user_agent = self.current_user_agent(),
            "Resources acquired"
        );
        Ok(())
    }

    async fn acquire_into(&self, slots: &mut Slots) -> Result<()> {
        let user_agent = self.current_user_agent().to_string();

        let session = build_session(&self.config, &user_agent)
            .map_err(|e| HarvestError::Resource(format!("failed to build HTTP session: {}", e)))?;
        slots.session = Some(session.clone());
        self.registry.opened(ResourceKind::HttpSession);

        if let Some(launcher) = &self.launcher {
            let browser = launcher.launch().await?;
            self.registry.opened(ResourceKind::Browser);
            let browser = slots.browser.insert(browser);

            let options = ContextOptions {
                user_agent,
                viewport: (self.config.viewport_width, self.config.viewport_height),
                block_assets: self.config.block_assets,
            };
            let context = browser.new_context(&options).await?;
            self.registry.opened(ResourceKind::Context);
            let context = slots.context.insert(context);

            let page = context.new_page().await?;
            self.registry.opened(ResourceKind::Page);
            slots.page = Some(page);
        }

        slots.batcher = Some(RequestBatchingEngine::with_session(
            self.batching.clone(),
            session,
        ));
        self.registry.opened(ResourceKind::Batcher);

        Ok(())
    }

    /// Releases everything in reverse acquisition order
    ///
    /// Each step is guarded: a failure is logged and the remaining steps still
    /// run. Only the first call does anything.
    pub async fn release(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut slots = self.slots.lock().await;
        self.teardown(&mut slots).await;
        info!("Resources released");
    }

    async fn teardown(&self, slots: &mut Slots) {
        if let Some(batcher) = slots.batcher.take() {
            batcher.close().await;
            self.registry.closed(ResourceKind::Batcher);
        }

        if let Some(page) = slots.page.take() {
            if let Err(e) = page.close().await {
                warn!("Failed to close page: {}", e);
            }
            self.registry.closed(ResourceKind::Page);
        }

        if let Some(context) = slots.context.take() {
            if let Err(e) = context.close().await {
                warn!("Failed to close browser context: {}", e);
            }
            self.registry.closed(ResourceKind::Context);
        }

        if let Some(browser) = slots.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("Failed to close browser: {}", e);
            }
            self.registry.closed(ResourceKind::Browser);
        }

        if slots.session.take().is_some() {
            self.registry.closed(ResourceKind::HttpSession);
        }

        slots.acquired = false;
    }

    pub async fn page(&self) -> Option<Arc<dyn PageDriver>> {
        self.slots.lock().await.page.clone()
    }

    pub async fn batcher(&self) -> Option<RequestBatchingEngine> {
        self.slots.lock().await.batcher.clone()
    }

    pub async fn session(&self) -> Option<Client> {
        self.slots.lock().await.session.clone()
    }

    /// Samples memory and escalates when over the ceiling
    ///
    /// Over the ceiling a reclaim pass runs and memory is sampled again. If
    /// usage is still above `ceiling * 1.2` the run must end.
    ///
    /// # Returns
    ///
    /// * `Ok(f64)` - Current usage in megabytes
    /// * `Err(HarvestError::FatalResource)` - Hard limit breached after reclaim
    pub async fn check_memory_limits(&self) -> Result<f64> {
        let ceiling = self.config.max_memory_mb;
        let usage = self.sample_memory();
        if usage <= ceiling {
            return Ok(usage);
        }

        warn!(
            usage_mb = usage,
            ceiling_mb = ceiling,
            "Memory over ceiling, forcing reclaim"
        );
        self.reclaim().await;

        let usage = self.sample_memory();
        let hard_limit = ceiling * HARD_LIMIT_FACTOR;
        if usage > hard_limit {
            error!(
                usage_mb = usage,
                limit_mb = hard_limit,
                "Memory still over hard limit after reclaim"
            );
            return Err(HarvestError::FatalResource {
                usage_mb: usage,
                limit_mb: hard_limit,
            });
        }

        Ok(usage)
    }

    async fn reclaim(&self) {
        if let Some(page) = self.page().await {
            if let Err(e) = page.collect_garbage().await {
                debug!("Page garbage collection failed: {}", e);
            }
        }
        self.probe.reclaim();
    }

    fn sample_memory(&self) -> f64 {
        let usage = self.probe.sample_mb();
        let mut memory = self.memory.lock();
        memory.current_mb = usage;
        memory.peak_mb = memory.peak_mb.max(usage);
        usage
    }

    pub fn get_resource_usage(&self) -> ResourceUsage {
        let current = self.sample_memory();
        let peak = self.memory.lock().peak_mb;
        let counts = self.registry.snapshot();

        ResourceUsage {
            browser_count: counts.browsers,
            context_count: counts.contexts,
            page_count: counts.pages,
            http_session_count: counts.http_sessions,
            memory_usage_mb: current,
            peak_memory_mb: peak,
            is_closed: self.is_closed(),
        }
    }
}

#[async_trait]
impl RecoveryTarget for ResourceLifecycleManager {
    async fn refresh_page(&self) -> Result<bool> {
        match self.page().await {
            Some(page) => {
                page.reload().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn cancel_scripts(&self) -> Result<bool> {
        match self.page().await {
            Some(page) => {
                page.stop_loading().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rotate_identity(&self) -> Result<bool> {
        if self.user_agents.len() < 2 {
            return Ok(false);
        }
        self.identity.fetch_add(1, Ordering::SeqCst);
        let user_agent = self.current_user_agent().to_string();

        let mut slots = self.slots.lock().await;
        if let Some(page) = &slots.page {
            page.set_user_agent(&user_agent).await?;
        }
        if slots.session.is_some() {
            let session = build_session(&self.config, &user_agent).map_err(|e| {
                HarvestError::Resource(format!("failed to rebuild HTTP session: {}", e))
            })?;
            if let Some(batcher) = &slots.batcher {
                batcher.replace_session(session.clone());
            }
            slots.session = Some(session);
        }

        debug!(user_agent = %user_agent, "Switched outbound identity");
        Ok(true)
    }

    async fn clear_session(&self) -> Result<bool> {
        let page = {
            let slots = self.slots.lock().await;
            match &slots.context {
                Some(context) => context.clear_cookies().await?,
                None => return Ok(false),
            }
            slots.page.clone()
        };

        if let Some(page) = page {
            page.reload().await?;
        }
        Ok(true)
    }

    async fn reclaim_memory(&self) -> Result<bool> {
        self.reclaim().await;
        self.check_memory_limits().await.map(|_| true)
    }
}
