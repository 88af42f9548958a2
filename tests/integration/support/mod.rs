//! Scripted browser and memory doubles shared by the integration tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sumi_harvest::config::{parse_config, Config};
use sumi_harvest::recovery::{RecoveryCoordinator, RetryExecutor, RetryPolicy};
use sumi_harvest::resources::{
    BrowserContext, BrowserLauncher, BrowserSession, ContextOptions, MemoryProbe, PageDriver,
    ResourceLifecycleManager, ResourceRegistry,
};
use sumi_harvest::workflow::{
    CrawlWorkflowController, ScraperExtractor, SiteRateLimiter, SiteRegistry,
};
use sumi_harvest::{HarvestError, Result};

/// Behaviour and call log shared by every object a [`MockLauncher`] creates
#[derive(Default)]
pub struct PageScript {
    pub html: Mutex<String>,
    pub url: Mutex<String>,

    /// Remaining navigations that fail with a timeout
    pub navigate_failures: AtomicU32,

    /// Navigation hangs this long before succeeding
    pub navigate_delay: Mutex<Option<Duration>>,

    /// Selectors whose clicks fail as if the element were absent
    pub missing_elements: Mutex<Vec<String>>,

    pub calls: Mutex<Vec<String>>,
}

impl PageScript {
    pub fn new(html: &str, url: &str) -> Arc<Self> {
        let script = Self::default();
        *script.html.lock() = html.to_string();
        *script.url.lock() = url.to_string();
        Arc::new(script)
    }

    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

pub struct MockLauncher {
    pub script: Arc<PageScript>,
    pub launches: AtomicUsize,
}

impl MockLauncher {
    pub fn new(script: Arc<PageScript>) -> Arc<Self> {
        Arc::new(Self {
            script,
            launches: AtomicUsize::new(0),
        })
    }
}

struct MockBrowser(Arc<PageScript>);
struct MockContext(Arc<PageScript>);
struct MockPage(Arc<PageScript>);

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.script.record("launch");
        Ok(Box::new(MockBrowser(self.script.clone())))
    }
}

#[async_trait]
impl BrowserSession for MockBrowser {
    async fn new_context(&self, options: &ContextOptions) -> Result<Box<dyn BrowserContext>> {
        self.0.record(format!("context:{}", options.user_agent));
        Ok(Box::new(MockContext(self.0.clone())))
    }

    async fn close(&self) -> Result<()> {
        self.0.record("close_browser");
        Ok(())
    }
}

#[async_trait]
impl BrowserContext for MockContext {
    async fn new_page(&self) -> Result<Arc<dyn PageDriver>> {
        Ok(Arc::new(MockPage(self.0.clone())))
    }

    async fn clear_cookies(&self) -> Result<()> {
        self.0.record("clear_cookies");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.0.record("close_context");
        Ok(())
    }
}

#[async_trait]
impl PageDriver for MockPage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.0.record(format!("navigate:{}", url));

        let delay = *self.0.navigate_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .0
            .navigate_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(HarvestError::Timeout("navigation timed out".to_string()));
        }
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.0.record("reload");
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.0.record(format!("click:{}", selector));
        if self.0.missing_elements.lock().iter().any(|s| s == selector) {
            return Err(HarvestError::Unknown(format!("no such element: {}", selector)));
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.0.record(format!("fill:{}={}", selector, value));
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<()> {
        self.0.record(format!("wait:{}", selector));
        Ok(())
    }

    async fn wait_for_load(&self) -> Result<()> {
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        Ok(self.0.html.lock().clone())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.0.url.lock().clone())
    }

    async fn stop_loading(&self) -> Result<()> {
        self.0.record("stop_loading");
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.0.record(format!("user_agent:{}", user_agent));
        Ok(())
    }

    async fn collect_garbage(&self) -> Result<()> {
        self.0.record("gc");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.0.record("close_page");
        Ok(())
    }
}

/// Replays readings in order, then repeats the last one
pub struct ScriptedProbe(Mutex<Vec<f64>>);

impl ScriptedProbe {
    pub fn new(readings: &[f64]) -> Arc<Self> {
        let mut readings = readings.to_vec();
        readings.reverse();
        Arc::new(Self(Mutex::new(readings)))
    }
}

impl MemoryProbe for ScriptedProbe {
    fn sample_mb(&self) -> f64 {
        let mut readings = self.0.lock();
        if readings.len() > 1 {
            readings.pop().unwrap_or(0.0)
        } else {
            readings.last().copied().unwrap_or(0.0)
        }
    }
}

/// Configuration with one "fares" site and fast, jitter-free retries
///
/// `extra` is appended after the extraction table, e.g. a detail rule.
pub fn fares_config(base_url: &str, extra: &str) -> Config {
    parse_config(&format!(
        r##"
        [retry]
        max-retries = 3
        base-delay = 0.01
        max-delay = 0.05
        jitter = false
        recovery-wait = 0.0

        [resources]
        max-memory-mb = 1024

        [batching]
        batch-size = 5
        batch-timeout = 0.05
        request-retries = 0

        [identity]
        user-agents = ["agent-a", "agent-b"]

        [[site]]
        id = "fares"
        base-url = "{base_url}"
        search-path = "/search?from={{origin}}&to={{destination}}"
        required-params = ["origin", "destination", "depart"]
        date-params = ["depart"]
        setup-clicks = ["#accept-cookies"]
        form = [
            {{ selector = "#depart", param = "depart" }},
        ]
        submit-selector = "#go"
        results-selector = ".results"

        [site.extraction]
        row-selector = "li.offer"
        required-fields = ["price"]
        fields = [
            {{ name = "carrier", selector = ".carrier" }},
            {{ name = "price", selector = ".price" }},
            {{ name = "link", selector = "a.more", attribute = "href" }},
        ]

        {extra}
        "##,
        base_url = base_url,
        extra = extra,
    ))
    .expect("test config should parse")
}

/// Wires a controller the way `from_config` does, with a scripted probe
pub fn controller(
    config: &Config,
    launcher: Arc<MockLauncher>,
    probe: Arc<dyn MemoryProbe>,
) -> (CrawlWorkflowController, Arc<ResourceLifecycleManager>) {
    let site = SiteRegistry::from_config(config)
        .and_then(|registry| registry.get("fares"))
        .expect("fares site registered");

    let resources = Arc::new(
        ResourceLifecycleManager::new(config, Arc::new(ResourceRegistry::new()))
            .with_launcher(launcher)
            .with_memory_probe(probe),
    );
    let coordinator = RecoveryCoordinator::new(Duration::ZERO).with_target(resources.clone());
    let executor = Arc::new(RetryExecutor::new(
        RetryPolicy::from(&config.retry),
        coordinator,
    ));

    let controller = CrawlWorkflowController::new(
        site,
        executor,
        resources.clone(),
        Arc::new(ScraperExtractor),
        Arc::new(SiteRateLimiter::new()),
    );
    (controller, resources)
}

pub const RESULTS_PAGE: &str = r#"
    <html><body>
      <ul class="results">
        <li class="offer">
          <span class="carrier">TAP</span>
          <span class="price">129.00</span>
          <a class="more" href="/offer/1">details</a>
        </li>
        <li class="offer">
          <span class="carrier">Ryanair</span>
          <a class="more" href="/offer/2">details</a>
        </li>
        <li class="offer">
          <span class="carrier">easyJet</span>
          <span class="price">89.50</span>
          <a class="more" href="/offer/3">details</a>
        </li>
      </ul>
    </body></html>
"#;
