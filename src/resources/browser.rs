//! Page-automation collaborator interfaces
//!
//! Concrete browser bindings live outside this crate. They plug in by
//! implementing these traits; the lifecycle manager only ever talks to the
//! trait objects.

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Options for an isolated browsing context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    pub user_agent: String,
    pub viewport: (u32, u32),

    /// Skip images, fonts and media
    pub block_assets: bool,
}

/// Starts browser processes
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

/// A running browser
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Opens a context with its own cookies, user agent and viewport
    async fn new_context(&self, options: &ContextOptions) -> Result<Box<dyn BrowserContext>>;

    async fn close(&self) -> Result<()>;
}

/// Isolated cookie and storage jar inside a browser
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn PageDriver>>;

    async fn clear_cookies(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// One open tab
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    async fn reload(&self) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    /// Waits until `selector` matches at least one element
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    async fn wait_for_load(&self) -> Result<()>;

    /// Current serialized DOM
    async fn content(&self) -> Result<String>;

    async fn current_url(&self) -> Result<String>;

    /// Stops loading and pending scripts
    async fn stop_loading(&self) -> Result<()>;

    async fn set_user_agent(&self, user_agent: &str) -> Result<()>;

    /// Asks the page's JS engine to collect garbage
    async fn collect_garbage(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
