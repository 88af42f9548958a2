//! Resource lifecycle
//!
//! Browser, context, page, HTTP session and batcher are acquired and released
//! as a unit, counted in an injected [`ResourceRegistry`], and watched against a
//! process memory ceiling.

mod browser;
mod manager;
mod memory;
mod registry;
mod session;

pub use browser::{BrowserContext, BrowserLauncher, BrowserSession, ContextOptions, PageDriver};
pub use manager::{ResourceLifecycleManager, ResourceUsage};
pub use memory::{MemoryProbe, ProcessMemoryProbe};
pub use registry::{RegistrySnapshot, ResourceKind, ResourceRegistry};
pub use session::build_session;
