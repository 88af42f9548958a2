//! Crawl workflow
//!
//! Everything needed to run one site's pipeline:
//! - `SiteRegistry`: data-driven site table with flavor-specific URL handling
//! - `SearchParams` and their validation
//! - `HtmlExtractor`: rule-driven row extraction
//! - `SiteRateLimiter`: minimum interval between runs of a site
//! - `CrawlWorkflowController`: the step-by-step driver

mod controller;
mod extraction;
mod metrics;
mod params;
mod rate_limit;
mod sites;
mod steps;

pub use controller::{CrawlWorkflowController, ResultRecord};
pub use extraction::{ExtractedRow, HtmlExtractor, ScraperExtractor};
pub use metrics::RunMetrics;
pub use params::{validate_params, SearchParams, DATE_FORMAT};
pub use rate_limit::{SiteRateLimiter, SiteState};
pub use sites::{search_url, Provenance, SiteRegistry};
pub use steps::WorkflowStep;
