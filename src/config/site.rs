//! Per-site registration entries
//!
//! Sites are plain data. Behaviour that differs between families of sites is
//! selected through [`SiteFlavor`], never by generating adapter types.

use crate::config::secs;
use serde::Deserialize;
use std::time::Duration;

/// One `[[site]]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteConfig {
    /// Registry key
    pub id: String,

    /// Scheme and host the search path is joined onto
    pub base_url: String,

    /// Path and query template; `{name}` is replaced by the encoded search parameter
    #[serde(default = "default_search_path")]
    pub search_path: String,

    #[serde(default)]
    pub flavor: SiteFlavor,

    /// Parameters that must be present and non-empty
    #[serde(default)]
    pub required_params: Vec<String>,

    /// Parameters that must be `YYYY-MM-DD` dates not in the past
    #[serde(default)]
    pub date_params: Vec<String>,

    /// Minimum seconds between two runs against this site
    #[serde(default)]
    pub min_interval: f64,

    /// Best-effort clicks after navigation (consent banners and the like)
    #[serde(default)]
    pub setup_clicks: Vec<String>,

    #[serde(default)]
    pub form: Vec<FormField>,

    #[serde(default)]
    pub submit_selector: Option<String>,

    /// Element whose presence signals that results rendered
    pub results_selector: String,

    /// Seconds to wait for `results_selector`
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: f64,

    pub extraction: ExtractionRules,
}

fn default_search_path() -> String {
    "/".to_string()
}

fn default_wait_timeout() -> f64 {
    30.0
}

fn default_locale_param() -> String {
    "locale".to_string()
}

impl SiteConfig {
    pub fn min_interval(&self) -> Duration {
        secs(self.min_interval)
    }

    pub fn wait_timeout(&self) -> Duration {
        secs(self.wait_timeout)
    }
}

/// Family of a site
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SiteFlavor {
    /// Plain site, URL used as configured
    #[default]
    Direct,

    /// Site serving localized content selected by a query parameter
    Localized {
        locale: String,
        #[serde(default = "default_locale_param")]
        param: String,
    },

    /// Meta-search site reselling a partner's inventory
    Aggregator { partner: String },
}

/// Form input filled from a search parameter
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FormField {
    pub selector: String,
    pub param: String,
}

/// How result rows are pulled out of the results page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtractionRules {
    /// Selector matching one element per result row
    pub row_selector: String,

    pub fields: Vec<FieldRule>,

    /// Rows missing any of these are dropped
    #[serde(default)]
    pub required_fields: Vec<String>,

    #[serde(default)]
    pub detail: Option<DetailRule>,
}

/// One extracted field, relative to its row
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldRule {
    pub name: String,
    pub selector: String,

    /// Attribute to read instead of the element text
    #[serde(default)]
    pub attribute: Option<String>,
}

/// Follow-up page fetched per record through the batching engine
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DetailRule {
    /// Record field holding the detail URL
    pub url_field: String,

    /// Fields read from the whole detail document
    pub fields: Vec<FieldRule>,
}
