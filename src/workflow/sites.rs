//! Site registration table and flavor-specific URL handling

use crate::config::{Config, SiteConfig, SiteFlavor};
use crate::workflow::SearchParams;
use crate::{ConfigError, ConfigResult, HarvestError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::{form_urlencoded, Url};

/// Site id → site configuration
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: BTreeMap<String, Arc<SiteConfig>>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> ConfigResult<Self> {
        let mut registry = Self::new();
        for site in &config.sites {
            registry.register(site.clone())?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, site: SiteConfig) -> ConfigResult<()> {
        if self.sites.contains_key(&site.id) {
            return Err(ConfigError::Validation(format!(
                "site '{}' registered twice",
                site.id
            )));
        }
        self.sites.insert(site.id.clone(), Arc::new(site));
        Ok(())
    }

    pub fn get(&self, id: &str) -> ConfigResult<Arc<SiteConfig>> {
        self.sites
            .get(id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownSite(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sites.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Where a record came from, beyond the site id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Provenance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    /// Inventory owner behind an aggregator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<String>,
}

impl Provenance {
    pub fn for_flavor(flavor: &SiteFlavor) -> Self {
        match flavor {
            SiteFlavor::Direct => Self::default(),
            SiteFlavor::Localized { locale, .. } => Self {
                locale: Some(locale.clone()),
                partner: None,
            },
            SiteFlavor::Aggregator { partner } => Self {
                locale: None,
                partner: Some(partner.clone()),
            },
        }
    }
}

/// Builds the search URL for `params`
///
/// `{name}` placeholders in the site's search path are replaced by the
/// percent-encoded parameter value; localized sites also get their locale
/// query parameter.
pub fn search_url(site: &SiteConfig, params: &SearchParams) -> Result<Url> {
    let base = Url::parse(&site.base_url)?;
    let path = expand_template(&site.search_path, params)?;
    let mut url = base.join(&path)?;

    match &site.flavor {
        SiteFlavor::Direct | SiteFlavor::Aggregator { .. } => {}
        SiteFlavor::Localized { locale, param } => {
            url.query_pairs_mut().append_pair(param, locale);
        }
    }

    Ok(url)
}

fn expand_template(template: &str, params: &SearchParams) -> Result<String> {
    let mut expanded = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            HarvestError::Config(ConfigError::Validation(format!(
                "unterminated placeholder in search path '{}'",
                template
            )))
        })?;

        let name = &after[..end];
        let value = params
            .get(name)
            .ok_or_else(|| HarvestError::validation(name, "missing required parameter"))?;
        // byte_serialize writes spaces as '+'; paths need %20
        let encoded: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
        expanded.push_str(&encoded.replace('+', "%20"));

        rest = &after[end + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}
