use crate::config::SiteConfig;
use crate::{HarvestError, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Date format accepted for date parameters
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Search inputs for one run, keyed by parameter name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchParams(BTreeMap<String, String>);

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SearchParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Checks `params` against the site's declared parameters
///
/// Required parameters must be present and non-blank. Date parameters, when
/// present, must parse as `YYYY-MM-DD` and must not be before `today`.
///
/// # Returns
///
/// * `Ok(())` - Parameters are usable
/// * `Err(HarvestError::Validation)` - Names the first offending parameter
pub fn validate_params(params: &SearchParams, site: &SiteConfig, today: NaiveDate) -> Result<()> {
    for name in &site.required_params {
        match params.get(name) {
            None => {
                return Err(HarvestError::validation(name, "missing required parameter"));
            }
            Some(value) if value.trim().is_empty() => {
                return Err(HarvestError::validation(name, "must not be empty"));
            }
            Some(_) => {}
        }
    }

    for name in &site.date_params {
        let Some(value) = params.get(name) else {
            continue;
        };
        let date = NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
            HarvestError::validation(name, format!("'{}' is not a YYYY-MM-DD date", value))
        })?;
        if date < today {
            return Err(HarvestError::validation(
                name,
                format!("{} is in the past", date),
            ));
        }
    }

    Ok(())
}
