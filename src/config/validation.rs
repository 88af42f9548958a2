use crate::config::site::{SiteConfig, SiteFlavor};
use crate::config::types::{BatchingConfig, Config, IdentityConfig, ResourceConfig, RetryConfig};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_retry_config(&config.retry)?;
    validate_resource_config(&config.resources)?;
    validate_batching_config(&config.batching)?;
    validate_identity_config(&config.identity)?;
    validate_sites(&config.sites)?;
    Ok(())
}

/// Rejects `inf` and `nan`, which TOML accepts but no duration can hold
fn require_finite(values: &[(&str, f64)]) -> Result<(), ConfigError> {
    match values.iter().find(|(_, value)| !value.is_finite()) {
        Some((name, value)) => Err(ConfigError::Validation(format!(
            "{} must be a finite number, got {}",
            name, value
        ))),
        None => Ok(()),
    }
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    require_finite(&[
        ("base_delay", config.base_delay),
        ("max_delay", config.max_delay),
        ("exponential_base", config.exponential_base),
        ("recovery_wait", config.recovery_wait),
    ])?;

    if config.base_delay < 0.0 || config.max_delay < 0.0 || config.recovery_wait < 0.0 {
        return Err(ConfigError::Validation(
            "retry delays cannot be negative".to_string(),
        ));
    }

    if config.base_delay > config.max_delay {
        return Err(ConfigError::Validation(format!(
            "base_delay ({}s) cannot exceed max_delay ({}s)",
            config.base_delay, config.max_delay
        )));
    }

    if config.exponential_base < 1.0 {
        return Err(ConfigError::Validation(format!(
            "exponential_base must be >= 1.0, got {}",
            config.exponential_base
        )));
    }

    Ok(())
}

/// Validates resource limits
fn validate_resource_config(config: &ResourceConfig) -> Result<(), ConfigError> {
    require_finite(&[
        ("max_memory_mb", config.max_memory_mb),
        ("connect_timeout", config.connect_timeout),
        ("session_timeout", config.session_timeout),
    ])?;

    if config.max_memory_mb <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "max_memory_mb must be positive, got {}",
            config.max_memory_mb
        )));
    }

    if config.max_connections_per_host < 1 {
        return Err(ConfigError::Validation(
            "max_connections_per_host must be >= 1".to_string(),
        ));
    }

    if config.viewport_width == 0 || config.viewport_height == 0 {
        return Err(ConfigError::Validation(format!(
            "viewport must be non-zero, got {}x{}",
            config.viewport_width, config.viewport_height
        )));
    }

    if config.connect_timeout <= 0.0 || config.session_timeout <= 0.0 {
        return Err(ConfigError::Validation(
            "session timeouts must be positive".to_string(),
        ));
    }

    Ok(())
}

/// Validates batching configuration
fn validate_batching_config(config: &BatchingConfig) -> Result<(), ConfigError> {
    require_finite(&[
        ("batch_timeout", config.batch_timeout),
        ("request_timeout", config.request_timeout),
        ("request_base_delay", config.request_base_delay),
        ("request_max_delay", config.request_max_delay),
    ])?;

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "batch_size must be >= 1, got {}",
            config.batch_size
        )));
    }

    if config.max_concurrent_batches < 1 || config.max_concurrent_batches > 100 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_batches must be between 1 and 100, got {}",
            config.max_concurrent_batches
        )));
    }

    if config.batch_timeout <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "batch_timeout must be positive, got {}s",
            config.batch_timeout
        )));
    }

    if config.request_timeout <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "request_timeout must be positive, got {}s",
            config.request_timeout
        )));
    }

    if config.request_base_delay < 0.0 || config.request_base_delay > config.request_max_delay {
        return Err(ConfigError::Validation(format!(
            "request_base_delay must be between 0 and request_max_delay ({}s), got {}s",
            config.request_max_delay, config.request_base_delay
        )));
    }

    Ok(())
}

fn validate_identity_config(config: &IdentityConfig) -> Result<(), ConfigError> {
    if config.user_agents.is_empty() {
        return Err(ConfigError::Validation(
            "at least one user agent is required".to_string(),
        ));
    }

    if config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user agents cannot be blank".to_string(),
        ));
    }

    Ok(())
}

/// Validates the site registration table
fn validate_sites(sites: &[SiteConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for site in sites {
        if site.id.is_empty() {
            return Err(ConfigError::Validation("site id cannot be empty".to_string()));
        }

        if !seen.insert(site.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate site id '{}'",
                site.id
            )));
        }

        let base = Url::parse(&site.base_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid base_url for '{}': {}", site.id, e))
        })?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "Site '{}' must use an http(s) base_url",
                site.id
            )));
        }

        if site.results_selector.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "Site '{}' needs a results_selector",
                site.id
            )));
        }

        if site.extraction.row_selector.trim().is_empty() || site.extraction.fields.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Site '{}' needs a row_selector and at least one field",
                site.id
            )));
        }

        for required in &site.extraction.required_fields {
            if !site.extraction.fields.iter().any(|f| &f.name == required) {
                return Err(ConfigError::Validation(format!(
                    "Site '{}' requires field '{}' which is never extracted",
                    site.id, required
                )));
            }
        }

        if let Some(detail) = &site.extraction.detail {
            if !site.extraction.fields.iter().any(|f| f.name == detail.url_field) {
                return Err(ConfigError::Validation(format!(
                    "Site '{}' detail url_field '{}' is not an extracted field",
                    site.id, detail.url_field
                )));
            }
        }

        match &site.flavor {
            SiteFlavor::Direct => {}
            SiteFlavor::Localized { locale, param } => {
                if locale.is_empty() || param.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "Site '{}' localized flavor needs a locale and param",
                        site.id
                    )));
                }
            }
            SiteFlavor::Aggregator { partner } => {
                if partner.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "Site '{}' aggregator flavor needs a partner",
                        site.id
                    )));
                }
            }
        }

        require_finite(&[
            ("min_interval", site.min_interval),
            ("wait_timeout", site.wait_timeout),
        ])?;

        if site.min_interval < 0.0 || site.wait_timeout <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "Site '{}' has a negative interval or non-positive wait timeout",
                site.id
            )));
        }
    }

    Ok(())
}
