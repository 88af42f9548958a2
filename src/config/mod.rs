//! Configuration module for Sumi-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every table and key is optional; an empty file yields a usable configuration.
//!
//! # Example
//!
//! ```no_run
//! use sumi_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Retries per step: {}", config.retry.max_retries);
//! ```

mod parser;
mod site;
mod types;
mod validation;

// Re-export types
pub use site::{DetailRule, ExtractionRules, FieldRule, FormField, SiteConfig, SiteFlavor};
pub use types::{BatchingConfig, Config, IdentityConfig, ResourceConfig, RetryConfig};
pub(crate) use types::secs;

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
