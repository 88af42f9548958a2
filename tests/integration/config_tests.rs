//! Configuration files feeding the site registry and retry policy

use std::io::Write;
use std::time::Duration;
use sumi_harvest::config::{load_config, load_config_with_hash};
use sumi_harvest::workflow::{search_url, Provenance, SearchParams, SiteRegistry};
use sumi_harvest::{ConfigError, ErrorCategory, RetryPolicy};
use tempfile::NamedTempFile;

const CONFIG: &str = r##"
[retry]
max-retries = 2
base-delay = 1.0
exponential-base = 2.0
jitter = false

[[site]]
id = "meta"
base-url = "https://meta.example.com"
search-path = "/flights/{origin}-{destination}"
flavor = { kind = "aggregator", partner = "fares" }
required-params = ["origin", "destination"]
results-selector = "#results"

[site.extraction]
row-selector = ".card"
fields = [{ name = "price", selector = ".amount" }]
"##;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_config_file_drives_sites_and_policy() {
    let file = write_config(CONFIG);
    let (config, hash) = load_config_with_hash(file.path()).unwrap();
    assert_eq!(hash.len(), 64);

    let policy = RetryPolicy::from(&config.retry);
    assert_eq!(policy.delay_for(0), Duration::from_secs(1));
    assert_eq!(policy.delay_for(1), Duration::from_secs(2));
    assert!(policy.is_retryable(ErrorCategory::RateLimit));

    let registry = SiteRegistry::from_config(&config).unwrap();
    let site = registry.get("meta").unwrap();
    let params = SearchParams::new().with("origin", "LIS").with("destination", "JFK");
    assert_eq!(
        search_url(&site, &params).unwrap().as_str(),
        "https://meta.example.com/flights/LIS-JFK"
    );
    assert_eq!(
        Provenance::for_flavor(&site.flavor).partner.as_deref(),
        Some("fares")
    );
}

#[test]
fn test_hash_tracks_file_content() {
    let first = write_config(CONFIG);
    let second = write_config(&CONFIG.replace("max-retries = 2", "max-retries = 5"));

    let (_, a) = load_config_with_hash(first.path()).unwrap();
    let (_, again) = load_config_with_hash(first.path()).unwrap();
    let (_, b) = load_config_with_hash(second.path()).unwrap();

    assert_eq!(a, again);
    assert_ne!(a, b);
}

#[test]
fn test_invalid_site_rejected_at_load() {
    let broken = CONFIG.replace("https://meta.example.com", "ftp://meta.example.com");
    let file = write_config(&broken);
    assert!(matches!(
        load_config(file.path()),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_missing_file() {
    let result = load_config(std::path::Path::new("/nonexistent/harvest.toml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}
