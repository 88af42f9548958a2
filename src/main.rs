//! Sumi-Harvest main entry point
//!
//! Command-line front end for configuration checks and batched fetches.
//! Browser-driven crawl runs are started from library code, which supplies a
//! concrete `BrowserLauncher`.

use anyhow::{bail, Context};
use clap::Parser;
use futures::future::join_all;
use serde_json::json;
use std::path::PathBuf;
use sumi_harvest::config::{load_config_with_hash, Config, SiteFlavor};
use sumi_harvest::{RequestBatchingEngine, RequestSpec};
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: a resilient crawl-execution engine
///
/// Loads and validates a harvest configuration, then either describes it
/// (--dry-run) or pushes URLs through the request batcher (--fetch).
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resilient crawl-execution engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the registered sites
    #[arg(long, conflicts_with = "fetch")]
    dry_run: bool,

    /// Fetch URLs through the request batcher and print the results as JSON
    #[arg(long, value_name = "URL", num_args = 1..)]
    fetch: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if !cli.fetch.is_empty() {
        handle_fetch(&config, &cli.fetch).await?;
    } else {
        bail!(
            "nothing to do: crawl runs need a browser launcher from library code; \
             use --dry-run or --fetch"
        );
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Harvest Dry Run ===\n");

    let retry = &config.retry;
    println!("Retry:");
    println!("  Max retries: {}", retry.max_retries);
    println!(
        "  Backoff: {}s * {}^n, capped at {}s (jitter: {})",
        retry.base_delay, retry.exponential_base, retry.max_delay, retry.jitter
    );
    let categories: Vec<_> = retry
        .retryable_categories
        .iter()
        .map(|c| c.as_str())
        .collect();
    println!("  Retryable: {}", categories.join(", "));

    let resources = &config.resources;
    println!("\nResources:");
    println!(
        "  Memory ceiling: {}MB (monitoring: {})",
        resources.max_memory_mb, resources.enable_memory_monitoring
    );
    println!("  Connections per host: {}", resources.max_connections_per_host);
    println!(
        "  Viewport: {}x{} (block assets: {})",
        resources.viewport_width, resources.viewport_height, resources.block_assets
    );

    let batching = &config.batching;
    println!("\nBatching:");
    println!(
        "  Batch size: {}, timeout: {}s, concurrent batches: {}",
        batching.batch_size, batching.batch_timeout, batching.max_concurrent_batches
    );

    println!("\nIdentities: {}", config.identity.user_agents.len());

    println!("\nSites ({}):", config.sites.len());
    for site in &config.sites {
        let flavor = match &site.flavor {
            SiteFlavor::Direct => "direct".to_string(),
            SiteFlavor::Localized { locale, .. } => format!("localized ({})", locale),
            SiteFlavor::Aggregator { partner } => format!("aggregator for {}", partner),
        };
        println!("  - {} [{}] {}{}", site.id, flavor, site.base_url, site.search_path);
        if !site.required_params.is_empty() {
            println!("    params: {}", site.required_params.join(", "));
        }
        println!(
            "    {} fields per row{}",
            site.extraction.fields.len(),
            if site.extraction.detail.is_some() {
                ", with detail pages"
            } else {
                ""
            }
        );
    }

    println!("\n✓ Configuration is valid");
}

async fn handle_fetch(config: &Config, urls: &[String]) -> anyhow::Result<()> {
    let engine = RequestBatchingEngine::new(config.batching.clone())?;

    let specs = urls
        .iter()
        .map(|url| RequestSpec::get(url).with_context(|| format!("invalid URL: {}", url)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let results = join_all(specs.into_iter().map(|spec| {
        let engine = engine.clone();
        async move { engine.add_request(spec).await }
    }))
    .await;

    for (url, result) in urls.iter().zip(results) {
        let line = match result {
            Ok(response) => json!({ "request": url, "response": response }),
            Err(e) => json!({ "request": url, "error": e.to_string() }),
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    engine.close().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "statistics": engine.statistics() }))?
    );

    Ok(())
}
