//! Crawl workflow controller
//!
//! Drives one site through its fixed pipeline:
//!
//! ```text
//! RATE_LIMIT_WAIT → VALIDATE_PARAMS → NAVIGATE → PAGE_SETUP → FILL_FORM
//!     → WAIT_FOR_RESULTS → EXTRACT_AND_VALIDATE → DONE
//! ```
//!
//! Each step runs through the injected [`RetryExecutor`] under its own
//! operation name. A step that exhausts its retries ends the run with that
//! step's error; later steps never run. Resources are released on every exit
//! path, including cancellation.

use crate::batching::{RequestBatchingEngine, RequestSpec, ResponseData};
use crate::config::{secs, Config, DetailRule, SiteConfig};
use crate::recovery::{ErrorStatistics, OperationContext, RecoveryCoordinator, RetryExecutor, RetryPolicy};
use crate::resources::{BrowserLauncher, PageDriver, ResourceLifecycleManager, ResourceRegistry, ResourceUsage};
use crate::workflow::extraction::{ExtractedRow, HtmlExtractor, ScraperExtractor};
use crate::workflow::metrics::RunMetrics;
use crate::workflow::params::{validate_params, SearchParams};
use crate::workflow::rate_limit::SiteRateLimiter;
use crate::workflow::sites::{search_url, Provenance, SiteRegistry};
use crate::workflow::WorkflowStep;
use crate::{HarvestError, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// One extracted result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub site: String,

    /// Position among the kept rows of the results page
    pub index: usize,

    pub fields: BTreeMap<String, String>,

    #[serde(flatten)]
    pub provenance: Provenance,

    /// Page the record was extracted from
    pub source_url: String,

    pub extracted_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Runs the crawl pipeline for one site
pub struct CrawlWorkflowController {
    site: Arc<SiteConfig>,
    executor: Arc<RetryExecutor>,
    resources: Arc<ResourceLifecycleManager>,
    extractor: Arc<dyn HtmlExtractor>,
    limiter: Arc<SiteRateLimiter>,
    metrics: parking_lot::Mutex<RunMetrics>,
    current_step: parking_lot::Mutex<WorkflowStep>,
    run_lock: tokio::sync::Mutex<()>,
}

impl CrawlWorkflowController {
    pub fn new(
        site: Arc<SiteConfig>,
        executor: Arc<RetryExecutor>,
        resources: Arc<ResourceLifecycleManager>,
        extractor: Arc<dyn HtmlExtractor>,
        limiter: Arc<SiteRateLimiter>,
    ) -> Self {
        Self {
            site,
            executor,
            resources,
            extractor,
            limiter,
            metrics: parking_lot::Mutex::new(RunMetrics::default()),
            current_step: parking_lot::Mutex::new(WorkflowStep::RateLimitWait),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Wires a controller for `site_id` from configuration
    ///
    /// The resource manager becomes the recovery target of the executor, so
    /// recovery actions act on this run's page and session.
    pub fn from_config(
        config: &Config,
        site_id: &str,
        launcher: Arc<dyn BrowserLauncher>,
        registry: Arc<ResourceRegistry>,
        limiter: Arc<SiteRateLimiter>,
    ) -> Result<Self> {
        let site = SiteRegistry::from_config(config)?.get(site_id)?;
        let resources =
            Arc::new(ResourceLifecycleManager::new(config, registry).with_launcher(launcher));

        let coordinator =
            RecoveryCoordinator::new(secs(config.retry.recovery_wait)).with_target(resources.clone());
        let executor = Arc::new(RetryExecutor::new(
            RetryPolicy::from(&config.retry),
            coordinator,
        ));

        Ok(Self::new(
            site,
            executor,
            resources,
            Arc::new(ScraperExtractor),
            limiter,
        ))
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    pub fn metrics(&self) -> RunMetrics {
        self.metrics.lock().clone()
    }

    pub fn error_statistics(&self) -> ErrorStatistics {
        self.executor.error_statistics()
    }

    pub fn reset_error_statistics(&self) {
        self.executor.reset_error_statistics();
    }

    pub fn resource_usage(&self) -> ResourceUsage {
        self.resources.get_resource_usage()
    }

    /// Runs the whole pipeline
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<ResultRecord>)` - Records that carried every required field
    /// * `Err(HarvestError)` - The terminal error of the failing step
    pub async fn run(&self, params: SearchParams) -> Result<Vec<ResultRecord>> {
        self.run_until(params, std::future::pending()).await
    }

    /// Runs the pipeline until it finishes or `shutdown` resolves
    ///
    /// On shutdown the in-flight step is dropped, resources are released, and
    /// `HarvestError::Cancelled` names the step that was interrupted.
    pub async fn run_until<S>(&self, params: SearchParams, shutdown: S) -> Result<Vec<ResultRecord>>
    where
        S: Future<Output = ()>,
    {
        let _run = self.run_lock.lock().await;
        self.metrics.lock().run_started();
        info!(site = %self.site.id, "Starting crawl run");

        let outcome = tokio::select! {
            result = self.execute_steps(&params) => result,
            _ = shutdown => {
                let step = *self.current_step.lock();
                warn!(site = %self.site.id, step = %step, "Run cancelled");
                self.metrics.lock().step_finished(step, false);
                Err(HarvestError::Cancelled {
                    operation: step.operation_name().to_string(),
                })
            }
        };

        self.resources.release().await;
        self.metrics.lock().run_finished(outcome.is_ok());

        match &outcome {
            Ok(records) => info!(
                site = %self.site.id,
                records = records.len(),
                "Crawl run complete"
            ),
            Err(e) => warn!(
                site = %self.site.id,
                step = %*self.current_step.lock(),
                "Crawl run failed: {}",
                e
            ),
        }

        outcome
    }

    async fn execute_steps(&self, params: &SearchParams) -> Result<Vec<ResultRecord>> {
        let site = self.site.as_ref();
        let context = OperationContext::new(&site.id).with_params(params.as_map().clone());

        self.step(WorkflowStep::RateLimitWait, &context, || async move {
            self.limiter.wait_turn(&site.id, site.min_interval()).await;
            Ok(())
        })
        .await?;

        let today = Utc::now().date_naive();
        let url = self
            .step(WorkflowStep::ValidateParams, &context, || async move {
                validate_params(params, site, today)?;
                search_url(site, params)
            })
            .await?;

        let context = context.with_url(url.as_str());
        let url = &url;

        self.step(WorkflowStep::Navigate, &context, || async move {
            self.resources.acquire().await?;
            let page = self.page().await?;
            page.navigate(url.as_str(), site.wait_timeout()).await?;
            page.wait_for_load().await?;
            self.metrics.lock().navigations += 1;
            Ok(())
        })
        .await?;

        self.step(WorkflowStep::PageSetup, &context, || async move {
            let page = self.page().await?;
            for selector in &site.setup_clicks {
                match page.click(selector).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => debug!(site = %site.id, selector = %selector, "Setup click skipped: {}", e),
                }
            }
            Ok(())
        })
        .await?;

        self.step(WorkflowStep::FillForm, &context, || async move {
            let page = self.page().await?;
            for field in &site.form {
                let value = params.get(&field.param).ok_or_else(|| {
                    HarvestError::validation(&field.param, "missing required parameter")
                })?;
                page.fill(&field.selector, value).await?;
                self.metrics.lock().form_fills += 1;
            }
            if let Some(submit) = &site.submit_selector {
                page.click(submit).await?;
            }
            Ok(())
        })
        .await?;

        self.step(WorkflowStep::WaitForResults, &context, || async move {
            let page = self.page().await?;
            page.wait_for_selector(&site.results_selector, site.wait_timeout())
                .await
        })
        .await?;

        let (rows, source_url) = self
            .step(WorkflowStep::ExtractAndValidate, &context, || async move {
                self.extract_results().await
            })
            .await?;

        let rows = match &site.extraction.detail {
            Some(rule) => self.enrich_with_details(rows, rule, &source_url).await,
            None => rows,
        };

        *self.current_step.lock() = WorkflowStep::Done;
        self.metrics.lock().step_finished(WorkflowStep::Done, true);

        let provenance = Provenance::for_flavor(&site.flavor);
        let extracted_at = Utc::now();
        let records: Vec<ResultRecord> = rows
            .into_iter()
            .enumerate()
            .map(|(index, fields)| ResultRecord {
                site: site.id.clone(),
                index,
                fields,
                provenance: provenance.clone(),
                source_url: source_url.to_string(),
                extracted_at,
            })
            .collect();

        self.metrics.lock().records_extracted += records.len() as u64;
        Ok(records)
    }

    /// Runs one step through the executor and records the transition
    ///
    /// The memory check runs inside every attempt, so a ceiling breach is
    /// counted in the error statistics like any other failure.
    async fn step<T, F, Fut>(
        &self,
        step: WorkflowStep,
        context: &OperationContext,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        *self.current_step.lock() = step;
        debug!(site = %self.site.id, step = %step, "Entering step");

        let result = self
            .executor
            .execute(step.operation_name(), context, || {
                let attempt = operation();
                async move {
                    self.check_memory(step).await?;
                    attempt.await
                }
            })
            .await;

        self.metrics.lock().step_finished(step, result.is_ok());
        result
    }

    async fn check_memory(&self, step: WorkflowStep) -> Result<()> {
        if step.uses_resources() && self.resources.memory_monitoring_enabled() {
            let usage = self.resources.check_memory_limits().await?;
            debug!(step = %step, memory_mb = usage, "Memory check passed");
        }
        Ok(())
    }

    async fn page(&self) -> Result<Arc<dyn PageDriver>> {
        self.resources.page().await.ok_or_else(|| {
            HarvestError::Resource("no browser page available; configure a launcher".to_string())
        })
    }

    /// Extracts rows from the current page and drops incomplete ones
    ///
    /// Rows were found but none carried the required fields: the page is
    /// treated as unparseable and fails with `Parsing`.
    async fn extract_results(&self) -> Result<(Vec<ExtractedRow>, Url)> {
        let page = self.page().await?;
        let html = page.content().await?;
        let source_url = match page.current_url().await {
            Ok(current) => Url::parse(&current).or_else(|_| Url::parse(&self.site.base_url))?,
            Err(_) => Url::parse(&self.site.base_url)?,
        };

        let extractor = Arc::clone(&self.extractor);
        let rules = self.site.extraction.clone();
        let rows = tokio::task::spawn_blocking(move || extractor.extract_rows(&html, &rules))
            .await
            .map_err(|e| HarvestError::Unknown(format!("extraction task failed: {}", e)))??;

        let found = rows.len();
        let required = &self.site.extraction.required_fields;
        let kept: Vec<ExtractedRow> = rows
            .into_iter()
            .filter(|row| required.iter().all(|field| row.contains_key(field)))
            .collect();

        let dropped = found - kept.len();
        if dropped > 0 {
            debug!(site = %self.site.id, dropped, "Dropped rows missing required fields");
            self.metrics.lock().records_dropped += dropped as u64;
        }

        if found > 0 && kept.is_empty() {
            return Err(HarvestError::Parsing(format!(
                "{} rows found but none carried the required fields {:?}",
                found, required
            )));
        }

        Ok((kept, source_url))
    }

    /// Fetches each record's detail page through the batcher and merges fields
    ///
    /// A failed detail fetch leaves its record with the list-page fields only.
    async fn enrich_with_details(
        &self,
        mut rows: Vec<ExtractedRow>,
        rule: &DetailRule,
        base: &Url,
    ) -> Vec<ExtractedRow> {
        let Some(batcher) = self.resources.batcher().await else {
            warn!(site = %self.site.id, "No batcher available, skipping detail pages");
            return rows;
        };

        let requests: Vec<(usize, RequestSpec)> = rows
            .iter()
            .enumerate()
            .filter_map(|(index, row)| {
                let href = row.get(&rule.url_field)?;
                let url = base.join(href).ok()?;
                RequestSpec::get(url.as_str()).ok().map(|spec| (index, spec))
            })
            .collect();

        if requests.is_empty() {
            return rows;
        }
        self.metrics.lock().http_requests += requests.len() as u64;

        let results = join_all(requests.into_iter().map(|(index, spec)| {
            let extractor = Arc::clone(&self.extractor);
            let batcher = &batcher;
            async move { (index, fetch_detail(batcher, extractor, rule, spec).await) }
        }))
        .await;

        for (index, result) in results {
            match result {
                Ok(fields) => rows[index].extend(fields),
                Err(e) => {
                    warn!(site = %self.site.id, index, "Detail page failed: {}", e);
                    self.metrics.lock().detail_failures += 1;
                }
            }
        }

        rows
    }
}

async fn fetch_detail(
    batcher: &RequestBatchingEngine,
    extractor: Arc<dyn HtmlExtractor>,
    rule: &DetailRule,
    spec: RequestSpec,
) -> Result<ExtractedRow> {
    let response = batcher.add_request(spec).await?;

    match response.data {
        ResponseData::Text(html) => {
            let fields = rule.fields.clone();
            tokio::task::spawn_blocking(move || extractor.extract_fields(&html, &fields))
                .await
                .map_err(|e| HarvestError::Unknown(format!("extraction task failed: {}", e)))?
        }
        ResponseData::Json(value) => Ok(rule
            .fields
            .iter()
            .filter_map(|field| {
                let text = match value.get(&field.name)? {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => return None,
                    other => other.to_string(),
                };
                Some((field.name.clone(), text))
            })
            .collect()),
    }
}
