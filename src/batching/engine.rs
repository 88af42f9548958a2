//! Request batching engine
//!
//! Requests are queued per [`BatchKey`]. A queue moves through
//!
//! ```text
//! EMPTY ──enqueue──▶ ACCUMULATING ──size reached / timer fired──▶ DISPATCHING ──▶ EMPTY
//! ```
//!
//! The first enqueue into an empty queue arms a timer. Reaching `batch_size`
//! dispatches immediately and disarms it, so a queue never holds more than
//! `batch_size` requests and each key has at most one armed timer. Timers carry
//! a generation number; a timer that lost the race to a size-triggered dispatch
//! finds a different generation and does nothing.

use crate::batching::request::{BatchKey, BatchResponse, BatchedRequest, RequestBody, RequestSpec, ResponseData};
use crate::batching::stats::BatchStatistics;
use crate::config::{secs, BatchingConfig};
use crate::recovery::{classify, ErrorCategory, RetryPolicy};
use crate::{HarvestError, Result};
use futures::future::join_all;
use parking_lot::Mutex;
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Groups independent fetches into bounded concurrent batches
///
/// Cloning is cheap; clones share queues, statistics and the session.
#[derive(Clone)]
pub struct RequestBatchingEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: BatchingConfig,
    session: Mutex<Option<Client>>,
    owns_session: bool,
    queues: Mutex<HashMap<BatchKey, KeyQueue>>,
    semaphore: Semaphore,
    stats: Mutex<BatchStatistics>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    generation: AtomicU64,
    closed: AtomicBool,
}

#[derive(Default)]
struct KeyQueue {
    requests: Vec<BatchedRequest>,
    timer: Option<(u64, JoinHandle<()>)>,
}

impl KeyQueue {
    fn disarm(&mut self) {
        if let Some((_, timer)) = self.timer.take() {
            timer.abort();
        }
    }
}

impl RequestBatchingEngine {
    /// Creates an engine with its own HTTP session
    pub fn new(config: BatchingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| HarvestError::Resource(format!("failed to build HTTP session: {}", e)))?;
        Ok(Self::build(config, client, true))
    }

    /// Creates an engine bound to a session owned by someone else
    pub fn with_session(config: BatchingConfig, client: Client) -> Self {
        Self::build(config, client, false)
    }

    fn build(config: BatchingConfig, client: Client, owns_session: bool) -> Self {
        let permits = config.max_concurrent_batches.max(1);
        Self {
            inner: Arc::new(Inner {
                config,
                session: Mutex::new(Some(client)),
                owns_session,
                queues: Mutex::new(HashMap::new()),
                semaphore: Semaphore::new(permits),
                stats: Mutex::new(BatchStatistics::default()),
                in_flight: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &BatchingConfig {
        &self.inner.config
    }

    /// Queues a request and waits for its own result
    ///
    /// # Returns
    ///
    /// * `Ok(BatchResponse)` - status, headers, decoded body and final URL
    /// * `Err(HarvestError)` - this request's failure; siblings are unaffected
    pub async fn add_request(&self, spec: RequestSpec) -> Result<BatchResponse> {
        let receiver = self.enqueue(spec)?;
        receiver.await?
    }

    /// Queues a request and returns the handle its result will arrive on
    pub fn enqueue(&self, spec: RequestSpec) -> Result<oneshot::Receiver<Result<BatchResponse>>> {
        let key = spec.batch_key();
        let (sender, receiver) = oneshot::channel();
        let request = BatchedRequest::new(spec, sender);
        let batch_size = self.inner.config.batch_size.max(1);

        let ready = {
            let mut queues = self.inner.queues.lock();
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(HarvestError::Resource(
                    "request batcher is closed".to_string(),
                ));
            }

            let queue = queues.entry(key.clone()).or_default();
            queue.requests.push(request);

            if queue.requests.len() >= batch_size {
                queue.disarm();
                let batch = std::mem::take(&mut queue.requests);
                queues.remove(&key);
                Some(batch)
            } else {
                if queue.timer.is_none() {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst);
                    let timer = tokio::spawn(run_timer(
                        Arc::clone(&self.inner),
                        key.clone(),
                        generation,
                    ));
                    queue.timer = Some((generation, timer));
                }
                None
            }
        };

        if let Some(batch) = ready {
            trace!(batch_key = %key, size = batch.len(), "Batch full, dispatching");
            Inner::dispatch(&self.inner, key, batch);
        }

        Ok(receiver)
    }

    /// Dispatches every non-empty queue and waits for in-flight batches
    pub async fn flush_all_batches(&self) {
        let drained: Vec<(BatchKey, Vec<BatchedRequest>)> = {
            let mut queues = self.inner.queues.lock();
            queues
                .drain()
                .filter_map(|(key, mut queue)| {
                    queue.disarm();
                    (!queue.requests.is_empty()).then_some((key, queue.requests))
                })
                .collect()
        };

        if !drained.is_empty() {
            debug!("Flushing {} pending batches", drained.len());
        }
        for (key, batch) in drained {
            Inner::dispatch(&self.inner, key, batch);
        }

        self.wait_in_flight().await;
    }

    /// Flushes, cancels timers and drops an owned session
    ///
    /// Later calls to `add_request` fail with a resource error.
    pub async fn close(&self) {
        {
            let _queues = self.inner.queues.lock();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
        }

        self.flush_all_batches().await;

        if self.inner.owns_session {
            self.inner.session.lock().take();
        }

        let stats = self.statistics();
        info!(
            "Request batcher closed: {} batches, {} requests ({} failed)",
            stats.total_batches, stats.total_requests, stats.failed_requests
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Swaps the HTTP session used by future dispatches
    pub fn replace_session(&self, client: Client) {
        *self.inner.session.lock() = Some(client);
    }

    /// Requests queued but not yet dispatched
    pub fn pending_requests(&self) -> usize {
        self.inner
            .queues
            .lock()
            .values()
            .map(|queue| queue.requests.len())
            .sum()
    }

    pub fn statistics(&self) -> BatchStatistics {
        self.inner.stats.lock().clone()
    }

    async fn wait_in_flight(&self) {
        let handles = std::mem::take(&mut *self.inner.in_flight.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!("Batch task panicked: {}", e);
                }
            }
        }
    }
}

async fn run_timer(inner: Arc<Inner>, key: BatchKey, generation: u64) {
    tokio::time::sleep(inner.config.batch_timeout()).await;

    let batch = {
        let mut queues = inner.queues.lock();
        let current = queues
            .get(&key)
            .and_then(|queue| queue.timer.as_ref())
            .map(|(g, _)| *g);
        if current != Some(generation) {
            return;
        }
        match queues.remove(&key) {
            Some(queue) => queue.requests,
            None => return,
        }
    };

    if !batch.is_empty() {
        trace!(batch_key = %key, size = batch.len(), "Batch timeout, dispatching");
        Inner::dispatch(&inner, key, batch);
    }
}

impl Inner {
    fn dispatch(inner: &Arc<Inner>, key: BatchKey, batch: Vec<BatchedRequest>) {
        let task_inner = Arc::clone(inner);
        let handle = tokio::spawn(async move { task_inner.execute_batch(key, batch).await });

        let mut in_flight = inner.in_flight.lock();
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    async fn execute_batch(&self, key: BatchKey, mut batch: Vec<BatchedRequest>) {
        let started = Instant::now();
        let size = batch.len();
        batch.sort_by_key(|request| request.spec.priority);

        // Re-group by destination + method
        let mut groups: Vec<((String, Method), Vec<BatchedRequest>)> = Vec::new();
        for request in batch {
            let destination = (request.spec.destination(), request.spec.method.clone());
            match groups.iter_mut().find(|(d, _)| *d == destination) {
                Some((_, members)) => members.push(request),
                None => groups.push((destination, vec![request])),
            }
        }

        debug!(batch_key = %key, size, groups = groups.len(), "Dispatching batch");

        let session = self.session.lock().clone();
        let outcomes = match session {
            Some(client) => {
                join_all(
                    groups
                        .into_iter()
                        .map(|(_, requests)| self.execute_group(&client, requests)),
                )
                .await
            }
            None => {
                for request in groups.into_iter().flat_map(|(_, requests)| requests) {
                    request.resolve(Err(HarvestError::Resource(
                        "no HTTP session available".to_string(),
                    )));
                }
                vec![(0, size as u64, Duration::ZERO)]
            }
        };

        let (successes, failures, serial_time) = outcomes.into_iter().fold(
            (0u64, 0u64, Duration::ZERO),
            |(s, f, t), (gs, gf, gt)| (s + gs, f + gf, t + gt),
        );

        self.stats
            .lock()
            .record_batch(size, successes, failures, serial_time, started.elapsed());

        debug!(
            batch_key = %key,
            successes,
            failures,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch resolved"
        );
    }

    /// Runs one destination group under a semaphore permit
    async fn execute_group(
        &self,
        client: &Client,
        requests: Vec<BatchedRequest>,
    ) -> (u64, u64, Duration) {
        let _permit = self.semaphore.acquire().await.ok();

        let results = join_all(
            requests
                .into_iter()
                .map(|request| self.execute_request(client, request)),
        )
        .await;

        results.into_iter().fold(
            (0, 0, Duration::ZERO),
            |(s, f, t), (ok, elapsed)| {
                if ok {
                    (s + 1, f, t + elapsed)
                } else {
                    (s, f + 1, t + elapsed)
                }
            },
        )
    }

    /// Sends one request with its own timeout and retry budget
    async fn execute_request(&self, client: &Client, mut request: BatchedRequest) -> (bool, Duration) {
        let started = Instant::now();
        trace!(
            url = %request.spec.url,
            queued_ms = request.enqueued_at.elapsed().as_millis() as u64,
            "Sending request"
        );

        let policy = self.request_policy(&request.spec);
        let timeout = request
            .spec
            .timeout
            .unwrap_or_else(|| self.config.request_timeout());

        let result = loop {
            let attempt = request.attempts;
            request.attempts += 1;

            match send_once(client, &request.spec, timeout).await {
                Ok(response) => break Ok(response),
                Err(error) => {
                    let category = classify(&error);
                    if !policy.should_retry(category, attempt) {
                        debug!(
                            url = %request.spec.url,
                            category = %category,
                            attempts = request.attempts,
                            "Request failed: {}",
                            error
                        );
                        break Err(error);
                    }
                    let delay = policy.delay_for(attempt);
                    trace!(url = %request.spec.url, category = %category, ?delay, "Retrying request");
                    tokio::time::sleep(delay).await;
                }
            }
        };

        let ok = result.is_ok();
        if !request.resolve(result) {
            trace!("Requester went away before the result arrived");
        }
        (ok, started.elapsed())
    }

    fn request_policy(&self, spec: &RequestSpec) -> RetryPolicy {
        RetryPolicy::new(
            spec.max_retries.unwrap_or(self.config.request_retries),
            secs(self.config.request_base_delay),
        )
        .with_max_delay(secs(self.config.request_max_delay))
        .with_exponential_base(2.0)
        .with_retryable(&[
            ErrorCategory::Network,
            ErrorCategory::Timeout,
            ErrorCategory::RateLimit,
        ])
    }
}

async fn send_once(client: &Client, spec: &RequestSpec, timeout: Duration) -> Result<BatchResponse> {
    let url = spec.url.to_string();
    let mut builder = client
        .request(spec.method.clone(), spec.url.clone())
        .timeout(timeout);

    for (name, value) in &spec.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !spec.params.is_empty() {
        builder = builder.query(&spec.params);
    }
    builder = match &spec.body {
        Some(RequestBody::Json(value)) => builder.json(value),
        Some(RequestBody::Text(text)) => builder.body(text.clone()),
        Some(RequestBody::Form(fields)) => builder.form(fields),
        None => builder,
    };

    let response = builder
        .send()
        .await
        .map_err(|source| HarvestError::Http {
            url: url.clone(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(HarvestError::HttpStatus {
            url,
            status: status.as_u16(),
        });
    }

    let final_url = response.url().to_string();
    let headers: std::collections::BTreeMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let is_json = headers
        .get("content-type")
        .map(|ct| ct.contains("json"))
        .unwrap_or(false);

    let body = response
        .text()
        .await
        .map_err(|source| HarvestError::Http { url, source })?;

    let data = if is_json {
        ResponseData::Json(serde_json::from_str(&body)?)
    } else {
        ResponseData::Text(body)
    };

    Ok(BatchResponse {
        status: status.as_u16(),
        headers,
        data,
        url: final_url,
    })
}
