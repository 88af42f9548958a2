//! Request batching
//!
//! Many small independent fetches (detail pages, price lookups, API calls) are
//! grouped by a derived batch key and dispatched together under a global
//! concurrency bound. Each request keeps its own timeout, retry budget and
//! result handle, so one failure never fails its siblings.

mod engine;
mod request;
mod stats;

pub use engine::RequestBatchingEngine;
pub use request::{BatchKey, BatchResponse, RequestBody, RequestSpec, ResponseData};
pub use stats::BatchStatistics;
