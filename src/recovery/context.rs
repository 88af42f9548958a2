use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Caller-side description of an operation handed to the retry executor
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Site or component issuing the operation
    pub adapter: String,
    pub search_params: Option<BTreeMap<String, String>>,
    pub url: Option<String>,
    pub element_index: Option<usize>,
    pub info: BTreeMap<String, String>,
}

impl OperationContext {
    pub fn new(adapter: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.search_params = Some(params);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_element_index(mut self, index: usize) -> Self {
        self.element_index = Some(index);
        self
    }

    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }
}

/// Snapshot of one failure
///
/// Built fresh for every failed attempt and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorContext {
    pub adapter: String,
    pub operation: String,
    pub search_params: Option<BTreeMap<String, String>>,
    pub url: Option<String>,
    pub element_index: Option<usize>,
    pub retry_count: u32,
    pub info: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(context: &OperationContext, operation: &str, retry_count: u32) -> Self {
        Self {
            adapter: context.adapter.clone(),
            operation: operation.to_string(),
            search_params: context.search_params.clone(),
            url: context.url.clone(),
            element_index: context.element_index,
            retry_count,
            info: context.info.clone(),
            timestamp: Utc::now(),
        }
    }
}
