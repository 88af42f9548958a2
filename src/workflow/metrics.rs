use crate::workflow::WorkflowStep;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Counters kept across the runs of one controller
///
/// Every step transition is recorded, whether it succeeded or not.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,

    pub steps_succeeded: BTreeMap<String, u64>,
    pub steps_failed: BTreeMap<String, u64>,

    pub navigations: u64,
    pub form_fills: u64,
    pub http_requests: u64,
    pub records_extracted: u64,

    /// Rows dropped for missing required fields
    pub records_dropped: u64,

    /// Detail pages that could not be fetched or parsed
    pub detail_failures: u64,

    pub last_run_started: Option<DateTime<Utc>>,
    pub last_run_finished: Option<DateTime<Utc>>,
    pub last_transition: Option<DateTime<Utc>>,
}

impl RunMetrics {
    pub fn run_started(&mut self) {
        self.runs_started += 1;
        let now = Utc::now();
        self.last_run_started = Some(now);
        self.last_transition = Some(now);
    }

    pub fn run_finished(&mut self, success: bool) {
        if success {
            self.runs_succeeded += 1;
        } else {
            self.runs_failed += 1;
        }
        let now = Utc::now();
        self.last_run_finished = Some(now);
        self.last_transition = Some(now);
    }

    pub fn step_finished(&mut self, step: WorkflowStep, success: bool) {
        let counters = if success {
            &mut self.steps_succeeded
        } else {
            &mut self.steps_failed
        };
        *counters.entry(step.operation_name().to_string()).or_insert(0) += 1;
        self.last_transition = Some(Utc::now());
    }

    pub fn step_failures(&self, step: WorkflowStep) -> u64 {
        self.steps_failed
            .get(step.operation_name())
            .copied()
            .unwrap_or(0)
    }

    pub fn step_successes(&self, step: WorkflowStep) -> u64 {
        self.steps_succeeded
            .get(step.operation_name())
            .copied()
            .unwrap_or(0)
    }
}
