use std::fmt;

/// Stages of a crawl run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkflowStep {
    RateLimitWait,
    ValidateParams,
    Navigate,
    PageSetup,
    FillForm,
    WaitForResults,
    ExtractAndValidate,
    Done,
}

impl WorkflowStep {
    pub const ALL: [WorkflowStep; 8] = [
        WorkflowStep::RateLimitWait,
        WorkflowStep::ValidateParams,
        WorkflowStep::Navigate,
        WorkflowStep::PageSetup,
        WorkflowStep::FillForm,
        WorkflowStep::WaitForResults,
        WorkflowStep::ExtractAndValidate,
        WorkflowStep::Done,
    ];

    /// Operation name used by the retry executor and in statistics
    pub fn operation_name(self) -> &'static str {
        match self {
            WorkflowStep::RateLimitWait => "rate_limit_wait",
            WorkflowStep::ValidateParams => "validate_params",
            WorkflowStep::Navigate => "navigate",
            WorkflowStep::PageSetup => "page_setup",
            WorkflowStep::FillForm => "fill_form",
            WorkflowStep::WaitForResults => "wait_for_results",
            WorkflowStep::ExtractAndValidate => "extract_and_validate",
            WorkflowStep::Done => "done",
        }
    }

    pub fn next(self) -> Option<WorkflowStep> {
        let index = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(index + 1).copied()
    }

    /// Steps that need the page and count against the memory ceiling
    pub fn uses_resources(self) -> bool {
        !matches!(
            self,
            WorkflowStep::RateLimitWait | WorkflowStep::ValidateParams | WorkflowStep::Done
        )
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation_name())
    }
}
