//! Diagnostic rule catalog
//!
//! Every check is a [`Rule`]: an independent predicate over one
//! [`AnalysisInput`] that returns zero or more findings. Rules never depend
//! on each other's output and tolerate missing configuration or logs by
//! returning no findings.

pub mod component_rules;
pub mod log_rules;
pub mod pipeline_rules;

pub use component_rules::{
    ConnectorUsageRule, ExporterRetryQueueRule, HardcodedCredentialRule, InvalidRegexRule,
    ReceiverPortConflictRule,
};
pub use log_rules::{ExporterBackpressureRule, LogSignalRule, DEFAULT_BACKPRESSURE_THRESHOLD};
pub use pipeline_rules::{
    CumulativeDeltaRule, MetricsCardinalityRule, MissingBatchRule, MissingMemoryLimiterRule,
    ResourceDetectorConflictRule, TailSamplingDaemonSetRule,
};

use crate::cancel::CancellationToken;
use crate::deployment::DeploymentMode;
use crate::error::RuleError;
use crate::findings::DiagnosticFinding;
use crate::pipeline::PipelineDocument;

/// Trait for implementing diagnostic checks run by the triage engine
pub trait Rule: Send + Sync {
    /// Evaluate the check against one analysis input
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError>;

    /// Get a short, stable name for this rule
    fn name(&self) -> &str;
}

/// Everything a rule may inspect during one diagnostic run
#[derive(Debug, Clone, Default)]
pub struct AnalysisInput {
    /// Parsed configuration, absent when it could not be fetched or parsed
    pub config: Option<PipelineDocument>,
    pub mode: DeploymentMode,
    /// Raw collector log lines, most recent last
    pub logs: Vec<String>,
    pub cancel: CancellationToken,
}

impl AnalysisInput {
    pub fn new(config: Option<PipelineDocument>, mode: DeploymentMode) -> Self {
        Self {
            config,
            mode,
            ..Self::default()
        }
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fail with `RuleError::Cancelled` once the run has been cancelled
    pub fn ensure_active(&self) -> Result<(), RuleError> {
        if self.cancel.is_cancelled() {
            Err(RuleError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Rules that only inspect configuration and deployment mode
pub fn config_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(MissingBatchRule),
        Box::new(MissingMemoryLimiterRule),
        Box::new(HardcodedCredentialRule),
        Box::new(ExporterRetryQueueRule),
        Box::new(ReceiverPortConflictRule),
        Box::new(TailSamplingDaemonSetRule),
        Box::new(InvalidRegexRule),
        Box::new(ConnectorUsageRule),
        Box::new(ResourceDetectorConflictRule),
        Box::new(CumulativeDeltaRule),
        Box::new(MetricsCardinalityRule),
    ]
}

/// The configuration rules plus the log-based ones
pub fn all_rules(backpressure_threshold: usize) -> Vec<Box<dyn Rule>> {
    let mut rules = config_rules();
    rules.push(Box::new(ExporterBackpressureRule::new(backpressure_threshold)));
    rules.push(Box::new(LogSignalRule));
    rules
}

/// Render a processor list for a remediation snippet, with `first` prepended
pub(crate) fn processors_with(first: &str, processors: &[String]) -> String {
    std::iter::once(first)
        .chain(processors.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Parse a YAML fixture into an analysis input
    pub fn input(yaml: &str, mode: DeploymentMode) -> AnalysisInput {
        let document = PipelineDocument::parse(yaml.as_bytes()).unwrap();
        AnalysisInput::new(Some(document), mode)
    }

    pub fn run(rule: &dyn Rule, input: &AnalysisInput) -> Vec<DiagnosticFinding> {
        rule.evaluate(input).unwrap()
    }
}
