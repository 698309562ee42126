//! Checks over raw collector log lines

use crate::error::RuleError;
use crate::findings::{Category, DiagnosticFinding, Severity};
use crate::logs::{summarize, LogClassifier};
use crate::rules::{AnalysisInput, Rule};

/// Occurrence count above which a backpressure signal becomes Critical
pub const DEFAULT_BACKPRESSURE_THRESHOLD: usize = 10;

/// Lowercase substrings that indicate export saturation, with their summaries
const BACKPRESSURE_PATTERNS: [(&str, &str); 7] = [
    ("queue is full", "Exporter queue is full, data is being dropped"),
    ("dropping data", "Exporter is dropping data due to backpressure"),
    (
        "sending queue is full",
        "Sending queue is full, increase queue_size or add consumers",
    ),
    ("failed to send", "Exporter failed to send data to the backend"),
    (
        "context deadline exceeded",
        "Export timed out, the backend may be slow or unreachable",
    ),
    (
        "connection refused",
        "Backend connection refused, check the endpoint and network",
    ),
    (
        "retry limit reached",
        "Exporter retry limit reached, data permanently lost",
    ),
];

/// Counts export saturation signals in recent logs
///
/// Each pattern is counted independently, so a single line may feed several
/// signals (`sending queue is full` also matches `queue is full`).
pub struct ExporterBackpressureRule {
    /// Counts strictly above this are reported as Critical
    pub threshold: usize,
}

impl ExporterBackpressureRule {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_BACKPRESSURE_THRESHOLD)
    }
}

impl Default for ExporterBackpressureRule {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Rule for ExporterBackpressureRule {
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
        if input.logs.is_empty() {
            return Ok(Vec::new());
        }

        let mut counts = [0usize; BACKPRESSURE_PATTERNS.len()];
        for line in &input.logs {
            let lower = line.to_lowercase();
            for (count, (pattern, _)) in counts.iter_mut().zip(BACKPRESSURE_PATTERNS.iter()) {
                if lower.contains(pattern) {
                    *count += 1;
                }
            }
        }
        input.ensure_active()?;

        let findings = BACKPRESSURE_PATTERNS
            .iter()
            .zip(counts)
            .filter(|(_, count)| *count > 0)
            .map(|((_, message), count)| {
                let severity = if count > self.threshold {
                    Severity::Critical
                } else {
                    Severity::Warning
                };

                DiagnosticFinding::new(severity, Category::Runtime, *message)
                    .with_detail(format!(
                        "Detected {} occurrences in recent logs. The collector cannot keep up \
                         with the data volume or the backend is too slow.",
                        count
                    ))
                    .with_suggestion(
                        "Increase the exporter queue size, add consumers, \
                         or investigate backend performance",
                    )
                    .with_remediation(
                        "exporters:\n  <exporter_name>:\n    sending_queue:\n      \
                         enabled: true\n      \
                         num_consumers: 10\n      queue_size: 10000\n    retry_on_failure:\n      \
                         enabled: true\n      initial_interval: 5s\n      max_interval: 30s",
                    )
            })
            .collect();

        Ok(findings)
    }

    fn name(&self) -> &str {
        "exporter_backpressure"
    }
}

/// Summarises classified collector log lines, one finding per category
pub struct LogSignalRule;

impl Rule for LogSignalRule {
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
        if input.logs.is_empty() {
            return Ok(Vec::new());
        }

        let classified = LogClassifier::collector().classify(&input.logs);
        input.ensure_active()?;

        let findings = summarize(&classified)
            .into_iter()
            .map(|summary| {
                DiagnosticFinding::new(
                    summary.category.collector_severity(),
                    Category::Runtime,
                    format!("{} ({} in recent logs)", summary.message, summary.count),
                )
                .with_detail(format!("First occurrence: {}", summary.sample))
                .with_suggestion(format!(
                    "Inspect the collector logs for {} entries",
                    summary.category
                ))
            })
            .collect();

        Ok(findings)
    }

    fn name(&self) -> &str {
        "log_signals"
    }
}
