//! Log line classification
//!
//! Two independent taxonomies: one for collector (workload) logs and one for
//! operator (management plane) logs. Each is an ordered list of substring
//! predicates evaluated case-insensitively; the first match wins. Lines that
//! match no predicate are kept as `Other` only when they carry a generic
//! error/warn/fatal marker, otherwise they are dropped.

use crate::findings::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category assigned to a classified log line
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    OttlSyntaxError,
    ReceiverIssue,
    ProcessorError,
    ExporterFailure,
    OomEvent,
    OperatorCrdRejection,
    ReconciliationFailure,
    Other,
}

impl LogCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            LogCategory::OttlSyntaxError => "ottl_syntax_error",
            LogCategory::ReceiverIssue => "receiver_issue",
            LogCategory::ProcessorError => "processor_error",
            LogCategory::ExporterFailure => "exporter_failure",
            LogCategory::OomEvent => "oom_event",
            LogCategory::OperatorCrdRejection => "operator_crd_rejection",
            LogCategory::ReconciliationFailure => "reconciliation_failure",
            LogCategory::Other => "other",
        }
    }

    /// Severity of a collector log signal in this category
    pub fn collector_severity(self) -> Severity {
        match self {
            LogCategory::OomEvent | LogCategory::ExporterFailure => Severity::Critical,
            LogCategory::OttlSyntaxError
            | LogCategory::ReceiverIssue
            | LogCategory::ProcessorError => Severity::Warning,
            _ => Severity::Info,
        }
    }

    /// Severity of an operator log signal in this category
    pub fn operator_severity(self) -> Severity {
        match self {
            LogCategory::OperatorCrdRejection => Severity::Critical,
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One log line that matched a taxonomy entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifiedLogLine {
    pub category: LogCategory,
    /// The original, unmodified line
    pub line: String,
    /// Human-readable description of the category
    pub message: String,
}

struct LogPattern {
    category: LogCategory,
    message: &'static str,
    /// Receives the lowercased line
    matches: fn(&str) -> bool,
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn is_ottl_error(line: &str) -> bool {
    line.contains("ottl") && contains_any(line, &["error", "parse"])
}

fn is_receiver_issue(line: &str) -> bool {
    line.contains("receiver") && contains_any(line, &["error", "failed"])
}

fn is_processor_error(line: &str) -> bool {
    line.contains("processor") && contains_any(line, &["error", "failed"])
}

fn is_exporter_failure(line: &str) -> bool {
    line.contains("exporter") && contains_any(line, &["error", "failed", "dropping"])
}

fn is_oom_event(line: &str) -> bool {
    contains_any(line, &["oom", "out of memory", "memory limit"])
}

fn is_crd_rejection(line: &str) -> bool {
    line.contains("rejected") || (line.contains("validation") && line.contains("failed"))
}

fn is_reconciliation_failure(line: &str) -> bool {
    line.contains("reconcil") && contains_any(line, &["error", "failed"])
}

static COLLECTOR_PATTERNS: [LogPattern; 5] = [
    LogPattern {
        category: LogCategory::OttlSyntaxError,
        message: "OTTL syntax or parse error detected",
        matches: is_ottl_error,
    },
    LogPattern {
        category: LogCategory::ReceiverIssue,
        message: "Receiver error",
        matches: is_receiver_issue,
    },
    LogPattern {
        category: LogCategory::ProcessorError,
        message: "Processor error",
        matches: is_processor_error,
    },
    LogPattern {
        category: LogCategory::ExporterFailure,
        message: "Exporter failure or data loss",
        matches: is_exporter_failure,
    },
    LogPattern {
        category: LogCategory::OomEvent,
        message: "Out of memory event",
        matches: is_oom_event,
    },
];

static OPERATOR_PATTERNS: [LogPattern; 2] = [
    LogPattern {
        category: LogCategory::OperatorCrdRejection,
        message: "CRD validation or rejection error",
        matches: is_crd_rejection,
    },
    LogPattern {
        category: LogCategory::ReconciliationFailure,
        message: "Reconciliation failure",
        matches: is_reconciliation_failure,
    },
];

/// Generic severity markers that keep an otherwise unmatched line as `Other`
const FALLBACK_MARKERS: [&str; 3] = ["error", "warn", "fatal"];

/// Ordered, first-match-wins log taxonomy
pub struct LogClassifier {
    patterns: &'static [LogPattern],
    fallback_message: &'static str,
}

impl LogClassifier {
    /// Taxonomy for collector (workload) logs
    pub fn collector() -> Self {
        Self {
            patterns: &COLLECTOR_PATTERNS,
            fallback_message: "Unclassified error/warning",
        }
    }

    /// Taxonomy for operator (management plane) logs
    pub fn operator() -> Self {
        Self {
            patterns: &OPERATOR_PATTERNS,
            fallback_message: "Unclassified operator error/warning",
        }
    }

    /// Classify one line, or `None` if it should be dropped
    pub fn classify_line(&self, line: &str) -> Option<ClassifiedLogLine> {
        let lower = line.to_lowercase();

        let (category, message) = match self.patterns.iter().find(|p| (p.matches)(&lower)) {
            Some(pattern) => (pattern.category, pattern.message),
            None if contains_any(&lower, &FALLBACK_MARKERS) => {
                (LogCategory::Other, self.fallback_message)
            }
            None => return None,
        };

        Some(ClassifiedLogLine {
            category,
            line: line.to_string(),
            message: message.to_string(),
        })
    }

    /// Classify a batch of lines, preserving input order
    pub fn classify<S: AsRef<str>>(&self, lines: &[S]) -> Vec<ClassifiedLogLine> {
        lines
            .iter()
            .filter_map(|line| self.classify_line(line.as_ref()))
            .collect()
    }
}

/// Per-category tally of classified lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySummary {
    pub category: LogCategory,
    pub message: String,
    pub count: usize,
    /// First line seen in this category
    pub sample: String,
}

/// Group classified lines by category, in order of first appearance
pub fn summarize(classified: &[ClassifiedLogLine]) -> Vec<CategorySummary> {
    let mut summaries: Vec<CategorySummary> = Vec::new();

    for entry in classified {
        match summaries.iter_mut().find(|s| s.category == entry.category) {
            Some(summary) => summary.count += 1,
            None => summaries.push(CategorySummary {
                category: entry.category,
                message: entry.message.clone(),
                count: 1,
                sample: entry.line.clone(),
            }),
        }
    }

    summaries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(classifier: &LogClassifier, line: &str) -> Option<LogCategory> {
        classifier.classify_line(line).map(|c| c.category)
    }

    #[test]
    fn test_collector_taxonomy() {
        let classifier = LogClassifier::collector();

        assert_eq!(
            category(&classifier, "error parsing OTTL statement: unexpected token"),
            Some(LogCategory::OttlSyntaxError)
        );
        assert_eq!(
            category(&classifier, "receiver otlp failed to start"),
            Some(LogCategory::ReceiverIssue)
        );
        assert_eq!(
            category(&classifier, "processor transform returned an error"),
            Some(LogCategory::ProcessorError)
        );
        assert_eq!(
            category(&classifier, "Exporter otlp is dropping data"),
            Some(LogCategory::ExporterFailure)
        );
        assert_eq!(
            category(&classifier, "container killed: OOMKilled"),
            Some(LogCategory::OomEvent)
        );
        assert_eq!(
            category(&classifier, "WARN: slow consumer"),
            Some(LogCategory::Other)
        );
        assert_eq!(
            category(&classifier, "FATAL: cannot continue"),
            Some(LogCategory::Other)
        );
    }

    #[test]
    fn test_collector_order_first_match_wins() {
        let classifier = LogClassifier::collector();

        // OTTL beats processor
        assert_eq!(
            category(&classifier, "processor transform: ottl parse error"),
            Some(LogCategory::OttlSyntaxError)
        );
        // receiver beats exporter
        assert_eq!(
            category(&classifier, "receiver error while exporter was failed"),
            Some(LogCategory::ReceiverIssue)
        );
        // exporter beats OOM
        assert_eq!(
            category(&classifier, "exporter failed: memory limit exceeded"),
            Some(LogCategory::ExporterFailure)
        );
    }

    #[test]
    fn test_informational_lines_are_dropped() {
        let classifier = LogClassifier::collector();

        assert!(classifier
            .classify_line("Everything is ready. Begin running and processing data.")
            .is_none());
        assert!(classifier.classify_line("").is_none());
        // keyword without a failure marker
        assert!(classifier.classify_line("Starting receiver otlp").is_none());
    }

    #[test]
    fn test_operator_taxonomy() {
        let classifier = LogClassifier::operator();

        assert_eq!(
            category(&classifier, "admission webhook rejected the request"),
            Some(LogCategory::OperatorCrdRejection)
        );
        assert_eq!(
            category(&classifier, "Validation of spec.config FAILED"),
            Some(LogCategory::OperatorCrdRejection)
        );
        assert_eq!(
            category(&classifier, "Reconciler error: conflict"),
            Some(LogCategory::ReconciliationFailure)
        );
        assert_eq!(
            category(&classifier, "level=warn msg=deprecated field"),
            Some(LogCategory::Other)
        );
        assert!(classifier.classify_line("reconciling collector").is_none());
    }

    #[test]
    fn test_taxonomies_are_separate() {
        let collector = LogClassifier::collector();
        let operator = LogClassifier::operator();
        let line = "exporter error: request rejected";

        assert_eq!(category(&collector, line), Some(LogCategory::ExporterFailure));
        assert_eq!(category(&operator, line), Some(LogCategory::OperatorCrdRejection));

        let oom = "process out of memory";
        assert_eq!(category(&collector, oom), Some(LogCategory::OomEvent));
        assert_eq!(category(&operator, oom), None);
    }

    #[test]
    fn test_classified_line_keeps_original_text() {
        let classifier = LogClassifier::collector();
        let line = "2024-01-01T00:00:00Z ERROR Exporter OTLP Failed";
        let classified = classifier.classify_line(line).unwrap();

        assert_eq!(classified.line, line);
        assert_eq!(classified.message, "Exporter failure or data loss");
        assert_eq!(
            LogClassifier::operator().classify_line("error").unwrap().message,
            "Unclassified operator error/warning"
        );
    }

    #[test]
    fn test_severity_mappings() {
        assert_eq!(LogCategory::OomEvent.collector_severity(), Severity::Critical);
        assert_eq!(LogCategory::ExporterFailure.collector_severity(), Severity::Critical);
        assert_eq!(LogCategory::OttlSyntaxError.collector_severity(), Severity::Warning);
        assert_eq!(LogCategory::ReceiverIssue.collector_severity(), Severity::Warning);
        assert_eq!(LogCategory::ProcessorError.collector_severity(), Severity::Warning);
        assert_eq!(LogCategory::Other.collector_severity(), Severity::Info);

        assert_eq!(LogCategory::OperatorCrdRejection.operator_severity(), Severity::Critical);
        assert_eq!(LogCategory::ReconciliationFailure.operator_severity(), Severity::Warning);
        assert_eq!(LogCategory::Other.operator_severity(), Severity::Warning);
    }

    #[test]
    fn test_category_serialization() {
        assert_eq!(
            serde_json::to_string(&LogCategory::OttlSyntaxError).unwrap(),
            "\"ottl_syntax_error\""
        );
        assert_eq!(
            serde_json::to_string(&LogCategory::OomEvent).unwrap(),
            "\"oom_event\""
        );
        assert_eq!(
            serde_json::to_string(&LogCategory::OperatorCrdRejection).unwrap(),
            "\"operator_crd_rejection\""
        );
        assert_eq!(
            serde_json::to_string(&LogCategory::ReconciliationFailure).unwrap(),
            "\"reconciliation_failure\""
        );
    }

    #[test]
    fn test_summarize_groups_by_first_appearance() {
        let lines = vec![
            "exporter failed to send".to_string(),
            "info: all good".to_string(),
            "receiver error".to_string(),
            "exporter error again".to_string(),
        ];
        let classified = LogClassifier::collector().classify(&lines);
        let summaries = summarize(&classified);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].category, LogCategory::ExporterFailure);
        assert_eq!(summaries[0].count, 2);
        assert_eq!(summaries[0].sample, "exporter failed to send");
        assert_eq!(summaries[1].category, LogCategory::ReceiverIssue);
        assert_eq!(summaries[1].count, 1);
    }
}
