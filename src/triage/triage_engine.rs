use crate::error::RuleError;
use crate::findings::{Category, DiagnosticFinding, Severity};
use crate::rules::{AnalysisInput, Rule};
use log::{debug, error};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Summary of the placeholder emitted in place of a failed rule's findings
pub const RULE_FAILURE_SUMMARY: &str = "An analyzer failed to execute";

/// Engine that runs a rule set against one analysis input and orders the results
///
/// Rule failures are isolated: a rule that returns an error or panics
/// contributes a single Info placeholder and the remaining rules still run.
pub struct TriageEngine {
    rules: Vec<Box<dyn Rule>>,
}

impl Default for TriageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TriageEngine {
    /// Create a new triage engine with no rules
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Create an engine preloaded with `rules`
    pub fn with_rules(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    /// Add a rule to the engine
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    /// Get the number of configured rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Run every rule and return all findings ordered by severity
    ///
    /// The sort is stable: findings of equal severity keep the order in which
    /// the rules emitted them.
    pub fn triage(&self, input: &AnalysisInput) -> Vec<DiagnosticFinding> {
        let mut findings = Vec::new();

        for rule in &self.rules {
            match Self::run_isolated(rule.as_ref(), input) {
                Ok(rule_findings) => {
                    debug!("Rule '{}' produced {} findings", rule.name(), rule_findings.len());
                    findings.extend(rule_findings);
                }
                Err(reason) => {
                    error!("Rule '{}' failed: {}", rule.name(), reason);
                    findings.push(Self::failure_placeholder());
                }
            }
        }

        sort_by_severity(&mut findings);
        findings
    }

    /// Supervisory boundary around one rule call
    fn run_isolated(
        rule: &dyn Rule,
        input: &AnalysisInput,
    ) -> Result<Vec<DiagnosticFinding>, String> {
        match panic::catch_unwind(AssertUnwindSafe(|| rule.evaluate(input))) {
            Ok(Ok(findings)) => Ok(findings),
            Ok(Err(RuleError::Cancelled)) => Err("cancelled".to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
        }
    }

    fn failure_placeholder() -> DiagnosticFinding {
        DiagnosticFinding::new(Severity::Info, Category::Config, RULE_FAILURE_SUMMARY).with_detail(
            "One of the detection rules encountered an unexpected error. \
             Other rules were not affected.",
        )
    }
}

/// Stable sort by fixed severity rank, most urgent first
pub fn sort_by_severity(findings: &mut [DiagnosticFinding]) {
    findings.sort_by_key(|finding| finding.severity.rank());
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::DeploymentMode;
    use crate::pipeline::PipelineDocument;
    use crate::rules::{all_rules, DEFAULT_BACKPRESSURE_THRESHOLD};

    /// Emits fixed findings, or fails in a configured way
    struct MockRule {
        name: String,
        behavior: Behavior,
    }

    enum Behavior {
        Emit(Vec<Severity>),
        Fault,
        Panic,
    }

    impl MockRule {
        fn boxed(name: &str, behavior: Behavior) -> Box<dyn Rule> {
            Box::new(Self {
                name: name.to_string(),
                behavior,
            })
        }
    }

    impl Rule for MockRule {
        fn evaluate(&self, _input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
            match &self.behavior {
                Behavior::Emit(severities) => Ok(severities
                    .iter()
                    .enumerate()
                    .map(|(i, severity)| {
                        let summary = format!("{}-{}", self.name, i);
                        DiagnosticFinding::new(*severity, Category::Config, summary)
                    })
                    .collect()),
                Behavior::Fault => Err(RuleError::Fault("internal state: secret-detail".into())),
                Behavior::Panic => panic!("rule exploded"),
            }
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn summaries(findings: &[DiagnosticFinding]) -> Vec<&str> {
        findings.iter().map(|f| f.summary.as_str()).collect()
    }

    #[test]
    fn test_triage_engine_creation() {
        let engine = TriageEngine::new();
        assert_eq!(engine.rule_count(), 0);
        assert!(engine.triage(&AnalysisInput::default()).is_empty());

        let engine_default = TriageEngine::default();
        assert_eq!(engine_default.rule_count(), 0);
    }

    #[test]
    fn test_triage_engine_add_rule() {
        let mut engine = TriageEngine::new();
        engine.add_rule(MockRule::boxed("a", Behavior::Emit(vec![])));
        engine.add_rule(MockRule::boxed("b", Behavior::Emit(vec![])));
        assert_eq!(engine.rule_count(), 2);
    }

    #[test]
    fn test_triage_orders_by_severity() {
        let engine = TriageEngine::with_rules(vec![
            MockRule::boxed("info", Behavior::Emit(vec![Severity::Info])),
            MockRule::boxed("critical", Behavior::Emit(vec![Severity::Critical])),
            MockRule::boxed("warning", Behavior::Emit(vec![Severity::Warning])),
        ]);

        let findings = engine.triage(&AnalysisInput::default());
        assert_eq!(summaries(&findings), vec!["critical-0", "warning-0", "info-0"]);
    }

    #[test]
    fn test_triage_sort_is_stable() {
        let engine = TriageEngine::with_rules(vec![
            MockRule::boxed(
                "a",
                Behavior::Emit(vec![Severity::Ok, Severity::Warning, Severity::Warning]),
            ),
            MockRule::boxed("b", Behavior::Emit(vec![Severity::Warning, Severity::Critical])),
        ]);

        let findings = engine.triage(&AnalysisInput::default());
        assert_eq!(
            summaries(&findings),
            vec!["b-1", "a-1", "a-2", "b-0", "a-0"]
        );
    }

    #[test]
    fn test_faulting_rule_is_isolated() {
        let engine = TriageEngine::with_rules(vec![
            MockRule::boxed("before", Behavior::Emit(vec![Severity::Warning])),
            MockRule::boxed("broken", Behavior::Fault),
            MockRule::boxed("after", Behavior::Emit(vec![Severity::Critical])),
        ]);

        let findings = engine.triage(&AnalysisInput::default());
        assert_eq!(
            summaries(&findings),
            vec!["after-0", "before-0", RULE_FAILURE_SUMMARY]
        );
        assert_eq!(findings[2].severity, Severity::Info);
        assert!(!findings[2].detail.contains("secret-detail"));
    }

    #[test]
    fn test_panicking_rule_is_isolated() {
        let engine = TriageEngine::with_rules(vec![
            MockRule::boxed("panics", Behavior::Panic),
            MockRule::boxed("healthy", Behavior::Emit(vec![Severity::Ok])),
        ]);

        let findings = engine.triage(&AnalysisInput::default());
        assert_eq!(summaries(&findings), vec![RULE_FAILURE_SUMMARY, "healthy-0"]);
        assert!(!findings[0].detail.contains("rule exploded"));
    }

    #[test]
    fn test_full_catalog_with_faulting_rule() {
        let yaml = r#"
exporters:
  otlp:
    endpoint: backend:4317
service:
  pipelines:
    traces:
      receivers: [otlp]
      exporters: [otlp]
"#;
        let document = PipelineDocument::parse(yaml.as_bytes()).unwrap();
        let input = AnalysisInput::new(Some(document), DeploymentMode::Deployment);

        let mut engine = TriageEngine::with_rules(all_rules(DEFAULT_BACKPRESSURE_THRESHOLD));
        let baseline = engine.triage(&input);

        engine.add_rule(MockRule::boxed("broken", Behavior::Panic));
        let findings = engine.triage(&input);

        assert_eq!(findings.len(), baseline.len() + 1);
        let placeholders = findings
            .iter()
            .filter(|f| f.summary == RULE_FAILURE_SUMMARY)
            .count();
        assert_eq!(placeholders, 1);
        // memory_limiter, batch, retry and queue findings survive the broken rule
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(baseline.len(), 4);
    }

    #[test]
    fn test_cancelled_rule_becomes_placeholder() {
        let cancel = crate::cancel::CancellationToken::new();
        cancel.cancel();
        let input = AnalysisInput::default()
            .with_logs(vec!["exporter error".to_string()])
            .with_cancel(cancel);

        let engine = TriageEngine::with_rules(vec![
            Box::new(crate::rules::LogSignalRule),
            MockRule::boxed("healthy", Behavior::Emit(vec![Severity::Warning])),
        ]);

        let findings = engine.triage(&input);
        assert_eq!(summaries(&findings), vec!["healthy-0", RULE_FAILURE_SUMMARY]);
    }
}
