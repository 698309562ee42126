//! Checks over component bodies (receivers, processors, exporters, connectors)

use crate::error::RuleError;
use crate::findings::{Category, DiagnosticFinding, Severity};
use crate::pipeline::ConfigValue;
use crate::rules::{AnalysisInput, Rule};
use regex::Regex;
use std::collections::BTreeMap;

/// Key fragments that mark a field as holding a credential
const CREDENTIAL_KEY_PATTERNS: [&str; 13] = [
    "api_key",
    "apikey",
    "api_token",
    "token",
    "secret",
    "password",
    "auth",
    "bearer",
    "authorization",
    "access_key",
    "secret_key",
    "api-key",
    "api-token",
];

/// Keys whose string values are compiled as regular expressions
const REGEX_KEYS: [&str; 4] = ["regexp", "regex", "match_type", "pattern"];

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

/// Depth-first walk over nested mappings, calling `visit(path, key, value)`
/// for every string leaf. Sequences are not descended into.
fn walk_strings<'a>(
    entries: &'a [(String, ConfigValue)],
    path: &str,
    visit: &mut dyn FnMut(&str, &'a str, &'a str),
) {
    for (key, value) in entries {
        let full_path = join_path(path, key);
        match value {
            ConfigValue::String(text) => visit(&full_path, key, text),
            ConfigValue::Map(children) => walk_strings(children, &full_path, visit),
            _ => {}
        }
    }
}

/// Flags exporters without `retry_on_failure` or `sending_queue`
pub struct ExporterRetryQueueRule;

impl Rule for ExporterRetryQueueRule {
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
        let Some(config) = &input.config else {
            return Ok(Vec::new());
        };

        let mut findings = Vec::new();
        for (name, body) in &config.exporters {
            // Exporters configured without a body use built-in defaults
            if !body.is_map() {
                continue;
            }

            if !body.contains_key("retry_on_failure") {
                findings.push(
                    DiagnosticFinding::new(
                        Severity::Warning,
                        Category::Performance,
                        format!("Exporter {:?} is missing retry_on_failure configuration", name),
                    )
                    .with_detail(
                        "Without retry configuration transient export failures turn into \
                         permanent data loss.",
                    )
                    .with_suggestion("Add retry_on_failure to this exporter")
                    .with_remediation(format!(
                        "exporters:\n  {}:\n    retry_on_failure:\n      enabled: true\n      \
                         initial_interval: 5s\n      max_interval: 30s\n      \
                         max_elapsed_time: 300s",
                        name
                    )),
                );
            }

            if !body.contains_key("sending_queue") {
                findings.push(
                    DiagnosticFinding::new(
                        Severity::Warning,
                        Category::Performance,
                        format!("Exporter {:?} is missing sending_queue configuration", name),
                    )
                    .with_detail(
                        "Without a sending queue the exporter works synchronously, and a slow \
                         backend pushes backpressure all the way to the receivers.",
                    )
                    .with_suggestion("Add sending_queue to this exporter")
                    .with_remediation(format!(
                        "exporters:\n  {}:\n    sending_queue:\n      enabled: true\n      \
                         num_consumers: 10\n      queue_size: 5000",
                        name
                    )),
                );
            }
        }

        Ok(findings)
    }

    fn name(&self) -> &str {
        "exporter_retry_queue"
    }
}

/// Flags credential-like exporter fields holding literal values
///
/// A value is considered safe when it is empty or an environment substitution
/// such as `${env:API_KEY}`. Findings carry the field path, never the value.
pub struct HardcodedCredentialRule;

impl HardcodedCredentialRule {
    fn is_credential_key(key: &str) -> bool {
        let lower = key.to_lowercase();
        CREDENTIAL_KEY_PATTERNS
            .iter()
            .any(|pattern| lower.contains(pattern))
    }

    fn is_hardcoded(value: &str) -> bool {
        let substituted = value.starts_with("${") && value.contains('}');
        !value.is_empty() && !substituted
    }
}

impl Rule for HardcodedCredentialRule {
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
        let Some(config) = &input.config else {
            return Ok(Vec::new());
        };

        let mut findings = Vec::new();
        for (exporter, body) in &config.exporters {
            input.ensure_active()?;
            let Some(entries) = body.as_map() else {
                continue;
            };

            walk_strings(entries, "", &mut |path, key, value| {
                if Self::is_credential_key(key) && Self::is_hardcoded(value) {
                    findings.push(
                        DiagnosticFinding::new(
                            Severity::Critical,
                            Category::Security,
                            format!(
                                "Hardcoded credential detected in exporter {:?} at {:?}",
                                exporter, path
                            ),
                        )
                        .with_detail(
                            "Credentials written into collector configuration leak through \
                             version control, config maps and logs.",
                        )
                        .with_suggestion(
                            "Use an environment variable reference or a Kubernetes secret instead",
                        )
                        .with_remediation(format!(
                            "# Replace the literal value with an environment variable reference:\n\
                             exporters:\n  {}:\n    {}: ${{env:YOUR_SECRET_ENV_VAR}}\n\n\
                             # Mount a Kubernetes secret as that environment variable \
                             in the collector pod",
                            exporter, path
                        )),
                    );
                }
            });
        }

        Ok(findings)
    }

    fn name(&self) -> &str {
        "hardcoded_credentials"
    }
}

/// Flags regular expressions in processor bodies that fail to compile
pub struct InvalidRegexRule;

impl Rule for InvalidRegexRule {
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
        let Some(config) = &input.config else {
            return Ok(Vec::new());
        };

        let mut findings = Vec::new();
        for (processor, body) in &config.processors {
            input.ensure_active()?;
            let Some(entries) = body.as_map() else {
                continue;
            };

            walk_strings(entries, "", &mut |path, key, value| {
                if !REGEX_KEYS.contains(&key) {
                    return;
                }
                if let Err(e) = Regex::new(value) {
                    findings.push(
                        DiagnosticFinding::new(
                            Severity::Warning,
                            Category::Config,
                            format!(
                                "Invalid regex pattern in processor {:?} at {:?}",
                                processor, path
                            ),
                        )
                        .with_detail(format!("The regex pattern {:?} is invalid: {}", value, e))
                        .with_suggestion("Fix the regex pattern syntax"),
                    );
                }
            });
        }

        Ok(findings)
    }

    fn name(&self) -> &str {
        "invalid_regex"
    }
}

/// Flags endpoints claimed by more than one receiver or receiver protocol
pub struct ReceiverPortConflictRule;

impl ReceiverPortConflictRule {
    /// Map every endpoint to the `receiver` or `receiver/protocol` ids claiming it
    fn endpoint_claims(receivers: &BTreeMap<String, ConfigValue>) -> BTreeMap<&str, Vec<String>> {
        let mut claims: BTreeMap<&str, Vec<String>> = BTreeMap::new();

        for (name, body) in receivers {
            if let Some(endpoint) = body.get_string("endpoint") {
                claims.entry(endpoint).or_default().push(name.clone());
            }

            for (protocol, protocol_body) in body.get_map("protocols").unwrap_or_default() {
                if let Some(endpoint) = protocol_body.get_string("endpoint") {
                    claims
                        .entry(endpoint)
                        .or_default()
                        .push(format!("{}/{}", name, protocol));
                }
            }
        }

        claims
    }
}

impl Rule for ReceiverPortConflictRule {
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
        let Some(config) = &input.config else {
            return Ok(Vec::new());
        };

        let findings = Self::endpoint_claims(&config.receivers)
            .into_iter()
            .filter(|(_, claimants)| claimants.len() > 1)
            .map(|(endpoint, claimants)| {
                DiagnosticFinding::new(
                    Severity::Critical,
                    Category::Config,
                    format!("Port conflict: endpoint {:?} is used by multiple receivers", endpoint),
                )
                .with_detail(format!(
                    "Receivers [{}] are all configured to listen on {}. Only one of them can \
                     bind to it.",
                    claimants.join(", "),
                    endpoint
                ))
                .with_suggestion("Assign a unique endpoint to each receiver")
            })
            .collect();

        Ok(findings)
    }

    fn name(&self) -> &str {
        "receiver_port_conflict"
    }
}

/// Flags connectors that are not wired as both an exporter and a receiver
pub struct ConnectorUsageRule;

impl Rule for ConnectorUsageRule {
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
        let Some(config) = &input.config else {
            return Ok(Vec::new());
        };

        let mut findings = Vec::new();
        for connector in config.connectors.keys() {
            let pipelines = config.service.pipelines.values();
            let as_exporter = pipelines.clone().any(|p| p.has_exporter(connector));
            let as_receiver = pipelines.clone().any(|p| p.has_receiver(connector));

            let (summary, detail, suggestion) = match (as_exporter, as_receiver) {
                (true, true) => continue,
                (false, false) => (
                    format!("Connector {:?} is defined but not used in any pipeline", connector),
                    "The connector is configured but appears as neither an exporter nor a \
                     receiver in any pipeline, so it has no effect.",
                    "Add the connector to the pipelines it should bridge, or remove it",
                ),
                (false, true) => (
                    format!("Connector {:?} is not used as an exporter in any pipeline", connector),
                    "A connector is an exporter in its source pipeline and a receiver in its \
                     destination pipeline. This connector has no source pipeline.",
                    "Add the connector as an exporter in the source pipeline",
                ),
                (true, false) => (
                    format!("Connector {:?} is not used as a receiver in any pipeline", connector),
                    "A connector is an exporter in its source pipeline and a receiver in its \
                     destination pipeline. This connector has no destination pipeline.",
                    "Add the connector as a receiver in the destination pipeline",
                ),
            };

            findings.push(
                DiagnosticFinding::new(Severity::Warning, Category::Config, summary)
                    .with_detail(detail)
                    .with_suggestion(suggestion),
            );
        }

        Ok(findings)
    }

    fn name(&self) -> &str {
        "connector_usage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::DeploymentMode;
    use crate::rules::test_support::{input, run};

    fn config_input(yaml: &str) -> AnalysisInput {
        input(yaml, DeploymentMode::Deployment)
    }

    #[test]
    fn test_retry_and_queue_are_separate_findings() {
        let yaml = r#"
exporters:
  otlp:
    endpoint: backend:4317
  otlphttp:
    endpoint: https://backend
    retry_on_failure:
      enabled: true
  debug:
"#;
        let findings = run(&ExporterRetryQueueRule, &config_input(yaml));

        let summaries: Vec<&str> = findings.iter().map(|f| f.summary.as_str()).collect();
        assert_eq!(
            summaries,
            vec![
                "Exporter \"otlp\" is missing retry_on_failure configuration",
                "Exporter \"otlp\" is missing sending_queue configuration",
                "Exporter \"otlphttp\" is missing sending_queue configuration",
            ]
        );
        assert!(findings.iter().all(|f| f.severity == Severity::Warning));
    }

    #[test]
    fn test_retry_and_queue_inherited_through_anchor() {
        let yaml = r#"
exporters:
  otlp/base: &base
    endpoint: backend:4317
    retry_on_failure:
      enabled: true
    sending_queue:
      enabled: true
  otlp/copy:
    <<: *base
    endpoint: other:4317
"#;
        assert!(run(&ExporterRetryQueueRule, &config_input(yaml)).is_empty());
    }

    #[test]
    fn test_env_substitution_is_not_a_credential() {
        let yaml = "exporters:\n  otlp:\n    headers:\n      api_key: \"${env:API_KEY}\"\n";
        assert!(run(&HardcodedCredentialRule, &config_input(yaml)).is_empty());

        let yaml = "exporters:\n  otlp:\n    token: \"\"\n";
        assert!(run(&HardcodedCredentialRule, &config_input(yaml)).is_empty());
    }

    #[test]
    fn test_literal_credential_is_flagged_without_echoing_value() {
        let yaml = "exporters:\n  otlp:\n    headers:\n      api_key: abc123secret\n";
        let findings = run(&HardcodedCredentialRule, &config_input(yaml));

        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.category, Category::Security);
        assert!(finding.summary.contains("headers.api_key"));
        assert!(finding.summary.contains("\"otlp\""));

        let json = serde_json::to_string(finding).unwrap();
        assert!(!json.contains("abc123secret"));
    }

    #[test]
    fn test_credential_key_matching_is_case_insensitive() {
        let yaml = r#"
exporters:
  datadog:
    api:
      Key: not-a-credential-key
      API_KEY: literal
    Authorization: Bearer xyz
    auth_type: basic
    timeout: 10s
"#;
        let findings = run(&HardcodedCredentialRule, &config_input(yaml));
        let summaries: Vec<&str> = findings.iter().map(|f| f.summary.as_str()).collect();

        // auth_type is flagged as well: any credential-like key name counts
        assert_eq!(findings.len(), 3, "{:?}", summaries);
        assert!(summaries.iter().any(|s| s.contains("api.API_KEY")));
        assert!(summaries.iter().any(|s| s.contains("\"Authorization\"")));
        assert!(summaries.iter().any(|s| s.contains("\"auth_type\"")));
    }

    #[test]
    fn test_invalid_regex_reports_compiler_error() {
        let yaml = r#"
processors:
  filter/drop:
    metrics:
      include:
        match_type: regexp
        regexp: "^(unclosed"
  attributes:
    actions:
      - key: pattern
        pattern: "[a-z"
  transform:
    pattern: "ok.*"
"#;
        let findings = run(&InvalidRegexRule, &config_input(yaml));

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(findings[0].summary.contains("metrics.include.regexp"));
        assert!(findings[0].detail.contains("^(unclosed"));
    }

    #[test]
    fn test_port_conflict_names_all_claimants() {
        let yaml = r#"
receivers:
  otlp:
    protocols:
      grpc:
        endpoint: "0.0.0.0:4317"
      http:
        endpoint: "0.0.0.0:4318"
  jaeger:
    endpoint: "0.0.0.0:4317"
"#;
        let findings = run(&ReceiverPortConflictRule, &config_input(yaml));

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert!(findings[0].detail.contains("jaeger"));
        assert!(findings[0].detail.contains("otlp/grpc"));
    }

    #[test]
    fn test_two_receivers_on_one_endpoint() {
        let yaml = "receivers:\n  a:\n    endpoint: \"0.0.0.0:4317\"\n  \
                    b:\n    endpoint: \"0.0.0.0:4317\"\n";
        let findings = run(&ReceiverPortConflictRule, &config_input(yaml));
        assert_eq!(findings.len(), 1);
        assert!(findings[0].detail.contains("[a, b]"));

        let yaml = "receivers:\n  a:\n    endpoint: \"0.0.0.0:4317\"\n";
        assert!(run(&ReceiverPortConflictRule, &config_input(yaml)).is_empty());
    }

    #[test]
    fn test_connector_missing_destination_only() {
        let yaml = r#"
connectors:
  spanmetrics: {}
service:
  pipelines:
    traces:
      receivers: [otlp]
      exporters: [otlp, spanmetrics]
"#;
        let findings = run(&ConnectorUsageRule, &config_input(yaml));

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(findings[0].summary.contains("not used as a receiver"));
    }

    #[test]
    fn test_connector_outcomes() {
        let yaml = r#"
connectors:
  bridged: {}
  orphan: {}
  sink_only: {}
service:
  pipelines:
    traces:
      exporters: [bridged]
    metrics:
      receivers: [bridged, sink_only]
"#;
        let findings = run(&ConnectorUsageRule, &config_input(yaml));
        let summaries: Vec<&str> = findings.iter().map(|f| f.summary.as_str()).collect();

        assert_eq!(
            summaries,
            vec![
                "Connector \"orphan\" is defined but not used in any pipeline",
                "Connector \"sink_only\" is not used as an exporter in any pipeline",
            ]
        );
    }
}
