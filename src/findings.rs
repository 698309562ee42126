//! Diagnostic finding types
//!
//! This module defines the structured output of every check: the finding itself,
//! its severity and category tags, the optional Kubernetes resource it refers to,
//! and the report envelope returned by the diagnostic tool flows.
//!
//! The JSON shape of [`DiagnosticFinding`] is a compatibility surface:
//! `{severity, category, resource?, summary, detail, suggestion, remediation?}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity of a diagnostic finding
///
/// Variants are declared in triage order, so the derived `Ord` sorts the most
/// urgent findings first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Broken or dangerous configuration requiring immediate attention
    Critical,
    /// Likely problem that should be addressed
    Warning,
    /// Informational observation
    Info,
    /// Explicitly healthy
    Ok,
}

impl Severity {
    /// Fixed triage rank: Critical(0) < Warning(1) < Info(2) < Ok(3)
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::Warning => 1,
            Severity::Info => 2,
            Severity::Ok => 3,
        }
    }
}

/// Area of the deployment a finding concerns
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Pipeline,
    Config,
    Security,
    Performance,
    Operator,
    Runtime,
}

/// Kubernetes resource a finding refers to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    #[serde(rename = "apiVersion", skip_serializing_if = "Option::is_none", default)]
    pub api_version: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            api_version: None,
        }
    }

    pub fn pod(namespace: &str, name: &str) -> Self {
        Self::new("Pod", namespace, name)
    }

    pub fn config_map(namespace: &str, name: &str) -> Self {
        Self::new("ConfigMap", namespace, name)
    }
}

/// A single diagnostic emitted by a rule or by the triage engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticFinding {
    pub severity: Severity,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resource: Option<ResourceRef>,
    pub summary: String,
    pub detail: String,
    pub suggestion: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub remediation: Option<String>,
}

impl DiagnosticFinding {
    /// Create a finding with empty detail and suggestion
    pub fn new(severity: Severity, category: Category, summary: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            resource: None,
            summary: summary.into(),
            detail: String::new(),
            suggestion: String::new(),
            remediation: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn with_resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }
}

/// Machine-readable failure codes carried by a [`DiagnosticReport`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    CollectorNotFound,
    ConfigParseFailed,
    InvalidInput,
    LogAccessFailed,
}

/// Structured failure attached to a report when the inputs were unusable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportError {
    pub code: ErrorCode,
    pub message: String,
}

/// Envelope returned by every diagnostic tool flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    /// Name of the tool flow that produced this report
    pub tool: String,
    /// When the report was produced
    pub timestamp: DateTime<Utc>,
    pub findings: Vec<DiagnosticFinding>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ReportError>,
}

impl DiagnosticReport {
    pub fn new(tool: &str, findings: Vec<DiagnosticFinding>) -> Self {
        Self {
            tool: tool.to_string(),
            timestamp: Utc::now(),
            findings,
            metadata: BTreeMap::new(),
            error: None,
        }
    }

    /// Create a report describing unusable inputs instead of findings
    pub fn failure(tool: &str, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(tool, Vec::new()).with_error(code, message)
    }

    /// Attach a structured error alongside any findings
    pub fn with_error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
        self.error = Some(ReportError {
            code,
            message: message.into(),
        });
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Count findings at the given severity
    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|finding| finding.severity == severity)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_severity_rank_ordering() {
        assert!(Severity::Critical.rank() < Severity::Warning.rank());
        assert!(Severity::Warning.rank() < Severity::Info.rank());
        assert!(Severity::Info.rank() < Severity::Ok.rank());
        assert!(Severity::Critical < Severity::Ok);
    }

    #[test]
    fn test_severity_serialization() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(
            serde_json::to_string(&Severity::Warning).unwrap(),
            "\"warning\""
        );
        assert_eq!(serde_json::to_string(&Severity::Info).unwrap(), "\"info\"");
        assert_eq!(serde_json::to_string(&Severity::Ok).unwrap(), "\"ok\"");
    }

    #[test]
    fn test_category_serialization() {
        assert_eq!(
            serde_json::to_string(&Category::Performance).unwrap(),
            "\"performance\""
        );
        assert_eq!(
            serde_json::to_string(&Category::Security).unwrap(),
            "\"security\""
        );
    }

    #[test]
    fn test_finding_json_omits_absent_optional_fields() {
        let finding = DiagnosticFinding::new(Severity::Warning, Category::Config, "summary");
        let json: Value = serde_json::to_value(&finding).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object.len(), 5);
        assert_eq!(object["severity"], "warning");
        assert_eq!(object["category"], "config");
        assert_eq!(object["summary"], "summary");
        assert_eq!(object["detail"], "");
        assert_eq!(object["suggestion"], "");
        assert!(!object.contains_key("resource"));
        assert!(!object.contains_key("remediation"));
    }

    #[test]
    fn test_finding_json_includes_present_optional_fields() {
        let finding = DiagnosticFinding::new(Severity::Critical, Category::Runtime, "oom")
            .with_detail("detail")
            .with_suggestion("suggestion")
            .with_remediation("processors: {}")
            .with_resource(ResourceRef::pod("observability", "collector-0"));
        let json: Value = serde_json::to_value(&finding).unwrap();

        assert_eq!(json["remediation"], "processors: {}");
        assert_eq!(json["resource"]["kind"], "Pod");
        assert_eq!(json["resource"]["namespace"], "observability");
        assert_eq!(json["resource"]["name"], "collector-0");
        assert!(json["resource"].get("apiVersion").is_none());
    }

    #[test]
    fn test_resource_api_version_serialized_in_camel_case() {
        let mut resource = ResourceRef::new("OpenTelemetryCollector", "ns", "otel");
        resource.api_version = Some("opentelemetry.io/v1beta1".to_string());

        let json: Value = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["apiVersion"], "opentelemetry.io/v1beta1");
    }

    #[test]
    fn test_report_failure_carries_error_code() {
        let report = DiagnosticReport::failure("triage", ErrorCode::InvalidInput, "bad name");
        let json: Value = serde_json::to_value(&report).unwrap();

        assert_eq!(json["error"]["code"], "INVALID_INPUT");
        assert_eq!(json["error"]["message"], "bad name");
        assert_eq!(json["findings"].as_array().unwrap().len(), 0);
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_report_count_by_severity() {
        let report = DiagnosticReport::new(
            "check_config",
            vec![
                DiagnosticFinding::new(Severity::Critical, Category::Config, "a"),
                DiagnosticFinding::new(Severity::Warning, Category::Config, "b"),
                DiagnosticFinding::new(Severity::Critical, Category::Config, "c"),
            ],
        )
        .with_metadata("deploymentMode", "DaemonSet");

        assert_eq!(report.count(Severity::Critical), 2);
        assert_eq!(report.count(Severity::Warning), 1);
        assert_eq!(report.count(Severity::Info), 0);
        assert_eq!(report.metadata["deploymentMode"], "DaemonSet");
    }
}
