//! Diagnostic tool flows
//!
//! Each flow validates its inputs, gathers what it can from the cluster
//! collaborators and returns a [`DiagnosticReport`]. Collaborator failures are
//! turned into Warning findings; only unusable inputs produce a report whose
//! sole content is a structured error.

use crate::cancel::CancellationToken;
use crate::cluster::{
    fetch_collector_config, ConfigSource, LogSource, WorkloadLookup, DEFAULT_TAIL_LINES,
};
use crate::deployment::{
    CollectorInstance, CollectorInventory, DeploymentMode, DeploymentResolver,
};
use crate::discovery::Features;
use crate::error::ParseError;
use crate::findings::{
    Category, DiagnosticFinding, DiagnosticReport, ErrorCode, ResourceRef, Severity,
};
use crate::logs::LogClassifier;
use crate::pipeline::PipelineDocument;
use crate::rules::{all_rules, config_rules, AnalysisInput, DEFAULT_BACKPRESSURE_THRESHOLD};
use crate::settings::Settings;
use crate::triage::{sort_by_severity, TriageEngine};
use log::{info, warn};
use serde::Serialize;

pub const LIST_TOOL: &str = "list_collectors";
pub const DETECT_TOOL: &str = "detect_deployment_type";
pub const GET_CONFIG_TOOL: &str = "get_config";
pub const CHECK_CONFIG_TOOL: &str = "check_config";
pub const TRIAGE_TOOL: &str = "triage_scan";
pub const COLLECTOR_LOGS_TOOL: &str = "parse_collector_logs";
pub const OPERATOR_LOGS_TOOL: &str = "parse_operator_logs";

/// Maximum length of a DNS-1123 subdomain
const MAX_NAME_LENGTH: usize = 253;

/// Inputs of a full triage scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageRequest {
    pub namespace: String,
    /// Name of the collector workload
    pub name: String,
    /// Config map holding the collector configuration
    pub config_map: String,
    /// Pod whose logs feed the log-based rules; without it they see no logs
    pub pod: Option<String>,
}

/// Raw collector configuration with its parsed form or parse error
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    /// Config map key the configuration was read from
    pub key: String,
    pub raw: String,
    pub parsed: Option<PipelineDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

/// Collector instances found by a listing
#[derive(Debug, Clone, Serialize)]
pub struct CollectorListing {
    pub collectors: Vec<CollectorInstance>,
    pub count: usize,
}

/// Runs the diagnostic tool flows against a set of cluster collaborators
pub struct Diagnoser<'a> {
    lookup: &'a dyn WorkloadLookup,
    configs: &'a dyn ConfigSource,
    logs: &'a dyn LogSource,
    features: Features,
    tail_lines: usize,
    backpressure_threshold: usize,
    operator_namespace: String,
    operator_selector: String,
}

impl<'a> Diagnoser<'a> {
    pub fn new(
        lookup: &'a dyn WorkloadLookup,
        configs: &'a dyn ConfigSource,
        logs: &'a dyn LogSource,
        features: Features,
    ) -> Self {
        let defaults = Settings::default();
        Self {
            lookup,
            configs,
            logs,
            features,
            tail_lines: DEFAULT_TAIL_LINES,
            backpressure_threshold: DEFAULT_BACKPRESSURE_THRESHOLD,
            operator_namespace: defaults.cluster.operator_namespace,
            operator_selector: defaults.cluster.operator_selector,
        }
    }

    /// Apply log, rule and operator location settings
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.tail_lines = settings.logs.tail_lines;
        self.backpressure_threshold = settings.rules.backpressure_threshold;
        self.operator_namespace = settings.cluster.operator_namespace.clone();
        self.operator_selector = settings.cluster.operator_selector.clone();
        self
    }

    /// List collector instances in `namespace`, or in every namespace
    ///
    /// Listings the cluster refuses are skipped, so the result may be partial.
    pub fn list_collectors(
        &self,
        namespace: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CollectorListing, DiagnosticReport> {
        let namespace = namespace.unwrap_or_default();
        if !namespace.is_empty() {
            validate_names(LIST_TOOL, &[("namespace", namespace)])?;
        }
        info!(
            "Listing collectors in {}",
            if namespace.is_empty() { "all namespaces" } else { namespace }
        );

        let collectors = CollectorInventory::new(self.lookup).list(
            namespace,
            self.features.has_operator(),
            cancel,
        );

        Ok(CollectorListing {
            count: collectors.len(),
            collectors,
        })
    }

    /// Determine how `namespace/name` is deployed
    pub fn detect_deployment(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> DiagnosticReport {
        if let Err(report) =
            validate_names(DETECT_TOOL, &[("namespace", namespace), ("name", name)])
        {
            return report;
        }
        info!("Detecting deployment type of {}/{}", namespace, name);

        let resolver = DeploymentResolver::new(self.lookup);
        match resolver.resolve(namespace, name, self.features.has_operator(), cancel) {
            Ok(mode) => DiagnosticReport::new(DETECT_TOOL, Vec::new())
                .with_metadata("namespace", namespace)
                .with_metadata("name", name)
                .with_metadata("deploymentMode", mode.as_str()),
            Err(e) => {
                let finding = DiagnosticFinding::new(
                    Severity::Warning,
                    Category::Config,
                    "Collector workload not found",
                )
                .with_detail(e.to_string())
                .with_suggestion("Verify the namespace and workload name of the collector")
                .with_resource(ResourceRef::new("", namespace, name));

                DiagnosticReport::new(DETECT_TOOL, vec![finding])
                    .with_error(ErrorCode::CollectorNotFound, e.to_string())
            }
        }
    }

    /// Fetch the collector configuration and try to parse it
    ///
    /// # Returns
    ///
    /// The raw text with its parse result, or a report describing why the
    /// config map could not be read.
    pub fn get_config(
        &self,
        namespace: &str,
        config_map: &str,
        cancel: &CancellationToken,
    ) -> Result<ConfigView, DiagnosticReport> {
        validate_names(
            GET_CONFIG_TOOL,
            &[("namespace", namespace), ("configmap", config_map)],
        )?;
        info!("Retrieving collector config {}/{}", namespace, config_map);

        let (key, bytes) = fetch_collector_config(self.configs, namespace, config_map, cancel)
            .map_err(|e| {
                let finding = DiagnosticFinding::new(
                    Severity::Warning,
                    Category::Config,
                    "Failed to retrieve collector configuration",
                )
                .with_detail(e.to_string())
                .with_resource(ResourceRef::config_map(namespace, config_map));
                DiagnosticReport::new(GET_CONFIG_TOOL, vec![finding])
            })?;

        let raw = String::from_utf8_lossy(&bytes).into_owned();
        let (parsed, parse_error) = match PipelineDocument::parse(&bytes) {
            Ok(document) => (Some(document), None),
            Err(e) => (None, Some(e.to_string())),
        };

        Ok(ConfigView {
            key,
            raw,
            parsed,
            parse_error,
        })
    }

    /// Run the configuration rules without log analysis
    pub fn check_config(
        &self,
        namespace: &str,
        name: &str,
        config_map: &str,
        cancel: &CancellationToken,
    ) -> DiagnosticReport {
        if let Err(report) = validate_names(
            CHECK_CONFIG_TOOL,
            &[("namespace", namespace), ("name", name), ("configmap", config_map)],
        ) {
            return report;
        }
        info!("Running config check for {}/{}", namespace, name);

        let mode = self.resolve_mode(namespace, name, cancel);

        let document = match self.load_document(namespace, config_map, cancel) {
            Ok(document) => document,
            Err(failure) => {
                let report = DiagnosticReport::new(CHECK_CONFIG_TOOL, vec![failure.finding()]);
                return match failure {
                    ConfigFailure::Parse(e) => {
                        report.with_error(ErrorCode::ConfigParseFailed, e.to_string())
                    }
                    ConfigFailure::Fetch(_) => report,
                };
            }
        };

        let input = AnalysisInput::new(Some(document), mode).with_cancel(cancel.clone());
        let findings = TriageEngine::with_rules(config_rules()).triage(&input);

        DiagnosticReport::new(CHECK_CONFIG_TOOL, findings)
            .with_metadata("deploymentMode", mode.as_str())
    }

    /// Run every rule, including the log-based ones, and rank the findings
    ///
    /// Failures to resolve the mode, load the config or fetch logs do not stop
    /// the scan; they surface as Warning findings next to the rule output.
    pub fn triage(&self, request: &TriageRequest, cancel: &CancellationToken) -> DiagnosticReport {
        let mut names = vec![
            ("namespace", request.namespace.as_str()),
            ("name", request.name.as_str()),
            ("configmap", request.config_map.as_str()),
        ];
        if let Some(pod) = &request.pod {
            names.push(("pod", pod.as_str()));
        }
        if let Err(report) = validate_names(TRIAGE_TOOL, &names) {
            return report;
        }
        info!("Running triage scan for {}/{}", request.namespace, request.name);

        let namespace = request.namespace.as_str();
        let mode = self.resolve_mode(namespace, &request.name, cancel);
        let mut gathering_findings = Vec::new();

        let document = match self.load_document(namespace, &request.config_map, cancel) {
            Ok(document) => Some(document),
            Err(failure) => {
                warn!("Triage continues without configuration: {}", failure);
                gathering_findings.push(
                    failure
                        .finding()
                        .with_resource(ResourceRef::config_map(namespace, &request.config_map)),
                );
                None
            }
        };

        let logs = match &request.pod {
            Some(pod) => match self.logs.tail_logs(namespace, pod, self.tail_lines, cancel) {
                Ok(lines) => lines,
                Err(e) => {
                    warn!("Triage continues without logs of {}/{}: {}", namespace, pod, e);
                    gathering_findings.push(log_fetch_failure(namespace, pod, &e.to_string()));
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let input = AnalysisInput::new(document, mode)
            .with_logs(logs)
            .with_cancel(cancel.clone());
        let mut findings =
            TriageEngine::with_rules(all_rules(self.backpressure_threshold)).triage(&input);
        findings.extend(gathering_findings);
        sort_by_severity(&mut findings);

        DiagnosticReport::new(TRIAGE_TOOL, findings)
            .with_metadata("deploymentMode", mode.as_str())
            .with_metadata("configSource", request.config_map.as_str())
    }

    /// Classify a collector pod's recent log lines, one finding per line
    pub fn parse_collector_logs(
        &self,
        namespace: &str,
        pod: &str,
        tail_lines: Option<usize>,
        cancel: &CancellationToken,
    ) -> DiagnosticReport {
        if let Err(report) =
            validate_names(COLLECTOR_LOGS_TOOL, &[("namespace", namespace), ("pod", pod)])
        {
            return report;
        }
        let tail_lines = tail_lines.unwrap_or(self.tail_lines);
        info!("Parsing collector logs of {}/{} (tail {})", namespace, pod, tail_lines);

        let lines = match self.logs.tail_logs(namespace, pod, tail_lines, cancel) {
            Ok(lines) => lines,
            Err(e) => {
                return DiagnosticReport::new(
                    COLLECTOR_LOGS_TOOL,
                    vec![log_fetch_failure(namespace, pod, &e.to_string())],
                )
                .with_error(ErrorCode::LogAccessFailed, e.to_string());
            }
        };

        let classified = LogClassifier::collector().classify(&lines);
        let findings: Vec<DiagnosticFinding> = classified
            .iter()
            .map(|entry| {
                DiagnosticFinding::new(
                    entry.category.collector_severity(),
                    Category::Runtime,
                    entry.message.as_str(),
                )
                .with_detail(entry.line.as_str())
                .with_resource(ResourceRef::pod(namespace, pod))
            })
            .collect();

        DiagnosticReport::new(COLLECTOR_LOGS_TOOL, findings)
            .with_metadata("totalLines", lines.len().to_string())
            .with_metadata("classifiedCount", classified.len().to_string())
    }

    /// Classify the logs of every operator pod
    ///
    /// `namespace` defaults to the configured operator namespace. A pod whose
    /// logs cannot be read yields one Warning; the other pods are still read.
    pub fn parse_operator_logs(
        &self,
        namespace: Option<&str>,
        cancel: &CancellationToken,
    ) -> DiagnosticReport {
        let namespace = namespace
            .filter(|ns| !ns.is_empty())
            .unwrap_or(self.operator_namespace.as_str());
        if let Err(report) = validate_names(OPERATOR_LOGS_TOOL, &[("namespace", namespace)]) {
            return report;
        }
        info!("Parsing operator logs in {}", namespace);

        let pods = match self.logs.find_pods(namespace, &self.operator_selector, cancel) {
            Ok(pods) if !pods.is_empty() => pods,
            Ok(_) => return self.operator_not_found(namespace),
            Err(e) => {
                warn!("Listing operator pods in {} failed: {}", namespace, e);
                return self.operator_not_found(namespace);
            }
        };

        let classifier = LogClassifier::operator();
        let mut findings = Vec::new();

        for pod in &pods {
            let lines = match self.logs.tail_logs(namespace, pod, self.tail_lines, cancel) {
                Ok(lines) => lines,
                Err(e) => {
                    warn!("Reading operator logs of {}/{} failed: {}", namespace, pod, e);
                    findings.push(
                        DiagnosticFinding::new(
                            Severity::Warning,
                            Category::Operator,
                            "Failed to fetch operator logs",
                        )
                        .with_detail(e.to_string())
                        .with_resource(ResourceRef::pod(namespace, pod)),
                    );
                    continue;
                }
            };

            findings.extend(classifier.classify(&lines).into_iter().map(|entry| {
                DiagnosticFinding::new(
                    entry.category.operator_severity(),
                    Category::Operator,
                    entry.message,
                )
                .with_detail(entry.line)
                .with_resource(ResourceRef::pod(namespace, pod))
            }));
        }

        DiagnosticReport::new(OPERATOR_LOGS_TOOL, findings)
    }

    fn operator_not_found(&self, namespace: &str) -> DiagnosticReport {
        let finding = DiagnosticFinding::new(
            Severity::Warning,
            Category::Operator,
            "OTel Operator pods not found",
        )
        .with_detail(format!(
            "No pods found with label {} in namespace {}",
            self.operator_selector, namespace
        ))
        .with_suggestion("Verify the Operator is installed and the namespace is correct");

        DiagnosticReport::new(OPERATOR_LOGS_TOOL, vec![finding])
    }

    fn resolve_mode(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> DeploymentMode {
        DeploymentResolver::new(self.lookup).resolve_or_unknown(
            namespace,
            name,
            self.features.has_operator(),
            cancel,
        )
    }

    fn load_document(
        &self,
        namespace: &str,
        config_map: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineDocument, ConfigFailure> {
        let (_, bytes) = fetch_collector_config(self.configs, namespace, config_map, cancel)
            .map_err(|e| ConfigFailure::Fetch(e.to_string()))?;
        PipelineDocument::parse(&bytes).map_err(ConfigFailure::Parse)
    }
}

/// Why the collector configuration was unavailable to the rules
#[derive(Debug)]
enum ConfigFailure {
    Fetch(String),
    Parse(ParseError),
}

impl ConfigFailure {
    fn finding(&self) -> DiagnosticFinding {
        let (summary, detail) = match self {
            ConfigFailure::Fetch(reason) => {
                ("Failed to retrieve collector configuration", reason.clone())
            }
            ConfigFailure::Parse(e) => ("Failed to parse collector configuration", e.to_string()),
        };
        DiagnosticFinding::new(Severity::Warning, Category::Config, summary).with_detail(detail)
    }
}

impl std::fmt::Display for ConfigFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigFailure::Fetch(reason) => write!(f, "config fetch failed: {}", reason),
            ConfigFailure::Parse(e) => write!(f, "config parse failed: {}", e),
        }
    }
}

fn log_fetch_failure(namespace: &str, pod: &str, reason: &str) -> DiagnosticFinding {
    DiagnosticFinding::new(Severity::Warning, Category::Runtime, "Failed to fetch collector logs")
        .with_detail(reason)
        .with_suggestion("Check RBAC permissions for pods/log access")
        .with_resource(ResourceRef::pod(namespace, pod))
}

/// Check every `(field, value)` pair, returning an invalid-input report for the first bad one
fn validate_names(tool: &str, names: &[(&str, &str)]) -> Result<(), DiagnosticReport> {
    for (field, value) in names {
        if let Err(reason) = check_dns_subdomain(value) {
            return Err(DiagnosticReport::failure(
                tool,
                ErrorCode::InvalidInput,
                format!("Invalid {} {:?}: {}", field, value, reason),
            ));
        }
    }
    Ok(())
}

/// DNS-1123 subdomain: lowercase alphanumerics, `-` and `.`, alphanumeric at both ends
fn check_dns_subdomain(value: &str) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err("must not be empty");
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err("must be no more than 253 characters");
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err("must consist of lowercase alphanumeric characters, '-' or '.'");
    }

    let alphanumeric = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let starts_ok = value.chars().next().is_some_and(alphanumeric);
    let ends_ok = value.chars().last().is_some_and(alphanumeric);
    if !starts_ok || !ends_ok {
        return Err("must start and end with an alphanumeric character");
    }

    Ok(())
}
