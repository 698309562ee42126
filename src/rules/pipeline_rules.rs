//! Checks over the `service.pipelines` section
//!
//! Processor references follow the `base/qualifier` convention, so
//! `memory_limiter/custom` satisfies a check for `memory_limiter`.

use crate::deployment::DeploymentMode;
use crate::error::RuleError;
use crate::findings::{Category, DiagnosticFinding, Severity};
use crate::pipeline::component_type;
use crate::rules::{processors_with, AnalysisInput, Rule};

/// Processor types that bound metric label cardinality
const CARDINALITY_CONTROLS: [&str; 3] = ["filter", "attributes", "metricstransform"];

/// Flags pipelines without a `batch` processor
pub struct MissingBatchRule;

impl Rule for MissingBatchRule {
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
        let Some(config) = &input.config else {
            return Ok(Vec::new());
        };

        let findings = config
            .service
            .pipelines
            .iter()
            .filter(|(_, pipeline)| !pipeline.has_processor("batch"))
            .map(|(name, pipeline)| {
                DiagnosticFinding::new(
                    Severity::Warning,
                    Category::Performance,
                    format!("Pipeline {:?} is missing the batch processor", name),
                )
                .with_detail(
                    "The batch processor groups data before it reaches the exporters, reducing \
                     network overhead and improving throughput. Without it every item is sent \
                     individually.",
                )
                .with_suggestion("Add the batch processor to this pipeline")
                .with_remediation(format!(
                    "processors:\n  batch:\n    send_batch_size: 8192\n    timeout: 200ms\n\n\
                     service:\n  pipelines:\n    {}:\n      processors: [{}]",
                    name,
                    processors_with("batch", &pipeline.processors)
                ))
            })
            .collect();

        Ok(findings)
    }

    fn name(&self) -> &str {
        "missing_batch"
    }
}

/// Flags pipelines without a `memory_limiter` processor
pub struct MissingMemoryLimiterRule;

impl Rule for MissingMemoryLimiterRule {
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
        let Some(config) = &input.config else {
            return Ok(Vec::new());
        };

        let findings = config
            .service
            .pipelines
            .iter()
            .filter(|(_, pipeline)| !pipeline.has_processor("memory_limiter"))
            .map(|(name, pipeline)| {
                DiagnosticFinding::new(
                    Severity::Critical,
                    Category::Performance,
                    format!("Pipeline {:?} is missing the memory_limiter processor", name),
                )
                .with_detail(
                    "Without memory_limiter the collector can consume unbounded memory and be \
                     OOM-killed. It should be the first processor in every pipeline.",
                )
                .with_suggestion("Add memory_limiter as the first processor in this pipeline")
                .with_remediation(format!(
                    "processors:\n  memory_limiter:\n    check_interval: 1s\n    \
                     limit_mib: 512\n    spike_limit_mib: 128\n\nservice:\n  pipelines:\n    \
                     {}:\n      processors: [{}]",
                    name,
                    processors_with("memory_limiter", &pipeline.processors)
                ))
            })
            .collect();

        Ok(findings)
    }

    fn name(&self) -> &str {
        "missing_memory_limiter"
    }
}

/// Flags tail sampling on per-node agents
pub struct TailSamplingDaemonSetRule;

impl Rule for TailSamplingDaemonSetRule {
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
        let Some(config) = &input.config else {
            return Ok(Vec::new());
        };
        if input.mode != DeploymentMode::DaemonSet {
            return Ok(Vec::new());
        }

        let findings = config
            .service
            .pipelines
            .iter()
            .filter(|(_, pipeline)| pipeline.has_processor("tail_sampling"))
            .map(|(name, _)| {
                DiagnosticFinding::new(
                    Severity::Critical,
                    Category::Config,
                    format!(
                        "Tail sampling configured on a DaemonSet collector in pipeline {:?}",
                        name
                    ),
                )
                .with_detail(
                    "Tail sampling needs every span of a trace to reach the same collector \
                     instance. Per-node agents only see the spans produced on their node, so \
                     sampling decisions are made on incomplete traces.",
                )
                .with_suggestion(
                    "Move tail sampling to a gateway collector \
                     running as a Deployment or StatefulSet",
                )
                .with_remediation(
                    "# Agents (DaemonSet) forward to a gateway (Deployment/StatefulSet)\n\
                     # that runs tail_sampling. Remove tail_sampling from this pipeline.",
                )
            })
            .collect();

        Ok(findings)
    }

    fn name(&self) -> &str {
        "tail_sampling_daemonset"
    }
}

/// Flags `cumulativetodelta` on workloads that lose state on restart
pub struct CumulativeDeltaRule;

impl Rule for CumulativeDeltaRule {
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
        let Some(config) = &input.config else {
            return Ok(Vec::new());
        };
        if !input.mode.is_stateless() {
            return Ok(Vec::new());
        }

        let findings = config
            .service
            .pipelines
            .iter()
            .filter(|(_, pipeline)| pipeline.has_processor("cumulativetodelta"))
            .map(|(name, _)| {
                DiagnosticFinding::new(
                    Severity::Warning,
                    Category::Config,
                    format!(
                        "cumulativetodelta processor in pipeline {:?} \
                         on non-stateful deployment ({})",
                        name, input.mode
                    ),
                )
                .with_detail(
                    "The cumulativetodelta processor tracks the starting point of every series \
                     in memory. A pod restart drops that state, producing counter resets and \
                     wrong delta values.",
                )
                .with_suggestion(
                    "Run the collector as a StatefulSet, or accept counter resets on restart",
                )
                .with_remediation(
                    "# Option 1: run this pipeline in a StatefulSet\n\
                     # Option 2: let the backend handle counter resets",
                )
            })
            .collect();

        Ok(findings)
    }

    fn name(&self) -> &str {
        "cumulative_delta"
    }
}

/// Flags pipelines with more than one resource detection processor
pub struct ResourceDetectorConflictRule;

impl ResourceDetectorConflictRule {
    fn is_detector(id: &str) -> bool {
        component_type(id) == "resourcedetection" || id == "resource"
    }
}

impl Rule for ResourceDetectorConflictRule {
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
        let Some(config) = &input.config else {
            return Ok(Vec::new());
        };

        let mut findings = Vec::new();
        for (name, pipeline) in &config.service.pipelines {
            let detectors: Vec<&str> = pipeline
                .processors
                .iter()
                .map(String::as_str)
                .filter(|id| Self::is_detector(id))
                .collect();

            if detectors.len() > 1 {
                findings.push(
                    DiagnosticFinding::new(
                        Severity::Warning,
                        Category::Config,
                        format!(
                            "Pipeline {:?} has multiple resource detection processors: [{}]",
                            name,
                            detectors.join(", ")
                        ),
                    )
                    .with_detail(
                        "Resource detection processors in the same pipeline overwrite each \
                         other's attributes. The later processor wins.",
                    )
                    .with_suggestion(
                        "Merge them into a single resourcedetection processor with several \
                         detectors, or make sure the override order is intentional",
                    )
                    .with_remediation(
                        "processors:\n  resourcedetection:\n    detectors: [env, system]\n    \
                         timeout: 5s\n    override: false",
                    ),
                );
            }
        }

        Ok(findings)
    }

    fn name(&self) -> &str {
        "resource_detector_conflict"
    }
}

/// Flags metrics pipelines with no cardinality control
pub struct MetricsCardinalityRule;

impl Rule for MetricsCardinalityRule {
    fn evaluate(&self, input: &AnalysisInput) -> Result<Vec<DiagnosticFinding>, RuleError> {
        let Some(config) = &input.config else {
            return Ok(Vec::new());
        };

        let findings = config
            .service
            .pipelines
            .iter()
            .filter(|(name, pipeline)| {
                name.starts_with("metrics")
                    && !pipeline.receivers.is_empty()
                    && !CARDINALITY_CONTROLS
                        .iter()
                        .any(|base| pipeline.has_processor(base))
            })
            .map(|(name, pipeline)| {
                DiagnosticFinding::new(
                    Severity::Info,
                    Category::Performance,
                    format!("Metrics pipeline {:?} has no cardinality control processor", name),
                )
                .with_detail(
                    "Without a filter, attributes or metricstransform processor every metric \
                     label passes through unchanged. Labels such as URLs or user ids can \
                     explode series counts in the backend.",
                )
                .with_suggestion(
                    "Consider adding a filter or attributes processor \
                     to control metric cardinality",
                )
                .with_remediation(format!(
                    "processors:\n  attributes/drop-high-card:\n    actions:\n      \
                     - key: http.url\n        \
                     action: delete\n      - key: url.full\n        action: delete\n\n\
                     service:\n  pipelines:\n    {}:\n      processors: [{}]",
                    name,
                    processors_with("attributes/drop-high-card", &pipeline.processors)
                ))
            })
            .collect();

        Ok(findings)
    }

    fn name(&self) -> &str {
        "metrics_cardinality"
    }
}
