use crate::cancel::CancellationToken;
use crate::cluster::{WorkloadLookup, WorkloadSummary};
use crate::deployment::resolver::{OPERATOR_CHAIN, WORKLOAD_CHAIN};
use crate::deployment::DeploymentMode;
use log::{debug, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// `(label, value)` pairs that mark a workload as a collector
const COLLECTOR_LABELS: [(&str, &str); 4] = [
    ("app.kubernetes.io/component", "opentelemetry-collector"),
    ("app.kubernetes.io/name", "opentelemetry-collector"),
    ("app", "opentelemetry-collector"),
    ("component", "otel-collector"),
];

/// A collector found in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorInstance {
    pub name: String,
    pub namespace: String,
    pub deployment_mode: DeploymentMode,
    /// Image tag of the first tagged container; empty when unknown
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    pub pod_count: u32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl CollectorInstance {
    fn from_summary(summary: WorkloadSummary, mode: DeploymentMode) -> Self {
        let version = image_version(&summary.images).unwrap_or_default().to_string();
        Self {
            name: summary.name,
            namespace: summary.namespace,
            deployment_mode: mode,
            version,
            pod_count: summary.ready_pods,
            labels: summary.labels,
        }
    }
}

/// Whether a workload's labels identify it as a collector
///
/// Operator-generated workloads are recognized by a `managed-by` label
/// together with `part-of: opentelemetry`.
pub fn is_collector(labels: &BTreeMap<String, String>) -> bool {
    let has = |key: &str, value: &str| labels.get(key).is_some_and(|v| v == value);

    COLLECTOR_LABELS.iter().any(|&(key, value)| has(key, value))
        || (labels.contains_key("app.kubernetes.io/managed-by")
            && has("app.kubernetes.io/part-of", "opentelemetry"))
}

/// Tag of the first image that carries one
///
/// Digests are ignored and a registry port (`host:5000/...`) is not a tag.
pub fn image_version(images: &[String]) -> Option<&str> {
    images.iter().find_map(|image| {
        let without_digest = image.split('@').next().unwrap_or(image.as_str());
        let last_segment = without_digest.rsplit('/').next().unwrap_or(without_digest);
        last_segment
            .split_once(':')
            .map(|(_, tag)| tag)
            .filter(|tag| !tag.is_empty())
    })
}

/// Lists every collector instance in one namespace or the whole cluster
pub struct CollectorInventory<'a> {
    lookup: &'a dyn WorkloadLookup,
}

impl<'a> CollectorInventory<'a> {
    pub fn new(lookup: &'a dyn WorkloadLookup) -> Self {
        Self { lookup }
    }

    /// Collect collectors across DaemonSets, Deployments, StatefulSets and,
    /// when the cluster serves them, operator custom resources
    ///
    /// An empty `namespace` lists all namespaces. A listing that fails is
    /// logged and skipped. Each `namespace/name` appears once; the first
    /// listing to report it decides its mode.
    pub fn list(
        &self,
        namespace: &str,
        has_operator: bool,
        cancel: &CancellationToken,
    ) -> Vec<CollectorInstance> {
        let mut seen = HashSet::new();
        let mut collectors = Vec::new();

        for (kind, mode) in WORKLOAD_CHAIN {
            match self.lookup.list_workloads(kind, namespace, cancel) {
                Ok(summaries) => {
                    let matching = summaries.into_iter().filter(|s| is_collector(&s.labels));
                    push_unseen(&mut collectors, &mut seen, matching, mode);
                }
                Err(e) => warn!("Failed to list {}: {}", kind.resource(), e),
            }
        }

        if has_operator {
            for resource_type in OPERATOR_CHAIN {
                match self.lookup.list_custom_resources(resource_type, namespace, cancel) {
                    Ok(summaries) => {
                        push_unseen(
                            &mut collectors,
                            &mut seen,
                            summaries.into_iter(),
                            DeploymentMode::OperatorManaged,
                        );
                        break;
                    }
                    Err(e) => warn!("Failed to list {}: {}", resource_type.qualified_name(), e),
                }
            }
        }

        debug!("Found {} collector instances", collectors.len());
        collectors
    }
}

fn push_unseen(
    collectors: &mut Vec<CollectorInstance>,
    seen: &mut HashSet<(String, String)>,
    summaries: impl Iterator<Item = WorkloadSummary>,
    mode: DeploymentMode,
) {
    for summary in summaries {
        if seen.insert((summary.namespace.clone(), summary.name.clone())) {
            collectors.push(CollectorInstance::from_summary(summary, mode));
        }
    }
}
