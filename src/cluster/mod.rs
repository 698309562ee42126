//! Cluster collaborators
//!
//! The diagnostic engine only reads from the cluster, through the narrow traits
//! defined here. [`kubectl::KubectlClient`] implements all of them by shelling
//! out to `kubectl`; tests substitute mocks.

pub mod kubectl;

pub use kubectl::KubectlClient;

use crate::cancel::CancellationToken;
use crate::error::CollaboratorError;
use std::collections::BTreeMap;

/// Config map keys tried, in order, before falling back to the first key
pub const CONFIG_KEY_PREFERENCE: [&str; 4] =
    ["relay", "config.yaml", "collector.yaml", "otel-collector-config"];

/// Default number of log lines fetched per pod
pub const DEFAULT_TAIL_LINES: usize = 1000;

/// Standard workload kinds a collector can run as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    DaemonSet,
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    /// Resource name understood by the API server
    pub fn resource(self) -> &'static str {
        match self {
            WorkloadKind::DaemonSet => "daemonsets",
            WorkloadKind::Deployment => "deployments",
            WorkloadKind::StatefulSet => "statefulsets",
        }
    }
}

/// Group/version/resource triple identifying a custom resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomResourceType {
    pub group: &'static str,
    pub version: &'static str,
    pub resource: &'static str,
}

impl CustomResourceType {
    /// `resource.version.group`, the fully qualified form `kubectl get` accepts
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.resource, self.version, self.group)
    }
}

/// Operator-managed collector resource, current API version
pub const OPERATOR_COLLECTOR_CURRENT: CustomResourceType = CustomResourceType {
    group: "opentelemetry.io",
    version: "v1beta1",
    resource: "opentelemetrycollectors",
};

/// Operator-managed collector resource, legacy API version
pub const OPERATOR_COLLECTOR_LEGACY: CustomResourceType = CustomResourceType {
    group: "opentelemetry.io",
    version: "v1alpha1",
    resource: "opentelemetrycollectors",
};

/// One listed workload or custom resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadSummary {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    /// Container images of the pod template, in declaration order
    pub images: Vec<String>,
    /// Ready pods according to the workload status
    pub ready_pods: u32,
}

/// Lookups and listings of workloads
///
/// For the list methods an empty `namespace` means every namespace.
#[cfg_attr(test, mockall::automock)]
pub trait WorkloadLookup: Send + Sync {
    /// `Ok(false)` when the workload does not exist
    fn workload_exists(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, CollaboratorError>;

    /// `Ok(false)` when the custom resource does not exist
    fn custom_resource_exists(
        &self,
        resource_type: CustomResourceType,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, CollaboratorError>;

    fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkloadSummary>, CollaboratorError>;

    fn list_custom_resources(
        &self,
        resource_type: CustomResourceType,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkloadSummary>, CollaboratorError>;
}

/// Lists every API resource kind the cluster serves
#[cfg_attr(test, mockall::automock)]
pub trait CapabilityLister: Send + Sync {
    fn list_kinds(&self, cancel: &CancellationToken) -> Result<Vec<String>, CollaboratorError>;
}

/// Reads config map contents
#[cfg_attr(test, mockall::automock)]
pub trait ConfigSource: Send + Sync {
    fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>, CollaboratorError>;
}

/// Reads pod logs and finds pods by label
#[cfg_attr(test, mockall::automock)]
pub trait LogSource: Send + Sync {
    /// The most recent `lines` lines of the pod's log
    fn tail_logs(
        &self,
        namespace: &str,
        pod: &str,
        lines: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, CollaboratorError>;

    /// Names of the pods matching `selector`
    fn find_pods(
        &self,
        namespace: &str,
        selector: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, CollaboratorError>;
}

/// Pick the key holding the collector configuration
///
/// Well-known keys win in [`CONFIG_KEY_PREFERENCE`] order; otherwise the first
/// key in sorted order is used.
pub fn select_config_key(data: &BTreeMap<String, String>) -> Option<(&str, &str)> {
    CONFIG_KEY_PREFERENCE
        .iter()
        .find_map(|key| data.get_key_value(*key))
        .or_else(|| data.iter().next())
        .map(|(key, value)| (key.as_str(), value.as_str()))
}

/// Fetch the raw collector configuration stored in a config map
///
/// # Returns
///
/// The key the configuration was read from and its contents
pub fn fetch_collector_config(
    source: &dyn ConfigSource,
    namespace: &str,
    config_map: &str,
    cancel: &CancellationToken,
) -> Result<(String, Vec<u8>), CollaboratorError> {
    let data = source.config_map_data(namespace, config_map, cancel)?;

    match select_config_key(&data) {
        Some((key, value)) => Ok((key.to_string(), value.as_bytes().to_vec())),
        None => Err(CollaboratorError::NotFound(format!(
            "no configuration data found in configmap {}/{}",
            namespace, config_map
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_select_config_key_prefers_well_known_keys() {
        let map = data(&[
            ("aaa.yaml", "first"),
            ("collector.yaml", "collector"),
            ("config.yaml", "config"),
        ]);
        assert_eq!(select_config_key(&map), Some(("config.yaml", "config")));

        let map = data(&[("config.yaml", "config"), ("relay", "relay")]);
        assert_eq!(select_config_key(&map), Some(("relay", "relay")));
    }

    #[test]
    fn test_select_config_key_falls_back_to_first_key() {
        let map = data(&[("zeta", "z"), ("custom.yaml", "c")]);
        assert_eq!(select_config_key(&map), Some(("custom.yaml", "c")));

        assert_eq!(select_config_key(&BTreeMap::new()), None);
    }

    #[test]
    fn test_fetch_collector_config_reads_selected_key() {
        let mut source = MockConfigSource::new();
        source
            .expect_config_map_data()
            .withf(|namespace, name, _| namespace == "observability" && name == "otel-conf")
            .times(1)
            .returning(|_, _, _| Ok(data(&[("relay", "receivers: {}\n")])));

        let (key, bytes) = fetch_collector_config(
            &source,
            "observability",
            "otel-conf",
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(key, "relay");
        assert_eq!(bytes, b"receivers: {}\n");
    }

    #[test]
    fn test_fetch_collector_config_empty_map_is_not_found() {
        let mut source = MockConfigSource::new();
        source
            .expect_config_map_data()
            .returning(|_, _, _| Ok(BTreeMap::new()));

        let result = fetch_collector_config(&source, "ns", "cm", &CancellationToken::new());
        assert!(matches!(result, Err(CollaboratorError::NotFound(_))));
    }

    #[test]
    fn test_custom_resource_names() {
        assert_eq!(
            OPERATOR_COLLECTOR_CURRENT.qualified_name(),
            "opentelemetrycollectors.v1beta1.opentelemetry.io"
        );
        assert_eq!(
            OPERATOR_COLLECTOR_LEGACY.qualified_name(),
            "opentelemetrycollectors.v1alpha1.opentelemetry.io"
        );
    }
}
