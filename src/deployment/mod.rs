/// Deployment mode model, resolver and collector inventory
pub mod inventory;
pub mod resolver;

pub use inventory::{CollectorInstance, CollectorInventory};
pub use resolver::DeploymentResolver;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Workload topology a collector instance runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeploymentMode {
    /// One agent per node
    DaemonSet,
    /// Stateless replicated gateway
    Deployment,
    /// Replicated gateway with stable identity and storage
    StatefulSet,
    /// Managed through the operator's collector custom resource
    #[serde(rename = "OperatorCRD")]
    OperatorManaged,
    #[default]
    Unknown,
}

impl DeploymentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentMode::DaemonSet => "DaemonSet",
            DeploymentMode::Deployment => "Deployment",
            DeploymentMode::StatefulSet => "StatefulSet",
            DeploymentMode::OperatorManaged => "OperatorCRD",
            DeploymentMode::Unknown => "Unknown",
        }
    }

    /// Whether pod restarts lose in-memory processor state
    pub fn is_stateless(self) -> bool {
        matches!(self, DeploymentMode::DaemonSet | DeploymentMode::Deployment)
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_managed_uses_legacy_tag() {
        assert_eq!(
            serde_json::to_string(&DeploymentMode::OperatorManaged).unwrap(),
            "\"OperatorCRD\""
        );
        assert_eq!(DeploymentMode::OperatorManaged.to_string(), "OperatorCRD");

        let parsed: DeploymentMode = serde_json::from_str("\"DaemonSet\"").unwrap();
        assert_eq!(parsed, DeploymentMode::DaemonSet);
    }

    #[test]
    fn test_stateless_modes() {
        assert!(DeploymentMode::DaemonSet.is_stateless());
        assert!(DeploymentMode::Deployment.is_stateless());
        assert!(!DeploymentMode::StatefulSet.is_stateless());
        assert!(!DeploymentMode::OperatorManaged.is_stateless());
        assert!(!DeploymentMode::Unknown.is_stateless());
    }

    #[test]
    fn test_default_is_unknown() {
        assert_eq!(DeploymentMode::default(), DeploymentMode::Unknown);
    }
}
