use crate::cancel::CancellationToken;
use crate::cluster::{
    CustomResourceType, WorkloadKind, WorkloadLookup, OPERATOR_COLLECTOR_CURRENT,
    OPERATOR_COLLECTOR_LEGACY,
};
use crate::deployment::DeploymentMode;
use crate::error::{CollaboratorError, ResolveError};
use log::{debug, warn};

/// Lookup order for standard workload kinds
pub(crate) const WORKLOAD_CHAIN: [(WorkloadKind, DeploymentMode); 3] = [
    (WorkloadKind::DaemonSet, DeploymentMode::DaemonSet),
    (WorkloadKind::Deployment, DeploymentMode::Deployment),
    (WorkloadKind::StatefulSet, DeploymentMode::StatefulSet),
];

/// Operator resource versions, newest first
pub(crate) const OPERATOR_CHAIN: [CustomResourceType; 2] =
    [OPERATOR_COLLECTOR_CURRENT, OPERATOR_COLLECTOR_LEGACY];

/// Determines how a named collector workload is deployed
///
/// Standard workload kinds are tried first; the operator custom resource is
/// only tried when the cluster serves it. The first hit wins.
pub struct DeploymentResolver<'a> {
    lookup: &'a dyn WorkloadLookup,
}

impl<'a> DeploymentResolver<'a> {
    pub fn new(lookup: &'a dyn WorkloadLookup) -> Self {
        Self { lookup }
    }

    /// Resolve the deployment mode of `namespace/name`
    ///
    /// A failed lookup (RBAC denial, timeout, ...) counts as a miss and the
    /// chain moves on. Cancellation aborts the chain.
    ///
    /// # Returns
    ///
    /// The first matching mode, or `ResolveError::NotFound` when every lookup
    /// missed. Callers that need a mode regardless use [`DeploymentMode::Unknown`].
    pub fn resolve(
        &self,
        namespace: &str,
        name: &str,
        has_operator: bool,
        cancel: &CancellationToken,
    ) -> Result<DeploymentMode, ResolveError> {
        for (kind, mode) in WORKLOAD_CHAIN {
            let found = self.lookup.workload_exists(kind, namespace, name, cancel);
            if lookup_hit(found, kind.resource(), namespace, name)? {
                return Ok(mode);
            }
        }

        if has_operator {
            for resource_type in OPERATOR_CHAIN {
                let found = self
                    .lookup
                    .custom_resource_exists(resource_type, namespace, name, cancel);
                let label = resource_type.qualified_name();
                if lookup_hit(found, &label, namespace, name)? {
                    return Ok(DeploymentMode::OperatorManaged);
                }
            }
        }

        Err(ResolveError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// Resolve, degrading any failure to `Unknown`
    pub fn resolve_or_unknown(
        &self,
        namespace: &str,
        name: &str,
        has_operator: bool,
        cancel: &CancellationToken,
    ) -> DeploymentMode {
        match self.resolve(namespace, name, has_operator, cancel) {
            Ok(mode) => mode,
            Err(e) => {
                warn!("Could not detect deployment mode, using Unknown: {}", e);
                DeploymentMode::Unknown
            }
        }
    }
}

fn lookup_hit(
    result: Result<bool, CollaboratorError>,
    resource: &str,
    namespace: &str,
    name: &str,
) -> Result<bool, ResolveError> {
    match result {
        Ok(true) => Ok(true),
        Ok(false) => {
            debug!("No {} named {}/{}", resource, namespace, name);
            Ok(false)
        }
        Err(CollaboratorError::Cancelled) => Err(ResolveError::Cancelled),
        Err(e) => {
            debug!(
                "Lookup of {} {}/{} failed, treating as a miss: {}",
                resource, namespace, name, e
            );
            Ok(false)
        }
    }
}
