use crate::{ContainerId, DeploymentId};

/// Describes a running container and the workload that owns it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContainerMetadata {
    pub deployment_id: DeploymentId,
    pub pod_id: String,
    pub container_name: String,
    pub container_id: ContainerId,
}
