use crate::DeploymentId;

/// A network entity that traffic may be attributed to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    Deployment(DeploymentId),
}

/// A deployment that may own an endpoint, along with the container ports the
/// endpoint maps onto.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupResult {
    pub entity: Entity,
    pub container_ports: Vec<u16>,

    /// Names of the matched container ports. Empty when only the address
    /// matched, since there is then no port mapping to report.
    pub port_names: Vec<String>,
}

// === impl Entity ===

impl Entity {
    pub fn deployment(id: impl Into<DeploymentId>) -> Self {
        Self::Deployment(id.into())
    }

    pub fn deployment_id(&self) -> &DeploymentId {
        match self {
            Self::Deployment(id) => id,
        }
    }
}
