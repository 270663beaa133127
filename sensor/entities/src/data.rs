use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use sensor_core::{ContainerId, ContainerMetadata, Endpoint, IpAddr, TargetInfo};

/// The updates to apply to the store for a single deployment.
///
/// A batch is built by a single producer and moved into [`Store::apply`](crate::Store::apply).
#[derive(Clone, Debug, Default)]
pub struct EntityData {
    pub(crate) ips: HashSet<IpAddr>,

    /// Duplicate targets are tolerated here and collapse when merged into the index.
    pub(crate) endpoints: HashMap<Endpoint, Vec<TargetInfo>>,

    pub(crate) containers: HashMap<ContainerId, ContainerMetadata>,
}

// === impl EntityData ===

impl EntityData {
    pub fn add_ip(&mut self, ip: impl Into<IpAddr>) {
        self.ips.insert(ip.into());
    }

    pub fn add_endpoint(&mut self, endpoint: Endpoint, target: TargetInfo) {
        self.endpoints.entry(endpoint).or_default().push(target);
    }

    /// Adds a container to the deployment. If the same ID is added more than once, the last
    /// metadata wins.
    pub fn add_container_id(&mut self, id: impl Into<ContainerId>, metadata: ContainerMetadata) {
        self.containers.insert(id.into(), metadata);
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.endpoints.is_empty() && self.containers.is_empty()
    }
}
