//! The store owns every index behind a single lock. Writers (the topology watcher, callback
//! registration) take it exclusively; lookups from the flow pipeline share it. Nothing outside this
//! module sees the maps, so the forward and reverse indices can only change together.

use crate::{
    data::EntityData,
    delivery::{self, Delivery},
    metrics::{EntitiesMetrics, Outcome},
    Config,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::RwLock;
use sensor_core::{
    ContainerId, ContainerMetadata, DeploymentId, Endpoint, Entity, IpAddr, LookupResult,
    TargetInfo,
};
use std::{hash::Hash, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace};

pub type SharedStore = Arc<Store>;

/// The channel on which resolved container metadata is delivered.
pub type CallbackTx = mpsc::Sender<ContainerMetadata>;

/// Determines how [`Store::apply`] treats the deployments it is given.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    /// Merges each batch into the deployment's existing state.
    Incremental,

    /// Discards each deployment's existing state before merging its batch. A deployment without a
    /// batch is removed.
    Replace,
}

#[derive(Debug)]
pub struct Store {
    index: RwLock<Index>,
    delivery: delivery::Queue,
    metrics: EntitiesMetrics,
}

/// The number of entries in each of the store's indices.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexSizes {
    pub ips: usize,
    pub endpoints: usize,
    pub containers: usize,
    pub deployments: usize,
    pub pending_callbacks: usize,
}

#[derive(Debug, Default)]
struct Index {
    by_ip: HashMap<IpAddr, HashSet<DeploymentId>>,
    by_endpoint: HashMap<Endpoint, HashMap<DeploymentId, HashSet<TargetInfo>>>,
    by_container: HashMap<ContainerId, ContainerEntry>,

    /// Reverse index. A deployment is present only while it owns at least one entry.
    deployments: HashMap<DeploymentId, Owned>,

    /// Container IDs that a consumer has asked to be told about.
    pending_callbacks: HashSet<ContainerId>,
    callback_tx: Option<CallbackTx>,
}

#[derive(Debug)]
struct ContainerEntry {
    /// The deployment whose batch introduced the container. This is the reverse-index key, which
    /// need not match `metadata.deployment_id`.
    owner: DeploymentId,
    metadata: ContainerMetadata,
}

/// Everything a single deployment owns.
#[derive(Debug, Default)]
struct Owned {
    ips: HashSet<IpAddr>,
    endpoints: HashSet<Endpoint>,
    containers: HashSet<ContainerId>,
}

/// A forward-index value that records which deployments own a key.
trait Owners {
    /// Removes `deployment`, returning true if no owners remain.
    fn remove_owner(&mut self, deployment: &DeploymentId) -> bool;
}

// === impl Store ===

impl Store {
    /// Builds a store along with the delivery task that forwards its container metadata
    /// resolutions. The caller must spawn [`Delivery::run`] for callbacks to be delivered.
    pub fn shared(config: &Config, metrics: EntitiesMetrics) -> (SharedStore, Delivery) {
        let (queue, delivery) = delivery::channel(config, metrics.clone());
        let store = Self {
            index: RwLock::new(Index::default()),
            delivery: queue,
            metrics,
        };
        (Arc::new(store), delivery)
    }

    /// Applies a set of per-deployment updates.
    ///
    /// In [`ApplyMode::Replace`], every deployment named in `updates` is purged before any batch
    /// is merged, so the outcome does not depend on the order of the updates. Batches are then
    /// merged in the order given: when the same container ID appears under more than one
    /// deployment, the last one wins.
    ///
    /// A `None` batch removes the deployment in `Replace` mode and is ignored otherwise.
    #[instrument(level = "debug", skip_all, fields(mode = ?mode))]
    pub fn apply(
        &self,
        updates: impl IntoIterator<Item = (DeploymentId, Option<EntityData>)>,
        mode: ApplyMode,
    ) {
        let updates = updates.into_iter().collect::<Vec<_>>();
        self.metrics.applied(mode);

        let (tx, resolved) = {
            let mut index = self.index.write();

            if mode == ApplyMode::Replace {
                for (deployment, _) in &updates {
                    if index.purge(deployment) {
                        self.metrics.purged();
                    }
                }
            }

            let mut merged = Vec::new();
            for (deployment, data) in updates {
                match data {
                    Some(data) => index.merge(deployment, data, &mut merged),
                    None => trace!(%deployment, "No data"),
                }
            }

            // Pending containers resolve to the metadata indexed after every batch is merged.
            let resolved = index.resolve_pending(merged);
            if resolved.is_empty() {
                return;
            }
            (index.callback_tx.clone(), resolved)
        };

        match tx {
            Some(tx) => self.delivery.enqueue(tx, resolved),
            None => {
                debug!(
                    containers = resolved.len(),
                    "No callback channel registered; dropping container metadata"
                );
                self.metrics.callbacks(Outcome::Unregistered, resolved.len());
            }
        }
    }

    /// Returns the deployments that may own `endpoint`.
    ///
    /// Deployments that declare the endpoint are returned with the container ports (and port names)
    /// it targets. If no deployment declares it, every deployment that owns the endpoint's address
    /// is returned with the endpoint's own port and no port names.
    ///
    /// Results are ordered by deployment; ports and names are sorted and unique.
    pub fn lookup_by_endpoint(&self, endpoint: &Endpoint) -> Vec<LookupResult> {
        let index = self.index.read();

        let mut results = index
            .by_endpoint
            .get(endpoint)
            .into_iter()
            .flat_map(|by_deployment| by_deployment.iter())
            .map(|(deployment, targets)| {
                let mut container_ports = targets
                    .iter()
                    .map(|t| t.container_port)
                    .collect::<Vec<_>>();
                container_ports.sort_unstable();
                container_ports.dedup();

                let mut port_names = targets
                    .iter()
                    .filter_map(|t| t.port_name.as_ref())
                    .filter(|n| !n.is_empty())
                    .cloned()
                    .collect::<Vec<_>>();
                port_names.sort_unstable();
                port_names.dedup();

                LookupResult {
                    entity: Entity::Deployment(deployment.clone()),
                    container_ports,
                    port_names,
                }
            })
            .collect::<Vec<_>>();

        if results.is_empty() {
            results = index
                .by_ip
                .get(&endpoint.ip)
                .into_iter()
                .flat_map(|deployments| deployments.iter())
                .map(|deployment| LookupResult {
                    entity: Entity::Deployment(deployment.clone()),
                    container_ports: vec![endpoint.port],
                    port_names: vec![],
                })
                .collect();
        }
        drop(index);

        results.sort_unstable_by(|a, b| {
            a.entity
                .deployment_id()
                .cmp(b.entity.deployment_id())
        });
        results
    }

    pub fn lookup_by_container_id(&self, id: &str) -> Option<ContainerMetadata> {
        self.index
            .read()
            .by_container
            .get(id)
            .map(|c| c.metadata.clone())
    }

    /// Sets (or, given `None`, clears) the channel on which resolved container metadata is
    /// delivered, returning the previously registered channel. The store never closes a channel.
    pub fn register_container_metadata_callback_channel(
        &self,
        tx: Option<CallbackTx>,
    ) -> Option<CallbackTx> {
        debug!(registered = tx.is_some(), "Setting callback channel");
        std::mem::replace(&mut self.index.write().callback_tx, tx)
    }

    /// Asks for `id`'s metadata to be delivered once an update introduces it.
    ///
    /// The request is satisfied at most once, by the next [`Store::apply`] that merges the
    /// container, even if the container is already known. If no channel is registered at that
    /// point, the metadata is dropped and the request is still cleared.
    ///
    /// Requests are never expired: an ID that no update introduces stays pending for the life of
    /// the store, so the pending set is unbounded. Its size is exported as the `pending_callbacks`
    /// gauge.
    pub fn add_callback_for_container_metadata(&self, id: impl Into<ContainerId>) {
        let id = id.into();
        trace!(container = %id, "Awaiting container");
        self.index.write().pending_callbacks.insert(id);
    }

    pub fn sizes(&self) -> IndexSizes {
        let index = self.index.read();
        IndexSizes {
            ips: index.by_ip.len(),
            endpoints: index.by_endpoint.len(),
            containers: index.by_container.len(),
            deployments: index.deployments.len(),
            pending_callbacks: index.pending_callbacks.len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn check_consistency(&self) {
        self.index.read().check_consistency()
    }
}

// === impl Index ===

impl Index {
    /// Removes every association owned by `deployment`, returning whether it had any.
    fn purge(&mut self, deployment: &DeploymentId) -> bool {
        let Some(owned) = self.deployments.remove(deployment) else {
            return false;
        };
        debug!(
            %deployment,
            ips = owned.ips.len(),
            endpoints = owned.endpoints.len(),
            containers = owned.containers.len(),
            "Purging"
        );

        for ip in &owned.ips {
            unlink(&mut self.by_ip, ip, deployment);
        }
        for endpoint in &owned.endpoints {
            unlink(&mut self.by_endpoint, endpoint, deployment);
        }
        for id in &owned.containers {
            let removed = self.by_container.remove(id);
            debug_assert!(
                removed.map_or(false, |c| c.owner == *deployment),
                "container must be owned by the purged deployment"
            );
        }
        true
    }

    /// Merges a batch into the deployment's associations, collecting the IDs of the containers it
    /// introduces.
    fn merge(&mut self, deployment: DeploymentId, data: EntityData, merged: &mut Vec<ContainerId>) {
        if data.is_empty() {
            trace!(%deployment, "Empty batch");
            return;
        }
        let EntityData {
            ips,
            endpoints,
            containers,
        } = data;
        debug!(
            %deployment,
            ips = ips.len(),
            endpoints = endpoints.len(),
            containers = containers.len(),
            "Merging"
        );

        let Self {
            by_ip,
            by_endpoint,
            by_container,
            deployments,
            ..
        } = &mut *self;
        let owned = deployments.entry(deployment.clone()).or_default();

        for ip in ips {
            owned.ips.insert(ip);
            by_ip.entry(ip).or_default().insert(deployment.clone());
        }

        for (endpoint, targets) in endpoints {
            owned.endpoints.insert(endpoint);
            by_endpoint
                .entry(endpoint)
                .or_default()
                .entry(deployment.clone())
                .or_default()
                .extend(targets);
        }

        // Containers that were owned by another deployment are detached from it once we're done
        // with this deployment's reverse entry.
        let mut moved = Vec::new();
        for (id, metadata) in containers {
            owned.containers.insert(id.clone());
            merged.push(id.clone());
            let entry = ContainerEntry {
                owner: deployment.clone(),
                metadata,
            };
            if let Some(prior) = by_container.insert(id.clone(), entry) {
                if prior.owner != deployment {
                    debug!(container = %id, from = %prior.owner, to = %deployment, "Container moved");
                    moved.push((prior.owner, id));
                }
            }
        }

        for (prior, id) in moved {
            self.disown_container(&prior, &id);
        }
    }

    /// Clears the pending marker of each merged container a consumer is waiting on, returning the
    /// containers' current metadata. Each marker is cleared at most once.
    fn resolve_pending(&mut self, merged: Vec<ContainerId>) -> Vec<ContainerMetadata> {
        if self.pending_callbacks.is_empty() {
            return Vec::new();
        }

        let mut resolved = Vec::new();
        for id in merged {
            if !self.pending_callbacks.remove(&id) {
                continue;
            }
            if let Some(entry) = self.by_container.get(&id) {
                trace!(container = %id, deployment = %entry.owner, "Resolved");
                resolved.push(entry.metadata.clone());
            }
        }
        resolved
    }

    /// Drops `id` from `deployment`'s reverse entry, removing the entry if it is left empty.
    fn disown_container(&mut self, deployment: &DeploymentId, id: &ContainerId) {
        if let Some(owned) = self.deployments.get_mut(deployment) {
            owned.containers.remove(id);
            if owned.is_empty() {
                self.deployments.remove(deployment);
            }
        }
    }

    #[cfg(test)]
    fn check_consistency(&self) {
        for (deployment, owned) in &self.deployments {
            assert!(!owned.is_empty(), "{deployment} must own entries");
            for ip in &owned.ips {
                assert!(
                    self.by_ip.get(ip).map_or(false, |d| d.contains(deployment)),
                    "{ip} must map to {deployment}"
                );
            }
            for ep in &owned.endpoints {
                assert!(
                    self.by_endpoint
                        .get(ep)
                        .map_or(false, |d| d.contains_key(deployment)),
                    "{ep} must map to {deployment}"
                );
            }
            for id in &owned.containers {
                assert!(
                    self.by_container
                        .get(id)
                        .map_or(false, |c| c.owner == *deployment),
                    "{id} must map to {deployment}"
                );
            }
        }

        for (ip, deployments) in &self.by_ip {
            assert!(!deployments.is_empty(), "{ip} must have owners");
            for d in deployments {
                assert!(
                    self.deployments.get(d).map_or(false, |o| o.ips.contains(ip)),
                    "{d} must own {ip}"
                );
            }
        }
        for (ep, deployments) in &self.by_endpoint {
            assert!(!deployments.is_empty(), "{ep} must have owners");
            for d in deployments.keys() {
                assert!(
                    self.deployments
                        .get(d)
                        .map_or(false, |o| o.endpoints.contains(ep)),
                    "{d} must own {ep}"
                );
            }
        }
        for (id, c) in &self.by_container {
            assert!(
                self.deployments
                    .get(&c.owner)
                    .map_or(false, |o| o.containers.contains(id)),
                "{} must own {id}",
                c.owner
            );
        }
    }
}

/// Removes `deployment` from the owners of `key`, deleting the key once it has no owners left.
///
/// Every path that removes an owner from a forward index goes through here so that empty entries
/// never linger.
fn unlink<K, O>(index: &mut HashMap<K, O>, key: &K, deployment: &DeploymentId)
where
    K: Hash + Eq,
    O: Owners,
{
    let Some(owners) = index.get_mut(key) else {
        return;
    };
    if owners.remove_owner(deployment) {
        index.remove(key);
    }
}

// === impl Owned ===

impl Owned {
    fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.endpoints.is_empty() && self.containers.is_empty()
    }
}

// === impl Owners ===

impl Owners for HashSet<DeploymentId> {
    fn remove_owner(&mut self, deployment: &DeploymentId) -> bool {
        self.remove(deployment);
        self.is_empty()
    }
}

impl Owners for HashMap<DeploymentId, HashSet<TargetInfo>> {
    fn remove_owner(&mut self, deployment: &DeploymentId) -> bool {
        self.remove(deployment);
        self.is_empty()
    }
}
