//! Sensor cluster entities store
//!
//! The store attributes low-level network identifiers to the deployments that own them. It is fed
//! by a topology watcher, which builds an [`EntityData`] batch per deployment and applies batches
//! either incrementally or as a full replacement of each deployment's state. The flow pipeline
//! queries it concurrently:
//!
//! - By endpoint: an `ip:port` pair resolves to every deployment that exposes it, along with the
//!   container ports it maps onto. When no deployment declares the exact endpoint, the address
//!   alone is used so that traffic is still attributed, at reduced fidelity.
//! - By container ID: resolves to the container's metadata.
//!
//! ```text
//! [ IpAddr ]      -> { DeploymentId }              <-+
//! [ Endpoint ]    -> { DeploymentId -> {Target} }  <-+- [ DeploymentId ] -> { ips, endpoints, containers }
//! [ ContainerId ] -> ContainerMetadata             <-+
//! ```
//!
//! The forward indices answer lookups; the reverse index makes purging a deployment proportional
//! to that deployment's size rather than to the whole index.
//!
//! Consumers that see a container before the watcher does may ask to be told once it is known.
//! Resolutions are handed off to a bounded queue drained by a small pool of delivery workers (see
//! [`Delivery`]) so that a slow consumer never holds up the index lock.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod data;
mod delivery;
pub mod metrics;
mod store;


pub use self::{
    data::EntityData,
    delivery::Delivery,
    metrics::EntitiesMetrics,
    store::{ApplyMode, CallbackTx, IndexSizes, SharedStore, Store},
};
pub use sensor_core::{
    ContainerId, ContainerMetadata, DeploymentId, Endpoint, Entity, IpAddr, LookupResult,
    Protocol, TargetInfo,
};
use std::time::Duration;

/// Tunes container metadata callback delivery.
#[derive(Clone, Debug)]
pub struct Config {
    /// The number of pending delivery jobs that may be buffered before resolutions are dropped.
    pub callback_queue_capacity: usize,

    /// The number of workers that forward resolutions to the registered channel.
    pub callback_workers: usize,

    /// How long a worker waits on a full callback channel before dropping a resolution.
    pub callback_send_timeout: Duration,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            callback_queue_capacity: 1024,
            callback_workers: 2,
            callback_send_timeout: Duration::from_secs(5),
        }
    }
}
