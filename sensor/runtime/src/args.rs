use crate::{
    admin,
    entities::{self, EntitiesMetrics, SharedStore, Store},
};
use anyhow::{anyhow, bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, sync::Arc};
use tokio::{sync::watch, time::Duration};
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

/// How long to wait for pending callbacks to be delivered on shutdown.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[clap(
    name = "sensor",
    about = "Attributes cluster network traffic to the deployments that own it"
)]
pub struct Args {
    #[clap(long, default_value = "sensor=info,warn", env = "SENSOR_LOG")]
    log_level: String,

    #[clap(long, value_enum, default_value = "plain")]
    log_format: LogFormat,

    #[clap(long, default_value = "0.0.0.0:9090")]
    admin_addr: SocketAddr,

    /// The number of container metadata resolutions that may be buffered for delivery.
    #[clap(long, default_value = "1024", env = "SENSOR_CALLBACK_QUEUE_CAPACITY")]
    callback_queue_capacity: usize,

    /// The number of tasks delivering container metadata resolutions.
    #[clap(long, default_value = "2", env = "SENSOR_CALLBACK_WORKERS")]
    callback_workers: usize,

    /// How long to wait on a full callback channel before dropping a resolution.
    #[clap(long, default_value = "5000", env = "SENSOR_CALLBACK_SEND_TIMEOUT_MS")]
    callback_send_timeout_ms: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// A process hosting an entities store.
///
/// Callers obtain the store via [`Runtime::store`] and hand it to the topology watcher and flow
/// pipeline before calling [`Runtime::run`].
pub struct Runtime {
    store: SharedStore,
    delivery: entities::Delivery,
    registry: Registry,
    admin_addr: SocketAddr,
}

// === impl Args ===

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().build()?.run().await
    }

    /// Initializes logging and builds the entities store.
    pub fn build(self) -> Result<Runtime> {
        let Self {
            log_level,
            log_format,
            admin_addr,
            callback_queue_capacity,
            callback_workers,
            callback_send_timeout_ms,
        } = self;

        log_format.try_init(EnvFilter::try_new(log_level)?)?;

        let config = entities::Config {
            callback_queue_capacity,
            callback_workers,
            callback_send_timeout: Duration::from_millis(callback_send_timeout_ms),
        };
        Ok(Runtime::new(&config, admin_addr))
    }
}

// === impl LogFormat ===

impl LogFormat {
    pub fn try_init(self, filter: EnvFilter) -> Result<()> {
        let logs = tracing_subscriber::fmt().with_env_filter(filter);
        match self {
            Self::Plain => logs.try_init(),
            Self::Json => logs.json().try_init(),
        }
        .map_err(|error| anyhow!(error))
    }
}

// === impl Runtime ===

impl Runtime {
    fn new(config: &entities::Config, admin_addr: SocketAddr) -> Self {
        let mut registry = <Registry>::default();
        let prom = registry.sub_registry_with_prefix("entities");
        let metrics = EntitiesMetrics::register(prom);
        let (store, delivery) = Store::shared(config, metrics);
        entities::metrics::register_sizes(prom, store.clone());
        info!(?config, "Built entities store");

        Self {
            store,
            delivery,
            registry,
            admin_addr,
        }
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// Serves the admin endpoints and delivers callbacks until the process is signaled to stop.
    pub async fn run(self) -> Result<()> {
        let Self {
            store,
            delivery,
            registry,
            admin_addr,
        } = self;

        let (ready_tx, ready_rx) = watch::channel(false);
        let mut admin = tokio::spawn(
            admin::serve(admin_addr, Arc::new(registry), ready_rx)
                .instrument(info_span!("admin")),
        );
        let delivery = tokio::spawn(delivery.run().instrument(info_span!("delivery")));
        ready_tx.send_replace(true);

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("Received shutdown signal");
            }
            res = &mut admin => {
                res??;
                bail!("admin server terminated unexpectedly");
            }
        }
        admin.abort();

        // Delivery drains once every handle to the store has been dropped.
        drop(store);
        match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, delivery).await {
            Ok(res) => res?,
            Err(_) => warn!("Callback delivery did not complete; the store is still referenced"),
        }
        Ok(())
    }
}
