use crate::{store::ApplyMode, SharedStore};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeLabelSet, EncodeMetric},
    metrics::{counter::Counter, family::Family, gauge::ConstGauge, MetricType},
    registry::Registry,
};

/// Counts store updates and the fate of container metadata callbacks.
///
/// The default value is not registered anywhere, which is convenient in tests.
#[derive(Clone, Debug, Default)]
pub struct EntitiesMetrics {
    applies: Family<ApplyLabels, Counter>,
    purges: Counter,
    callbacks: Family<CallbackLabels, Counter>,
}

/// What became of a resolved container's metadata.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Delivered,
    /// No callback channel was registered when the container was resolved.
    Unregistered,
    /// The delivery queue was full.
    QueueFull,
    /// The registered channel stayed full for longer than the send timeout.
    Timeout,
    /// The registered channel's receiver (or the delivery task) is gone.
    Closed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ApplyLabels {
    mode: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CallbackLabels {
    outcome: &'static str,
}

#[derive(Debug)]
struct Instrumented(SharedStore);

/// Exports the sizes of `store`'s indices as gauges.
pub fn register_sizes(reg: &mut Registry, store: SharedStore) {
    reg.register_collector(Box::new(Instrumented(store)));
}

// === impl EntitiesMetrics ===

impl EntitiesMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let applies = Family::default();
        reg.register(
            "applies",
            "Count of updates applied to the entities store",
            applies.clone(),
        );

        let purges = Counter::default();
        reg.register(
            "purges",
            "Count of deployments purged from the entities store",
            purges.clone(),
        );

        let callbacks = Family::default();
        reg.register(
            "container_metadata_callbacks",
            "Count of resolved container metadata records by delivery outcome",
            callbacks.clone(),
        );

        Self {
            applies,
            purges,
            callbacks,
        }
    }

    pub(crate) fn applied(&self, mode: ApplyMode) {
        let mode = match mode {
            ApplyMode::Incremental => "incremental",
            ApplyMode::Replace => "replace",
        };
        self.applies.get_or_create(&ApplyLabels { mode }).inc();
    }

    pub(crate) fn purged(&self) {
        self.purges.inc();
    }

    pub(crate) fn callbacks(&self, outcome: Outcome, n: usize) {
        self.callbacks
            .get_or_create(&CallbackLabels {
                outcome: outcome.as_str(),
            })
            .inc_by(n as u64);
    }

    #[cfg(test)]
    pub(crate) fn callback_count(&self, outcome: Outcome) -> u64 {
        self.callbacks
            .get_or_create(&CallbackLabels {
                outcome: outcome.as_str(),
            })
            .get()
    }
}

// === impl Outcome ===

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Unregistered => "unregistered",
            Self::QueueFull => "queue_full",
            Self::Timeout => "timeout",
            Self::Closed => "closed",
        }
    }
}

// === impl Instrumented ===

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let sizes = self.0.sizes();

        for (name, help, size) in [
            (
                "ip_index_size",
                "The number of IP addresses in the index",
                sizes.ips,
            ),
            (
                "endpoint_index_size",
                "The number of endpoints in the index",
                sizes.endpoints,
            ),
            (
                "container_index_size",
                "The number of container IDs in the index",
                sizes.containers,
            ),
            (
                "deployment_index_size",
                "The number of deployments that own at least one entry",
                sizes.deployments,
            ),
            (
                "pending_callbacks",
                "The number of container IDs awaiting resolution",
                sizes.pending_callbacks,
            ),
        ] {
            let gauge = ConstGauge::new(size as i64);
            let metric_encoder = encoder.encode_descriptor(name, help, None, MetricType::Gauge)?;
            gauge.encode(metric_encoder)?;
        }
        Ok(())
    }
}
