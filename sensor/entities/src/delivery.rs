use crate::{
    metrics::{EntitiesMetrics, Outcome},
    CallbackTx, Config,
};
use sensor_core::ContainerMetadata;
use std::{sync::Arc, time::Duration};
use tokio::sync::{
    mpsc::{
        self,
        error::{SendTimeoutError, TrySendError},
    },
    Mutex,
};
use tracing::{debug, trace, warn};

/// Hands resolved container metadata from the store to the delivery workers.
///
/// Enqueueing never blocks: when the queue is full, the resolutions are dropped and counted.
#[derive(Debug)]
pub(crate) struct Queue {
    tx: mpsc::Sender<Job>,
    metrics: EntitiesMetrics,
}

/// Forwards resolved container metadata to the callback channel that was registered when the
/// containers were resolved.
///
/// Delivery is decoupled from the store's lock: a fixed pool of workers drains a bounded queue, and
/// each worker waits at most the configured send timeout on a full callback channel. Records are
/// delivered at most once; no ordering is guaranteed between records resolved by different
/// updates.
#[derive(Debug)]
#[must_use = "callbacks are only delivered while `Delivery::run` is polled"]
pub struct Delivery {
    rx: mpsc::Receiver<Job>,
    workers: usize,
    send_timeout: Duration,
    metrics: EntitiesMetrics,
}

#[derive(Debug)]
struct Job {
    tx: CallbackTx,
    records: Vec<ContainerMetadata>,
}

pub(crate) fn channel(config: &Config, metrics: EntitiesMetrics) -> (Queue, Delivery) {
    let (tx, rx) = mpsc::channel(config.callback_queue_capacity.max(1));
    let queue = Queue {
        tx,
        metrics: metrics.clone(),
    };
    let delivery = Delivery {
        rx,
        workers: config.callback_workers.max(1),
        send_timeout: config.callback_send_timeout,
        metrics,
    };
    (queue, delivery)
}

// === impl Queue ===

impl Queue {
    pub(crate) fn enqueue(&self, tx: CallbackTx, records: Vec<ContainerMetadata>) {
        let n = records.len();
        match self.tx.try_send(Job { tx, records }) {
            Ok(()) => trace!(records = n, "Queued container metadata"),
            Err(TrySendError::Full(_)) => {
                warn!(records = n, "Callback queue is full; dropping container metadata");
                self.metrics.callbacks(Outcome::QueueFull, n);
            }
            Err(TrySendError::Closed(_)) => {
                debug!(records = n, "Delivery stopped; dropping container metadata");
                self.metrics.callbacks(Outcome::Closed, n);
            }
        }
    }
}

// === impl Delivery ===

impl Delivery {
    /// Runs the delivery workers until the store is dropped and the queue has drained.
    pub async fn run(self) {
        let Self {
            rx,
            workers,
            send_timeout,
            metrics,
        } = self;
        debug!(workers, ?send_timeout, "Delivering container metadata callbacks");

        let rx = Arc::new(Mutex::new(rx));
        let workers =
            (0..workers).map(|worker| deliver(worker, rx.clone(), send_timeout, metrics.clone()));
        futures::future::join_all(workers).await;
        debug!("Delivery complete");
    }
}

async fn deliver(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    send_timeout: Duration,
    metrics: EntitiesMetrics,
) {
    loop {
        // Only the worker holding the lock waits on the queue; the others wait for the lock.
        let job = rx.lock().await.recv().await;
        let Some(Job { tx, records }) = job else {
            return;
        };

        for metadata in records {
            match tx.send_timeout(metadata, send_timeout).await {
                Ok(()) => {
                    trace!(worker, "Delivered container metadata");
                    metrics.callbacks(Outcome::Delivered, 1);
                }
                Err(SendTimeoutError::Timeout(metadata)) => {
                    warn!(
                        worker,
                        container = %metadata.container_id,
                        ?send_timeout,
                        "Callback channel is full; dropping container metadata"
                    );
                    metrics.callbacks(Outcome::Timeout, 1);
                }
                Err(SendTimeoutError::Closed(metadata)) => {
                    debug!(
                        worker,
                        container = %metadata.container_id,
                        "Callback channel closed; dropping container metadata"
                    );
                    metrics.callbacks(Outcome::Closed, 1);
                }
            }
        }
    }
}
