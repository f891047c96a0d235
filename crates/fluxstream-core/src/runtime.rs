//! Running pipeline: ingress, workers and error sink as tokio tasks.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error_sink::SinkStats;
use crate::ingress::IngressStats;
use crate::pipeline::{WorkerPool, WorkerStats};
use crate::store::JobQueue;

/// What each task did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ingress: IngressStats,
    pub workers: WorkerStats,
    pub errors: SinkStats,
}

/// Handle to a started pipeline. Dropping it without calling
/// [`shutdown`](Self::shutdown) leaves the tasks running.
pub struct RuntimeHandle {
    shutdown: CancellationToken,
    ingress: JoinHandle<IngressStats>,
    pool: WorkerPool,
    sink: JoinHandle<SinkStats>,
    lease: LeaseKeeper,
}

impl RuntimeHandle {
    pub(crate) fn new(
        shutdown: CancellationToken,
        ingress: JoinHandle<IngressStats>,
        pool: WorkerPool,
        sink: JoinHandle<SinkStats>,
        lease: LeaseKeeper,
    ) -> Self {
        Self {
            shutdown,
            ingress,
            pool,
            sink,
            lease,
        }
    }

    /// Token that stops ingress when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop taking new jobs, let workers finish every job already admitted,
    /// then stop the error sink once all failures are recorded.
    pub async fn shutdown(self) -> RunSummary {
        self.shutdown.cancel();

        // Ingress owns the only job sender; once it returns the channel
        // closes and workers exit after draining it.
        let ingress = match self.ingress.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "ingress task ended abnormally");
                IngressStats::default()
            }
        };
        let workers = self.pool.drain().await;
        // Workers held the last error reporters.
        let errors = match self.sink.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "error sink task ended abnormally");
                SinkStats::default()
            }
        };

        // Jobs stay owned until every worker is done with them.
        self.lease.release().await;

        let summary = RunSummary {
            ingress,
            workers,
            errors,
        };
        tracing::info!(?summary, "pipeline stopped");
        summary
    }
}

/// Keeps a runner lease fresh in the queue's database until released.
pub(crate) struct LeaseKeeper {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl LeaseKeeper {
    /// Take the lease now, then renew it every third of `ttl` in the background.
    pub(crate) async fn acquire(
        queue: Arc<dyn JobQueue>,
        holder: String,
        ttl: Duration,
    ) -> Result<Self> {
        queue.hold_lease(&holder, ttl).await?;
        tracing::debug!(%holder, ?ttl, "runner lease taken");
        let stop = CancellationToken::new();
        let task = tokio::spawn(keep_lease(queue, holder, ttl, stop.clone()));
        Ok(Self { stop, task })
    }

    async fn release(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "lease task ended abnormally");
        }
    }
}

async fn keep_lease(
    queue: Arc<dyn JobQueue>,
    holder: String,
    ttl: Duration,
    stop: CancellationToken,
) {
    let every = (ttl / 3).max(Duration::from_secs(1));
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(every) => {}
        }
        if let Err(e) = queue.hold_lease(&holder, ttl).await {
            tracing::warn!(%holder, error = %format!("{e:#}"), "lease renewal failed");
        }
    }
    if let Err(e) = queue.release_lease(&holder).await {
        tracing::warn!(%holder, error = %format!("{e:#}"), "lease release failed");
    }
}
