//! Queue consumer feeding the worker pool.
//!
//! For every delivery: move the record to `Downloading`, hand the job to the
//! bounded channel (blocking while it is full), then acknowledge. A status
//! write that fails transiently leaves the entry unacknowledged so it is
//! delivered again; queue errors are retried with backoff forever.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, RetryPolicy};
use crate::error::StatusError;
use crate::store::{Delivery, Job, JobQueue};
use crate::tracker::{StatusTracker, Transition};

/// Counters returned when ingress stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngressStats {
    /// Handed to the worker pool and acknowledged.
    pub admitted: u64,
    /// Acknowledged without processing (unknown record or terminal status).
    pub dropped: u64,
    /// Left unacknowledged after a transient failure.
    pub deferred: u64,
    pub queue_errors: u64,
}

pub struct JobIngress {
    queue: Arc<dyn JobQueue>,
    tracker: StatusTracker,
    jobs: mpsc::Sender<Job>,
    consumer: String,
    retry: RetryPolicy,
}

impl JobIngress {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        tracker: StatusTracker,
        jobs: mpsc::Sender<Job>,
        consumer: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            tracker,
            jobs,
            consumer: consumer.into(),
            retry,
        }
    }

    /// Consume until `shutdown` is cancelled or the worker pool goes away.
    ///
    /// A delivery interrupted by shutdown before its handoff stays
    /// unacknowledged and is redelivered to this consumer on the next run.
    pub async fn run(self, shutdown: CancellationToken) -> IngressStats {
        let mut stats = IngressStats::default();
        let mut backoff = Backoff::new(self.retry);
        tracing::info!(consumer = %self.consumer, "ingress started");

        loop {
            let consumed = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                r = self.queue.consume(&self.consumer) => r,
            };
            let delivery = match consumed {
                Ok(Some(d)) => d,
                Ok(None) => continue,
                Err(e) => {
                    stats.queue_errors += 1;
                    let delay = backoff.next_delay();
                    tracing::warn!(consumer = %self.consumer, error = %format!("{e:#}"), retry_in = ?delay, "queue consume failed");
                    if pause(&shutdown, delay).await {
                        break;
                    }
                    continue;
                }
            };

            if delivery.deliveries > 1 {
                tracing::info!(job_id = %delivery.job.id, deliveries = delivery.deliveries, "redelivered job");
            }

            match self
                .tracker
                .transition(&delivery.job.id, Transition::StartDownload)
                .await
            {
                Ok(_) => {}
                Err(e @ (StatusError::NotFound(_) | StatusError::InvalidTransition { .. })) => {
                    tracing::warn!(job_id = %delivery.job.id, error = %e, "dropping queue entry");
                    self.ack(&delivery).await;
                    stats.dropped += 1;
                    continue;
                }
                Err(e) => {
                    stats.deferred += 1;
                    let delay = backoff.next_delay();
                    tracing::warn!(job_id = %delivery.job.id, error = %e, retry_in = ?delay, "status write failed; entry left for redelivery");
                    if pause(&shutdown, delay).await {
                        break;
                    }
                    continue;
                }
            }

            let sent = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!(job_id = %delivery.job.id, "shutdown before handoff; entry left for redelivery");
                    break;
                }
                r = self.jobs.send(delivery.job.clone()) => r,
            };
            if sent.is_err() {
                tracing::error!(job_id = %delivery.job.id, "worker pool closed; stopping ingress");
                break;
            }

            self.ack(&delivery).await;
            backoff.reset();
            stats.admitted += 1;
            tracing::debug!(job_id = %delivery.job.id, "job admitted");
        }

        tracing::info!(consumer = %self.consumer, ?stats, "ingress stopped");
        stats
    }

    /// Acknowledge, logging a failure. An unacknowledged entry comes back later.
    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(delivery).await {
            tracing::warn!(job_id = %delivery.job.id, entry_id = delivery.entry_id, error = %format!("{e:#}"), "queue ack failed");
        }
    }
}

/// Sleep for `delay`; true if shutdown was requested meanwhile.
async fn pause(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
