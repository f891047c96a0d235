//! Single consumer of worker failures.
//!
//! Workers never write `Failed` themselves; they hand a [`WorkerError`] to an
//! [`ErrorReporter`]. The [`ErrorSink`] drains the bounded channel one error
//! at a time, logs it with its phase tag and writes `Failed` at most once.
//! A failed status write is logged and not retried.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::error::{StatusError, WorkerError};
use crate::store::unix_timestamp;
use crate::tracker::StatusTracker;

/// Sending half held by workers. Cheap to clone.
#[derive(Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<WorkerError>,
}

impl ErrorReporter {
    /// Hand a failure to the sink. Waits if the channel is full.
    pub async fn report(&self, err: WorkerError) {
        tracing::debug!(job_id = %err.job_id, phase = %err.phase, "reporting failure");
        if let Err(mpsc::error::SendError(lost)) = self.tx.send(err).await {
            tracing::error!(
                job_id = %lost.job_id,
                phase = %lost.phase,
                cause = %format!("{:#}", lost.cause),
                "error sink is gone; failure not recorded"
            );
        }
    }
}

/// Bounded error channel. The sink stops once every reporter is dropped.
pub fn error_channel(capacity: usize) -> (ErrorReporter, mpsc::Receiver<WorkerError>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ErrorReporter { tx }, rx)
}

/// Counters returned when the sink stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub received: u64,
    pub marked_failed: u64,
    /// Record was already terminal (e.g. cleanup error after `Downloaded`).
    pub already_terminal: u64,
    pub write_errors: u64,
}

#[derive(Serialize)]
struct DeadLetterEntry<'a> {
    job_id: &'a str,
    phase: &'a str,
    cause: String,
    at: i64,
}

/// Append-only JSON-lines record of every failure.
pub struct DeadLetterLog {
    path: PathBuf,
    file: tokio::fs::File,
}

impl DeadLetterLog {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("open dead-letter log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    async fn append(&mut self, err: &WorkerError) -> Result<()> {
        let entry = DeadLetterEntry {
            job_id: &err.job_id,
            phase: err.phase.as_str(),
            cause: format!("{:#}", err.cause),
            at: unix_timestamp(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .await
            .with_context(|| format!("append to {}", self.path.display()))?;
        self.file.flush().await?;
        Ok(())
    }
}

pub struct ErrorSink {
    rx: mpsc::Receiver<WorkerError>,
    tracker: StatusTracker,
    dead_letter: Option<DeadLetterLog>,
}

impl ErrorSink {
    pub fn new(rx: mpsc::Receiver<WorkerError>, tracker: StatusTracker) -> Self {
        Self {
            rx,
            tracker,
            dead_letter: None,
        }
    }

    pub fn with_dead_letter(mut self, log: DeadLetterLog) -> Self {
        self.dead_letter = Some(log);
        self
    }

    /// Drain failures in arrival order until every reporter is dropped.
    pub async fn run(mut self) -> SinkStats {
        let mut stats = SinkStats::default();
        while let Some(err) = self.rx.recv().await {
            stats.received += 1;
            self.handle(&err, &mut stats).await;
        }
        tracing::debug!(?stats, "error sink stopped");
        stats
    }

    async fn handle(&mut self, err: &WorkerError, stats: &mut SinkStats) {
        tracing::error!(
            job_id = %err.job_id,
            phase = %err.phase,
            cause = %format!("{:#}", err.cause),
            "job failed"
        );

        if let Some(log) = self.dead_letter.as_mut() {
            if let Err(e) = log.append(err).await {
                tracing::warn!(job_id = %err.job_id, error = %format!("{e:#}"), "dead-letter append failed");
            }
        }

        match self.tracker.mark_failed(&err.job_id).await {
            Ok(_) => stats.marked_failed += 1,
            Err(StatusError::InvalidTransition { from, .. }) if from.is_terminal() => {
                stats.already_terminal += 1;
                tracing::debug!(job_id = %err.job_id, status = %from, phase = %err.phase, "record already terminal; status kept");
            }
            Err(e) => {
                stats.write_errors += 1;
                tracing::warn!(job_id = %err.job_id, error = %e, "could not write failed status; record left as is");
            }
        }
    }
}
