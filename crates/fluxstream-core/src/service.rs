//! Facade used by the CLI and any other front end.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backoff::RetryPolicy;
use crate::blob::{BlobStore, FsBlobStore};
use crate::config::FluxConfig;
use crate::engine::{HttpSeedEngine, TransferEngine};
use crate::error::{StatusError, StreamError};
use crate::error_sink::{error_channel, DeadLetterLog, ErrorSink};
use crate::id::{is_valid_id, random_id};
use crate::ingress::JobIngress;
use crate::pipeline::{job_channel, PipelineContext, WorkerPool};
use crate::resolver::{ResolvedStream, StreamResolver};
use crate::runtime::{LeaseKeeper, RuntimeHandle};
use crate::session::SessionTable;
use crate::store::{
    unix_timestamp, ContentRecord, FluxDb, Inserted, Job, JobQueue, QueueCounts, Status,
    StatusStore,
};
use crate::tracker::StatusTracker;

/// Fresh ids tried before giving up on a collision streak.
const ID_ATTEMPTS: usize = 5;

/// The four external collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn StatusStore>,
    pub queue: Arc<dyn JobQueue>,
    pub engine: Arc<dyn TransferEngine>,
    pub blobs: Arc<dyn BlobStore>,
}

/// Runtime knobs, usually derived from [`FluxConfig`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub workers: usize,
    pub job_capacity: usize,
    pub error_capacity: usize,
    pub consumer: String,
    pub metadata_timeout: Duration,
    pub lookup_timeout: Duration,
    pub cache_ttl: Duration,
    /// Runner lease lifetime while the pipeline runs.
    pub lease_ttl: Duration,
    pub retry: RetryPolicy,
    pub dead_letter: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&FluxConfig::default())
    }
}

impl Settings {
    /// Everything except the dead-letter path, which needs the XDG state dir.
    pub fn from_config(cfg: &FluxConfig) -> Self {
        Self {
            workers: cfg.worker_count(),
            job_capacity: cfg.job_channel_capacity(),
            error_capacity: cfg.error_capacity(),
            consumer: cfg.consumer_name.clone(),
            metadata_timeout: cfg.metadata_timeout(),
            lookup_timeout: cfg.lookup_timeout(),
            cache_ttl: cfg.cache_ttl(),
            lease_ttl: cfg.lease_ttl(),
            retry: cfg
                .retry
                .as_ref()
                .map(RetryPolicy::from_config)
                .unwrap_or_default(),
            dead_letter: None,
        }
    }
}

/// Outcome of [`Fluxstream::recover_stranded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Ids published again; empty when nothing was stranded.
    Republished(Vec<String>),
    /// Another runner holds a live lease, so its in-flight jobs look
    /// stranded from here. Nothing was published.
    RunnerActive(Vec<String>),
}

/// Outcome of a submission with a caller-chosen id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    New,
    /// A record with this id already existed; nothing was published.
    Duplicate,
}

pub struct Fluxstream {
    /// Lease holder name for this instance's runs.
    holder: String,
    tracker: StatusTracker,
    queue: Arc<dyn JobQueue>,
    pipeline: PipelineContext,
    resolver: StreamResolver,
    settings: Settings,
}

impl Fluxstream {
    pub fn new(parts: Collaborators, settings: Settings) -> Self {
        let tracker = StatusTracker::new(parts.store);
        let sessions = Arc::new(SessionTable::new());
        let pipeline = PipelineContext {
            tracker: tracker.clone(),
            engine: parts.engine,
            blobs: Arc::clone(&parts.blobs),
            sessions: Arc::clone(&sessions),
            metadata_timeout: settings.metadata_timeout,
            lookup_timeout: settings.lookup_timeout,
        };
        let resolver = StreamResolver::new(
            sessions,
            tracker.clone(),
            parts.blobs,
            settings.lookup_timeout,
            settings.cache_ttl,
        );
        Self {
            holder: format!("{}-{}", settings.consumer, random_id()),
            tracker,
            queue: parts.queue,
            pipeline,
            resolver,
            settings,
        }
    }

    /// Wire the SQLite store and queue, the filesystem blob store and the
    /// web-seed engine from configuration.
    pub async fn open(cfg: &FluxConfig) -> Result<Self> {
        let db_path = cfg.resolved_database_path()?;
        let db = FluxDb::open_at(&db_path)
            .await
            .with_context(|| format!("open database {}", db_path.display()))?
            .with_queue_timing(
                Duration::from_secs(cfg.queue.block_secs),
                Duration::from_millis(cfg.queue.poll_interval_ms),
            );
        let download_dir = cfg.resolved_download_dir()?;
        let engine = HttpSeedEngine::new().with_probe_timeout(cfg.lookup_timeout().max(Duration::from_secs(5)));

        let mut settings = Settings::from_config(cfg);
        settings.dead_letter = cfg.dead_letter_path()?;
        tracing::debug!(database = %db_path.display(), downloads = %download_dir.display(), "collaborators ready");

        let db = Arc::new(db);
        Ok(Self::new(
            Collaborators {
                store: db.clone(),
                queue: db,
                engine: Arc::new(engine),
                blobs: Arc::new(FsBlobStore::new(download_dir)),
            },
            settings,
        ))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    /// Create a record under a fresh id and publish its job. Returns the id.
    pub async fn submit_job(&self, content_ref: &str) -> Result<String> {
        let content_ref = validate_ref(content_ref)?;
        for _ in 0..ID_ATTEMPTS {
            let id = random_id();
            match self.create_and_publish(&id, content_ref).await? {
                Submitted::New => return Ok(id),
                Submitted::Duplicate => {
                    tracing::debug!(job_id = %id, "id collision; drawing another")
                }
            }
        }
        bail!("no free id after {} attempts", ID_ATTEMPTS)
    }

    /// Submit under `id`. Re-submitting an existing id succeeds without a
    /// second record or queue entry.
    pub async fn submit_job_with_id(&self, id: &str, content_ref: &str) -> Result<Submitted> {
        if !is_valid_id(id) {
            bail!("invalid id {:?}: expected 8 characters from [a-zA-Z0-9_-]", id);
        }
        let content_ref = validate_ref(content_ref)?;
        let submitted = self.create_and_publish(id, content_ref).await?;
        if submitted == Submitted::Duplicate {
            tracing::info!(job_id = %id, "duplicate submission ignored");
        }
        Ok(submitted)
    }

    async fn create_and_publish(&self, id: &str, content_ref: &str) -> Result<Submitted> {
        let record = ContentRecord::new(id, content_ref, unix_timestamp());
        match self.tracker.create(&record).await? {
            Inserted::Duplicate => Ok(Submitted::Duplicate),
            Inserted::New => {
                self.queue
                    .publish(&record.job())
                    .await
                    .with_context(|| format!("publish job {}", id))?;
                tracing::info!(job_id = %id, "job submitted");
                Ok(Submitted::New)
            }
        }
    }

    pub async fn query_status(&self, id: &str) -> Result<ContentRecord, StatusError> {
        self.tracker.get(id).await
    }

    pub async fn list_active(&self) -> Result<Vec<ContentRecord>, StatusError> {
        self.tracker.list_active().await
    }

    pub async fn set_deleted(&self, id: &str, deleted: bool) -> Result<(), StatusError> {
        self.tracker.set_deleted(id, deleted).await
    }

    pub async fn open_stream(&self, id: &str) -> Result<ResolvedStream, StreamError> {
        self.resolver.resolve(id).await
    }

    pub async fn queue_counts(&self) -> Result<QueueCounts> {
        self.queue.counts().await
    }

    /// Republish non-terminal records that have no queue entry in flight and
    /// no live session (e.g. after a crash or a failed publish).
    ///
    /// Records a worker is still downloading have neither, so nothing is
    /// touched while another runner holds a live lease on the database.
    pub async fn recover_stranded(&self) -> Result<Recovery> {
        let others: Vec<String> = self
            .queue
            .live_leases()
            .await?
            .into_iter()
            .filter(|h| *h != self.holder)
            .collect();
        if !others.is_empty() {
            tracing::warn!(runners = ?others, "runner active; recovery skipped");
            return Ok(Recovery::RunnerActive(others));
        }

        let mut candidates = Vec::new();
        for status in [Status::Processing, Status::Downloading] {
            candidates.extend(self.tracker.list_in(status).await?);
        }

        let mut republished = Vec::new();
        for record in candidates {
            if self.pipeline.sessions.get(&record.id).is_some()
                || self.queue.is_pending(&record.id).await?
            {
                continue;
            }
            self.queue
                .publish(&Job::new(record.id.clone(), record.content_ref.clone()))
                .await
                .with_context(|| format!("republish job {}", record.id))?;
            tracing::info!(job_id = %record.id, status = %record.status, "stranded job republished");
            republished.push(record.id);
        }
        Ok(Recovery::Republished(republished))
    }

    /// Spawn the error sink, the worker pool and the ingress loop.
    pub async fn start(&self) -> Result<RuntimeHandle> {
        let s = &self.settings;
        let (reporter, error_rx) = error_channel(s.error_capacity);
        let mut sink = ErrorSink::new(error_rx, self.tracker.clone());
        if let Some(path) = &s.dead_letter {
            sink = sink.with_dead_letter(DeadLetterLog::open(path).await?);
        }
        let lease = LeaseKeeper::acquire(Arc::clone(&self.queue), self.holder.clone(), s.lease_ttl)
            .await
            .context("take runner lease")?;
        let sink = tokio::spawn(sink.run());

        let (job_tx, job_rx) = job_channel(s.job_capacity);
        let pool = WorkerPool::spawn(self.pipeline.clone(), job_rx, s.workers, reporter);

        let shutdown = CancellationToken::new();
        let ingress = JobIngress::new(
            Arc::clone(&self.queue),
            self.tracker.clone(),
            job_tx,
            s.consumer.clone(),
            s.retry,
        );
        let ingress = tokio::spawn(ingress.run(shutdown.clone()));

        tracing::info!(
            workers = s.workers,
            capacity = s.job_capacity,
            consumer = %s.consumer,
            "pipeline started"
        );
        Ok(RuntimeHandle::new(shutdown, ingress, pool, sink, lease))
    }
}

fn validate_ref(content_ref: &str) -> Result<&str> {
    let trimmed = content_ref.trim();
    if trimmed.is_empty() {
        bail!("content reference is empty");
    }
    Ok(trimmed)
}
