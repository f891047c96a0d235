//! Download workers.
//!
//! A fixed set of workers pulls jobs from one bounded channel and runs each
//! through [`process_job`]. The channel is the admission control: when it
//! is full the ingress loop blocks.

mod job;
mod progress;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::blob::BlobStore;
use crate::engine::TransferEngine;
use crate::error_sink::ErrorReporter;
use crate::session::SessionTable;
use crate::store::Job;
use crate::tracker::StatusTracker;

pub use job::{process_job, JobOutcome};
pub use progress::ProgressReader;

/// Everything a worker needs, shared by all workers.
#[derive(Clone)]
pub struct PipelineContext {
    pub tracker: StatusTracker,
    pub engine: Arc<dyn TransferEngine>,
    pub blobs: Arc<dyn BlobStore>,
    pub sessions: Arc<SessionTable>,
    pub metadata_timeout: Duration,
    pub lookup_timeout: Duration,
}

/// Bounded job channel feeding the workers.
pub fn job_channel(capacity: usize) -> (mpsc::Sender<Job>, mpsc::Receiver<Job>) {
    mpsc::channel(capacity.max(1))
}

/// Per-worker (and summed) job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub downloaded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Downloaded { .. } => self.downloaded += 1,
            JobOutcome::Failed(_) => self.failed += 1,
            JobOutcome::Skipped => self.skipped += 1,
        }
    }

    fn merge(&mut self, other: WorkerStats) {
        self.downloaded += other.downloaded;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

pub struct WorkerPool {
    workers: JoinSet<WorkerStats>,
}

impl WorkerPool {
    /// Spawn `count` workers on `jobs`. They exit once every sender of the
    /// channel is dropped and the channel is empty.
    pub fn spawn(
        ctx: PipelineContext,
        jobs: mpsc::Receiver<Job>,
        count: usize,
        errors: ErrorReporter,
    ) -> Self {
        let jobs = Arc::new(Mutex::new(jobs));
        let mut workers = JoinSet::new();
        for worker in 0..count.max(1) {
            let ctx = ctx.clone();
            let jobs = Arc::clone(&jobs);
            let errors = errors.clone();
            workers.spawn(async move { worker_loop(worker, ctx, jobs, errors).await });
        }
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait for every worker to exit and sum their counts.
    pub async fn drain(mut self) -> WorkerStats {
        let mut total = WorkerStats::default();
        while let Some(res) = self.workers.join_next().await {
            match res {
                Ok(stats) => total.merge(stats),
                Err(e) => tracing::error!(error = %e, "worker task ended abnormally"),
            }
        }
        total
    }
}

async fn worker_loop(
    worker: usize,
    ctx: PipelineContext,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    errors: ErrorReporter,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    tracing::debug!(worker, "worker started");
    loop {
        let next = { jobs.lock().await.recv().await };
        let Some(job) = next else {
            break;
        };
        tracing::debug!(worker, job_id = %job.id, "job picked up");
        let outcome = process_job(&ctx, &job, &errors).await;
        stats.record(&outcome);
    }
    tracing::debug!(worker, ?stats, "worker stopped");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FsBlobStore;
    use crate::engine::{MemoryEngine, ScriptedContent};
    use crate::error::Phase;
    use crate::error_sink::{error_channel, ErrorSink};
    use crate::store::{ContentRecord, FluxDb, Status};
    use crate::tracker::Transition;

    struct Fixture {
        ctx: PipelineContext,
        engine: Arc<MemoryEngine>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MemoryEngine::new());
        let ctx = PipelineContext {
            tracker: StatusTracker::new(Arc::new(FluxDb::open_memory().await.unwrap())),
            engine: engine.clone(),
            blobs: Arc::new(FsBlobStore::new(dir.path())),
            sessions: Arc::new(SessionTable::new()),
            metadata_timeout: Duration::from_secs(2),
            lookup_timeout: Duration::from_secs(2),
        };
        Fixture {
            ctx,
            engine,
            _dir: dir,
        }
    }

    async fn admit(ctx: &PipelineContext, id: &str, content_ref: &str) -> Job {
        let rec = ContentRecord::new(id, content_ref, 1);
        ctx.tracker.create(&rec).await.unwrap();
        ctx.tracker
            .transition(id, Transition::StartDownload)
            .await
            .unwrap();
        rec.job()
    }

    #[tokio::test]
    async fn successful_job_persists_and_completes() {
        let f = fixture().await;
        f.engine.add(
            "ref-ok",
            ScriptedContent::new()
                .file("extras/notes.txt", vec![0u8; 50])
                .file("Movie.mkv", b"matroska".to_vec()),
        );
        let job = admit(&f.ctx, "job00001", "ref-ok").await;
        let (reporter, mut rx) = error_channel(4);

        let outcome = process_job(&f.ctx, &job, &reporter).await;
        let JobOutcome::Downloaded { artifact_path } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert!(artifact_path.ends_with("job00001/Movie.mkv"));
        assert_eq!(std::fs::read(&artifact_path).unwrap(), b"matroska");

        let rec = f.ctx.tracker.get("job00001").await.unwrap();
        assert_eq!(rec.status, Status::Downloaded);
        assert_eq!(rec.artifact_path, artifact_path);
        assert!(f.ctx.sessions.is_empty());
        assert_eq!(f.engine.releases(), 1);
        drop(reporter);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn failures_are_reported_with_their_phase() {
        let f = fixture().await;
        f.engine
            .add("no-media", ScriptedContent::new().file("readme.txt", "x"));
        f.engine.add(
            "bad-reader",
            ScriptedContent::new().file("a.mp4", "x").failing_reader(),
        );
        f.engine.add(
            "short",
            ScriptedContent::new().file("a.mp4", "xyz").reported_length(10),
        );
        let cases = [
            ("job00001", "no-media", Phase::Acquire),
            ("job00002", "bad-reader", Phase::Read),
            ("job00003", "short", Phase::Persist),
            ("job00004", "unregistered", Phase::Acquire),
        ];
        let (reporter, mut rx) = error_channel(8);
        for (id, content_ref, phase) in cases {
            let job = admit(&f.ctx, id, content_ref).await;
            assert_eq!(process_job(&f.ctx, &job, &reporter).await, JobOutcome::Failed(phase));
            let err = rx.recv().await.unwrap();
            assert_eq!((err.job_id.as_str(), err.phase), (id, phase));
            // Workers leave the status alone; the sink writes Failed.
            assert_eq!(f.ctx.tracker.get(id).await.unwrap().status, Status::Downloading);
        }
        assert!(f.ctx.sessions.is_empty());
        assert_eq!(f.engine.live_transfers(), 0);
    }

    #[tokio::test]
    async fn describe_failure_after_reader_is_metadata_fetch_err() {
        let f = fixture().await;
        f.engine.add(
            "flaky-meta",
            ScriptedContent::new()
                .file("a.mkv", vec![3u8; 64])
                .listing_fails_after(1),
        );
        let job = admit(&f.ctx, "job00001", "flaky-meta").await;
        let (reporter, mut rx) = error_channel(1);

        assert_eq!(
            process_job(&f.ctx, &job, &reporter).await,
            JobOutcome::Failed(Phase::Describe)
        );
        let err = rx.recv().await.unwrap();
        assert_eq!(err.phase.as_str(), "metadata_fetch_err");
        assert!(format!("{:#}", err.cause).contains("file listing"));
        assert_eq!(f.engine.releases(), 1);
        assert!(f.ctx.sessions.is_empty());
    }

    #[tokio::test]
    async fn cleanup_failure_is_reported_without_changing_outcome() {
        let f = fixture().await;
        f.engine.add(
            "sticky",
            ScriptedContent::new()
                .file("a.mp4", vec![4u8; 32])
                .failing_release(),
        );
        let job = admit(&f.ctx, "job00001", "sticky").await;
        let (reporter, rx) = error_channel(2);
        let sink = tokio::spawn(ErrorSink::new(rx, f.ctx.tracker.clone()).run());

        let outcome = process_job(&f.ctx, &job, &reporter).await;
        assert!(matches!(outcome, JobOutcome::Downloaded { .. }), "{outcome:?}");
        drop(reporter);

        let stats = sink.await.unwrap();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.already_terminal, 1);
        assert_eq!(stats.marked_failed, 0);
        let rec = f.ctx.tracker.get("job00001").await.unwrap();
        assert_eq!(rec.status, Status::Downloaded);
        assert!(rec.artifact_path.ends_with("a.mp4"));
        assert_eq!(f.engine.live_transfers(), 0);
    }

    #[tokio::test]
    async fn finalize_failure_is_tagged_update_failed() {
        let f = fixture().await;
        f.engine.add("ref-ok", ScriptedContent::new().file("a.mp4", "x"));
        // Record never moved to Downloading, so Complete is rejected.
        let rec = ContentRecord::new("job00001", "ref-ok", 1);
        f.ctx.tracker.create(&rec).await.unwrap();
        let (reporter, mut rx) = error_channel(1);
        assert_eq!(
            process_job(&f.ctx, &rec.job(), &reporter).await,
            JobOutcome::Failed(Phase::Finalize)
        );
        assert_eq!(rx.recv().await.unwrap().phase.as_str(), "update_failed");
    }

    #[tokio::test]
    async fn second_delivery_of_running_job_is_skipped() {
        let f = fixture().await;
        let held = Arc::new(crate::session::TransferSession::new("job00001", f.ctx.engine.clone()));
        f.ctx.sessions.insert_if_absent(held);
        let (reporter, _rx) = error_channel(1);
        let job = Job::new("job00001", "ref");
        assert_eq!(process_job(&f.ctx, &job, &reporter).await, JobOutcome::Skipped);
        assert!(f.ctx.sessions.get("job00001").is_some());
    }

    #[tokio::test]
    async fn pool_drains_admitted_jobs_then_stops() {
        let f = fixture().await;
        f.engine.add("ref", ScriptedContent::new().file("a.mp4", vec![1u8; 1000]));
        let (reporter, rx) = error_channel(2);
        let sink = tokio::spawn(ErrorSink::new(rx, f.ctx.tracker.clone()).run());
        let (tx, jobs) = job_channel(2);
        let pool = WorkerPool::spawn(f.ctx.clone(), jobs, 2, reporter);
        assert_eq!(pool.len(), 2);

        for i in 0..5 {
            let job = admit(&f.ctx, &format!("job0000{i}"), "ref").await;
            tx.send(job).await.unwrap();
        }
        drop(tx);
        let stats = pool.drain().await;
        assert_eq!(stats.downloaded, 5);
        assert_eq!(sink.await.unwrap().received, 0);
        for i in 0..5 {
            let rec = f.ctx.tracker.get(&format!("job0000{i}")).await.unwrap();
            assert_eq!(rec.status, Status::Downloaded);
        }
    }
}
