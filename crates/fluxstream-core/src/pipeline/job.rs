//! One job, start to finish, on one worker.

use std::sync::Arc;

use super::progress::ProgressReader;
use super::PipelineContext;
use crate::blob::destination_name;
use crate::error::{Phase, WorkerError};
use crate::error_sink::ErrorReporter;
use crate::session::TransferSession;
use crate::store::Job;
use crate::tracker::Transition;

/// How a job left the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Downloaded { artifact_path: String },
    /// Reported to the error sink with this phase.
    Failed(Phase),
    /// Another worker already holds a session for this job id.
    Skipped,
}

fn at<'a, E>(job_id: &'a str, phase: Phase) -> impl FnOnce(E) -> WorkerError + 'a
where
    E: Into<anyhow::Error>,
{
    move |e| WorkerError::new(job_id, phase, e)
}

/// Acquire, read, describe, persist, finalize, then always clean up.
///
/// The first failing stage is reported with its phase and ends the job.
/// Cleanup runs on every path and releases the session exactly once.
pub async fn process_job(ctx: &PipelineContext, job: &Job, errors: &ErrorReporter) -> JobOutcome {
    let session = Arc::new(TransferSession::new(&job.id, Arc::clone(&ctx.engine)));
    if !ctx.sessions.insert_if_absent(Arc::clone(&session)) {
        tracing::warn!(job_id = %job.id, "transfer already running for this job; skipping delivery");
        return JobOutcome::Skipped;
    }

    let outcome = match run_stages(ctx, job, &session).await {
        Ok(artifact_path) => {
            tracing::info!(job_id = %job.id, artifact = %artifact_path, "job downloaded");
            JobOutcome::Downloaded { artifact_path }
        }
        Err(e) => {
            let phase = e.phase;
            errors.report(e).await;
            JobOutcome::Failed(phase)
        }
    };

    ctx.sessions.remove(&job.id);
    if let Err(e) = session.release().await {
        errors.report(WorkerError::new(&job.id, Phase::Cleanup, e)).await;
    }
    outcome
}

async fn run_stages(
    ctx: &PipelineContext,
    job: &Job,
    session: &TransferSession,
) -> Result<String, WorkerError> {
    let id = job.id.as_str();

    session
        .acquire(&job.content_ref, ctx.metadata_timeout)
        .await
        .map_err(at(id, Phase::Acquire))?;

    let (reader, _) = session
        .open_reader(ctx.lookup_timeout)
        .await
        .map_err(at(id, Phase::Read))?;

    let file = session
        .describe(ctx.lookup_timeout)
        .await
        .map_err(at(id, Phase::Describe))?;

    let dest = destination_name(id, &file.name);
    tracing::info!(job_id = %id, file = %file.name, length = file.length, "persisting");
    let mut reader = ProgressReader::new(reader, id, file.length);
    let stored = ctx
        .blobs
        .write_stream(&dest, &mut reader)
        .await
        .map_err(at(id, Phase::Persist))?;
    if file.length > 0 && stored.bytes != file.length {
        return Err(WorkerError::new(
            id,
            Phase::Persist,
            anyhow::anyhow!(
                "wrote {} bytes to {} but {} were expected",
                stored.bytes,
                stored.path,
                file.length
            ),
        ));
    }

    ctx.tracker
        .transition(
            id,
            Transition::Complete {
                artifact_path: stored.path.clone(),
            },
        )
        .await
        .map_err(at(id, Phase::Finalize))?;

    Ok(stored.path)
}
