//! Error taxonomy for the download pipeline.
//!
//! Transient infrastructure faults stay as `anyhow::Error` and are retried by
//! the loop that hit them. Phase failures travel as [`WorkerError`] to the
//! error sink. Typed errors below are what callers of the core can match on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::store::Status;

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Starting the transfer, waiting for metadata, or validating the file set.
    Acquire,
    /// Opening a byte stream for the main file.
    Read,
    /// Fetching name/size/extension of the main file.
    Describe,
    /// Copying bytes into the blob store.
    Persist,
    /// Writing the `Downloaded` status.
    Finalize,
    /// Releasing the transfer session.
    Cleanup,
}

impl Phase {
    /// Tag written to logs and the dead-letter log.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Acquire => "magnet_link_add",
            Phase::Read => "download_failed",
            Phase::Describe => "metadata_fetch_err",
            Phase::Persist => "bucket_write_err",
            Phase::Finalize => "update_failed",
            Phase::Cleanup => "torrent_cleanup_err",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed pipeline stage for one job. Only ever sent over the error channel.
#[derive(Debug, thiserror::Error)]
#[error("job {job_id} failed in {phase}: {cause:#}")]
pub struct WorkerError {
    pub job_id: String,
    pub phase: Phase,
    pub cause: anyhow::Error,
}

impl WorkerError {
    pub fn new(job_id: impl Into<String>, phase: Phase, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            job_id: job_id.into(),
            phase,
            cause: cause.into(),
        }
    }
}

/// Errors from the status tracker.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("record {0} not found")]
    NotFound(String),

    #[error("record {id}: transition {from} -> {to} is not allowed")]
    InvalidTransition { id: String, from: Status, to: Status },

    #[error("status store: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Errors from a transfer session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transfer for {0} has no metadata yet")]
    NotReady(String),

    #[error("transfer for {0} was already released")]
    Released(String),

    #[error("transfer for {0} was already started")]
    AlreadyStarted(String),

    #[error("timed out after {waited:?} waiting for metadata of {job_id}")]
    MetadataTimeout { job_id: String, waited: Duration },

    #[error("no recognized media file in content for {0}")]
    NoMediaFile(String),

    #[error("transfer engine: {0:#}")]
    Engine(#[from] anyhow::Error),
}

/// Errors from the stream resolver.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("no stream available for {0}")]
    NotFound(String),

    #[error("status lookup: {0}")]
    Status(#[from] StatusError),

    #[error("blob store: {0:#}")]
    Blob(anyhow::Error),
}
