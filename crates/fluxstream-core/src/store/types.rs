//! Records, jobs and statuses shared by the store, queue and pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a content record.
///
/// `Processing -> Downloading -> Downloaded`, or either non-terminal state `-> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Processing,
    Downloading,
    Downloaded,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Processing => "processing",
            Status::Downloading => "downloading",
            Status::Downloaded => "downloaded",
            Status::Failed => "failed",
        }
    }

    /// Parse a stored status. Unknown strings map to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Status::Processing),
            "downloading" => Some(Status::Downloading),
            "downloaded" => Some(Status::Downloaded),
            "failed" => Some(Status::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Downloaded | Status::Failed)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    ///
    /// `Downloading -> Downloading` is allowed so a redelivered queue entry can
    /// be picked up again after a crash.
    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;
        matches!(
            (self, next),
            (Processing, Downloading)
                | (Downloading, Downloading)
                | (Downloading, Downloaded)
                | (Processing, Failed)
                | (Downloading, Failed)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of work on the queue: one content reference for one record id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub content_ref: String,
}

impl Job {
    pub fn new(id: impl Into<String>, content_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content_ref: content_ref.into(),
        }
    }
}

/// Durable status row for one piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: String,
    pub content_ref: String,
    pub status: Status,
    /// Where the persisted artifact lives. Empty until `Downloaded`.
    pub artifact_path: String,
    /// Unix seconds.
    pub created_at: i64,
    pub deleted: bool,
}

impl ContentRecord {
    /// New record in the initial `Processing` state.
    pub fn new(id: impl Into<String>, content_ref: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            content_ref: content_ref.into(),
            status: Status::Processing,
            artifact_path: String::new(),
            created_at,
            deleted: false,
        }
    }

    pub fn job(&self) -> Job {
        Job::new(self.id.clone(), self.content_ref.clone())
    }
}

/// Result of inserting a record. A duplicate id is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    New,
    Duplicate,
}

/// One queue entry handed to a consumer. Acknowledge it with `JobQueue::ack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub entry_id: i64,
    pub job: Job,
    /// How many times this entry has been delivered, including this one.
    pub deliveries: i64,
}

/// Queue occupancy, for operators and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Never delivered.
    pub ready: u64,
    /// Delivered to a consumer but not acknowledged.
    pub pending: u64,
    pub acked: u64,
}
