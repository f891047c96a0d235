//! Download orchestration for magnet-referenced media.
//!
//! Jobs flow `JobQueue -> JobIngress -> bounded channel -> workers ->
//! BlobStore + StatusTracker`, with failures routed to a single
//! [`error_sink::ErrorSink`]. [`service::Fluxstream`] is the entry point.

pub mod backoff;
pub mod blob;
pub mod checksum;
pub mod config;
pub mod engine;
pub mod error;
pub mod error_sink;
pub mod id;
pub mod ingress;
pub mod logging;
pub mod magnet;
pub mod media;
pub mod pipeline;
pub mod resolver;
pub mod runtime;
pub mod service;
pub mod session;
pub mod store;
pub mod tracker;

pub use error::{Phase, SessionError, StatusError, StreamError, WorkerError};
pub use resolver::{ResolvedStream, StreamSource};
pub use runtime::{RunSummary, RuntimeHandle};
pub use service::{Collaborators, Fluxstream, Recovery, Settings, Submitted};
pub use store::{ContentRecord, Job, Status};
