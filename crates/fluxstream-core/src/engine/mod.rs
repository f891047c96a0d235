//! Transfer engines: resolve a content reference to files and byte streams.
//!
//! The pipeline drives engines only through [`TransferEngine`]. The concrete
//! [`HttpSeedEngine`] fetches the HTTP sources listed in a magnet link;
//! [`MemoryEngine`] serves scripted content in-process.

mod http_seed;
mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::io::AsyncRead;

use crate::media::FileDescriptor;

pub use http_seed::HttpSeedEngine;
pub use memory::{MemoryEngine, ScriptedContent};

/// Readable byte stream for one file. Dropping it closes the stream.
pub type ContentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Opaque engine-side identifier of one started transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(pub u64);

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer#{}", self.0)
    }
}

/// Outcome of waiting for metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataWait {
    Ready,
    TimedOut,
}

#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Start resolving `content_ref`. Returns as soon as the transfer exists.
    async fn begin(&self, content_ref: &str) -> Result<EngineHandle>;

    /// Wait at most `timeout` for the file list to become known.
    async fn await_metadata(&self, handle: EngineHandle, timeout: Duration) -> Result<MetadataWait>;

    /// Files of a transfer whose metadata is ready.
    async fn list_files(&self, handle: EngineHandle) -> Result<Vec<FileDescriptor>>;

    /// Open a stream over the file at `index` in [`list_files`](Self::list_files).
    async fn open_reader(&self, handle: EngineHandle, index: usize) -> Result<ContentReader>;

    /// Drop the transfer and everything it holds.
    async fn release(&self, handle: EngineHandle) -> Result<()>;
}
