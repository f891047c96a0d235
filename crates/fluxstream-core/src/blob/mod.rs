//! Byte-stream persistence for finished transfers.
//!
//! The pipeline writes through the [`BlobStore`] trait; the stream resolver
//! reads persisted artifacts back through it. [`FsBlobStore`] is the local
//! filesystem implementation.

mod fs;
mod sanitize;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

use crate::engine::ContentReader;

pub use fs::FsBlobStore;
pub use sanitize::sanitize_component;

/// Suffix of an artifact still being written.
pub const TEMP_SUFFIX: &str = ".part";

/// Where a stream ended up and how many bytes it held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub path: String,
    pub bytes: u64,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Copy `reader` to end of stream under `dest_name` (`<job_id>/<file name>`).
    /// Returns the artifact path to record in the status store.
    async fn write_stream(
        &self,
        dest_name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<StoredBlob>;

    /// Open a previously written artifact. Returns the reader and its length.
    async fn open(&self, path: &str) -> Result<(ContentReader, u64)>;
}

/// Temp path for an artifact: `movie.mkv` -> `movie.mkv.part`.
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Destination name for a job's main file.
pub fn destination_name(job_id: &str, file_name: &str) -> String {
    format!("{}/{}", job_id, file_name)
}
