//! Read path for playback: live transfer first, persisted artifact second.
//!
//! Resolved descriptors are cached per job id for a fixed time-to-live so
//! repeated requests skip the engine and store lookups. Entries expire on
//! their own; nothing invalidates them early.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::blob::BlobStore;
use crate::engine::ContentReader;
use crate::error::{StatusError, StreamError};
use crate::media::FileDescriptor;
use crate::session::SessionTable;
use crate::store::Status;
use crate::tracker::StatusTracker;

/// Where a resolved stream reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    /// An in-flight transfer session.
    Live,
    /// The persisted artifact of a `Downloaded` record.
    Artifact,
}

pub struct ResolvedStream {
    pub reader: ContentReader,
    pub descriptor: FileDescriptor,
    pub source: StreamSource,
}

impl std::fmt::Debug for ResolvedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedStream")
            .field("descriptor", &self.descriptor)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

struct CacheEntry {
    descriptor: FileDescriptor,
    expires: Instant,
}

/// Time-bounded descriptor cache keyed by job id.
pub struct DescriptorCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl DescriptorCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, job_id: &str) -> Option<FileDescriptor> {
        let mut entries = self.lock();
        match entries.get(job_id) {
            Some(e) if e.expires > Instant::now() => Some(e.descriptor.clone()),
            Some(_) => {
                entries.remove(job_id);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, job_id: &str, descriptor: FileDescriptor) {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, e| e.expires > now);
        entries.insert(
            job_id.to_string(),
            CacheEntry {
                descriptor,
                expires: now + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct StreamResolver {
    sessions: Arc<SessionTable>,
    tracker: StatusTracker,
    blobs: Arc<dyn BlobStore>,
    lookup_timeout: Duration,
    cache: DescriptorCache,
}

impl StreamResolver {
    pub fn new(
        sessions: Arc<SessionTable>,
        tracker: StatusTracker,
        blobs: Arc<dyn BlobStore>,
        lookup_timeout: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            sessions,
            tracker,
            blobs,
            lookup_timeout,
            cache: DescriptorCache::new(cache_ttl),
        }
    }

    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }

    pub async fn resolve(&self, job_id: &str) -> Result<ResolvedStream, StreamError> {
        if let Some(stream) = self.resolve_live(job_id).await {
            return Ok(stream);
        }
        self.resolve_artifact(job_id).await
    }

    async fn resolve_live(&self, job_id: &str) -> Option<ResolvedStream> {
        let session = self.sessions.get(job_id)?;
        let reader = match session.open_reader(self.lookup_timeout).await {
            Ok((reader, _)) => reader,
            Err(e) => {
                tracing::debug!(job_id, error = %e, "live session has no reader");
                return None;
            }
        };

        let descriptor = match self.cache.get(job_id) {
            Some(d) => d,
            None => match session.describe(self.lookup_timeout).await {
                Ok(d) => {
                    self.cache.insert(job_id, d.clone());
                    d
                }
                Err(e) => {
                    tracing::warn!(job_id, error = %e, "metadata lookup failed; serving placeholder");
                    FileDescriptor::placeholder()
                }
            },
        };

        Some(ResolvedStream {
            reader,
            descriptor,
            source: StreamSource::Live,
        })
    }

    async fn resolve_artifact(&self, job_id: &str) -> Result<ResolvedStream, StreamError> {
        let record = match self.tracker.get(job_id).await {
            Ok(r) => r,
            Err(StatusError::NotFound(_)) => return Err(StreamError::NotFound(job_id.to_string())),
            Err(e) => return Err(e.into()),
        };
        if record.status != Status::Downloaded || record.artifact_path.is_empty() {
            return Err(StreamError::NotFound(job_id.to_string()));
        }

        let (reader, len) = self
            .blobs
            .open(&record.artifact_path)
            .await
            .map_err(StreamError::Blob)?;
        let descriptor = match self.cache.get(job_id) {
            Some(d) => d,
            None => {
                let name = Path::new(&record.artifact_path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| record.artifact_path.clone());
                let d = FileDescriptor::from_path(0, &name, len);
                self.cache.insert(job_id, d.clone());
                d
            }
        };

        Ok(ResolvedStream {
            reader,
            descriptor,
            source: StreamSource::Artifact,
        })
    }
}
