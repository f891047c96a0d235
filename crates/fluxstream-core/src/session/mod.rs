//! Per-job transfer sessions and the table that holds them.
//!
//! A session wraps one engine handle. It moves
//! `Unstarted -> MetadataPending -> Ready -> Reading -> Released`, with any
//! state able to jump to `Released`. Release is idempotent and the engine
//! handle is released exactly once.

mod table;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::engine::{ContentReader, EngineHandle, MetadataWait, TransferEngine};
use crate::error::SessionError;
use crate::media::{select_main_file, FileDescriptor};

pub use table::SessionTable;

#[derive(Debug, Clone)]
enum SessionState {
    Unstarted,
    MetadataPending { handle: EngineHandle },
    Ready { handle: EngineHandle, main: FileDescriptor },
    Reading { handle: EngineHandle, main: FileDescriptor },
    Released,
}

impl SessionState {
    fn handle(&self) -> Option<EngineHandle> {
        match self {
            SessionState::MetadataPending { handle }
            | SessionState::Ready { handle, .. }
            | SessionState::Reading { handle, .. } => Some(*handle),
            SessionState::Unstarted | SessionState::Released => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SessionState::Unstarted => "unstarted",
            SessionState::MetadataPending { .. } => "metadata_pending",
            SessionState::Ready { .. } => "ready",
            SessionState::Reading { .. } => "reading",
            SessionState::Released => "released",
        }
    }
}

/// One live transfer for one job id.
pub struct TransferSession {
    job_id: String,
    engine: Arc<dyn TransferEngine>,
    state: Mutex<SessionState>,
}

impl TransferSession {
    pub fn new(job_id: impl Into<String>, engine: Arc<dyn TransferEngine>) -> Self {
        Self {
            job_id: job_id.into(),
            engine,
            state: Mutex::new(SessionState::Unstarted),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Current state name, for logs.
    pub async fn state_name(&self) -> &'static str {
        self.state.lock().await.name()
    }

    pub async fn is_released(&self) -> bool {
        matches!(*self.state.lock().await, SessionState::Released)
    }

    /// Start the transfer, wait for metadata and select the main media file.
    /// The metadata wait and the file listing are each bounded by
    /// `metadata_timeout`.
    ///
    /// On timeout, engine failure or content without media the engine
    /// handle is released before the error is returned.
    pub async fn acquire(
        &self,
        content_ref: &str,
        metadata_timeout: Duration,
    ) -> Result<FileDescriptor, SessionError> {
        let handle = {
            let mut state = self.state.lock().await;
            match &*state {
                SessionState::Unstarted => {}
                SessionState::Released => return Err(SessionError::Released(self.job_id.clone())),
                _ => return Err(SessionError::AlreadyStarted(self.job_id.clone())),
            }
            let handle = self.engine.begin(content_ref).await?;
            *state = SessionState::MetadataPending { handle };
            handle
        };
        tracing::debug!(job_id = %self.job_id, %handle, "waiting for metadata");

        match self.engine.await_metadata(handle, metadata_timeout).await {
            Ok(MetadataWait::Ready) => {}
            Ok(MetadataWait::TimedOut) => {
                self.abort().await;
                return Err(SessionError::MetadataTimeout {
                    job_id: self.job_id.clone(),
                    waited: metadata_timeout,
                });
            }
            Err(e) => {
                self.abort().await;
                return Err(e.into());
            }
        }

        let listed = tokio::time::timeout(metadata_timeout, self.engine.list_files(handle)).await;
        let files = match listed {
            Ok(Ok(files)) => files,
            Ok(Err(e)) => {
                self.abort().await;
                return Err(e.into());
            }
            Err(_) => {
                self.abort().await;
                return Err(anyhow::anyhow!(
                    "file listing for {} took longer than {:?}",
                    self.job_id,
                    metadata_timeout
                )
                .into());
            }
        };
        let Some(main) = select_main_file(&files).cloned() else {
            self.abort().await;
            return Err(SessionError::NoMediaFile(self.job_id.clone()));
        };

        let mut state = self.state.lock().await;
        match &*state {
            SessionState::MetadataPending { .. } => {
                *state = SessionState::Ready {
                    handle,
                    main: main.clone(),
                };
                tracing::debug!(job_id = %self.job_id, file = %main.path, length = main.length, "main file selected");
                Ok(main)
            }
            // Released by someone else while metadata was pending.
            _ => Err(SessionError::Released(self.job_id.clone())),
        }
    }

    /// Open a byte stream over the main file, bounded by `lookup_timeout`.
    ///
    /// May be called more than once; every call reports the same descriptor.
    pub async fn open_reader(
        &self,
        lookup_timeout: Duration,
    ) -> Result<(ContentReader, FileDescriptor), SessionError> {
        let (handle, main) = {
            let mut state = self.state.lock().await;
            let (handle, main) = match &*state {
                SessionState::Ready { handle, main } | SessionState::Reading { handle, main } => {
                    (*handle, main.clone())
                }
                SessionState::Released => return Err(SessionError::Released(self.job_id.clone())),
                _ => return Err(SessionError::NotReady(self.job_id.clone())),
            };
            *state = SessionState::Reading {
                handle,
                main: main.clone(),
            };
            (handle, main)
        };

        let reader = tokio::time::timeout(lookup_timeout, self.engine.open_reader(handle, main.index))
            .await
            .map_err(|_| {
                anyhow::anyhow!("opening reader for {} took longer than {:?}", self.job_id, lookup_timeout)
            })??;
        Ok((reader, main))
    }

    /// Fresh descriptor of the main file from the engine, bounded by `lookup_timeout`.
    pub async fn describe(&self, lookup_timeout: Duration) -> Result<FileDescriptor, SessionError> {
        let (handle, index) = {
            let state = self.state.lock().await;
            match &*state {
                SessionState::Ready { handle, main } | SessionState::Reading { handle, main } => {
                    (*handle, main.index)
                }
                SessionState::Released => return Err(SessionError::Released(self.job_id.clone())),
                _ => return Err(SessionError::NotReady(self.job_id.clone())),
            }
        };

        let files = tokio::time::timeout(lookup_timeout, self.engine.list_files(handle))
            .await
            .map_err(|_| {
                anyhow::anyhow!("file lookup for {} took longer than {:?}", self.job_id, lookup_timeout)
            })??;
        files
            .into_iter()
            .find(|f| f.index == index)
            .ok_or_else(|| anyhow::anyhow!("file {} vanished from {}", index, handle).into())
    }

    /// Descriptor selected by `acquire`, if the session is live.
    pub async fn descriptor(&self) -> Option<FileDescriptor> {
        match &*self.state.lock().await {
            SessionState::Ready { main, .. } | SessionState::Reading { main, .. } => Some(main.clone()),
            _ => None,
        }
    }

    /// Release the engine handle. Releasing again, or releasing a session
    /// that never started, is a no-op.
    pub async fn release(&self) -> Result<(), SessionError> {
        let previous = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, SessionState::Released)
        };
        match previous.handle() {
            Some(handle) => {
                self.engine.release(handle).await?;
                tracing::debug!(job_id = %self.job_id, %handle, from = previous.name(), "transfer released");
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn abort(&self) {
        if let Err(e) = self.release().await {
            tracing::warn!(job_id = %self.job_id, error = %e, "release after failed acquire");
        }
    }
}
