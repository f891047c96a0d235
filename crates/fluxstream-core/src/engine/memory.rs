//! In-process engine serving scripted content.
//!
//! Content is registered per content reference. Metadata can be delayed or
//! withheld, readers can be held behind a shared gate, file listings and
//! releases can be made to fail, and begin/release calls are counted, which
//! is what pipeline tests need to observe.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

use super::{ContentReader, EngineHandle, MetadataWait, TransferEngine};
use crate::media::FileDescriptor;

/// Bytes handed out per read chunk.
const CHUNK: usize = 64 * 1024;

/// What the engine serves for one content reference.
#[derive(Debug, Clone, Default)]
pub struct ScriptedContent {
    files: Vec<(String, Bytes)>,
    metadata_delay: Duration,
    never_ready: bool,
    failing_reader: bool,
    length_override: Option<u64>,
    listings_allowed: Option<usize>,
    stalled_listing: bool,
    failing_release: bool,
    /// `list_files` calls made on this transfer.
    listed: usize,
}

impl ScriptedContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: &str, data: impl Into<Bytes>) -> Self {
        self.files.push((path.to_string(), data.into()));
        self
    }

    /// Metadata becomes available only after `delay`.
    pub fn metadata_after(mut self, delay: Duration) -> Self {
        self.metadata_delay = delay;
        self
    }

    /// Metadata never arrives.
    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    /// `open_reader` fails.
    pub fn failing_reader(mut self) -> Self {
        self.failing_reader = true;
        self
    }

    /// Report this length for every file instead of the real one.
    pub fn reported_length(mut self, len: u64) -> Self {
        self.length_override = Some(len);
        self
    }

    /// Only the first `n` `list_files` calls per transfer succeed.
    pub fn listing_fails_after(mut self, n: usize) -> Self {
        self.listings_allowed = Some(n);
        self
    }

    /// `list_files` never returns.
    pub fn stalled_listing(mut self) -> Self {
        self.stalled_listing = true;
        self
    }

    /// `release` drops the transfer but reports an error.
    pub fn failing_release(mut self) -> Self {
        self.failing_release = true;
        self
    }

    fn descriptors(&self) -> Vec<FileDescriptor> {
        self.files
            .iter()
            .enumerate()
            .map(|(i, (path, data))| {
                let len = self.length_override.unwrap_or(data.len() as u64);
                FileDescriptor::from_path(i, path, len)
            })
            .collect()
    }
}

pub struct MemoryEngine {
    catalog: Mutex<HashMap<String, ScriptedContent>>,
    transfers: Mutex<HashMap<EngineHandle, ScriptedContent>>,
    next_handle: AtomicU64,
    gate: watch::Sender<bool>,
    begins: AtomicUsize,
    releases: AtomicUsize,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            catalog: Mutex::new(HashMap::new()),
            transfers: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            gate,
            begins: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    /// Register (or replace) the content served for `content_ref`.
    pub fn add(&self, content_ref: &str, content: ScriptedContent) {
        lock(&self.catalog).insert(content_ref.to_string(), content);
    }

    /// Hold every reader's bytes until [`open_gate`](Self::open_gate).
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Transfers begun and not yet released.
    pub fn live_transfers(&self) -> usize {
        lock(&self.transfers).len()
    }

    fn transfer(&self, handle: EngineHandle) -> Result<ScriptedContent> {
        lock(&self.transfers)
            .get(&handle)
            .cloned()
            .ok_or_else(|| anyhow!("unknown {}", handle))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl TransferEngine for MemoryEngine {
    async fn begin(&self, content_ref: &str) -> Result<EngineHandle> {
        let content = lock(&self.catalog)
            .get(content_ref)
            .cloned()
            .ok_or_else(|| anyhow!("nothing registered for {}", content_ref))?;
        let handle = EngineHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        lock(&self.transfers).insert(handle, content);
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn await_metadata(&self, handle: EngineHandle, timeout: Duration) -> Result<MetadataWait> {
        let content = self.transfer(handle)?;
        if content.never_ready || content.metadata_delay > timeout {
            tokio::time::sleep(timeout).await;
            return Ok(MetadataWait::TimedOut);
        }
        tokio::time::sleep(content.metadata_delay).await;
        Ok(MetadataWait::Ready)
    }

    async fn list_files(&self, handle: EngineHandle) -> Result<Vec<FileDescriptor>> {
        let content = {
            let mut transfers = lock(&self.transfers);
            let content = transfers
                .get_mut(&handle)
                .ok_or_else(|| anyhow!("unknown {}", handle))?;
            content.listed += 1;
            content.clone()
        };
        if content.stalled_listing {
            std::future::pending::<()>().await;
        }
        if content.listings_allowed.is_some_and(|n| content.listed > n) {
            bail!("file listing for {} failed", handle);
        }
        Ok(content.descriptors())
    }

    async fn open_reader(&self, handle: EngineHandle, index: usize) -> Result<ContentReader> {
        let content = self.transfer(handle)?;
        if content.failing_reader {
            bail!("reader unavailable for {}", handle);
        }
        let data = content
            .files
            .get(index)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| anyhow!("{} has no file at index {}", handle, index))?;

        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(4);
        let mut gate = self.gate.subscribe();
        tokio::spawn(async move {
            if gate.wait_for(|open| *open).await.is_err() {
                return;
            }
            let mut offset = 0;
            while offset < data.len() {
                let end = (offset + CHUNK).min(data.len());
                if tx.send(Ok(data.slice(offset..end))).await.is_err() {
                    return;
                }
                offset = end;
            }
        });
        Ok(Box::new(StreamReader::new(ReceiverStream::new(rx))))
    }

    async fn release(&self, handle: EngineHandle) -> Result<()> {
        let Some(content) = lock(&self.transfers).remove(&handle) else {
            bail!("unknown {}", handle);
        };
        self.releases.fetch_add(1, Ordering::SeqCst);
        if content.failing_release {
            bail!("engine refused to drop {}", handle);
        }
        Ok(())
    }
}
