//! Web-seed transfer engine.
//!
//! Resolves the HTTP sources (`ws`, `as`, `xs`) of a magnet link: one HEAD
//! probe per source yields the file list, and a streaming GET serves each
//! file. Links without HTTP sources are rejected at `begin`; peer wire
//! transfers are not implemented.

mod fetch;
mod probe;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use super::{ContentReader, EngineHandle, MetadataWait, TransferEngine};
use crate::magnet::MagnetLink;
use crate::media::FileDescriptor;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct SeedFile {
    url: Url,
    descriptor: FileDescriptor,
}

/// `None` while probing; then the file list or the probe failure.
type Metadata = Option<Result<Arc<Vec<SeedFile>>, String>>;

struct SeedTransfer {
    metadata: watch::Receiver<Metadata>,
    probe: JoinHandle<()>,
}

pub struct HttpSeedEngine {
    transfers: Mutex<HashMap<EngineHandle, SeedTransfer>>,
    next_handle: AtomicU64,
    probe_timeout: Duration,
}

impl Default for HttpSeedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpSeedEngine {
    pub fn new() -> Self {
        Self {
            transfers: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Per-request bound for HEAD probes and GET connects.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EngineHandle, SeedTransfer>> {
        self.transfers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn metadata_rx(&self, handle: EngineHandle) -> Result<watch::Receiver<Metadata>> {
        self.lock()
            .get(&handle)
            .map(|t| t.metadata.clone())
            .ok_or_else(|| anyhow!("unknown {}", handle))
    }

    fn ready_files(&self, handle: EngineHandle) -> Result<Arc<Vec<SeedFile>>> {
        let rx = self.metadata_rx(handle)?;
        let current = rx.borrow();
        match &*current {
            None => bail!("metadata for {} is not ready", handle),
            Some(Err(e)) => bail!("metadata for {} failed: {}", handle, e),
            Some(Ok(files)) => Ok(Arc::clone(files)),
        }
    }
}

#[async_trait]
impl TransferEngine for HttpSeedEngine {
    async fn begin(&self, content_ref: &str) -> Result<EngineHandle> {
        let link = MagnetLink::parse(content_ref)?;
        if link.sources.is_empty() {
            bail!(
                "{} has no http sources; peer transfers are not supported",
                link.label()
            );
        }

        let handle = EngineHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = watch::channel(None);
        let timeout = self.probe_timeout;
        let probe = tokio::spawn(async move {
            let result = resolve_files(&link, timeout)
                .await
                .map(Arc::new)
                .map_err(|e| format!("{e:#}"));
            let _ = tx.send(Some(result));
        });

        self.lock().insert(handle, SeedTransfer { metadata: rx, probe });
        tracing::debug!(%handle, "web-seed transfer started");
        Ok(handle)
    }

    async fn await_metadata(&self, handle: EngineHandle, timeout: Duration) -> Result<MetadataWait> {
        let mut rx = self.metadata_rx(handle)?;
        let waited = tokio::time::timeout(timeout, rx.wait_for(|m| m.is_some())).await;
        match waited {
            Err(_) => Ok(MetadataWait::TimedOut),
            Ok(Err(_)) => bail!("{} was released while waiting for metadata", handle),
            Ok(Ok(m)) => match &*m {
                Some(Err(e)) => bail!("metadata for {} failed: {}", handle, e),
                _ => Ok(MetadataWait::Ready),
            },
        }
    }

    async fn list_files(&self, handle: EngineHandle) -> Result<Vec<FileDescriptor>> {
        let files = self.ready_files(handle)?;
        Ok(files.iter().map(|f| f.descriptor.clone()).collect())
    }

    async fn open_reader(&self, handle: EngineHandle, index: usize) -> Result<ContentReader> {
        let files = self.ready_files(handle)?;
        let file = files
            .get(index)
            .ok_or_else(|| anyhow!("{} has no file at index {}", handle, index))?;
        tracing::debug!(%handle, url = %file.url, "opening web-seed stream");
        Ok(fetch::open_stream(file.url.to_string(), self.probe_timeout))
    }

    async fn release(&self, handle: EngineHandle) -> Result<()> {
        match self.lock().remove(&handle) {
            Some(t) => {
                t.probe.abort();
                Ok(())
            }
            None => bail!("unknown {}", handle),
        }
    }
}

/// Probe every source; sources that fail are skipped, none left is an error.
async fn resolve_files(link: &MagnetLink, timeout: Duration) -> Result<Vec<SeedFile>> {
    let single = link.sources.len() == 1;
    let mut files = Vec::with_capacity(link.sources.len());
    let mut last_err = None;

    for url in &link.sources {
        let target = url.to_string();
        let head = tokio::task::spawn_blocking(move || probe::probe(&target, timeout)).await?;
        let head = match head {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(url = %url, error = %format!("{e:#}"), "web-seed probe failed");
                last_err = Some(e);
                continue;
            }
        };

        let name = head
            .filename
            .or_else(|| filename_from_url(url))
            .or_else(|| link.display_name.clone().filter(|_| single))
            .unwrap_or_else(|| format!("file{}", files.len()));
        let length = head
            .content_length
            .or(link.exact_length.filter(|_| single))
            .unwrap_or(0);

        let descriptor = FileDescriptor::from_path(files.len(), &name, length);
        files.push(SeedFile {
            url: url.clone(),
            descriptor,
        });
    }

    if files.is_empty() {
        return Err(last_err.unwrap_or_else(|| anyhow!("no usable http sources")));
    }
    Ok(files)
}

/// Last non-empty path segment, percent-decoded.
fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = percent_decode(segment);
    if decoded.is_empty() || decoded == "." || decoded == ".." {
        return None;
    }
    Some(decoded)
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(h), Some(l)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                out.push(h << 4 | l);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_filenames_are_decoded() {
        let u = Url::parse("http://seed.example/media/My%20Movie.mkv?sig=1").unwrap();
        assert_eq!(filename_from_url(&u).as_deref(), Some("My Movie.mkv"));
        let root = Url::parse("http://seed.example/").unwrap();
        assert_eq!(filename_from_url(&root), None);
    }

    #[test]
    fn percent_decode_keeps_malformed_escapes() {
        assert_eq!(percent_decode("a%2Fb"), "a/b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }

    #[tokio::test]
    async fn begin_rejects_links_without_http_sources() {
        let engine = HttpSeedEngine::new();
        let err = engine.begin("magnet:?xt=urn:btih:EXAMPLE").await.unwrap_err();
        assert!(err.to_string().contains("no http sources"));
        assert!(engine.begin("http://example.com/a.mp4").await.is_err());
    }

    #[tokio::test]
    async fn unknown_handles_are_errors() {
        let engine = HttpSeedEngine::new();
        assert!(engine.list_files(EngineHandle(42)).await.is_err());
        assert!(engine.release(EngineHandle(42)).await.is_err());
    }
}
