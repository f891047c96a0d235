//! Fluxstream wired to in-process collaborators.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fluxstream_core::blob::FsBlobStore;
use fluxstream_core::engine::{MemoryEngine, TransferEngine};
use fluxstream_core::store::{FluxDb, Status};
use fluxstream_core::{Collaborators, ContentRecord, Fluxstream, Settings};

pub struct Harness {
    pub service: Fluxstream,
    pub db: FluxDb,
    pub engine: Arc<MemoryEngine>,
    pub downloads: tempfile::TempDir,
}

/// Short timeouts so failing paths finish quickly.
pub fn test_settings() -> Settings {
    Settings {
        metadata_timeout: Duration::from_millis(300),
        lookup_timeout: Duration::from_secs(2),
        ..Settings::default()
    }
}

pub async fn harness(settings: Settings) -> Harness {
    let engine = Arc::new(MemoryEngine::new());
    harness_with_engine(settings, engine.clone(), engine).await
}

/// Harness whose pipeline uses `engine`; `memory` is kept for assertions.
pub async fn harness_with_engine(
    settings: Settings,
    memory: Arc<MemoryEngine>,
    engine: Arc<dyn TransferEngine>,
) -> Harness {
    let db = FluxDb::open_memory()
        .await
        .unwrap()
        .with_queue_timing(Duration::from_millis(100), Duration::from_millis(5));
    let downloads = tempfile::tempdir().unwrap();
    let service = Fluxstream::new(
        Collaborators {
            store: Arc::new(db.clone()),
            queue: Arc::new(db.clone()),
            engine,
            blobs: Arc::new(FsBlobStore::new(downloads.path())),
        },
        settings,
    );
    Harness {
        service,
        db,
        engine: memory,
        downloads,
    }
}

/// Poll until record `id` reaches `status`, panicking after `within`.
pub async fn wait_for_status(
    service: &Fluxstream,
    id: &str,
    status: Status,
    within: Duration,
) -> ContentRecord {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let rec = service.query_status(id).await.unwrap();
        if rec.status == status {
            return rec;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{id} stuck in {} waiting for {status}",
            rec.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
