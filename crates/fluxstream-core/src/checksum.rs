//! SHA-256 of persisted artifacts, computed on demand.
//!
//! Never run inline with a download; the `checksum` command calls it for
//! finished records.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

const BUF_SIZE: usize = 64 * 1024;

/// SHA-256 of a file as lowercase hex. Reads in fixed-size chunks.
pub fn sha256_path(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash an artifact on the blocking pool so large files don't stall the runtime.
pub async fn sha256_artifact(path: impl Into<PathBuf>) -> Result<String> {
    let path = path.into();
    tokio::task::spawn_blocking(move || sha256_path(&path))
        .await
        .context("checksum task panicked")?
}

/// Compare an artifact against an expected hex digest (case-insensitive).
pub async fn verify_artifact(path: impl Into<PathBuf>, expected: &str) -> Result<bool> {
    let actual = sha256_artifact(path).await?;
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}
