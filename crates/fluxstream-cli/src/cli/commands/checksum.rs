//! Checksum command: compute or verify SHA-256 of a file.

use anyhow::{bail, Result};
use fluxstream_core::checksum;
use std::path::Path;

/// Print the SHA-256 of `path`; with `expected`, fail on mismatch.
pub async fn run_checksum(path: &Path, expected: Option<&str>) -> Result<()> {
    let digest = checksum::sha256_artifact(path).await?;
    println!("{}  {}", digest, path.display());
    if let Some(expected) = expected {
        if !digest.eq_ignore_ascii_case(expected.trim()) {
            bail!("checksum mismatch for {}: expected {}", path.display(), expected);
        }
        println!("OK");
    }
    Ok(())
}
