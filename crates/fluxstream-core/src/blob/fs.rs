//! Local filesystem blob store.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};

use super::{sanitize_component, temp_path, BlobStore, StoredBlob};
use crate::engine::ContentReader;

/// Stores artifacts at `<root>/<job_id>/<file name>`.
///
/// Bytes go to `<name>.part` first; the final name only appears once the
/// whole stream has been written and synced.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a destination name onto a path under the root, sanitizing each component.
    fn resolve(&self, dest_name: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        let mut parts = 0;
        for part in dest_name.split('/').filter(|p| !p.is_empty()) {
            path.push(sanitize_component(part));
            parts += 1;
        }
        if parts == 0 {
            bail!("empty destination name");
        }
        Ok(path)
    }

    /// Reject paths that escape the root.
    fn check_inside_root(&self, path: &Path) -> Result<()> {
        if !path.starts_with(&self.root)
            || path.components().any(|c| matches!(c, Component::ParentDir))
        {
            bail!("{} is outside the blob root {}", path.display(), self.root.display());
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write_stream(
        &self,
        dest_name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<StoredBlob> {
        let final_path = self.resolve(dest_name)?;
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let part = temp_path(&final_path);
        let mut file = tokio::fs::File::create(&part)
            .await
            .with_context(|| format!("create {}", part.display()))?;

        let copied = tokio::io::copy(reader, &mut file).await;
        let bytes = match copied {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                if let Err(rm) = tokio::fs::remove_file(&part).await {
                    tracing::debug!(path = %part.display(), error = %rm, "could not remove partial artifact");
                }
                return Err(anyhow::Error::new(e).context(format!("write {}", part.display())));
            }
        };
        file.flush().await?;
        file.sync_all()
            .await
            .with_context(|| format!("sync {}", part.display()))?;
        drop(file);

        tokio::fs::rename(&part, &final_path)
            .await
            .with_context(|| format!("rename {} to {}", part.display(), final_path.display()))?;

        Ok(StoredBlob {
            path: final_path.to_string_lossy().into_owned(),
            bytes,
        })
    }

    async fn open(&self, path: &str) -> Result<(ContentReader, u64)> {
        let path = Path::new(path);
        self.check_inside_root(path)?;
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        let len = file
            .metadata()
            .await
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        Ok((Box::new(file), len))
    }
}
