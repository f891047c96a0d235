//! `fluxstream stream <id>` – copy a live or persisted stream out.

use anyhow::{Context, Result};
use fluxstream_core::config::FluxConfig;
use fluxstream_core::Fluxstream;
use std::path::Path;

pub async fn run_stream(cfg: &FluxConfig, id: &str, out: Option<&Path>) -> Result<()> {
    let service = Fluxstream::open(cfg).await?;
    let mut stream = service.open_stream(id).await?;
    tracing::info!(
        job_id = id,
        source = ?stream.source,
        name = %stream.descriptor.name,
        content_type = stream.descriptor.content_type(),
        "streaming"
    );

    let copied = match out {
        Some(path) => {
            let mut file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("create {}", path.display()))?;
            let n = tokio::io::copy(&mut stream.reader, &mut file).await?;
            file.sync_all().await?;
            eprintln!("Wrote {} bytes of {} to {}", n, stream.descriptor.name, path.display());
            n
        }
        None => {
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut stream.reader, &mut stdout).await?
        }
    };
    tracing::debug!(job_id = id, bytes = copied, "stream finished");
    Ok(())
}
