//! `fluxstream run` – run ingress, workers and the error sink until Ctrl-C.

use anyhow::Result;
use fluxstream_core::config::FluxConfig;
use fluxstream_core::{Fluxstream, Recovery};

pub async fn run_pipeline(cfg: &FluxConfig, recover: bool) -> Result<()> {
    let service = Fluxstream::open(cfg).await?;

    if recover {
        match service.recover_stranded().await? {
            Recovery::Republished(ids) if !ids.is_empty() => {
                tracing::info!("republished {} stranded job(s)", ids.len());
            }
            Recovery::Republished(_) => {}
            Recovery::RunnerActive(holders) => {
                println!("Another runner is active ({}); skipping recovery.", holders.join(", "));
            }
        }
    }

    let runtime = service.start().await?;
    println!(
        "Pipeline running with {} worker(s) as {:?}. Ctrl-C to stop.",
        service.settings().workers,
        service.settings().consumer
    );

    tokio::signal::ctrl_c().await?;
    println!("Stopping: finishing admitted jobs...");
    let summary = runtime.shutdown().await;

    println!(
        "admitted {}, downloaded {}, failed {}, skipped {}, dropped {}",
        summary.ingress.admitted,
        summary.workers.downloaded,
        summary.workers.failed,
        summary.workers.skipped,
        summary.ingress.dropped
    );
    if summary.errors.write_errors > 0 {
        tracing::warn!(
            "{} failure(s) could not be recorded",
            summary.errors.write_errors
        );
    }
    Ok(())
}
