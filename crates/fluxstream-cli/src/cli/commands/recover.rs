//! `fluxstream recover` – republish stranded records.

use anyhow::{bail, Result};
use fluxstream_core::config::FluxConfig;
use fluxstream_core::{Fluxstream, Recovery};

pub async fn run_recover(cfg: &FluxConfig) -> Result<()> {
    let service = Fluxstream::open(cfg).await?;
    let ids = match service.recover_stranded().await? {
        Recovery::Republished(ids) => ids,
        Recovery::RunnerActive(holders) => bail!(
            "a pipeline is running ({}); stop it before recovering",
            holders.join(", ")
        ),
    };
    if ids.is_empty() {
        println!("Nothing to recover.");
    } else {
        for id in &ids {
            println!("Republished {id}");
        }
    }
    let counts = service.queue_counts().await?;
    println!(
        "Queue: {} ready, {} pending, {} acked",
        counts.ready, counts.pending, counts.acked
    );
    Ok(())
}
