//! `fluxstream delete <id>` – toggle the logical delete flag.

use anyhow::Result;
use fluxstream_core::config::FluxConfig;
use fluxstream_core::Fluxstream;

pub async fn run_delete(cfg: &FluxConfig, id: &str, restore: bool) -> Result<()> {
    let service = Fluxstream::open(cfg).await?;
    service.set_deleted(id, !restore).await?;
    if restore {
        println!("Restored {id}");
    } else {
        println!("Deleted {id}");
    }
    Ok(())
}
