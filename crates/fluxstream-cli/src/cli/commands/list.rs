//! `fluxstream list` – table of records that are not deleted.

use anyhow::Result;
use fluxstream_core::config::FluxConfig;
use fluxstream_core::Fluxstream;

pub async fn run_list(cfg: &FluxConfig) -> Result<()> {
    let service = Fluxstream::open(cfg).await?;
    let records = service.list_active().await?;
    if records.is_empty() {
        println!("No records.");
        return Ok(());
    }
    println!("{:<9} {:<12} {:<11} {}", "ID", "STATUS", "CREATED", "ARTIFACT");
    for r in records {
        let artifact = if r.artifact_path.is_empty() {
            "-"
        } else {
            r.artifact_path.as_str()
        };
        println!(
            "{:<9} {:<12} {:<11} {}",
            r.id,
            r.status.as_str(),
            r.created_at,
            artifact
        );
    }
    Ok(())
}
