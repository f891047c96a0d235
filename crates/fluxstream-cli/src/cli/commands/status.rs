//! `fluxstream status <id>` – show one record.

use anyhow::Result;
use fluxstream_core::config::FluxConfig;
use fluxstream_core::Fluxstream;

pub async fn run_status(cfg: &FluxConfig, id: &str) -> Result<()> {
    let service = Fluxstream::open(cfg).await?;
    let r = service.query_status(id).await?;
    println!("id:        {}", r.id);
    println!("status:    {}", r.status);
    println!("ref:       {}", r.content_ref);
    println!(
        "artifact:  {}",
        if r.artifact_path.is_empty() {
            "-"
        } else {
            r.artifact_path.as_str()
        }
    );
    println!("created:   {}", r.created_at);
    if r.deleted {
        println!("deleted:   yes");
    }
    Ok(())
}
