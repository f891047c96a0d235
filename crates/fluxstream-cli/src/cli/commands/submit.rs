//! `fluxstream submit <magnet>` – create a record and queue its job.

use anyhow::Result;
use fluxstream_core::config::FluxConfig;
use fluxstream_core::{Fluxstream, Submitted};

pub async fn run_submit(cfg: &FluxConfig, content_ref: &str, id: Option<&str>) -> Result<()> {
    let service = Fluxstream::open(cfg).await?;
    match id {
        Some(id) => match service.submit_job_with_id(id, content_ref).await? {
            Submitted::New => println!("Submitted job {id}"),
            Submitted::Duplicate => println!("Job {id} already exists; nothing queued"),
        },
        None => {
            let id = service.submit_job(content_ref).await?;
            println!("Submitted job {id}");
        }
    }
    Ok(())
}
