//! CLI for the fluxstream download pipeline.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use fluxstream_core::config;
use std::path::PathBuf;

use commands::{
    run_checksum, run_completions, run_delete, run_list, run_pipeline, run_recover, run_status,
    run_stream, run_submit,
};

/// Top-level CLI for fluxstream.
#[derive(Debug, Parser)]
#[command(name = "fluxstream")]
#[command(about = "fluxstream: queue-driven downloads of magnet media", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Submit a magnet link for download.
    Submit {
        /// Magnet link (with http `ws`/`as`/`xs` sources).
        content_ref: String,
        /// Use this 8-character id instead of a random one.
        #[arg(long, value_name = "ID")]
        id: Option<String>,
    },

    /// Show one record.
    Status {
        /// Record id.
        id: String,
    },

    /// List records that are not deleted, newest first.
    List,

    /// Run the pipeline until interrupted (Ctrl-C drains in-flight jobs).
    Run {
        /// Worker count (default from config).
        #[arg(long, value_name = "N")]
        workers: Option<usize>,
        /// Queue consumer name (default from config).
        #[arg(long, value_name = "NAME")]
        consumer: Option<String>,
        /// Do not republish stranded records before starting.
        #[arg(long)]
        no_recover: bool,
    },

    /// Write the content of a record to stdout or a file.
    Stream {
        /// Record id.
        id: String,
        /// Output file (default: stdout).
        #[arg(long, short = 'o', value_name = "PATH")]
        out: Option<PathBuf>,
    },

    /// Hide a record from listings (logical delete).
    Delete {
        /// Record id.
        id: String,
        /// Clear the delete flag instead.
        #[arg(long)]
        restore: bool,
    },

    /// Republish records left in processing/downloading with nothing in flight.
    Recover,

    /// Compute SHA-256 of a file, optionally checking it against a digest.
    Checksum {
        /// Path to the file.
        path: PathBuf,
        /// Expected hex digest; exit with an error on mismatch.
        #[arg(long, value_name = "HEX")]
        verify: Option<String>,
    },

    /// Print shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        // Commands that need neither config nor database.
        let command = match cli.command {
            CliCommand::Completions { shell } => return run_completions(shell),
            CliCommand::Checksum { path, verify } => {
                return run_checksum(&path, verify.as_deref()).await
            }
            other => other,
        };

        let mut cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match command {
            CliCommand::Submit { content_ref, id } => {
                run_submit(&cfg, &content_ref, id.as_deref()).await?
            }
            CliCommand::Status { id } => run_status(&cfg, &id).await?,
            CliCommand::List => run_list(&cfg).await?,
            CliCommand::Run {
                workers,
                consumer,
                no_recover,
            } => {
                if let Some(n) = workers {
                    cfg.workers = n;
                }
                if let Some(name) = consumer {
                    cfg.consumer_name = name;
                }
                run_pipeline(&cfg, !no_recover).await?
            }
            CliCommand::Stream { id, out } => run_stream(&cfg, &id, out.as_deref()).await?,
            CliCommand::Delete { id, restore } => run_delete(&cfg, &id, restore).await?,
            CliCommand::Recover => run_recover(&cfg).await?,
            CliCommand::Checksum { .. } | CliCommand::Completions { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
