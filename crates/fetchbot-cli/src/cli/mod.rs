//! CLI for the fetchbot job orchestration core.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fetchbot_core::config;
use std::path::PathBuf;

use commands::{parse_request, run_fetch, run_forget, run_history, run_lookup, run_serve, Runtime};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "fetchbot")]
#[command(about = "fetchbot: fetch media by link and deliver it to a chat outbox", long_about = None)]
pub struct Cli {
    /// Document store file (default: XDG state dir, or `db_path` from config).
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch one link and deliver it. A `URL*start*end` suffix also selects a playlist range.
    Fetch {
        /// Source URL.
        url: String,
        /// Requester identity (also the destination chat unless --destination is given).
        #[arg(long, default_value = "local")]
        identity: String,
        /// Quality: `best`, `audio`, or a height such as `720p`.
        #[arg(long, short, default_value = "best")]
        quality: String,
        /// Playlist items, `N` or `A-B`.
        #[arg(long, value_name = "RANGE")]
        items: Option<String>,
        /// Destination chat.
        #[arg(long)]
        destination: Option<String>,
    },

    /// Read JSON-lines requests and run them until input ends or Ctrl-C.
    Serve {
        /// Request file; stdin when omitted.
        #[arg(long, value_name = "PATH")]
        requests: Option<PathBuf>,
    },

    /// Show which items of a request are already cached.
    Lookup {
        url: String,
        #[arg(long, short, default_value = "best")]
        quality: String,
        /// Playlist items, `N` or `A-B`.
        #[arg(long, value_name = "RANGE")]
        items: Option<String>,
    },

    /// Drop cached deliveries for a request (one item with --item).
    Forget {
        url: String,
        #[arg(long, short, default_value = "best")]
        quality: String,
        #[arg(long)]
        item: Option<u32>,
    },

    /// List recent deliveries for an identity.
    History {
        identity: String,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let db_path = cli.db.or_else(|| cfg.db_path.clone());
        let runtime = Runtime::open(cfg, db_path.as_deref()).await?;

        match cli.command {
            CliCommand::Fetch {
                url,
                identity,
                quality,
                items,
                destination,
            } => {
                let request = parse_request(&url, &quality, items.as_deref(), runtime.config.max_batch_items)?;
                run_fetch(&runtime, request, &identity, destination.as_deref()).await?
            }
            CliCommand::Serve { requests } => run_serve(&runtime, requests.as_deref()).await?,
            CliCommand::Lookup { url, quality, items } => {
                run_lookup(
                    &runtime,
                    &parse_request(&url, &quality, items.as_deref(), runtime.config.max_batch_items)?,
                )
                .await?
            }
            CliCommand::Forget { url, quality, item } => {
                run_forget(
                    &runtime,
                    &parse_request(&url, &quality, None, runtime.config.max_batch_items)?,
                    item,
                )
                .await?
            }
            CliCommand::History { identity, limit } => run_history(&runtime, &identity, limit).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
