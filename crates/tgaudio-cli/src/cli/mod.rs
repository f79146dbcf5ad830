//! CLI for the Telegram audio downloader.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tgaudio_core::config;
use tgaudio_core::store::Store;

use commands::{
    run_download, run_groups, run_login, run_metadata, run_performance, run_search, run_stats,
};

/// Top-level CLI for the Telegram audio downloader.
#[derive(Debug, Parser)]
#[command(name = "tgaudio")]
#[command(about = "tgaudio: batch audio downloader for Telegram peers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download every new audio file from one or more peers.
    Download {
        /// Peer identifiers (usernames, invite links, or chat ids) to enumerate.
        peers: Vec<String>,
        /// Stop after admitting this many files across all peers.
        #[arg(long, value_name = "N")]
        limit: Option<u64>,
        /// Override the configured worker count for this run.
        #[arg(long, value_name = "N")]
        parallel: Option<usize>,
        /// Override the configured download directory for this run.
        #[arg(long, value_name = "DIR")]
        output: Option<PathBuf>,
        /// Re-attempt files already marked FAILED or SKIPPED.
        #[arg(long)]
        force: bool,
    },

    /// List stored files, optionally filtered by format, size, or status.
    Search {
        /// Case-insensitive substring match against the stored filename.
        query: Option<String>,
        #[arg(long, value_name = "FORMAT")]
        format: Option<String>,
        #[arg(long, value_name = "BYTES")]
        min_size: Option<u64>,
        #[arg(long, value_name = "BYTES")]
        max_size: Option<u64>,
        #[arg(long, value_name = "STATUS")]
        status: Option<String>,
    },

    /// Print aggregate counts per status and per format.
    Stats,

    /// List every peer seen, with its file count and cursor position.
    Groups,

    /// Print recent throughput derived from completed FileRecord timestamps.
    Performance,

    /// Print the stored record (and extracted tags, if any) for one file.
    Metadata {
        /// The file_id as stored in the database.
        file_id: String,
    },

    /// Interactive phone-code / 2FA login, writing a session file.
    Login {
        /// Phone number in international format; prompted for if omitted.
        #[arg(long)]
        phone: Option<String>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!(?cfg, "loaded config");

        match cli.command {
            CliCommand::Download { peers, limit, parallel, output, force } => {
                run_download(cfg, peers, limit, parallel, output, force).await?
            }
            CliCommand::Search { query, format, min_size, max_size, status } => {
                let store = Store::open_default().await?;
                run_search(&store, query, format, min_size, max_size, status).await?
            }
            CliCommand::Stats => {
                let store = Store::open_default().await?;
                run_stats(&store).await?
            }
            CliCommand::Groups => {
                let store = Store::open_default().await?;
                run_groups(&store).await?
            }
            CliCommand::Performance => {
                let store = Store::open_default().await?;
                run_performance(&store).await?
            }
            CliCommand::Metadata { file_id } => {
                let store = Store::open_default().await?;
                let extractor = Arc::new(crate::metadata_lofty::LoftyExtractor);
                run_metadata(&store, &*extractor, &file_id).await?
            }
            CliCommand::Login { phone } => run_login(&cfg, phone).await?,
        }

        Ok(())
    }
}
