//! `tgaudio download <peer...>` – enumerate and fetch new audio files.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tgaudio_core::config::Config;
use tgaudio_core::coordinator::Coordinator;
use tgaudio_core::store::Store;
use tgaudio_core::transport::Transport;
use tokio_util::sync::CancellationToken;

use crate::transport_grammers::GrammersTransport;

pub async fn run_download(
    mut cfg: Config,
    peers: Vec<String>,
    limit: Option<u64>,
    parallel: Option<usize>,
    output: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    if peers.is_empty() {
        anyhow::bail!("at least one peer is required");
    }
    if let Some(limit) = limit {
        cfg.global_limit = Some(limit);
    }
    if let Some(parallel) = parallel {
        cfg.max_workers = parallel;
    }
    if let Some(output) = output {
        cfg.download_dir = output;
    }
    cfg.force_reemit_failed = force;
    cfg.validate()?;

    std::fs::create_dir_all(&cfg.download_dir)?;

    let client = crate::transport_grammers::connect().await?;
    let transport: Arc<dyn Transport> = Arc::new(GrammersTransport::new(client));
    let store = Store::open_default().await?;
    let coordinator = Coordinator::new(store, transport, cfg);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt, finishing in-flight fetches before exit");
            ctrl_c_cancel.cancel();
        }
    });

    let summary = coordinator.run(&peers, cancel).await?;

    println!(
        "attempted {} | completed {} | failed {} | skipped {} | {} bytes",
        summary.attempted, summary.completed, summary.failed, summary.skipped, summary.total_bytes
    );

    Ok(())
}
