use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use leech_torrent::cli::Cli;
use leech_torrent::download::Download;
use leech_torrent::metainfo::Metainfo;
use leech_torrent::tracker;
use leech_torrent::PeerId;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let metainfo = Metainfo::from_bencode_file(&cli.source).await?;
    let file_info = &metainfo.file_info;

    let layout = file_info.layout().context("torrent piece layout")?;
    let info_hash = file_info.info_hash().context("computing info hash")?;
    let peer_id = PeerId::with_random_suffix();
    info!(name = file_info.name(), %info_hash, pieces = layout.piece_count(), "loaded torrent");

    let peers = if cli.peers.is_empty() {
        tracker::announce(&metainfo, peer_id, cli.port).await?
    } else {
        cli.peers.clone()
    };
    if peers.is_empty() {
        warn!("no peers to download from");
    }

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| file_info.name().into());

    let download = Download::new(layout, info_hash, peer_id, &output, cli.download_config())
        .await
        .with_context(|| format!("creating output file {}", output.display()))?;
    let report = download.start(peers).await?;

    println!("{:.2}%", report.progress_percent);
    if report.complete {
        info!(output = %output.display(), "download complete");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(
            received = report.received_blocks,
            total = report.total_blocks,
            "download incomplete"
        );
        Ok(ExitCode::FAILURE)
    }
}
