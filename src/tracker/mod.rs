pub mod http;
pub mod peers;
pub mod response;
pub mod udp;

use std::net::SocketAddrV4;

use anyhow::Context;

use crate::metainfo::{Metainfo, TrackerUrl};
use crate::torrent::{InfoHash, PeerId};

pub use http::HttpTracker;
pub use udp::UdpTracker;

/// what this client tells a tracker about itself, shared by both transports.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
}

impl AnnounceRequest {
    pub fn new(info_hash: InfoHash, peer_id: PeerId, port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
        }
    }
}

/// asks the torrent's tracker for peers, picking the transport from the url scheme.
pub async fn announce(
    metainfo: &Metainfo,
    peer_id: PeerId,
    port: u16,
) -> anyhow::Result<Vec<SocketAddrV4>> {
    let tracker_url = metainfo
        .announce
        .as_ref()
        .context("torrent has no announce url, pass peers explicitly")?;

    let request = AnnounceRequest::new(
        metainfo.file_info.info_hash()?,
        peer_id,
        port,
        metainfo.file_info.total_length(),
    );

    match tracker_url {
        TrackerUrl::UDP(url) => {
            UdpTracker::connect(url)
                .await?
                .announce(&request)
                .await
                .with_context(|| format!("announcing to {url}"))
        }
        TrackerUrl::HTTP(url) => {
            let client = reqwest::Client::new();
            HttpTracker::new(&client, url.as_str())
                .announce(&request)
                .await
                .with_context(|| format!("announcing to {url}"))
        }
    }
}
