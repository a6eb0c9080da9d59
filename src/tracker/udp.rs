use std::net::SocketAddrV4;
use std::time::Duration;

use anyhow::Context;
use reqwest::Url;
use tokio::net::UdpSocket;
use tokio_util::bytes::{Buf, BufMut, BytesMut};

use super::peers::PeerAddresses;
use super::AnnounceRequest;
use crate::prelude::*;

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

const MAX_DATAGRAM_SIZE: usize = 2048;

#[derive(Debug, Clone)]
pub struct UDPConnectRequest {
    pub transaction_id: u32,
}

impl UDPConnectRequest {
    const PROTOCOL_ID: u64 = 0x41727101980;
    pub const SIZE: usize = 16;

    pub fn new(transaction_id: u32) -> Self {
        Self { transaction_id }
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut bytes = BytesMut::with_capacity(Self::SIZE);
        bytes.put_u64(Self::PROTOCOL_ID);
        bytes.put_u32(ACTION_CONNECT);
        bytes.put_u32(self.transaction_id);
        bytes
    }
}

#[derive(Debug, Clone)]
pub struct UDPConnectResponse {
    pub transaction_id: u32,
    pub connection_id: u64,
}

impl UDPConnectResponse {
    pub const SIZE: usize = 16;

    pub fn from_bytes(mut response: &[u8]) -> anyhow::Result<Self> {
        let transaction_id = check_header(&mut response, ACTION_CONNECT)?;
        anyhow::ensure!(
            response.len() >= 8,
            "connect response shorter than {} bytes",
            Self::SIZE
        );
        Ok(Self {
            transaction_id,
            connection_id: response.get_u64(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct UDPAnnounceRequest {
    pub connection_id: u64,
    pub transaction_id: u32,
    pub key: u32,
    pub request: AnnounceRequest,
}

impl UDPAnnounceRequest {
    pub const SIZE: usize = 98;
    const EVENT_NONE: u32 = 0;
    const DEFAULT_IP: u32 = 0;
    const NUM_WANT_DEFAULT: i32 = -1;

    pub fn to_bytes(&self) -> BytesMut {
        let mut bytes = BytesMut::with_capacity(Self::SIZE);
        bytes.put_u64(self.connection_id);
        bytes.put_u32(ACTION_ANNOUNCE);
        bytes.put_u32(self.transaction_id);
        bytes.put_slice(self.request.info_hash.as_bytes());
        bytes.put_slice(self.request.peer_id.as_bytes());
        bytes.put_u64(self.request.downloaded);
        bytes.put_u64(self.request.left);
        bytes.put_u64(self.request.uploaded);
        bytes.put_u32(Self::EVENT_NONE);
        bytes.put_u32(Self::DEFAULT_IP);
        bytes.put_u32(self.key);
        bytes.put_i32(Self::NUM_WANT_DEFAULT);
        bytes.put_u16(self.request.port);
        bytes
    }
}

#[derive(Debug, Clone)]
pub struct UDPAnnounceResponse {
    pub transaction_id: u32,
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: PeerAddresses,
}

impl UDPAnnounceResponse {
    pub const MIN_SIZE: usize = 20;

    pub fn from_bytes(mut response: &[u8]) -> anyhow::Result<Self> {
        let transaction_id = check_header(&mut response, ACTION_ANNOUNCE)?;
        anyhow::ensure!(
            response.len() >= 12,
            "announce response shorter than {} bytes",
            Self::MIN_SIZE
        );
        let interval = response.get_u32();
        let leechers = response.get_u32();
        let seeders = response.get_u32();
        let peers = PeerAddresses::from_compact(response)
            .context("announce response peers are not a multiple of 6 bytes")?;

        Ok(Self {
            transaction_id,
            interval,
            leechers,
            seeders,
            peers,
        })
    }
}

/// reads action and transaction id, returning the transaction id.
fn check_header(response: &mut &[u8], expected_action: u32) -> anyhow::Result<u32> {
    anyhow::ensure!(response.len() >= 8, "tracker response too short");
    let action = response.get_u32();
    let transaction_id = response.get_u32();

    if action == ACTION_ERROR {
        let message = String::from_utf8_lossy(response);
        anyhow::bail!("{} (Tracker)", message);
    }
    anyhow::ensure!(
        action == expected_action,
        "unexpected tracker action {action}, expected {expected_action}"
    );

    Ok(transaction_id)
}

#[derive(Debug)]
pub struct UdpTracker {
    socket: UdpSocket,
    response_timeout: Duration,
    attempts: u32,
}

impl UdpTracker {
    pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);
    pub const ATTEMPTS: u32 = 3;

    /// binds an ephemeral socket and connects it to the host and port of `url`.
    pub async fn connect(url: &Url) -> anyhow::Result<Self> {
        let host = url.host_str().context("udp tracker url has no host")?;
        let port = url.port().context("udp tracker url has no port")?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect((host, port))
            .await
            .with_context(|| format!("resolving udp tracker {host}:{port}"))?;

        Ok(Self::from_socket(socket))
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            response_timeout: Self::RESPONSE_TIMEOUT,
            attempts: Self::ATTEMPTS,
        }
    }

    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    #[instrument(skip_all, fields(info_hash = %request.info_hash))]
    pub async fn announce(&self, request: &AnnounceRequest) -> anyhow::Result<Vec<SocketAddrV4>> {
        let connect = UDPConnectRequest::new(rand::random());
        let response = self.round_trip(&connect.to_bytes()).await?;
        let connected = UDPConnectResponse::from_bytes(&response)?;
        anyhow::ensure!(
            connected.transaction_id == connect.transaction_id,
            "connect response transaction id mismatch"
        );
        debug!(connection_id = connected.connection_id, "connected to udp tracker");

        let announce = UDPAnnounceRequest {
            connection_id: connected.connection_id,
            transaction_id: rand::random(),
            key: rand::random(),
            request: request.clone(),
        };
        let response = self.round_trip(&announce.to_bytes()).await?;
        let announced = UDPAnnounceResponse::from_bytes(&response)?;
        anyhow::ensure!(
            announced.transaction_id == announce.transaction_id,
            "announce response transaction id mismatch"
        );

        info!(
            seeders = announced.seeders,
            leechers = announced.leechers,
            interval = announced.interval,
            "udp tracker returned {} peers",
            announced.peers.0.len()
        );
        Ok(announced.peers.into_inner())
    }

    /// sends a datagram and waits for the reply, resending on timeout.
    async fn round_trip(&self, datagram: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut buf = vec![0; MAX_DATAGRAM_SIZE];
        for attempt in 1..=self.attempts {
            self.socket.send(datagram).await?;
            match tokio::time::timeout(self.response_timeout, self.socket.recv(&mut buf)).await {
                Ok(received) => {
                    let len = received?;
                    buf.truncate(len);
                    return Ok(buf);
                }
                Err(_) => warn!(attempt, "udp tracker did not respond"),
            }
        }
        anyhow::bail!("udp tracker did not respond after {} attempts", self.attempts)
    }
}
