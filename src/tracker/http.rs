use std::net::SocketAddrV4;

use form_urlencoded::byte_serialize;
use reqwest::Client;

use super::response::{TrackerResponse, TrackerResponseResult};
use super::AnnounceRequest;
use crate::prelude::*;

#[derive(Debug)]
pub struct HttpTracker<'a> {
    client: &'a Client,
    url: &'a str,
}

impl<'a> HttpTracker<'a> {
    pub fn new(client: &'a Client, url: &'a str) -> Self {
        Self { client, url }
    }

    /// full announce url, the tracker url may already carry a query of its own.
    pub fn announce_url(&self, request: &AnnounceRequest) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, separator, to_url_query(request))
    }

    #[instrument(skip_all, fields(info_hash = %request.info_hash))]
    pub async fn announce(&self, request: &AnnounceRequest) -> anyhow::Result<Vec<SocketAddrV4>> {
        let response = self
            .client
            .get(self.announce_url(request))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let response = parse_response(&response)?;
        info!(
            interval = response.request_interval_seconds,
            "http tracker returned {} peers",
            response.peer_addresses.0.len()
        );
        Ok(response.peer_addresses.into_inner())
    }
}

pub fn parse_response(bytes: &[u8]) -> anyhow::Result<TrackerResponse> {
    let result: TrackerResponseResult =
        serde_bencode::from_bytes(bytes).map_err(anyhow::Error::msg)?;
    result.into()
}

// info_hash and peer_id are raw bytes, they are percent encoded byte by byte.
fn to_url_query(request: &AnnounceRequest) -> String {
    let port = request.port.to_string();
    let uploaded = request.uploaded.to_string();
    let downloaded = request.downloaded.to_string();
    let left = request.left.to_string();

    encode_pairs([
        (&b"info_hash"[..], &request.info_hash.as_bytes()[..]),
        (&b"peer_id"[..], &request.peer_id.as_bytes()[..]),
        (&b"port"[..], port.as_bytes()),
        (&b"uploaded"[..], uploaded.as_bytes()),
        (&b"downloaded"[..], downloaded.as_bytes()),
        (&b"left"[..], left.as_bytes()),
        (&b"compact"[..], &b"1"[..]),
    ])
}

fn encode_pairs<'p>(pairs: impl IntoIterator<Item = (&'p [u8], &'p [u8])>) -> String {
    pairs
        .into_iter()
        .map(|(key, value)| {
            let mut pair: String = byte_serialize(key).collect();
            pair.push('=');
            pair.extend(byte_serialize(value));
            pair
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::{InfoHash, PeerId};
    use rstest::rstest;

    fn request() -> AnnounceRequest {
        let mut info_hash = [0xAB; 20];
        info_hash[0] = b' ';
        AnnounceRequest::new(
            InfoHash::new(info_hash),
            PeerId::with_suffix(b"abcdefghijkl"),
            6881,
            1234,
        )
    }

    #[rstest]
    fn test_query_encodes_raw_bytes() {
        let query = to_url_query(&request());
        let expected_hash = format!("info_hash=+{}", "%AB".repeat(19));
        assert!(query.starts_with(&expected_hash), "{query}");
        assert!(query.contains("&peer_id=-LT0001-abcdefghijkl&"));
        assert!(query.ends_with("&left=1234&compact=1"));
    }

    #[rstest]
    #[case("http://t.org/announce", "http://t.org/announce?info_hash=")]
    #[case("http://t.org/announce?passkey=x", "http://t.org/announce?passkey=x&info_hash=")]
    fn test_announce_url_separator(#[case] url: &str, #[case] prefix: &str) {
        let client = Client::new();
        let announce_url = HttpTracker::new(&client, url).announce_url(&request());
        assert!(announce_url.starts_with(prefix), "{announce_url}");
    }

    #[rstest]
    fn test_parse_failure_response() {
        let error = parse_response(b"d14:failure reason6:bannede").unwrap_err();
        assert!(error.to_string().contains("banned"));
    }
}
