use super::peers::PeerAddresses;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerResponse {
    #[serde(rename = "interval")]
    pub request_interval_seconds: u64,

    #[serde(rename = "peers")]
    pub peer_addresses: PeerAddresses,
}

// kept apart from TrackerResponse so a bencoded failure can be told apart from a malformed reply.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum TrackerResponseResult {
    Success(TrackerResponse),
    Failure {
        #[serde(rename = "failure reason")]
        failure_reason: String,
    },
}

impl From<TrackerResponseResult> for anyhow::Result<TrackerResponse> {
    fn from(result: TrackerResponseResult) -> Self {
        match result {
            TrackerResponseResult::Success(tracker_response) => Ok(tracker_response),
            TrackerResponseResult::Failure { failure_reason } => {
                anyhow::bail!("{} (Tracker)", failure_reason)
            }
        }
    }
}
