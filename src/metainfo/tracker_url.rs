use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{de, Deserialize};

/// announce url of a tracker, split by the transport it is reached over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerUrl {
    HTTP(Url),
    UDP(Url),
}

impl TrackerUrl {
    pub fn url(&self) -> &Url {
        match self {
            Self::HTTP(url) | Self::UDP(url) => url,
        }
    }
}

impl FromStr for TrackerUrl {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s)?;
        match url.scheme() {
            "http" | "https" => Ok(Self::HTTP(url)),
            "udp" => Ok(Self::UDP(url)),
            scheme => anyhow::bail!("unsupported scheme {:?} for tracker", scheme),
        }
    }
}

impl fmt::Display for TrackerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.url().fmt(f)
    }
}

impl<'de> Deserialize<'de> for TrackerUrl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // bencode strings arrive as bytes, String accepts them when they are utf-8.
        let url = String::deserialize(deserializer)?;
        url.parse().map_err(de::Error::custom)
    }
}
