//! What the download pipeline needs from a remote catalog.
//!
//! Both stores expose the same shape: log in, turn a link into a list of
//! tracks, and hand out a byte stream for one track. The HTTP implementation
//! lives in [`crate::http`]; tests plug in their own.

use crate::config::Quality;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Deserialize;
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Store {
    Beatport,
    Beatsource,
}

impl Store {
    pub fn name(&self) -> &'static str {
        match self {
            Store::Beatport => "beatport",
            Store::Beatsource => "beatsource",
        }
    }

    pub fn api_base(&self) -> &'static str {
        match self {
            Store::Beatport => "https://api.beatport.com/v4",
            Store::Beatsource => "https://api.beatsource.com/v4",
        }
    }

    fn from_host(host: &str) -> Option<Self> {
        let host = host.trim_start_matches("www.");
        match host {
            "beatport.com" => Some(Store::Beatport),
            "beatsource.com" => Some(Store::Beatsource),
            _ => None,
        }
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Track,
    Release,
    Playlist,
    Chart,
}

/// A parsed store URL such as `https://www.beatport.com/release/some-ep/123`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub original: String,
    pub store: Store,
    pub kind: LinkKind,
    pub id: u64,
}

impl Link {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let url = Url::parse(input).map_err(|e| Error::invalid_url(input, e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::invalid_url(input, "missing host"))?;
        let store =
            Store::from_host(host).ok_or_else(|| Error::invalid_url(input, "unsupported store"))?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        // Locale prefixes like /de/ come before the kind segment.
        let kind_at = segments
            .iter()
            .position(|seg| kind_from_segment(seg).is_some())
            .ok_or_else(|| Error::invalid_url(input, "unsupported link type"))?;
        let kind = kind_from_segment(segments[kind_at])
            .ok_or_else(|| Error::invalid_url(input, "unsupported link type"))?;

        let id = segments[kind_at + 1..]
            .iter()
            .rev()
            .find_map(|seg| seg.parse::<u64>().ok())
            .ok_or_else(|| Error::invalid_url(input, "missing numeric id"))?;

        Ok(Link {
            original: input.to_string(),
            store,
            kind,
            id,
        })
    }
}

fn kind_from_segment(segment: &str) -> Option<LinkKind> {
    match segment {
        "track" => Some(LinkKind::Track),
        "release" => Some(LinkKind::Release),
        "playlists" | "playlist" => Some(LinkKind::Playlist),
        "chart" => Some(LinkKind::Chart),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Track {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub mix_name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub number: u32,
}

impl Track {
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Everything one link resolved to.
#[derive(Debug, Clone)]
pub struct Job {
    pub store: Store,
    pub kind: LinkKind,
    pub title: String,
    pub tracks: Vec<Track>,
}

/// An open download: byte chunks in stream order plus the length if known.
pub struct TrackStream {
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes>>,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    fn store(&self) -> Store;

    async fn authenticate(&self) -> Result<()>;

    async fn resolve(&self, link: &Link) -> Result<Job>;

    async fn download(&self, track: &Track, quality: Quality) -> Result<TrackStream>;
}
