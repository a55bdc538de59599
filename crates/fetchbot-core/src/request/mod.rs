//! Request model: who asked for what.
//!
//! A request is a source URL plus an item range (single item or a playlist
//! slice) and a quality selector. The normalized URL and quality feed the
//! cache fingerprint; the range selects item indices under it.

mod fingerprint;
mod normalize;

pub use fingerprint::RequestFingerprint;
pub use normalize::{normalize_url, split_range_suffix};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Height rungs quality requests are rounded up to before fingerprinting.
pub const POPULAR_HEIGHTS: [u32; 11] = [144, 240, 360, 480, 540, 576, 720, 1080, 1440, 2160, 4320];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("invalid URL {0:?}")]
    InvalidUrl(String),
    #[error("invalid item range {0:?}")]
    InvalidRange(String),
    #[error("item range {range} is larger than the limit of {max} items")]
    RangeTooLarge { range: String, max: u32 },
    #[error("invalid quality {0:?}")]
    InvalidQuality(String),
}

/// Opaque user/chat key. One running job per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for Identity {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for Identity {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which items of the source to fetch. Indices are 1-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemRange {
    Single,
    Span { start: u32, end: u32 },
}

impl ItemRange {
    pub fn span(start: u32, end: u32) -> Result<Self, RequestError> {
        if start == 0 || end < start {
            return Err(RequestError::InvalidRange(format!("{start}-{end}")));
        }
        Ok(ItemRange::Span { start, end })
    }

    /// Indices covered by the range. A single item lives at index 1.
    pub fn indices(&self) -> Vec<u32> {
        match *self {
            ItemRange::Single => vec![1],
            ItemRange::Span { start, end } => (start..=end).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match *self {
            ItemRange::Single => 1,
            ItemRange::Span { start, end } => (end - start + 1) as usize,
        }
    }

    /// Reject spans with more than `max_items` items.
    pub fn check_limit(&self, max_items: u32) -> Result<(), RequestError> {
        if self.len() > max_items as usize {
            return Err(RequestError::RangeTooLarge {
                range: self.to_string(),
                max: max_items,
            });
        }
        Ok(())
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, ItemRange::Span { .. })
    }

    /// Engine-facing item selector: `None` for a single item.
    pub fn playlist_item(&self, index: u32) -> Option<u32> {
        self.is_batch().then_some(index)
    }
}

impl FromStr for ItemRange {
    type Err = RequestError;

    /// Accepts `N` or `A-B`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || RequestError::InvalidRange(s.to_string());
        let s = s.trim();
        match s.split_once('-') {
            Some((a, b)) => {
                let start = a.trim().parse().map_err(|_| bad())?;
                let end = b.trim().parse().map_err(|_| bad())?;
                ItemRange::span(start, end).map_err(|_| bad())
            }
            None => {
                let n: u32 = s.parse().map_err(|_| bad())?;
                ItemRange::span(n, n).map_err(|_| bad())
            }
        }
    }
}

impl fmt::Display for ItemRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemRange::Single => f.write_str("single"),
            ItemRange::Span { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

/// Quality variant. Heights are normalized to a popular rung on parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QualityKey {
    #[default]
    Best,
    Audio,
    Height(u32),
}

/// Smallest popular rung at or above `height`, or the top rung.
pub fn ceil_to_popular(height: u32) -> u32 {
    POPULAR_HEIGHTS
        .iter()
        .copied()
        .find(|&rung| rung >= height)
        .unwrap_or(POPULAR_HEIGHTS[POPULAR_HEIGHTS.len() - 1])
}

impl QualityKey {
    pub fn height(height: u32) -> Self {
        QualityKey::Height(ceil_to_popular(height))
    }
}

impl FromStr for QualityKey {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "" | "best" => Ok(QualityKey::Best),
            "audio" | "mp3" => Ok(QualityKey::Audio),
            other => {
                let digits = other.strip_suffix('p').unwrap_or(other);
                match digits.parse::<u32>() {
                    Ok(h) if h > 0 => Ok(QualityKey::height(h)),
                    _ => Err(RequestError::InvalidQuality(s.to_string())),
                }
            }
        }
    }
}

impl fmt::Display for QualityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityKey::Best => f.write_str("best"),
            QualityKey::Audio => f.write_str("audio"),
            QualityKey::Height(h) => write!(f, "{h}p"),
        }
    }
}

/// Normalized request: what the engine fetches and what the cache is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSpec {
    /// URL as the user sent it, minus any `*start*end` suffix.
    pub source_url: String,
    /// Canonical URL used for extraction and fingerprinting.
    pub normalized_url: String,
    pub range: ItemRange,
    pub quality: QualityKey,
}

impl RequestSpec {
    /// Build a request from raw user input. A trailing `*start*end` suffix selects a range.
    pub fn parse(input: &str, quality: QualityKey) -> Result<Self, RequestError> {
        let (url, range) = split_range_suffix(input.trim())?;
        Self::with_range(url, range.unwrap_or(ItemRange::Single), quality)
    }

    pub fn with_range(url: &str, range: ItemRange, quality: QualityKey) -> Result<Self, RequestError> {
        let normalized_url = normalize_url(url, range.is_batch())?;
        Ok(Self {
            source_url: url.trim().to_string(),
            normalized_url,
            range,
            quality,
        })
    }

    pub fn fingerprint(&self) -> RequestFingerprint {
        RequestFingerprint::derive(&self.normalized_url, self.quality)
    }
}

impl fmt::Display for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] @{}", self.normalized_url, self.range, self.quality)
    }
}
