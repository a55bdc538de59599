//! Engine failure kinds and the text classifier used at the adapter boundary.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractErrorKind {
    /// Requested format does not exist for this source.
    FormatUnavailable,
    /// Transient network trouble (timeouts, resets, 5xx).
    Network,
    /// Access restricted: private, region-locked, sign-in or age gated.
    Blocked,
    /// Malformed URL or request.
    InvalidInput,
    /// Engine has no extractor for this source.
    Unsupported,
    /// Playlist has no entry at the requested position.
    NoEntries,
    Other,
}

impl ExtractErrorKind {
    /// Whether another strategy may succeed where this one failed.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ExtractErrorKind::FormatUnavailable | ExtractErrorKind::Network | ExtractErrorKind::Other
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExtractErrorKind::FormatUnavailable => "format unavailable",
            ExtractErrorKind::Network => "network error",
            ExtractErrorKind::Blocked => "access restricted",
            ExtractErrorKind::InvalidInput => "invalid input",
            ExtractErrorKind::Unsupported => "unsupported source",
            ExtractErrorKind::NoEntries => "no entries",
            ExtractErrorKind::Other => "extraction failed",
        }
    }
}

impl fmt::Display for ExtractErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct EngineError {
    pub kind: ExtractErrorKind,
    pub detail: String,
}

impl EngineError {
    pub fn new(kind: ExtractErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Build from engine diagnostics, classifying once.
    pub fn from_message(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            kind: classify_engine_message(&detail),
            detail,
        }
    }
}

const BLOCKED: &[&str] = &[
    "sign in to confirm",
    "private video",
    "members-only",
    "join this channel",
    "confirm your age",
    "age-restricted",
    "not available in your country",
    "geo restrict",
    "video unavailable",
    "this video is unavailable",
    "has been removed",
    "account has been terminated",
    "login required",
    "http error 403",
];
const FORMAT: &[&str] = &[
    "requested format is not available",
    "format is not available",
    "no video formats found",
];
const NETWORK: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "temporary failure in name resolution",
    "unable to download webpage",
    "http error 5",
    "http error 429",
    "too many requests",
    "incomplete read",
    "remote end closed connection",
];
const UNSUPPORTED: &[&str] = &["unsupported url", "no suitable extractor"];
const INVALID: &[&str] = &["is not a valid url", "invalid url"];
const NO_ENTRIES: &[&str] = &[
    "no videos found in playlist",
    "playlist does not have",
    "no entries",
];

/// Map engine diagnostics to a failure kind. Most specific families are checked first.
pub fn classify_engine_message(message: &str) -> ExtractErrorKind {
    let lower = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    if has(NO_ENTRIES) {
        ExtractErrorKind::NoEntries
    } else if has(BLOCKED) {
        ExtractErrorKind::Blocked
    } else if has(FORMAT) {
        ExtractErrorKind::FormatUnavailable
    } else if has(UNSUPPORTED) {
        ExtractErrorKind::Unsupported
    } else if has(INVALID) {
        ExtractErrorKind::InvalidInput
    } else if has(NETWORK) {
        ExtractErrorKind::Network
    } else {
        ExtractErrorKind::Other
    }
}
