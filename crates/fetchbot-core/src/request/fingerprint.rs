use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::QualityKey;

/// Cache key: SHA-256 over the canonical URL and the normalized quality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn derive(normalized_url: &str, quality: QualityKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalized_url.as_bytes());
        hasher.update(b"\n");
        hasher.update(quality.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading hex digits, for log lines and record names.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = RequestFingerprint::derive("https://example.com/v", QualityKey::Best);
        let b = RequestFingerprint::derive("https://example.com/v", QualityKey::Best);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn quality_changes_fingerprint() {
        let best = RequestFingerprint::derive("https://example.com/v", QualityKey::Best);
        let p720 = RequestFingerprint::derive("https://example.com/v", QualityKey::Height(720));
        assert_ne!(best, p720);
    }
}
