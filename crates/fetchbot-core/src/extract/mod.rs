//! Extraction: the engine boundary and the ordered attempt chain that drives it.

mod classify;
mod sequencer;

pub use classify::{classify_engine_message, EngineError, ExtractErrorKind};
pub use sequencer::{AttemptSequencer, Resolved, SequenceError, SequencerState};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::progress::ProgressState;
use crate::request::QualityKey;

fn default_true() -> bool {
    true
}

/// One extraction strategy. `format` may contain `{height}`, replaced by the requested height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptConfig {
    pub label: String,
    pub format: String,
    /// Container the engine merges separate streams into.
    #[serde(default)]
    pub merge_output_format: Option<String>,
    /// Whether the engine may call the conversion tool while extracting.
    #[serde(default = "default_true")]
    pub use_ffmpeg: bool,
}

impl AttemptConfig {
    /// H.264 + AAC capped at the requested height, then H.264 at any height, then whatever is best.
    pub fn default_chain() -> Vec<Self> {
        vec![
            AttemptConfig {
                label: "avc1-mp4a".to_string(),
                format: "bv*[vcodec*=avc1][height<={height}]+ba[acodec*=mp4a]/bv*[vcodec*=avc1][height<={height}]+ba"
                    .to_string(),
                merge_output_format: Some("mp4".to_string()),
                use_ffmpeg: true,
            },
            AttemptConfig {
                label: "avc1-any".to_string(),
                format: "bv*[vcodec*=avc1]+ba/bv*+ba".to_string(),
                merge_output_format: Some("mp4".to_string()),
                use_ffmpeg: true,
            },
            AttemptConfig {
                label: "best".to_string(),
                format: "best".to_string(),
                merge_output_format: None,
                use_ffmpeg: false,
            },
        ]
    }

    /// Engine format selector for `quality`.
    pub fn format_for(&self, quality: QualityKey) -> String {
        match quality {
            QualityKey::Audio => "ba/b".to_string(),
            QualityKey::Best => self.format.replace("{height}", "4320"),
            QualityKey::Height(h) => self.format.replace("{height}", &h.to_string()),
        }
    }
}

/// What the engine is asked to fetch for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractRequest {
    pub url: String,
    /// Playlist position for batch requests.
    pub item: Option<u32>,
    pub quality: QualityKey,
    /// Directory the engine writes into. Owned by the caller and removed after the attempt.
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "duration")]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub ext: Option<String>,
    /// Entries in the source playlist, when the engine reports it.
    #[serde(default)]
    pub playlist_count: Option<u32>,
}

/// Engine output before post-processing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
    pub path: PathBuf,
    pub info: ExtractedInfo,
}

#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    /// Fetch one item with one strategy. Byte progress goes to `progress` as it arrives.
    async fn extract(
        &self,
        request: &ExtractRequest,
        attempt: &AttemptConfig,
        progress: &ProgressState,
    ) -> Result<RawOutput, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chain_order_and_formats() {
        let chain = AttemptConfig::default_chain();
        let labels: Vec<&str> = chain.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(labels, vec!["avc1-mp4a", "avc1-any", "best"]);
        let f = chain[0].format_for(QualityKey::Height(720));
        assert!(f.contains("[height<=720]"));
        assert!(!f.contains("{height}"));
        assert_eq!(chain[2].format_for(QualityKey::Audio), "ba/b");
        assert!(!chain[2].use_ffmpeg);
    }

    #[test]
    fn extracted_info_decodes_engine_json() {
        let info: ExtractedInfo = serde_json::from_str(
            r#"{"id":"abc","title":"Clip","duration":12.5,"width":1280,"height":720,"ext":"mp4"}"#,
        )
        .unwrap();
        assert_eq!(info.duration_secs, Some(12.5));
        assert_eq!(info.height, Some(720));
        assert!(info.playlist_count.is_none());
    }
}
