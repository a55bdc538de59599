//! `MediaTool` backed by the ffmpeg and ffprobe executables.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::config::ToolsConfig;
use crate::media::{MediaError, MediaTool, Probe};

/// Longest stderr excerpt carried in an error.
const STDERR_LIMIT: usize = 2000;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    duration: Option<String>,
}

fn parse_probe(json: &[u8]) -> Result<Probe, MediaError> {
    let out: ProbeOutput = serde_json::from_slice(json).map_err(|e| MediaError::Parse {
        tool: "ffprobe".to_string(),
        detail: e.to_string(),
    })?;
    let video = out
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let duration = out
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or_else(|| video.and_then(|s| s.duration.as_deref()))
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| MediaError::Parse {
            tool: "ffprobe".to_string(),
            detail: "no duration reported".to_string(),
        })?;
    Ok(Probe {
        duration_secs: duration,
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
    })
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_LIMIT)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

/// Sibling of `path` with `suffix` appended to the stem and extension `ext`.
fn sibling(path: &Path, suffix: &str, ext: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    path.with_file_name(format!("{stem}{suffix}.{ext}"))
}

pub struct FfmpegTool {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegTool {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            ffmpeg: tools.ffmpeg_bin.clone(),
            ffprobe: tools.ffprobe_bin.clone(),
        }
    }

    async fn run(&self, bin: &str, args: &[String]) -> Result<Output, MediaError> {
        let output = Command::new(bin)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(MediaError::Failed {
                tool: bin.to_string(),
                status: output.status.to_string(),
                stderr: tail(&output.stderr),
            });
        }
        Ok(output)
    }

    async fn ffmpeg(&self, args: Vec<String>) -> Result<(), MediaError> {
        let mut full = vec!["-hide_banner".to_string(), "-v".into(), "error".into(), "-y".into()];
        full.extend(args);
        self.run(&self.ffmpeg, &full).await.map(|_| ())
    }
}

fn s(p: &Path) -> String {
    p.display().to_string()
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn remux(&self, path: &Path, container: &str) -> Result<PathBuf, MediaError> {
        let target = sibling(path, "-remux", container);
        let copy = vec![
            "-i".into(),
            s(path),
            "-map".into(),
            "0".into(),
            "-c".into(),
            "copy".into(),
            "-movflags".into(),
            "+faststart".into(),
            s(&target),
        ];
        match self.ffmpeg(copy).await {
            Ok(()) => return Ok(target),
            Err(e) => tracing::debug!(path = %path.display(), "stream copy failed, re-encoding: {}", e),
        }
        let encode = vec![
            "-i".into(),
            s(path),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "veryfast".into(),
            "-crf".into(),
            "23".into(),
            "-c:a".into(),
            "aac".into(),
            "-movflags".into(),
            "+faststart".into(),
            s(&target),
        ];
        self.ffmpeg(encode).await?;
        Ok(target)
    }

    async fn probe(&self, path: &Path) -> Result<Probe, MediaError> {
        let args = vec![
            "-v".to_string(),
            "error".into(),
            "-print_format".into(),
            "json".into(),
            "-show_format".into(),
            "-show_streams".into(),
            s(path),
        ];
        let output = self.run(&self.ffprobe, &args).await?;
        parse_probe(&output.stdout)
    }

    async fn thumbnail(&self, path: &Path, at_secs: f64) -> Result<PathBuf, MediaError> {
        let target = sibling(path, "-thumb", "jpg");
        self.ffmpeg(vec![
            "-ss".into(),
            format!("{at_secs:.3}"),
            "-i".into(),
            s(path),
            "-frames:v".into(),
            "1".into(),
            "-vf".into(),
            "scale='min(320,iw)':-2".into(),
            s(&target),
        ])
        .await?;
        Ok(target)
    }

    async fn cut(&self, path: &Path, start_secs: f64, end_secs: f64, target: &Path) -> Result<(), MediaError> {
        self.ffmpeg(vec![
            "-ss".into(),
            format!("{start_secs:.3}"),
            "-i".into(),
            s(path),
            "-t".into(),
            format!("{:.3}", (end_secs - start_secs).max(0.0)),
            "-map".into(),
            "0".into(),
            "-c".into(),
            "copy".into(),
            "-avoid_negative_ts".into(),
            "make_zero".into(),
            s(target),
        ])
        .await
    }
}
