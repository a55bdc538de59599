//! `ExtractionEngine` backed by the yt-dlp executable.
//!
//! yt-dlp is asked to print machine-readable lines on stdout: byte progress
//! (`FBPROG`), the final file path (`FBDONE`) and item metadata (`FBINFO`).
//! Failures are classified from stderr here and nowhere else.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::config::ToolsConfig;
use crate::extract::{
    AttemptConfig, EngineError, ExtractErrorKind, ExtractRequest, ExtractedInfo, ExtractionEngine, RawOutput,
};
use crate::progress::ProgressState;

const PROGRESS_TEMPLATE: &str =
    "download:FBPROG %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s";
const DONE_TEMPLATE: &str = "after_move:FBDONE %(filepath)s";
const INFO_TEMPLATE: &str = "after_move:FBINFO %(.{id,title,duration,width,height,ext,playlist_count})j";

/// Lines of stderr kept for classification and error text.
const STDERR_TAIL: usize = 20;

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Progress { done: u64, total: u64 },
    Done(PathBuf),
    Info(ExtractedInfo),
}

fn parse_line(line: &str) -> Option<Line> {
    lazy_static::lazy_static! {
        static ref PROGRESS_RE: Regex =
            Regex::new(r"^FBPROG\s+(\S+)\s+(\S+)\s+(\S+)\s*$").unwrap();
    }

    if let Some(caps) = PROGRESS_RE.captures(line) {
        let num = |i: usize| {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| v as u64)
        };
        let done = num(1)?;
        let total = num(2).or_else(|| num(3)).unwrap_or(0);
        return Some(Line::Progress { done, total });
    }
    if let Some(path) = line.strip_prefix("FBDONE ") {
        let path = path.trim();
        return (!path.is_empty() && path != "NA").then(|| Line::Done(PathBuf::from(path)));
    }
    if let Some(json) = line.strip_prefix("FBINFO ") {
        return serde_json::from_str::<ExtractedInfo>(json.trim()).ok().map(Line::Info);
    }
    None
}

/// Keep the lines worth showing: errors first, otherwise the last few.
fn stderr_summary(stderr: &str) -> String {
    let errors: Vec<&str> = stderr
        .lines()
        .filter(|l| l.starts_with("ERROR") || l.contains("error:"))
        .collect();
    let lines: Vec<&str> = if errors.is_empty() {
        let all: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
        all[all.len().saturating_sub(STDERR_TAIL)..].to_vec()
    } else {
        errors
    };
    lines.join("\n")
}

pub struct YtDlpEngine {
    bin: String,
    cookies_file: Option<PathBuf>,
}

impl YtDlpEngine {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            bin: tools.ytdlp_bin.clone(),
            cookies_file: tools.cookies_file.clone(),
        }
    }

    fn args(&self, request: &ExtractRequest, attempt: &AttemptConfig) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--newline".into(),
            "--no-simulate".into(),
            "--progress".into(),
            "--no-part".into(),
            "--progress-template".into(),
            PROGRESS_TEMPLATE.into(),
            "--print".into(),
            DONE_TEMPLATE.into(),
            "--print".into(),
            INFO_TEMPLATE.into(),
            "-f".into(),
            attempt.format_for(request.quality),
        ];
        if let Some(fmt) = &attempt.merge_output_format {
            args.push("--merge-output-format".into());
            args.push(fmt.clone());
        }
        if !attempt.use_ffmpeg {
            args.push("--fixup".into());
            args.push("never".into());
        }
        match request.item {
            Some(item) => {
                args.push("--yes-playlist".into());
                args.push("--playlist-items".into());
                args.push(item.to_string());
            }
            None => args.push("--no-playlist".into()),
        }
        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".into());
            args.push(cookies.display().to_string());
        }
        args.push("-o".into());
        args.push(request.work_dir.join("%(id)s.%(ext)s").display().to_string());
        args.push("--".into());
        args.push(request.url.clone());
        args
    }
}

#[async_trait]
impl ExtractionEngine for YtDlpEngine {
    async fn extract(
        &self,
        request: &ExtractRequest,
        attempt: &AttemptConfig,
        progress: &ProgressState,
    ) -> Result<RawOutput, EngineError> {
        let args = self.args(request, attempt);
        tracing::debug!(bin = %self.bin, label = %attempt.label, item = ?request.item, "starting yt-dlp");

        let mut child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::new(ExtractErrorKind::Other, format!("failed to start {}: {e}", self.bin)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::new(ExtractErrorKind::Other, "yt-dlp stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::new(ExtractErrorKind::Other, "yt-dlp stderr not captured"))?;

        let read_stdout = async {
            let mut path = None;
            let mut info = ExtractedInfo::default();
            // Titles and paths are not guaranteed UTF-8; keep reading past bad bytes.
            let mut segments = BufReader::new(stdout).split(b'\n');
            loop {
                let raw = match segments.next_segment().await {
                    Ok(Some(raw)) => raw,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("reading yt-dlp stdout: {}", e);
                        break;
                    }
                };
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches('\r');
                match parse_line(line) {
                    Some(Line::Progress { done, total }) => progress.set_bytes(done, total),
                    Some(Line::Done(p)) => path = Some(p),
                    Some(Line::Info(i)) => info = i,
                    None => tracing::trace!(line = %line, "yt-dlp"),
                }
            }
            (path, info)
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            if let Err(e) = stderr.read_to_end(&mut buf).await {
                tracing::debug!("reading yt-dlp stderr: {}", e);
            }
            String::from_utf8_lossy(&buf).into_owned()
        };
        let ((path, info), stderr_text, status) = tokio::join!(read_stdout, read_stderr, child.wait());
        let status = status
            .map_err(|e| EngineError::new(ExtractErrorKind::Other, format!("waiting for yt-dlp: {e}")))?;

        if !status.success() {
            let summary = stderr_summary(&stderr_text);
            let err = EngineError::from_message(if summary.is_empty() {
                format!("yt-dlp exited with {status}")
            } else {
                summary
            });
            tracing::debug!(kind = %err.kind, "yt-dlp failed: {}", err.detail);
            return Err(err);
        }

        match (path, request.item) {
            (Some(path), _) => Ok(RawOutput { path, info }),
            (None, Some(item)) => Err(EngineError::new(
                ExtractErrorKind::NoEntries,
                format!("no entry at position {item}"),
            )),
            (None, None) => Err(EngineError::from_message(format!(
                "yt-dlp produced no file: {}",
                stderr_summary(&stderr_text)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::QualityKey;

    #[test]
    fn parses_progress_lines() {
        assert_eq!(
            parse_line("FBPROG 1024 4096 NA"),
            Some(Line::Progress { done: 1024, total: 4096 })
        );
        assert_eq!(
            parse_line("FBPROG 1024 NA 8000.5"),
            Some(Line::Progress { done: 1024, total: 8000 })
        );
        assert_eq!(
            parse_line("FBPROG 10 NA NA"),
            Some(Line::Progress { done: 10, total: 0 })
        );
        assert_eq!(parse_line("FBPROG NA NA NA"), None);
        assert_eq!(parse_line("[download] 50%"), None);
    }

    #[test]
    fn parses_done_and_info() {
        assert_eq!(
            parse_line("FBDONE /tmp/job/abc.mp4"),
            Some(Line::Done(PathBuf::from("/tmp/job/abc.mp4")))
        );
        match parse_line(r#"FBINFO {"id":"abc","title":"Clip","duration":61.0,"width":1920,"height":1080,"ext":"mp4"}"#) {
            Some(Line::Info(info)) => {
                assert_eq!(info.title.as_deref(), Some("Clip"));
                assert_eq!(info.duration_secs, Some(61.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stderr_summary_prefers_error_lines() {
        let text = "[youtube] abc: Downloading webpage\nWARNING: slow\nERROR: [youtube] abc: Private video\n";
        assert_eq!(stderr_summary(text), "ERROR: [youtube] abc: Private video");
        let kind = EngineError::from_message(stderr_summary(text)).kind;
        assert_eq!(kind, ExtractErrorKind::Blocked);
    }

    #[cfg(unix)]
    fn fake_ytdlp(dir: &std::path::Path, body: &str) -> YtDlpEngine {
        use std::os::unix::fs::PermissionsExt;

        let bin = dir.join("yt-dlp");
        std::fs::write(&bin, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        YtDlpEngine::new(&ToolsConfig {
            ytdlp_bin: bin.display().to_string(),
            ..ToolsConfig::default()
        })
    }

    #[cfg(unix)]
    fn single_request(work_dir: &std::path::Path) -> ExtractRequest {
        ExtractRequest {
            url: "https://www.youtube.com/watch?v=abc".to_string(),
            item: None,
            quality: QualityKey::Best,
            work_dir: work_dir.to_path_buf(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_stderr_is_still_classified() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_ytdlp(
            dir.path(),
            r#"printf '\377\376 garbage\n' >&2
printf 'ERROR: [youtube] abc: Private video. Sign in if you have been granted access\n' >&2
exit 1"#,
        );
        let attempt = &AttemptConfig::default_chain()[0];
        let err = engine
            .extract(&single_request(dir.path()), attempt, &ProgressState::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExtractErrorKind::Blocked);
        assert!(err.detail.contains("Private video"));
        assert!(!err.kind.is_recoverable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_stdout_line_does_not_stop_reading() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_ytdlp(
            dir.path(),
            r#"printf 'FBINFO {"title":"caf\351"}\n'
printf 'FBPROG 50 100 NA\n'
printf 'FBDONE /tmp/w/abc.mp4\n'
exit 0"#,
        );
        let attempt = &AttemptConfig::default_chain()[0];
        let progress = ProgressState::new();
        let out = engine
            .extract(&single_request(dir.path()), attempt, &progress)
            .await
            .unwrap();
        assert_eq!(out.path, PathBuf::from("/tmp/w/abc.mp4"));
        assert_eq!(progress.snapshot().bytes_done, 50);
    }

    #[test]
    fn args_select_playlist_item_and_format() {
        let engine = YtDlpEngine::new(&ToolsConfig::default());
        let request = ExtractRequest {
            url: "https://www.youtube.com/playlist?list=PL1".to_string(),
            item: Some(8),
            quality: QualityKey::Height(720),
            work_dir: PathBuf::from("/tmp/w"),
        };
        let attempt = &AttemptConfig::default_chain()[0];
        let args = engine.args(&request, attempt);
        let pos = args.iter().position(|a| a == "--playlist-items").unwrap();
        assert_eq!(args[pos + 1], "8");
        let f = args.iter().position(|a| a == "-f").unwrap();
        assert!(args[f + 1].contains("height<=720"));
        assert_eq!(args.last().map(String::as_str), Some(request.url.as_str()));
    }
}
