//! Turn raw engine output into a deliverable artifact.
//!
//! Order matters: container first (terminal on failure), then probe and
//! preview (placeholders on failure), then size-based splitting (best
//! effort per part).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::split::{plan_split, SplitSpan};
use super::{MediaError, MediaTool};
use crate::extract::RawOutput;

/// How many times an oversized part may be re-split before it is dropped.
const MAX_RESPLIT_DEPTH: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Thumbnail {
    File(PathBuf),
    /// Probe or frame grab failed; the channel shows its default preview.
    Placeholder,
}

impl Thumbnail {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Thumbnail::File(p) => Some(p),
            Thumbnail::Placeholder => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPart {
    /// 1-based position among the parts that materialized.
    pub index: usize,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub start_secs: f64,
    pub duration_secs: Option<f64>,
    pub thumbnail: Thumbnail,
}

/// Deliverable output of one item.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub title: String,
    pub parts: Vec<ArtifactPart>,
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Size of the normalized file before splitting.
    pub size_bytes: u64,
}

impl Artifact {
    pub fn is_split(&self) -> bool {
        self.parts.len() > 1
    }

    /// Every local file the artifact owns (parts and previews).
    pub fn files(&self) -> Vec<&Path> {
        let mut files = Vec::with_capacity(self.parts.len() * 2);
        for part in &self.parts {
            files.push(part.path.as_path());
            if let Some(thumb) = part.thumbnail.path() {
                files.push(thumb);
            }
        }
        files
    }

    /// Remove the artifact's files. Missing files are ignored.
    pub async fn remove_files(&self) {
        for path in self.files() {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), "could not remove artifact file: {}", e);
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PostProcessError {
    #[error("engine output {0} is missing or empty")]
    EmptyOutput(PathBuf),
    #[error("conversion to {container} failed: {source}")]
    Remux {
        container: String,
        #[source]
        source: MediaError,
    },
    #[error("output is {size} bytes (limit {ceiling}) and its duration is unknown, cannot split")]
    UnknownDuration { size: u64, ceiling: u64 },
    #[error("splitting produced no usable parts")]
    SplitFailed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct PostProcessor {
    tool: Arc<dyn MediaTool>,
    ceiling: u64,
    accepted_containers: Vec<String>,
    target_container: String,
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

/// Offset for a preview frame: one second in, or the middle of very short clips.
fn preview_offset(start: f64, duration: Option<f64>) -> f64 {
    start + duration.map(|d| (d / 2.0).min(1.0)).unwrap_or(0.0)
}

impl PostProcessor {
    pub fn new(
        tool: Arc<dyn MediaTool>,
        ceiling: u64,
        accepted_containers: Vec<String>,
        target_container: String,
    ) -> Self {
        Self {
            tool,
            ceiling,
            accepted_containers: accepted_containers
                .into_iter()
                .map(|c| c.to_ascii_lowercase())
                .collect(),
            target_container,
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub async fn normalize(&self, raw: RawOutput, duration_hint: Option<f64>) -> Result<Artifact, PostProcessError> {
        let RawOutput { path, info } = raw;
        match file_size(&path).await {
            Some(n) if n > 0 => {}
            _ => return Err(PostProcessError::EmptyOutput(path)),
        }

        let path = self.ensure_container(path).await?;

        let (duration, width, height) = match self.tool.probe(&path).await {
            Ok(probe) => (
                Some(probe.duration_secs).filter(|d| *d > 0.0),
                probe.width.or(info.width),
                probe.height.or(info.height),
            ),
            Err(e) => {
                tracing::warn!(path = %path.display(), "probe failed, using placeholders: {}", e);
                (None, info.width, info.height)
            }
        };
        let duration = duration.or(info.duration_secs).or(duration_hint);
        let title = info
            .title
            .clone()
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "video".to_string());

        let size = file_size(&path)
            .await
            .ok_or_else(|| PostProcessError::EmptyOutput(path.clone()))?;

        let parts = if size <= self.ceiling {
            let thumbnail = self.preview(&path, preview_offset(0.0, duration)).await;
            vec![ArtifactPart {
                index: 1,
                path,
                size_bytes: size,
                start_secs: 0.0,
                duration_secs: duration,
                thumbnail,
            }]
        } else {
            let Some(duration) = duration else {
                return Err(PostProcessError::UnknownDuration {
                    size,
                    ceiling: self.ceiling,
                });
            };
            let parts = self.split(&path, size, duration).await;
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::debug!(path = %path.display(), "could not remove unsplit source: {}", e);
            }
            if parts.is_empty() {
                return Err(PostProcessError::SplitFailed);
            }
            parts
        };

        Ok(Artifact {
            title,
            parts,
            duration_secs: duration,
            width,
            height,
            size_bytes: size,
        })
    }

    async fn ensure_container(&self, path: PathBuf) -> Result<PathBuf, PostProcessError> {
        let ext = extension(&path);
        if self.accepted_containers.iter().any(|c| *c == ext) {
            return Ok(path);
        }
        tracing::debug!(from = %ext, to = %self.target_container, "remuxing output");
        let converted = self
            .tool
            .remux(&path, &self.target_container)
            .await
            .map_err(|source| PostProcessError::Remux {
                container: self.target_container.clone(),
                source,
            })?;
        if converted != path {
            let _ = tokio::fs::remove_file(&path).await;
        }
        Ok(converted)
    }

    async fn preview(&self, path: &Path, at_secs: f64) -> Thumbnail {
        match self.tool.thumbnail(path, at_secs).await {
            Ok(thumb) if file_size(&thumb).await.unwrap_or(0) > 0 => Thumbnail::File(thumb),
            Ok(thumb) => {
                tracing::warn!(path = %thumb.display(), "preview frame is empty, using placeholder");
                Thumbnail::Placeholder
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "preview failed, using placeholder: {}", e);
                Thumbnail::Placeholder
            }
        }
    }

    /// Cut `path` into parts under the ceiling. Parts that fail are logged and skipped.
    async fn split(&self, path: &Path, size: u64, duration: f64) -> Vec<ArtifactPart> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "part".to_string());
        let ext = extension(path);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut queue: VecDeque<(SplitSpan, u8)> = plan_split(size, duration, self.ceiling)
            .into_iter()
            .map(|span| (span, 0))
            .collect();
        tracing::info!(path = %path.display(), size, parts = queue.len(), "splitting oversized output");

        let mut parts = Vec::with_capacity(queue.len());
        let mut seq = 0usize;
        while let Some((span, depth)) = queue.pop_front() {
            seq += 1;
            let target = dir.join(format!("{stem}.part{seq:03}.{ext}"));
            if let Err(e) = self.tool.cut(path, span.start_secs, span.end_secs, &target).await {
                tracing::warn!(start = span.start_secs, end = span.end_secs, "split part failed, skipping: {}", e);
                let _ = tokio::fs::remove_file(&target).await;
                continue;
            }
            let part_size = file_size(&target).await.unwrap_or(0);
            if part_size == 0 {
                tracing::warn!(path = %target.display(), "split part is empty, skipping");
                let _ = tokio::fs::remove_file(&target).await;
                continue;
            }
            if part_size > self.ceiling {
                let _ = tokio::fs::remove_file(&target).await;
                if depth < MAX_RESPLIT_DEPTH {
                    let sub = plan_split(part_size, span.duration_secs(), self.ceiling);
                    tracing::debug!(path = %target.display(), part_size, sub_parts = sub.len(), "part over limit, re-splitting");
                    for sub_span in sub.into_iter().rev() {
                        queue.push_front((
                            SplitSpan {
                                start_secs: span.start_secs + sub_span.start_secs,
                                end_secs: span.start_secs + sub_span.end_secs,
                            },
                            depth + 1,
                        ));
                    }
                } else {
                    tracing::warn!(path = %target.display(), part_size, "part still over limit, skipping");
                }
                continue;
            }

            let part_duration = span.duration_secs();
            let thumbnail = self
                .preview(&target, preview_offset(0.0, Some(part_duration)))
                .await;
            parts.push(ArtifactPart {
                index: parts.len() + 1,
                path: target,
                size_bytes: part_size,
                start_secs: span.start_secs,
                duration_secs: Some(part_duration),
                thumbnail,
            });
        }
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractedInfo;
    use crate::media::Probe;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Conversion tool that writes byte-proportional parts.
    #[derive(Default)]
    struct FakeTool {
        probe: Option<Probe>,
        fail_remux: bool,
        fail_thumbnail: bool,
        fail_cut_at: Vec<usize>,
        cuts: Mutex<usize>,
    }

    #[async_trait]
    impl MediaTool for FakeTool {
        async fn remux(&self, path: &Path, container: &str) -> Result<PathBuf, MediaError> {
            if self.fail_remux {
                return Err(MediaError::Failed {
                    tool: "fake".into(),
                    status: "1".into(),
                    stderr: "codec".into(),
                });
            }
            let out = path.with_extension(container);
            std::fs::copy(path, &out)?;
            Ok(out)
        }

        async fn probe(&self, _path: &Path) -> Result<Probe, MediaError> {
            self.probe.ok_or(MediaError::Parse {
                tool: "fake".into(),
                detail: "no duration".into(),
            })
        }

        async fn thumbnail(&self, path: &Path, _at: f64) -> Result<PathBuf, MediaError> {
            if self.fail_thumbnail {
                return Err(MediaError::Parse {
                    tool: "fake".into(),
                    detail: "no frame".into(),
                });
            }
            let out = path.with_extension("jpg");
            std::fs::write(&out, b"jpeg")?;
            Ok(out)
        }

        async fn cut(&self, path: &Path, start: f64, end: f64, target: &Path) -> Result<(), MediaError> {
            let n = {
                let mut cuts = self.cuts.lock().unwrap();
                *cuts += 1;
                *cuts
            };
            if self.fail_cut_at.contains(&n) {
                return Err(MediaError::Failed {
                    tool: "fake".into(),
                    status: "1".into(),
                    stderr: "cut".into(),
                });
            }
            let total = std::fs::metadata(path)?.len() as f64;
            let duration = self.probe.map(|p| p.duration_secs).unwrap_or(100.0);
            let bytes = (total * (end - start) / duration).floor() as usize;
            std::fs::write(target, vec![0u8; bytes])?;
            Ok(())
        }
    }

    fn raw(dir: &Path, name: &str, size: usize) -> RawOutput {
        let path = dir.join(name);
        std::fs::write(&path, vec![1u8; size]).unwrap();
        RawOutput {
            path,
            info: ExtractedInfo {
                title: Some("Clip".into()),
                ..Default::default()
            },
        }
    }

    fn processor(tool: FakeTool, ceiling: u64) -> PostProcessor {
        PostProcessor::new(Arc::new(tool), ceiling, vec!["mp4".into()], "mp4".into())
    }

    fn probe(duration: f64) -> Option<Probe> {
        Some(Probe {
            duration_secs: duration,
            width: Some(1280),
            height: Some(720),
        })
    }

    #[tokio::test]
    async fn small_output_is_single_part_with_preview() {
        let dir = tempfile::tempdir().unwrap();
        let pp = processor(FakeTool { probe: probe(30.0), ..Default::default() }, 10_000);
        let artifact = pp.normalize(raw(dir.path(), "a.mp4", 500), None).await.unwrap();
        assert_eq!(artifact.parts.len(), 1);
        assert!(!artifact.is_split());
        assert_eq!(artifact.title, "Clip");
        assert_eq!(artifact.duration_secs, Some(30.0));
        assert_eq!(artifact.height, Some(720));
        assert!(matches!(artifact.parts[0].thumbnail, Thumbnail::File(_)));
    }

    #[tokio::test]
    async fn oversized_output_splits_under_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let pp = processor(FakeTool { probe: probe(100.0), ..Default::default() }, 3_000);
        let artifact = pp.normalize(raw(dir.path(), "big.mp4", 10_000), None).await.unwrap();
        assert_eq!(artifact.parts.len(), 4);
        for part in &artifact.parts {
            assert!(part.size_bytes <= 3_000);
            assert!(part.size_bytes > 0);
            assert!(part.path.exists());
        }
        let total: f64 = artifact.parts.iter().filter_map(|p| p.duration_secs).sum();
        assert!((total - 100.0).abs() < 1e-6);
        assert!(!dir.path().join("big.mp4").exists());
        let indices: Vec<usize> = artifact.parts.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failed_part_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FakeTool {
            probe: probe(100.0),
            fail_cut_at: vec![2],
            ..Default::default()
        };
        let pp = processor(tool, 3_000);
        let artifact = pp.normalize(raw(dir.path(), "big.mp4", 10_000), None).await.unwrap();
        assert_eq!(artifact.parts.len(), 3);
        assert_eq!(artifact.parts[1].start_secs, 50.0);
    }

    #[tokio::test]
    async fn all_parts_failing_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FakeTool {
            probe: probe(100.0),
            fail_cut_at: vec![1, 2],
            ..Default::default()
        };
        let pp = processor(tool, 6_000);
        let err = pp.normalize(raw(dir.path(), "big.mp4", 10_000), None).await.unwrap_err();
        assert!(matches!(err, PostProcessError::SplitFailed));
    }

    #[tokio::test]
    async fn probe_failure_uses_placeholders_and_hint() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FakeTool {
            fail_thumbnail: true,
            ..Default::default()
        };
        let pp = processor(tool, 10_000);
        let artifact = pp.normalize(raw(dir.path(), "a.mp4", 100), Some(42.0)).await.unwrap();
        assert_eq!(artifact.duration_secs, Some(42.0));
        assert_eq!(artifact.parts[0].thumbnail, Thumbnail::Placeholder);
    }

    #[tokio::test]
    async fn oversized_without_duration_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let pp = processor(FakeTool::default(), 1_000);
        let err = pp.normalize(raw(dir.path(), "a.mp4", 5_000), None).await.unwrap_err();
        assert!(matches!(err, PostProcessError::UnknownDuration { size: 5_000, ceiling: 1_000 }));
    }

    #[tokio::test]
    async fn foreign_container_is_remuxed() {
        let dir = tempfile::tempdir().unwrap();
        let pp = processor(FakeTool { probe: probe(10.0), ..Default::default() }, 10_000);
        let artifact = pp.normalize(raw(dir.path(), "a.webm", 100), None).await.unwrap();
        assert_eq!(artifact.parts[0].path, dir.path().join("a.mp4"));
        assert!(!dir.path().join("a.webm").exists());
    }

    #[tokio::test]
    async fn remux_failure_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FakeTool {
            fail_remux: true,
            ..Default::default()
        };
        let pp = processor(tool, 10_000);
        let err = pp.normalize(raw(dir.path(), "a.mkv", 100), None).await.unwrap_err();
        assert!(matches!(err, PostProcessError::Remux { .. }));
    }

    #[tokio::test]
    async fn empty_output_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pp = processor(FakeTool::default(), 10_000);
        let err = pp.normalize(raw(dir.path(), "a.mp4", 0), None).await.unwrap_err();
        assert!(matches!(err, PostProcessError::EmptyOutput(_)));
    }

    #[tokio::test]
    async fn artifact_remove_files_cleans_parts_and_previews() {
        let dir = tempfile::tempdir().unwrap();
        let pp = processor(FakeTool { probe: probe(100.0), ..Default::default() }, 3_000);
        let artifact = pp.normalize(raw(dir.path(), "big.mp4", 10_000), None).await.unwrap();
        assert_eq!(artifact.files().len(), 8);
        artifact.remove_files().await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
