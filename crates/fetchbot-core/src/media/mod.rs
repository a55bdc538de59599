//! Media post-processing: conversion tool boundary, split planning, normalization.

mod postprocess;
mod split;

pub use postprocess::{Artifact, ArtifactPart, PostProcessError, PostProcessor, Thumbnail};
pub use split::{part_count, plan_split, SplitSpan};

use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probe {
    pub duration_secs: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{tool} failed ({status}): {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("unexpected {tool} output: {detail}")]
    Parse { tool: String, detail: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Rewrap (or re-encode) `path` into `container`; returns the new file.
    async fn remux(&self, path: &Path, container: &str) -> Result<PathBuf, MediaError>;

    async fn probe(&self, path: &Path) -> Result<Probe, MediaError>;

    /// Write a preview frame taken `at_secs` into the file; returns the image path.
    async fn thumbnail(&self, path: &Path, at_secs: f64) -> Result<PathBuf, MediaError>;

    /// Copy `[start_secs, end_secs)` of `path` into `target`.
    async fn cut(&self, path: &Path, start_secs: f64, end_secs: f64, target: &Path) -> Result<(), MediaError>;
}
