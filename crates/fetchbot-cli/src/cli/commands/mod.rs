//! CLI command handlers, one per file.

mod fetch;
mod forget;
mod history;
mod lookup;
mod serve;

pub use fetch::run_fetch;
pub use forget::run_forget;
pub use history::run_history;
pub use lookup::run_lookup;
pub use serve::run_serve;

use anyhow::Result;
use fetchbot_core::adapters::{FfmpegTool, OutboxChannel, YtDlpEngine};
use fetchbot_core::config::FetchConfig;
use fetchbot_core::pipeline::FetchContext;
use fetchbot_core::request::{split_range_suffix, ItemRange, QualityKey, RequestSpec};
use fetchbot_core::store::{DocumentStore, SqliteStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Loaded config plus the open document store.
pub struct Runtime {
    pub config: FetchConfig,
    pub store: Arc<dyn DocumentStore>,
}

impl Runtime {
    pub async fn open(config: FetchConfig, db_path: Option<&Path>) -> Result<Self> {
        let store = match db_path {
            Some(path) => SqliteStore::open_at(path).await?,
            None => SqliteStore::open_default().await?,
        };
        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    /// Wire the real adapters: yt-dlp, ffmpeg and the outbox directory.
    pub fn context(&self) -> Result<Arc<FetchContext>> {
        let tools = self.config.tools_or_default();
        let outbox_dir = self.config.resolve_outbox_dir()?;
        let work_dir = self.config.resolve_work_dir()?;
        tracing::debug!(outbox = %outbox_dir.display(), work = %work_dir.display(), "building fetch context");
        let channel = OutboxChannel::new(outbox_dir, Duration::from_millis(tools.min_send_interval_ms));
        Ok(Arc::new(FetchContext::new(
            self.config.clone(),
            self.store.clone(),
            Arc::new(YtDlpEngine::new(&tools)),
            Arc::new(FfmpegTool::new(&tools)),
            Arc::new(channel),
            work_dir,
        )))
    }
}

/// Build a request from CLI input. An explicit `items` range wins over a
/// `*start*end` suffix, which is stripped either way. Ranges longer than
/// `max_items` are rejected.
pub fn parse_request(url: &str, quality: &str, items: Option<&str>, max_items: u32) -> Result<RequestSpec> {
    let quality: QualityKey = quality.parse()?;
    let (url, suffix) = split_range_suffix(url.trim())?;
    let range = match items {
        Some(items) => items.parse::<ItemRange>()?,
        None => suffix.unwrap_or(ItemRange::Single),
    };
    range.check_limit(max_items)?;
    Ok(RequestSpec::with_range(url, range, quality)?)
}
