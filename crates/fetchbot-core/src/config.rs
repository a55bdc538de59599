use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::extract::AttemptConfig;

const MIB: u64 = 1024 * 1024;

/// Delivery retry parameters (optional section in config.toml).
/// Only channel rate limiting is retried; see `retry::RetryPolicy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum number of attempts per send/forward (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds when the channel gives no explicit wait.
    pub base_delay_secs: f64,
    /// Upper bound on any single wait, even if the channel asks for more.
    pub max_delay_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1.0,
            max_delay_secs: 30,
        }
    }
}

/// Progress reporter cadence (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// How often the reporter samples counters while downloading.
    pub tick_ms: u64,
    /// How often the waiting animation advances.
    pub idle_tick_ms: u64,
    /// Minimum spacing between two outbound status edits.
    pub min_edit_interval_ms: u64,
    /// Consecutive edit failures (other than rate limiting) before the reporter gives up.
    pub max_edit_failures: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            tick_ms: 250,
            idle_tick_ms: 3000,
            min_edit_interval_ms: 1000,
            max_edit_failures: 5,
        }
    }
}

impl ProgressConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms.max(1))
    }

    pub fn min_edit_interval(&self) -> Duration {
        Duration::from_millis(self.min_edit_interval_ms)
    }
}

/// External tool locations and adapter knobs (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub ytdlp_bin: String,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// Netscape cookie jar handed to yt-dlp for restricted content.
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
    /// Outbox channel: minimum spacing between sends to the same chat (0 = unlimited).
    #[serde(default)]
    pub min_send_interval_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_bin: "yt-dlp".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            cookies_file: None,
            min_send_interval_ms: 0,
        }
    }
}

/// Global configuration loaded from `~/.config/fetchbot/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum number of jobs running at once across all identities.
    pub max_workers: usize,
    /// Wall-clock ceiling for a single job, in seconds.
    pub job_timeout_secs: u64,
    /// Largest file handed to the delivery channel. Kept a few percent under the platform limit.
    pub max_artifact_bytes: u64,
    /// Free space required in the work directory before extraction starts.
    pub min_free_bytes: u64,
    /// How long shutdown waits for in-flight jobs before cancelling them.
    pub shutdown_grace_secs: u64,
    /// Largest playlist slice one request may ask for.
    #[serde(default = "default_max_batch_items")]
    pub max_batch_items: u32,
    /// Containers delivered as-is; anything else is remuxed to `target_container`.
    pub accepted_containers: Vec<String>,
    pub target_container: String,
    /// Chat that receives a mirror of every delivered artifact.
    #[serde(default)]
    pub audit_destination: Option<String>,
    /// Scratch directory root (default: XDG cache dir).
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Outbox root for the directory channel (default: XDG data dir).
    #[serde(default)]
    pub outbox_dir: Option<PathBuf>,
    /// Document store file (default: XDG state dir).
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Ordered extraction strategies; empty means built-in defaults.
    #[serde(default)]
    pub attempts: Vec<AttemptConfig>,
    #[serde(default)]
    pub progress: Option<ProgressConfig>,
    #[serde(default)]
    pub delivery: Option<DeliveryConfig>,
    #[serde(default)]
    pub tools: Option<ToolsConfig>,
}

pub const DEFAULT_MAX_BATCH_ITEMS: u32 = 50;

fn default_max_batch_items() -> u32 {
    DEFAULT_MAX_BATCH_ITEMS
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            job_timeout_secs: 2 * 60 * 60,
            max_artifact_bytes: 1950 * MIB,
            min_free_bytes: 2048 * MIB,
            shutdown_grace_secs: 30,
            max_batch_items: DEFAULT_MAX_BATCH_ITEMS,
            accepted_containers: vec!["mp4".to_string()],
            target_container: "mp4".to_string(),
            audit_destination: None,
            work_dir: None,
            outbox_dir: None,
            db_path: None,
            attempts: Vec::new(),
            progress: None,
            delivery: None,
            tools: None,
        }
    }
}

impl FetchConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Configured attempts, or the built-in fallback chain when none are set.
    pub fn attempt_chain(&self) -> Vec<AttemptConfig> {
        if self.attempts.is_empty() {
            AttemptConfig::default_chain()
        } else {
            self.attempts.clone()
        }
    }

    pub fn progress_or_default(&self) -> ProgressConfig {
        self.progress.clone().unwrap_or_default()
    }

    pub fn delivery_or_default(&self) -> DeliveryConfig {
        self.delivery.clone().unwrap_or_default()
    }

    pub fn tools_or_default(&self) -> ToolsConfig {
        self.tools.clone().unwrap_or_default()
    }

    /// Work directory root, falling back to `~/.cache/fetchbot/work`.
    pub fn resolve_work_dir(&self) -> Result<PathBuf> {
        match &self.work_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(xdg::BaseDirectories::with_prefix("fetchbot")?
                .get_cache_home()
                .join("work")),
        }
    }

    /// Outbox root, falling back to `~/.local/share/fetchbot/outbox`.
    pub fn resolve_outbox_dir(&self) -> Result<PathBuf> {
        match &self.outbox_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(xdg::BaseDirectories::with_prefix("fetchbot")?
                .get_data_home()
                .join("outbox")),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchbot")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FetchConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FetchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FetchConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        max_workers = 2
        job_timeout_secs = 60
        max_artifact_bytes = 1000
        min_free_bytes = 10
        shutdown_grace_secs = 5
        accepted_containers = ["mp4", "webm"]
        target_container = "mp4"
    "#;

    #[test]
    fn default_config_values() {
        let cfg = FetchConfig::default();
        assert_eq!(cfg.max_workers, 4);
        assert_eq!(cfg.job_timeout(), Duration::from_secs(7200));
        assert_eq!(cfg.max_artifact_bytes, 1950 * MIB);
        assert!(cfg.max_artifact_bytes < 2000 * MIB);
        assert_eq!(cfg.min_free_bytes, 2 * 1024 * MIB);
        assert_eq!(cfg.attempt_chain().len(), 3);
        assert_eq!(cfg.max_batch_items, 50);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = FetchConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: FetchConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_workers, cfg.max_workers);
        assert_eq!(parsed.job_timeout_secs, cfg.job_timeout_secs);
        assert_eq!(parsed.max_artifact_bytes, cfg.max_artifact_bytes);
        assert_eq!(parsed.accepted_containers, cfg.accepted_containers);
    }

    #[test]
    fn config_toml_custom_values() {
        let cfg: FetchConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(cfg.max_workers, 2);
        assert_eq!(cfg.job_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.accepted_containers, vec!["mp4", "webm"]);
        assert!(cfg.audit_destination.is_none());
        assert!(cfg.progress.is_none());
        assert_eq!(cfg.progress_or_default().min_edit_interval_ms, 1000);
        assert_eq!(cfg.delivery_or_default().max_attempts, 3);
        assert_eq!(cfg.max_batch_items, DEFAULT_MAX_BATCH_ITEMS);
    }

    #[test]
    fn config_toml_optional_sections() {
        let toml = format!(
            r#"{MINIMAL}
            audit_destination = "audit"

            [[attempts]]
            label = "only"
            format = "best"

            [progress]
            tick_ms = 200
            idle_tick_ms = 2000
            min_edit_interval_ms = 500
            max_edit_failures = 2

            [delivery]
            max_attempts = 5
            base_delay_secs = 0.5
            max_delay_secs = 10

            [tools]
            ytdlp_bin = "/opt/yt-dlp"
            ffmpeg_bin = "ffmpeg"
            ffprobe_bin = "ffprobe"
            "#
        );
        let cfg: FetchConfig = toml::from_str(&toml).unwrap();
        assert_eq!(cfg.audit_destination.as_deref(), Some("audit"));
        let chain = cfg.attempt_chain();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].label, "only");
        let progress = cfg.progress.as_ref().unwrap();
        assert_eq!(progress.tick(), Duration::from_millis(200));
        assert_eq!(progress.min_edit_interval(), Duration::from_millis(500));
        let delivery = cfg.delivery.as_ref().unwrap();
        assert_eq!(delivery.max_attempts, 5);
        assert!((delivery.base_delay_secs - 0.5).abs() < 1e-9);
        let tools = cfg.tools.as_ref().unwrap();
        assert_eq!(tools.ytdlp_bin, "/opt/yt-dlp");
        assert!(tools.cookies_file.is_none());
        assert_eq!(tools.min_send_interval_ms, 0);
    }
}
