//! In-process fakes for pipeline integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fetchbot_core::channel::{ChannelError, DeliveryChannel, MessageRef, Payload};
use fetchbot_core::config::{FetchConfig, ProgressConfig};
use fetchbot_core::extract::{
    AttemptConfig, EngineError, ExtractErrorKind, ExtractRequest, ExtractedInfo, ExtractionEngine, RawOutput,
};
use fetchbot_core::media::{MediaError, MediaTool, Probe};
use fetchbot_core::pipeline::FetchContext;
use fetchbot_core::progress::ProgressState;
use fetchbot_core::store::{DocumentStore, MemoryStore};

/// Engine that writes a small file per item, with scripted failures and delays.
#[derive(Default)]
pub struct FakeEngine {
    /// Every attempt with this label fails with the given kind.
    pub fail_labels: HashMap<String, ExtractErrorKind>,
    /// Every attempt for this playlist item fails with the given kind.
    pub fail_items: HashMap<u32, ExtractErrorKind>,
    /// Wait this long before producing output.
    pub delay: Option<Duration>,
    pub calls: Mutex<Vec<(Option<u32>, String)>>,
}

impl FakeEngine {
    pub fn calls(&self) -> Vec<(Option<u32>, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn items(&self) -> Vec<Option<u32>> {
        self.calls().into_iter().map(|(item, _)| item).collect()
    }
}

#[async_trait]
impl ExtractionEngine for FakeEngine {
    async fn extract(
        &self,
        request: &ExtractRequest,
        attempt: &AttemptConfig,
        progress: &ProgressState,
    ) -> Result<RawOutput, EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.item, attempt.label.clone()));
        std::fs::write(request.work_dir.join("download.part"), b"partial").unwrap();
        progress.set_bytes(7, 100);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(kind) = self.fail_labels.get(&attempt.label) {
            return Err(EngineError::new(*kind, format!("{} failed", attempt.label)));
        }
        if let Some(kind) = request.item.and_then(|i| self.fail_items.get(&i)) {
            return Err(EngineError::new(*kind, "scripted item failure"));
        }
        let item = request.item.unwrap_or(1);
        let path = request.work_dir.join(format!("item-{item}.mp4"));
        std::fs::write(&path, vec![1u8; 256]).unwrap();
        progress.set_bytes(100, 100);
        Ok(RawOutput {
            path,
            info: ExtractedInfo {
                id: Some(format!("v{item}")),
                title: Some(format!("Item {item}")),
                duration_secs: Some(10.0),
                width: Some(640),
                height: Some(360),
                ext: Some("mp4".to_string()),
                playlist_count: None,
            },
        })
    }
}

/// Conversion tool that only touches the filesystem.
#[derive(Default)]
pub struct FakeTool;

#[async_trait]
impl MediaTool for FakeTool {
    async fn remux(&self, path: &Path, container: &str) -> Result<PathBuf, MediaError> {
        let out = path.with_extension(container);
        std::fs::copy(path, &out)?;
        Ok(out)
    }

    async fn probe(&self, _path: &Path) -> Result<Probe, MediaError> {
        Ok(Probe {
            duration_secs: 10.0,
            width: Some(640),
            height: Some(360),
        })
    }

    async fn thumbnail(&self, path: &Path, _at_secs: f64) -> Result<PathBuf, MediaError> {
        let out = path.with_extension("jpg");
        std::fs::write(&out, b"jpeg")?;
        Ok(out)
    }

    async fn cut(&self, path: &Path, start_secs: f64, end_secs: f64, target: &Path) -> Result<(), MediaError> {
        let total = std::fs::metadata(path)?.len() as f64;
        let bytes = (total * (end_secs - start_secs) / 10.0).floor() as usize;
        std::fs::write(target, vec![0u8; bytes])?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub message: MessageRef,
    /// Text, or the caption of a media message.
    pub text: String,
    pub media: bool,
}

/// Channel that records everything in memory.
#[derive(Default)]
pub struct RecordingChannel {
    next_id: AtomicI64,
    pub sent: Mutex<Vec<Sent>>,
    pub edits: Mutex<Vec<(MessageRef, String)>>,
    pub forwards: Mutex<Vec<(MessageRef, MessageRef)>>,
    pub deleted: Mutex<Vec<MessageRef>>,
    /// Forwarding these message ids answers `NotFound`.
    pub gone: Mutex<HashSet<i64>>,
}

impl RecordingChannel {
    fn allocate(&self, chat: &str) -> MessageRef {
        MessageRef {
            chat: chat.to_string(),
            message_id: 1000 + self.next_id.fetch_add(1, Ordering::SeqCst),
        }
    }

    pub fn texts_to(&self, chat: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.message.chat == chat && !s.media)
            .map(|s| s.text.clone())
            .collect()
    }

    pub fn media_to(&self, chat: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.message.chat == chat && s.media)
            .map(|s| s.text.clone())
            .collect()
    }

    pub fn forwards_to(&self, chat: &str) -> usize {
        self.forwards
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, copy)| copy.chat == chat)
            .count()
    }

    pub fn last_edit(&self) -> Option<String> {
        self.edits.lock().unwrap().last().map(|(_, t)| t.clone())
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn send(&self, destination: &str, payload: Payload) -> Result<MessageRef, ChannelError> {
        let message = self.allocate(destination);
        let (text, media) = match payload {
            Payload::Text(t) => (t, false),
            Payload::Media(m) => {
                assert!(m.path.exists(), "media file must exist at send time");
                (m.caption, true)
            }
        };
        self.sent.lock().unwrap().push(Sent {
            message: message.clone(),
            text,
            media,
        });
        Ok(message)
    }

    async fn edit(&self, message: &MessageRef, text: &str) -> Result<(), ChannelError> {
        self.edits
            .lock()
            .unwrap()
            .push((message.clone(), text.to_string()));
        Ok(())
    }

    async fn forward(&self, message: &MessageRef, destination: &str) -> Result<MessageRef, ChannelError> {
        if self.gone.lock().unwrap().contains(&message.message_id) {
            return Err(ChannelError::not_found("message to forward not found"));
        }
        let copy = self.allocate(destination);
        self.forwards
            .lock()
            .unwrap()
            .push((message.clone(), copy.clone()));
        Ok(copy)
    }

    async fn delete(&self, message: &MessageRef) -> Result<(), ChannelError> {
        self.deleted.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub fn test_config() -> FetchConfig {
    FetchConfig {
        min_free_bytes: 0,
        job_timeout_secs: 60,
        audit_destination: Some("audit".to_string()),
        progress: Some(ProgressConfig {
            tick_ms: 10,
            idle_tick_ms: 100,
            min_edit_interval_ms: 20,
            max_edit_failures: 3,
        }),
        ..FetchConfig::default()
    }
}

pub struct Harness {
    pub ctx: Arc<FetchContext>,
    pub engine: Arc<FakeEngine>,
    pub channel: Arc<RecordingChannel>,
    pub store: Arc<MemoryStore>,
    pub work_root: PathBuf,
    _tmp: tempfile::TempDir,
}

impl Harness {
    pub fn new(engine: FakeEngine, config: FetchConfig) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let work_root = tmp.path().join("work");
        let engine = Arc::new(engine);
        let channel = Arc::new(RecordingChannel::default());
        let store = Arc::new(MemoryStore::new());
        let ctx = FetchContext::new(
            config,
            store.clone() as Arc<dyn DocumentStore>,
            engine.clone(),
            Arc::new(FakeTool),
            channel.clone(),
            work_root.clone(),
        );
        Self {
            ctx: Arc::new(ctx),
            engine,
            channel,
            store,
            work_root,
            _tmp: tmp,
        }
    }

    /// Entries left under the work root.
    pub fn leftovers(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.work_root) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Poll until the engine has been called at least `n` times.
    pub async fn wait_for_calls(&self, n: usize) {
        for _ in 0..500 {
            if self.engine.calls().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("engine was called {} times, expected {n}", self.engine.calls().len());
    }
}
