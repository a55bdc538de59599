//! `DeliveryChannel` that delivers into a directory tree.
//!
//! Each chat is a directory under the outbox root. A message is a
//! `<id>.txt` file holding its text or caption, plus `<id>-<name>` files for
//! attached media. Editing a message whose text file is gone reports
//! `NotFound`, like a chat platform does for a deleted message.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::channel::{ChannelError, ChannelErrorKind, DeliveryChannel, MessageRef, Payload};
use crate::delivery::now_millis;
use crate::store::doc_path;

pub struct OutboxChannel {
    root: PathBuf,
    next_id: AtomicI64,
    min_send_interval: Duration,
    last_send: Mutex<HashMap<String, Instant>>,
}

fn io_err(context: &str, e: io::Error) -> ChannelError {
    if e.kind() == io::ErrorKind::NotFound {
        ChannelError::not_found(format!("{context}: {e}"))
    } else {
        ChannelError::other(format!("{context}: {e}"))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

impl OutboxChannel {
    pub fn new(root: impl Into<PathBuf>, min_send_interval: Duration) -> Self {
        Self {
            root: root.into(),
            // Ids stay unique across restarts without scanning the tree.
            next_id: AtomicI64::new(now_millis() as i64),
            min_send_interval,
            last_send: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chat_dir(&self, chat: &str) -> PathBuf {
        self.root.join(doc_path(&[chat]))
    }

    fn allocate(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn text_path(&self, msg: &MessageRef) -> PathBuf {
        self.chat_dir(&msg.chat).join(format!("{}.txt", msg.message_id))
    }

    /// Per-chat flood control: answers with the remaining wait.
    fn check_rate(&self, chat: &str) -> Result<(), ChannelError> {
        if self.min_send_interval.is_zero() {
            return Ok(());
        }
        let now = Instant::now();
        let mut last = self.last_send.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(prev) = last.get(chat) {
            let elapsed = now.duration_since(*prev);
            if elapsed < self.min_send_interval {
                return Err(ChannelError::rate_limited(self.min_send_interval - elapsed));
            }
        }
        last.insert(chat.to_string(), now);
        Ok(())
    }

    /// Files that make up `msg`: its text file first, then attachments.
    async fn message_files(&self, msg: &MessageRef) -> Result<Vec<PathBuf>, ChannelError> {
        let dir = self.chat_dir(&msg.chat);
        let text = self.text_path(msg);
        if !tokio::fs::try_exists(&text).await.unwrap_or(false) {
            return Err(ChannelError::not_found(format!("message {msg} not found")));
        }
        let prefix = format!("{}-", msg.message_id);
        let mut files = vec![text];
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| io_err("read chat", e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err("read chat", e))? {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                files.push(entry.path());
            }
        }
        files[1..].sort();
        Ok(files)
    }

    /// Link (or copy) `src` into `dest`.
    async fn place(src: &Path, dest: &Path) -> io::Result<()> {
        if tokio::fs::hard_link(src, dest).await.is_ok() {
            return Ok(());
        }
        tokio::fs::copy(src, dest).await.map(|_| ())
    }
}

#[async_trait]
impl DeliveryChannel for OutboxChannel {
    async fn send(&self, destination: &str, payload: Payload) -> Result<MessageRef, ChannelError> {
        if matches!(payload, Payload::Media(_)) {
            self.check_rate(destination)?;
        }
        let dir = self.chat_dir(destination);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ChannelError::other(format!("create chat {destination}: {e}")))?;
        let msg = MessageRef {
            chat: destination.to_string(),
            message_id: self.allocate(),
        };
        let text = match payload {
            Payload::Text(text) => text,
            Payload::Media(media) => {
                let dest = dir.join(format!("{}-{}", msg.message_id, file_name(&media.path)));
                Self::place(&media.path, &dest)
                    .await
                    .map_err(|e| ChannelError::other(format!("attach {}: {e}", media.path.display())))?;
                if let Some(thumb) = &media.thumbnail {
                    let dest = dir.join(format!("{}-thumb-{}", msg.message_id, file_name(thumb)));
                    if let Err(e) = Self::place(thumb, &dest).await {
                        tracing::debug!(message = %msg, "thumbnail not attached: {}", e);
                    }
                }
                media.caption
            }
        };
        tokio::fs::write(self.text_path(&msg), text)
            .await
            .map_err(|e| ChannelError::other(format!("write message: {e}")))?;
        tracing::debug!(message = %msg, "outbox message written");
        Ok(msg)
    }

    async fn edit(&self, message: &MessageRef, text: &str) -> Result<(), ChannelError> {
        let path = self.text_path(message);
        match tokio::fs::read_to_string(&path).await {
            Ok(current) if current == text => Err(ChannelError::new(
                ChannelErrorKind::NotModified,
                "message is not modified",
            )),
            Ok(_) => tokio::fs::write(&path, text)
                .await
                .map_err(|e| io_err("edit message", e)),
            Err(e) => Err(io_err("edit message", e)),
        }
    }

    async fn forward(&self, message: &MessageRef, destination: &str) -> Result<MessageRef, ChannelError> {
        let files = self.message_files(message).await?;
        let dir = self.chat_dir(destination);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ChannelError::other(format!("create chat {destination}: {e}")))?;
        let copy = MessageRef {
            chat: destination.to_string(),
            message_id: self.allocate(),
        };
        let old_prefix = message.message_id.to_string();
        for src in &files {
            let name = file_name(src);
            let rest = name.strip_prefix(&old_prefix).unwrap_or(&name);
            let dest = dir.join(format!("{}{}", copy.message_id, rest));
            Self::place(src, &dest).await.map_err(|e| io_err("forward", e))?;
        }
        Ok(copy)
    }

    async fn delete(&self, message: &MessageRef) -> Result<(), ChannelError> {
        for path in self.message_files(message).await? {
            tokio::fs::remove_file(&path).await.map_err(|e| io_err("delete", e))?;
        }
        Ok(())
    }
}
