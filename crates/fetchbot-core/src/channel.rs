//! Messaging channel boundary.
//!
//! Adapters translate platform failures into `ChannelErrorKind` exactly once;
//! everything above this layer matches on the kind, never on message text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Handle to a message the channel accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat: String,
    pub message_id: i64,
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.chat, self.message_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub path: PathBuf,
    pub caption: String,
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// `None` lets the channel use its placeholder preview.
    pub thumbnail: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Media(MediaPayload),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelErrorKind {
    /// Target message or chat no longer exists.
    NotFound,
    /// Flood control; the channel says when to try again.
    RateLimited { retry_after: Duration },
    /// Edit carried the same text as the current message.
    NotModified,
    Other,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ChannelError {
    pub kind: ChannelErrorKind,
    pub message: String,
}

impl ChannelError {
    pub fn new(kind: ChannelErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ChannelErrorKind::NotFound, message)
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::new(
            ChannelErrorKind::RateLimited { retry_after },
            format!("rate limited, retry after {}s", retry_after.as_secs_f64()),
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ChannelErrorKind::Other, message)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind {
            ChannelErrorKind::RateLimited { retry_after } => Some(retry_after),
            _ => None,
        }
    }
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, destination: &str, payload: Payload) -> Result<MessageRef, ChannelError>;

    async fn edit(&self, message: &MessageRef, text: &str) -> Result<(), ChannelError>;

    async fn forward(&self, message: &MessageRef, destination: &str) -> Result<MessageRef, ChannelError>;

    async fn delete(&self, message: &MessageRef) -> Result<(), ChannelError>;
}
