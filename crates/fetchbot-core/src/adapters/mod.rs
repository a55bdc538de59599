//! Concrete collaborators: yt-dlp, ffmpeg, and a filesystem outbox channel.

mod ffmpeg;
mod outbox;
mod ytdlp;

pub use ffmpeg::FfmpegTool;
pub use outbox::OutboxChannel;
pub use ytdlp::YtDlpEngine;
