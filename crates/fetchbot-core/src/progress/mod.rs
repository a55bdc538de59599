//! Job progress: shared counters, throttled status edits, and rendering.

mod render;
mod reporter;
mod state;
mod throttle;

pub use render::render;
pub use reporter::{ProgressReporter, ReporterHandle, ReporterStats, StatusSink};
pub use state::{Phase, ProgressSnapshot, ProgressState};
pub use throttle::Throttle;
