//! Status text shown in the job's progress message.

use super::state::{Phase, ProgressSnapshot};

const BAR_CELLS: usize = 10;
const HOURGLASS: [&str; 2] = ["⏳", "⌛"];
const MIB: f64 = 1_048_576.0;

fn bar(fraction: f64) -> String {
    let filled = ((fraction * BAR_CELLS as f64).round() as usize).min(BAR_CELLS);
    format!("{}{}", "🟩".repeat(filled), "⬜".repeat(BAR_CELLS - filled))
}

fn item_line(s: &ProgressSnapshot) -> String {
    if s.item_count > 1 {
        format!("Item {}/{} (#{})\n", s.item_position, s.item_count, s.item_index)
    } else {
        String::new()
    }
}

/// `frame` drives the waiting animation.
pub fn render(s: &ProgressSnapshot, frame: usize) -> String {
    let item = item_line(s);
    match s.phase {
        Phase::Waiting => format!("{item}{} Waiting...", HOURGLASS[frame % HOURGLASS.len()]),
        Phase::Downloading if s.bytes_total == 0 => format!(
            "{item}📥 Downloading... {:.1} MiB (attempt {})",
            s.bytes_done as f64 / MIB,
            s.attempt.max(1)
        ),
        Phase::Downloading => format!(
            "{item}📥 Downloading {:.1}/{:.1} MiB (attempt {})\n{} {:.0}%",
            s.bytes_done as f64 / MIB,
            s.bytes_total as f64 / MIB,
            s.attempt.max(1),
            bar(s.fraction()),
            s.fraction() * 100.0
        ),
        Phase::Processing => format!("{item}⚙️ Processing..."),
        Phase::Uploading => format!("{item}📤 Uploading..."),
        Phase::Done => format!("{item}✅ Done\n{} 100%", bar(1.0)),
    }
}
