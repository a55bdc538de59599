//! Per-job counters shared between the job task (writer) and the reporter (reader).

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Downloading,
    Processing,
    Uploading,
    Done,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Phase::Downloading,
            2 => Phase::Processing,
            3 => Phase::Uploading,
            4 => Phase::Done,
            _ => Phase::Waiting,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Phase::Waiting => 0,
            Phase::Downloading => 1,
            Phase::Processing => 2,
            Phase::Uploading => 3,
            Phase::Done => 4,
        }
    }
}

/// Lock-free progress counters. Never persisted.
#[derive(Debug, Default)]
pub struct ProgressState {
    bytes_done: AtomicU64,
    bytes_total: AtomicU64,
    attempt: AtomicU32,
    item_index: AtomicU32,
    item_position: AtomicU32,
    item_count: AtomicU32,
    phase: AtomicU8,
    /// Bumped on every mutation so readers can tell whether anything changed.
    version: AtomicU64,
}

/// Consistent-enough copy of the counters for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub attempt: u32,
    pub item_index: u32,
    pub item_position: u32,
    pub item_count: u32,
    pub phase: Phase,
    pub version: u64,
}

impl ProgressSnapshot {
    /// Fraction complete in [0.0, 1.0]; 0 when the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_done as f64 / self.bytes_total as f64).min(1.0)
    }
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Byte counters from the extraction or upload callback. `total` of 0 means unknown.
    pub fn set_bytes(&self, done: u64, total: u64) {
        self.bytes_done.store(done, Ordering::Relaxed);
        if total > 0 {
            self.bytes_total.store(total, Ordering::Relaxed);
        }
        self.bump();
    }

    /// Start of a new attempt: 1-based index, byte counters reset.
    pub fn begin_attempt(&self, attempt: u32) {
        self.attempt.store(attempt, Ordering::Relaxed);
        self.bytes_done.store(0, Ordering::Relaxed);
        self.bytes_total.store(0, Ordering::Relaxed);
        self.phase.store(Phase::Downloading.as_u8(), Ordering::Relaxed);
        self.bump();
    }

    /// Start of an item: source index plus its 1-based position among `count` items to fetch.
    pub fn begin_item(&self, index: u32, position: u32, count: u32) {
        self.item_index.store(index, Ordering::Relaxed);
        self.item_position.store(position, Ordering::Relaxed);
        self.item_count.store(count, Ordering::Relaxed);
        self.attempt.store(0, Ordering::Relaxed);
        self.bytes_done.store(0, Ordering::Relaxed);
        self.bytes_total.store(0, Ordering::Relaxed);
        self.phase.store(Phase::Waiting.as_u8(), Ordering::Relaxed);
        self.bump();
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase.as_u8(), Ordering::Relaxed);
        self.bump();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            version: self.version.load(Ordering::Acquire),
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
            attempt: self.attempt.load(Ordering::Relaxed),
            item_index: self.item_index.load(Ordering::Relaxed),
            item_position: self.item_position.load(Ordering::Relaxed),
            item_count: self.item_count.load(Ordering::Relaxed),
            phase: Phase::from_u8(self.phase.load(Ordering::Relaxed)),
        }
    }
}
