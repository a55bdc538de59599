//! Time-based split planning for outputs over the delivery ceiling.

/// One part of a split, in seconds from the start of the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitSpan {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl SplitSpan {
    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

/// Number of parts needed so each stays under `ceiling`: `floor(size / ceiling) + 1` when over.
pub fn part_count(size: u64, ceiling: u64) -> usize {
    if ceiling == 0 || size <= ceiling {
        return 1;
    }
    (size / ceiling + 1) as usize
}

/// Equal-duration spans covering `[0, duration)`. The last span ends exactly at `duration`.
pub fn plan_split(size: u64, duration_secs: f64, ceiling: u64) -> Vec<SplitSpan> {
    let n = part_count(size, ceiling);
    let each = duration_secs / n as f64;
    (0..n)
        .map(|i| SplitSpan {
            start_secs: each * i as f64,
            end_secs: if i + 1 == n {
                duration_secs
            } else {
                each * (i + 1) as f64
            },
        })
        .collect()
}
