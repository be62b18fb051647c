#![forbid(unsafe_code)]

/// Sink for copy progress. Absence of a tracker is valid.
pub trait ProgressTracker {
    fn set_total(&mut self, total: u64);

    fn increment(&mut self, by: u64);

    fn tick(&mut self) {
        self.increment(1);
    }
}

/// Tracker that records totals in memory, handy for callers that poll.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CountingProgress {
    pub total: u64,
    pub done: u64,
    pub reports: u64,
}

impl CountingProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.done as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

impl ProgressTracker for CountingProgress {
    fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    fn increment(&mut self, by: u64) {
        self.done += by;
        self.reports += 1;
    }
}
