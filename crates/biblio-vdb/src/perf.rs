use std::time::Instant;

use tracing::debug;

/// Elapsed-time checkpoints logged under the `biblio_vdb::perf` target.
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    last: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        let now = Instant::now();
        Self { start: now, last: now }
    }

    /// Logs time since start and since the previous checkpoint.
    pub fn checkpoint(&mut self, what: &str) {
        let now = Instant::now();
        debug!(
            target: "biblio_vdb::perf",
            total_ms = now.duration_since(self.start).as_millis() as u64,
            delta_ms = now.duration_since(self.last).as_millis() as u64,
            "{what}"
        );
        self.last = now;
    }
}
