use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use thousands::Separable;
use tracing::info;

/// Submission counters shared between the dispatch path and the reporter.
///
/// In server mode these are bumped from every handler thread, so each counter sits on
/// its own cache line.
#[derive(Debug, Default)]
pub struct Stats {
    submitted: CachePadded<AtomicU64>,
    errors: CachePadded<AtomicU64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub async fn start_reporter(&self, measurement_interval: Duration) {
        let mut last_submitted = 0u64;
        let mut last_errors = 0u64;
        let mut interval = tokio::time::interval(measurement_interval);
        let secs = measurement_interval.as_secs().max(1);
        interval.tick().await;
        loop {
            interval.tick().await;
            let submitted = self.submitted();
            let errors = self.errors();
            info!(
                "TPS: {}, EPS: {}, Total submitted: {}, Total errors: {}",
                ((submitted - last_submitted) / secs).separate_with_commas(),
                ((errors - last_errors) / secs).separate_with_commas(),
                submitted.separate_with_commas(),
                errors.separate_with_commas()
            );
            last_submitted = submitted;
            last_errors = errors;
        }
    }
}
