use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::point::MetricPoint;
use crate::sink::TimeSeriesSink;

/// Keeps every written batch in memory. Writes can be made to fail on demand.
#[derive(Debug, Default)]
pub struct InMemorySink {
    batches: Mutex<Vec<Vec<MetricPoint>>>,
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose next `times` writes fail.
    pub fn failing(times: usize) -> Self {
        let sink = Self::default();
        sink.fail_next(times);
        sink
    }

    pub fn fail_next(&self, times: usize) {
        self.fail_next.store(times, Ordering::SeqCst);
    }

    /// Successfully written batches, in write order.
    pub fn batches(&self) -> Vec<Vec<MetricPoint>> {
        self.batches.lock().clone()
    }

    /// Successfully written points, in write order.
    pub fn points(&self) -> Vec<MetricPoint> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Number of calls to [TimeSeriesSink::write_batch], failed ones included.
    pub fn write_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl TimeSeriesSink for InMemorySink {
    async fn write_batch(&self, points: &[MetricPoint]) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            anyhow::bail!("Simulated write failure");
        }

        self.batches.lock().push(points.to_vec());
        Ok(())
    }
}
