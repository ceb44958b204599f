use std::sync::Arc;
use std::time::Duration;

use gatling_influx_core::prelude::DelegatedShutdownListener;
use gatling_influx_instruments::{MetricPoint, TimeSeriesSink};
use tokio::time::Instant;

use crate::context::PipelineContext;
use crate::queue::QueueReceiver;

/// How often a failed batch write is attempted before the batch is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of write attempts, the first one included.
    pub attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// Counts of what the dispatcher delivered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub batches_written: u64,
    pub points_written: u64,
    pub batches_dropped: u64,
    pub points_dropped: u64,
}

impl DispatchStats {
    fn record(&mut self, points: usize, written: bool) {
        let points = points as u64;
        if written {
            self.batches_written += 1;
            self.points_written += points;
        } else {
            self.batches_dropped += 1;
            self.points_dropped += points;
        }
    }
}

/// Write a batch, retrying according to `retry`.
///
/// Returns false when every attempt failed and the batch was dropped.
pub(crate) async fn write_with_retry<S: TimeSeriesSink>(
    sink: &S,
    points: &[MetricPoint],
    retry: &RetryPolicy,
) -> bool {
    let attempts = retry.attempts.max(1);
    let mut failures = 0;

    loop {
        match sink.write_batch(points).await {
            Ok(()) => {
                if failures > 0 {
                    log::info!(
                        "{} points successfully sent after {} retries",
                        points.len(),
                        failures
                    );
                } else {
                    log::debug!("Successfully written {} points", points.len());
                }
                return true;
            }
            Err(e) => {
                failures += 1;
                log::warn!(
                    "Error sending batch of {} points (attempt {failures}/{attempts}): {e:?}",
                    points.len()
                );
                if failures >= attempts {
                    log::error!(
                        "Failed to send {} points as batch after {attempts} attempts, dropping batch",
                        points.len()
                    );
                    return false;
                }
                tokio::time::sleep(retry.delay).await;
            }
        }
    }
}

/// Takes points off the dispatch queue and writes them to the sink in batches.
///
/// A batch is written when it reaches the maximum size, or when the write interval has passed
/// since the last write, whichever comes first.
pub struct BatchDispatcher<S> {
    sink: Arc<S>,
    receiver: QueueReceiver,
    context: Arc<PipelineContext>,
    max_points: usize,
    write_interval: Duration,
    retry: RetryPolicy,
}

impl<S: TimeSeriesSink> BatchDispatcher<S> {
    pub fn new(sink: Arc<S>, receiver: QueueReceiver, context: Arc<PipelineContext>) -> Self {
        let config = context.config();
        let max_points = config.max_batch_size.max(1);
        let write_interval = config.write_interval;
        let retry = config.retry;

        Self {
            sink,
            receiver,
            context,
            max_points,
            write_interval,
            retry,
        }
    }

    /// Dispatch until shutdown, then write whatever is still queued or buffered.
    pub async fn run(self, mut shutdown_listener: DelegatedShutdownListener) -> DispatchStats {
        let Self {
            sink,
            mut receiver,
            context,
            max_points,
            write_interval,
            retry,
        } = self;

        let mut batcher = Batcher {
            sink: sink.as_ref(),
            context: &context,
            buffer: Vec::with_capacity(max_points),
            max_points,
            retry,
            stats: DispatchStats::default(),
        };

        let flush_timer = tokio::time::sleep(write_interval);
        tokio::pin!(flush_timer);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_listener.wait_for_shutdown() => {
                    log::debug!("Shutting down batch dispatcher");
                    break;
                }
                _ = &mut flush_timer => {
                    batcher.flush().await;
                    flush_timer.as_mut().reset(Instant::now() + write_interval);
                }
                point = receiver.pop() => {
                    let Some(point) = point else {
                        log::debug!("Dispatch queue has no producers left");
                        break;
                    };
                    if batcher.add(point).await {
                        flush_timer.as_mut().reset(Instant::now() + write_interval);
                    }
                }
            }
        }

        log::debug!("Draining any remaining points before shutting down...");
        receiver.close();
        let mut drain_count = 0;
        while let Some(point) = receiver.try_pop() {
            batcher.add(point).await;
            drain_count += 1;
        }
        log::debug!("Drained {drain_count} remaining points");

        batcher.flush().await;

        batcher.stats
    }
}

struct Batcher<'a, S> {
    sink: &'a S,
    context: &'a PipelineContext,
    buffer: Vec<MetricPoint>,
    max_points: usize,
    retry: RetryPolicy,
    stats: DispatchStats,
}

impl<S: TimeSeriesSink> Batcher<'_, S> {
    /// Buffer a point, writing the batch if it is now full. Returns true if a write happened.
    async fn add(&mut self, point: MetricPoint) -> bool {
        self.context.record_last_seen(point.timestamp());
        self.buffer.push(point);

        if self.buffer.len() >= self.max_points {
            self.flush().await;
            true
        } else {
            false
        }
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let written = write_with_retry(self.sink, &self.buffer, &self.retry).await;
        self.stats.record(self.buffer.len(), written);
        self.buffer.clear();
    }
}
