use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gatling_influx_core::prelude::DelegatedShutdownListener;
use gatling_influx_instruments::{timestamp_now, MetricPoint};
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};

use crate::context::PipelineContext;
use crate::queue::QueueSender;

pub const USERS_MEASUREMENT: &str = "users";

/// Number of active virtual users per scenario.
///
/// A scenario is only present while it has at least one active user.
#[derive(Debug, Default)]
pub struct UserGaugeTracker {
    counters: Mutex<HashMap<String, u64>>,
}

impl UserGaugeTracker {
    pub fn increment(&self, scenario: &str) {
        *self
            .counters
            .lock()
            .entry(scenario.to_string())
            .or_default() += 1;
    }

    /// Returns false if the scenario had no active user to remove.
    pub fn decrement(&self, scenario: &str) -> bool {
        let mut counters = self.counters.lock();
        match counters.get_mut(scenario) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                counters.remove(scenario);
                true
            }
            None => false,
        }
    }

    /// A copy of the current counts, safe to iterate while the counters keep changing.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counters.lock().clone()
    }
}

/// Periodically turns the active user counts into `users` points.
pub struct UserGaugeSampler {
    context: Arc<PipelineContext>,
    queue: QueueSender,
    interval: Duration,
}

impl UserGaugeSampler {
    pub fn new(context: Arc<PipelineContext>, queue: QueueSender, interval: Duration) -> Self {
        Self {
            context,
            queue,
            interval,
        }
    }

    /// One point per scenario with active users, ordered by scenario name.
    pub fn sample(&self, timestamp: u64) -> Vec<MetricPoint> {
        let mut snapshot = self
            .context
            .users()
            .snapshot()
            .into_iter()
            .filter(|(_, active)| *active > 0)
            .collect::<Vec<_>>();
        snapshot.sort_unstable();

        snapshot
            .into_iter()
            .map(|(scenario, active)| {
                MetricPoint::new(USERS_MEASUREMENT, timestamp)
                    .with_tag("scenario", scenario)
                    .with_tag("testId", self.context.test_id())
                    .with_field("active", i64::try_from(active).unwrap_or(i64::MAX))
                    .with_field("nodeName", self.context.node_name())
            })
            .collect()
    }

    /// Emit samples until shutdown.
    pub async fn run(self, mut shutdown_listener: DelegatedShutdownListener) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_listener.wait_for_shutdown() => {
                    log::debug!("Shutting down user gauge sampler");
                    break;
                }
                _ = ticker.tick() => {
                    for point in self.sample(timestamp_now()) {
                        if self.queue.push(point).await.is_err() {
                            log::warn!("Dispatch queue closed, stopping user gauge sampler");
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::queue::dispatch_queue;
    use gatling_influx_core::prelude::ShutdownHandle;
    use gatling_influx_instruments::FieldValue;
    use pretty_assertions::assert_eq;

    #[test]
    fn counts_never_go_negative() {
        let tracker = UserGaugeTracker::default();
        tracker.increment("browse");
        assert!(tracker.decrement("browse"));
        assert!(!tracker.decrement("browse"));
        assert!(tracker.snapshot().is_empty());
    }

    #[test]
    fn snapshot_is_a_copy() {
        let tracker = UserGaugeTracker::default();
        tracker.increment("browse");
        let snapshot = tracker.snapshot();
        tracker.increment("browse");
        assert_eq!(snapshot.get("browse"), Some(&1));
        assert_eq!(tracker.snapshot().get("browse"), Some(&2));
    }

    #[test]
    fn concurrent_updates_balance_out() {
        let tracker = Arc::new(UserGaugeTracker::default());
        let handles = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        tracker.increment("browse");
                    }
                    for _ in 0..1000 {
                        tracker.decrement("browse");
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(tracker.snapshot().is_empty());
    }

    #[test]
    fn sample_emits_one_point_per_scenario() {
        let context = Arc::new(PipelineContext::new(PipelineConfig::new("t1", "node-1")));
        context.users().increment("buy");
        context.users().increment("browse");
        context.users().increment("browse");
        let (sender, _receiver) = dispatch_queue(10);
        let sampler = UserGaugeSampler::new(context, sender, Duration::from_secs(1));

        let points = sampler.sample(42);

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].measurement(), USERS_MEASUREMENT);
        assert_eq!(points[0].tag("scenario"), Some("browse"));
        assert_eq!(points[0].tag("testId"), Some("t1"));
        assert_eq!(points[0].field("active"), Some(&FieldValue::Integer(2)));
        assert_eq!(points[0].field("nodeName"), Some(&FieldValue::from("node-1")));
        assert_eq!(points[0].timestamp(), 42);
        assert_eq!(points[1].tag("scenario"), Some("buy"));
        assert_eq!(points[1].field("active"), Some(&FieldValue::Integer(1)));
    }

    #[tokio::test]
    async fn run_samples_until_shutdown() {
        let context = Arc::new(PipelineContext::new(PipelineConfig::new("t1", "node-1")));
        context.users().increment("browse");
        let (sender, mut receiver) = dispatch_queue(100);
        let sampler = UserGaugeSampler::new(context, sender, Duration::from_millis(10));
        let shutdown = ShutdownHandle::new();

        let task = tokio::spawn(sampler.run(shutdown.new_listener()));
        let first = tokio::time::timeout(Duration::from_secs(1), receiver.pop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.tag("scenario"), Some("browse"));

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
