use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::config::PipelineConfig;
use crate::users::UserGaugeTracker;

/// Metadata about the simulation, taken from the `RUN` line of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    pub test_id: String,
    pub simulation_name: String,
    pub description: String,
    pub node_name: String,
    /// Nanoseconds since the Unix epoch.
    pub start_time: u64,
}

/// State shared by every task of the pipeline.
///
/// The test run is only written by the line parser. Counters are only changed through
/// [UserGaugeTracker]. The last seen timestamp is written by the batch dispatcher and read once
/// the dispatcher has exited.
#[derive(Debug)]
pub struct PipelineContext {
    config: PipelineConfig,
    test_run: RwLock<Option<TestRun>>,
    users: UserGaugeTracker,
    last_seen: AtomicU64,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            test_run: RwLock::new(None),
            users: UserGaugeTracker::default(),
            last_seen: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn test_id(&self) -> &str {
        &self.config.test_id
    }

    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }

    /// Record the test run. A second `RUN` line replaces the first one.
    pub fn init_test_run(&self, test_run: TestRun) {
        let mut guard = self.test_run.write();
        if let Some(previous) = guard.as_ref() {
            log::warn!(
                "Test run for simulation {} replaced by {}",
                previous.simulation_name,
                test_run.simulation_name
            );
        }
        log::info!(
            "Processing results of simulation {} for test {}",
            test_run.simulation_name,
            test_run.test_id
        );
        *guard = Some(test_run);
    }

    pub fn test_run(&self) -> Option<TestRun> {
        self.test_run.read().clone()
    }

    /// The simulation name, or an empty string before the `RUN` line has been seen.
    pub fn simulation_name(&self) -> String {
        self.test_run
            .read()
            .as_ref()
            .map(|run| run.simulation_name.clone())
            .unwrap_or_default()
    }

    pub fn users(&self) -> &UserGaugeTracker {
        &self.users
    }

    pub fn record_last_seen(&self, timestamp: u64) {
        self.last_seen.store(timestamp, Ordering::Release);
    }

    /// Timestamp of the most recent point handed to the sink, if any.
    pub fn last_seen(&self) -> Option<u64> {
        match self.last_seen.load(Ordering::Acquire) {
            0 => None,
            timestamp => Some(timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_run(simulation_name: &str) -> TestRun {
        TestRun {
            test_id: "t1".to_string(),
            simulation_name: simulation_name.to_string(),
            description: String::new(),
            node_name: "n1".to_string(),
            start_time: 1,
        }
    }

    #[test]
    fn test_run_is_unset_initially() {
        let context = PipelineContext::new(PipelineConfig::new("t1", "n1"));
        assert_eq!(context.test_run(), None);
        assert_eq!(context.simulation_name(), "");
        assert_eq!(context.last_seen(), None);
    }

    #[test]
    fn later_run_replaces_earlier() {
        let context = PipelineContext::new(PipelineConfig::new("t1", "n1"));
        context.init_test_run(test_run("First"));
        context.init_test_run(test_run("Second"));
        assert_eq!(context.simulation_name(), "Second");
    }

    #[test]
    fn last_seen_keeps_latest_write() {
        let context = PipelineContext::new(PipelineConfig::new("t1", "n1"));
        context.record_last_seen(20);
        context.record_last_seen(10);
        assert_eq!(context.last_seen(), Some(10));
    }
}
