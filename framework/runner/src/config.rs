use std::time::Duration;

use crate::cli::GatlingInfluxCli;
use crate::dispatcher::RetryPolicy;
use crate::queue::DEFAULT_QUEUE_CAPACITY;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_BATCH_SIZE: usize = 5000;
pub const DEFAULT_WRITE_INTERVAL: Duration = Duration::from_secs(10);

/// How long the tailer sleeps when it reaches the end of the log file.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How often active users are sampled.
pub const DEFAULT_USER_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Everything the ingestion pipeline needs to know, independent of where it came from.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Tags every point that is written.
    pub test_id: String,
    /// Name of the machine running the load test.
    pub node_name: String,
    /// Stop tailing after this long without a new line.
    pub stop_timeout: Duration,
    /// Flush as soon as this many points are buffered.
    pub max_batch_size: usize,
    /// Flush at least this often while points are buffered.
    pub write_interval: Duration,
    pub queue_capacity: usize,
    pub poll_interval: Duration,
    pub user_sample_interval: Duration,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn new(test_id: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            node_name: node_name.into(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            write_interval: DEFAULT_WRITE_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            user_sample_interval: DEFAULT_USER_SAMPLE_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    pub fn with_write_interval(mut self, write_interval: Duration) -> Self {
        self.write_interval = write_interval;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_user_sample_interval(mut self, user_sample_interval: Duration) -> Self {
        self.user_sample_interval = user_sample_interval;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl From<&GatlingInfluxCli> for PipelineConfig {
    fn from(cli: &GatlingInfluxCli) -> Self {
        let test_id = cli.test_id.clone().unwrap_or_else(|| nanoid::nanoid!());
        let node_name = cli.node_name.clone().unwrap_or_else(default_node_name);

        PipelineConfig::new(test_id, node_name)
            .with_stop_timeout(Duration::from_secs(cli.stop_timeout))
            .with_max_batch_size(usize::try_from(cli.max_batch_size).unwrap_or(usize::MAX))
            .with_write_interval(Duration::from_secs(cli.write_interval))
            .with_queue_capacity(cli.queue_capacity)
    }
}

/// The host name of this machine, used to tell apart results from different load generators.
pub fn default_node_name() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| {
        log::warn!("Could not determine the host name, using `unknown` as the node name");
        "unknown".to_string()
    })
}
