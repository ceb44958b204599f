use std::path::PathBuf;

use clap::Parser;

use crate::config::{DEFAULT_MAX_BATCH_SIZE, DEFAULT_STOP_TIMEOUT, DEFAULT_WRITE_INTERVAL};
use crate::queue::DEFAULT_QUEUE_CAPACITY;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct GatlingInfluxCli {
    /// The Gatling results directory. The results of the next simulation run are looked for in it.
    #[clap(default_value = "target/gatling")]
    pub dir: PathBuf,

    /// Address of the InfluxDB server
    #[clap(short, long, env = "INFLUX_HOST", default_value = "http://localhost:8086")]
    pub address: String,

    /// The database (or bucket) to write to
    #[clap(short = 'b', long, env = "INFLUX_BUCKET", default_value = "gatling")]
    pub database: String,

    /// Username for InfluxDB 1.x authentication
    #[clap(short, long, env = "INFLUX_USERNAME")]
    pub username: Option<String>,

    /// Password for InfluxDB 1.x authentication
    #[clap(short, long, env = "INFLUX_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// API token for InfluxDB 2.x authentication. Takes precedence over a username and password.
    #[clap(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Identifies this test run in every point written. Generated if not set.
    #[clap(short, long)]
    pub test_id: Option<String>,

    /// Identifies the machine running the load test. Defaults to the host name.
    #[clap(long)]
    pub node_name: Option<String>,

    /// Stop after this many seconds without a new line in the log
    #[clap(short, long, default_value_t = DEFAULT_STOP_TIMEOUT.as_secs())]
    pub stop_timeout: u64,

    /// Write a batch as soon as it holds this many points
    #[clap(short, long, default_value_t = DEFAULT_MAX_BATCH_SIZE as u64, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_batch_size: u64,

    /// Write buffered points at least this often, in seconds
    #[clap(short, long, default_value_t = DEFAULT_WRITE_INTERVAL.as_secs(), value_parser = clap::value_parser!(u64).range(1..))]
    pub write_interval: u64,

    /// Number of points that can wait to be batched before reading the log is paused
    #[clap(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Write line protocol to this file instead of sending it to InfluxDB.
    ///
    /// The file can be imported later, for example with Telegraf.
    #[clap(long)]
    pub output_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let cli = GatlingInfluxCli::try_parse_from(["gatling-influx"]).unwrap();

        assert_eq!(cli.dir, PathBuf::from("target/gatling"));
        assert_eq!(cli.stop_timeout, 30);
        assert_eq!(cli.max_batch_size, 5000);
        assert_eq!(cli.write_interval, 10);
        assert_eq!(cli.queue_capacity, 1000);
        assert!(cli.output_file.is_none());
    }

    #[test]
    fn short_flags() {
        let cli = GatlingInfluxCli::try_parse_from([
            "gatling-influx",
            "results",
            "-a",
            "http://influx:8086",
            "-b",
            "perf",
            "-t",
            "nightly",
            "-s",
            "60",
            "-m",
            "100",
            "-w",
            "2",
        ])
        .unwrap();

        assert_eq!(cli.dir, PathBuf::from("results"));
        assert_eq!(cli.address, "http://influx:8086");
        assert_eq!(cli.database, "perf");
        assert_eq!(cli.test_id.as_deref(), Some("nightly"));
        assert_eq!(cli.stop_timeout, 60);
        assert_eq!(cli.max_batch_size, 100);
        assert_eq!(cli.write_interval, 2);
    }

    #[test]
    fn rejects_empty_batches() {
        assert!(GatlingInfluxCli::try_parse_from(["gatling-influx", "-m", "0"]).is_err());
    }
}
