use crate::cli::GatlingInfluxCli;
use clap::Parser;

/// Initialise logging and parse the command line.
///
/// Logs at `info` unless `RUST_LOG` says otherwise.
pub fn init() -> GatlingInfluxCli {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    GatlingInfluxCli::parse()
}
