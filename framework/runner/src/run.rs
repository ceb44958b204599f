use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use gatling_influx_core::prelude::{ShutdownHandle, ShutdownSignalError};
use gatling_influx_instruments::{InfluxClientSink, InfluxFileSink, TimeSeriesSink};

use crate::cli::GatlingInfluxCli;
use crate::config::PipelineConfig;
use crate::coordinator::PipelineSummary;
use crate::pipeline::Pipeline;
use crate::resolver::DirectoryResolver;
use crate::shutdown::start_shutdown_listener;

/// Wait for the next Gatling run under the configured directory and forward its results until
/// the log goes quiet or the user stops the process.
///
/// Being stopped by the user is not an error.
pub fn run(cli: GatlingInfluxCli) -> anyhow::Result<()> {
    let config = PipelineConfig::from(&cli);
    log::info!(
        "Forwarding results for test {} from node {}",
        config.test_id,
        config.node_name
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime);

    match runtime.block_on(forward_results(&cli, config, shutdown_handle)) {
        Ok(summary) => {
            log::debug!("Pipeline finished: {summary:?}");
            Ok(())
        }
        Err(e) if e.is::<ShutdownSignalError>() => {
            log::info!("{e}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn forward_results(
    cli: &GatlingInfluxCli,
    config: PipelineConfig,
    shutdown_handle: ShutdownHandle,
) -> anyhow::Result<PipelineSummary> {
    match &cli.output_file {
        Some(path) => {
            let sink = InfluxFileSink::create(path).await?;
            forward_to(&cli.dir, config, Arc::new(sink), shutdown_handle).await
        }
        None => {
            let sink = influx_client_sink(cli);
            sink.ping().await?;
            forward_to(&cli.dir, config, Arc::new(sink), shutdown_handle).await
        }
    }
}

fn influx_client_sink(cli: &GatlingInfluxCli) -> InfluxClientSink {
    let sink = InfluxClientSink::new(&cli.address, &cli.database);

    match (&cli.token, &cli.username) {
        (Some(token), _) => sink.with_token(token),
        (None, Some(username)) => {
            sink.with_auth(username, cli.password.clone().unwrap_or_default())
        }
        (None, None) => sink,
    }
}

async fn forward_to<S: TimeSeriesSink>(
    dir: &Path,
    config: PipelineConfig,
    sink: Arc<S>,
    shutdown_handle: ShutdownHandle,
) -> anyhow::Result<PipelineSummary> {
    let log_path = DirectoryResolver::new(shutdown_handle.new_listener())
        .resolve(dir)
        .await?;

    let file = tokio::fs::File::open(&log_path)
        .await
        .with_context(|| format!("Failed to read {}", log_path.display()))?;

    let coordinator = Pipeline::new(config, sink).start(file);
    coordinator.run(shutdown_handle.new_listener()).await
}
