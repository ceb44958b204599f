use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use gatling_influx_core::prelude::{DelegatedShutdownListener, ShutdownHandle};
use gatling_influx_instruments::{MetricPoint, TimeSeriesSink};
use tokio::task::JoinHandle;

use crate::context::PipelineContext;
use crate::dispatcher::{write_with_retry, DispatchStats};
use crate::tailer::TailerExit;

pub const TEST_START_END_MEASUREMENT: &str = "testStartEnd";

/// The closing marker is placed this long after the last point that was seen.
const CLOSING_MARKER_OFFSET: Duration = Duration::from_secs(5);

/// Stages of an ordered pipeline shutdown. Stages only ever move forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownState {
    /// All tasks are running.
    Running,
    /// A stop was requested from outside, waiting for the log tailer to stop.
    ParserStopping,
    /// The tailer has stopped, waiting for the gauge sampler and the dispatcher to finish.
    SinksStopping,
    /// Nothing is left to dispatch.
    Drained,
    /// The closing marker has been handled, the pipeline is done.
    Closed,
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownState::Running => "running",
            ShutdownState::ParserStopping => "parser stopping",
            ShutdownState::SinksStopping => "sinks stopping",
            ShutdownState::Drained => "drained",
            ShutdownState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What happened during a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub tailer_exit: TailerExit,
    pub stats: DispatchStats,
    pub closing_marker_sent: bool,
}

/// A spawned task together with the handle that stops it.
pub(crate) struct StageTask<T> {
    pub(crate) handle: JoinHandle<T>,
    pub(crate) shutdown: ShutdownHandle,
}

/// Stops the pipeline tasks in order, then writes the closing marker.
///
/// The dispatcher is only stopped once the tailer has stopped, so every line that was read is
/// dispatched before the marker. The marker is written after the dispatcher has exited, so it is
/// always the last thing the sink receives.
pub struct ShutdownCoordinator<S> {
    context: Arc<PipelineContext>,
    sink: Arc<S>,
    tailer: StageTask<TailerExit>,
    sampler: StageTask<()>,
    dispatcher: StageTask<DispatchStats>,
    state: ShutdownState,
}

impl<S: TimeSeriesSink> ShutdownCoordinator<S> {
    pub(crate) fn new(
        context: Arc<PipelineContext>,
        sink: Arc<S>,
        tailer: StageTask<TailerExit>,
        sampler: StageTask<()>,
        dispatcher: StageTask<DispatchStats>,
    ) -> Self {
        Self {
            context,
            sink,
            tailer,
            sampler,
            dispatcher,
            state: ShutdownState::Running,
        }
    }

    pub fn state(&self) -> ShutdownState {
        self.state
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    /// Drive the pipeline until the tailer stops on its own or `external` signals a stop.
    pub async fn run(
        mut self,
        mut external: DelegatedShutdownListener,
    ) -> anyhow::Result<PipelineSummary> {
        let finished = tokio::select! {
            biased;
            exit = &mut self.tailer.handle => Some(exit),
            _ = external.wait_for_shutdown() => None,
        };

        let tailer_exit = match finished {
            Some(exit) => exit,
            None => {
                self.transition(ShutdownState::ParserStopping);
                self.tailer.shutdown.shutdown();
                (&mut self.tailer.handle).await
            }
        }
        .context("Log tailer task failed")?;
        log::info!("Log file parser stopped: {tailer_exit:?}");

        self.transition(ShutdownState::SinksStopping);
        log::info!("Stopping all consumers...");
        self.sampler.shutdown.shutdown();
        (&mut self.sampler.handle)
            .await
            .context("User gauge sampler task failed")?;
        self.dispatcher.shutdown.shutdown();
        let stats = (&mut self.dispatcher.handle)
            .await
            .context("Batch dispatcher task failed")?;

        self.transition(ShutdownState::Drained);
        let closing_marker_sent = self.send_closing_marker().await;

        self.transition(ShutdownState::Closed);
        log::info!(
            "Finishing process: {} points written in {} batches, {} points dropped in {} batches",
            stats.points_written,
            stats.batches_written,
            stats.points_dropped,
            stats.batches_dropped
        );

        Ok(PipelineSummary {
            tailer_exit,
            stats,
            closing_marker_sent,
        })
    }

    fn transition(&mut self, next: ShutdownState) {
        log::debug!("Pipeline shutdown: {} -> {}", self.state, next);
        self.state = next;
    }

    /// The point marking the end of the test, if a test run was ever started.
    pub fn closing_marker(&self) -> Option<MetricPoint> {
        let test_run = self.context.test_run()?;
        let last_seen = self.context.last_seen().unwrap_or(test_run.start_time);
        let offset = u64::try_from(CLOSING_MARKER_OFFSET.as_nanos()).unwrap_or(u64::MAX);

        Some(
            MetricPoint::new(TEST_START_END_MEASUREMENT, last_seen.saturating_add(offset))
                .with_tag("action", "finish")
                .with_tag("testId", test_run.test_id)
                .with_tag("simulationName", test_run.simulation_name)
                .with_field("description", test_run.description)
                .with_field("nodeName", test_run.node_name),
        )
    }

    async fn send_closing_marker(&self) -> bool {
        let Some(marker) = self.closing_marker() else {
            log::info!("Skipping stop test point write...");
            return false;
        };

        write_with_retry(self.sink.as_ref(), &[marker], &self.context.config().retry).await
    }
}
