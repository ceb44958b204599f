use std::sync::Arc;

use gatling_influx_core::prelude::ShutdownHandle;
use gatling_influx_instruments::TimeSeriesSink;
use tokio::io::AsyncRead;

use crate::config::PipelineConfig;
use crate::context::PipelineContext;
use crate::coordinator::{ShutdownCoordinator, StageTask};
use crate::dispatcher::BatchDispatcher;
use crate::ingest::LineIngester;
use crate::parser::LineParser;
use crate::queue::dispatch_queue;
use crate::tailer::LogTailer;
use crate::users::UserGaugeSampler;

/// Wires the log tailer, the user gauge sampler and the batch dispatcher around one dispatch
/// queue.
pub struct Pipeline<S> {
    context: Arc<PipelineContext>,
    sink: Arc<S>,
}

impl<S: TimeSeriesSink> Pipeline<S> {
    pub fn new(config: PipelineConfig, sink: Arc<S>) -> Self {
        Self {
            context: Arc::new(PipelineContext::new(config)),
            sink,
        }
    }

    pub fn context(&self) -> Arc<PipelineContext> {
        self.context.clone()
    }

    /// Spawn the pipeline tasks onto the current runtime, reading log lines from `reader`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<R>(self, reader: R) -> ShutdownCoordinator<S>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let Self { context, sink } = self;
        let config = context.config();
        let (sender, receiver) = dispatch_queue(config.queue_capacity);

        let dispatcher_shutdown = ShutdownHandle::new();
        let dispatcher = BatchDispatcher::new(sink.clone(), receiver, context.clone());
        let dispatcher = StageTask {
            handle: tokio::spawn(dispatcher.run(dispatcher_shutdown.new_listener())),
            shutdown: dispatcher_shutdown,
        };

        let sampler_shutdown = ShutdownHandle::new();
        let sampler =
            UserGaugeSampler::new(context.clone(), sender.clone(), config.user_sample_interval);
        let sampler = StageTask {
            handle: tokio::spawn(sampler.run(sampler_shutdown.new_listener())),
            shutdown: sampler_shutdown,
        };

        let tailer_shutdown = ShutdownHandle::new();
        let ingester = LineIngester::new(LineParser::new(context.clone()), sender);
        let tailer = LogTailer::new(reader, config.stop_timeout)
            .with_poll_interval(config.poll_interval);
        let tailer = StageTask {
            handle: tokio::spawn(tailer.run(ingester, tailer_shutdown.new_listener())),
            shutdown: tailer_shutdown,
        };

        log::info!("Starting consumers for parser results");

        ShutdownCoordinator::new(context, sink, tailer, sampler, dispatcher)
    }
}
