mod cli;
mod config;
mod context;
mod coordinator;
mod dispatcher;
mod ingest;
mod init;
mod parser;
mod pipeline;
mod queue;
mod resolver;
mod run;
mod shutdown;
mod tailer;
mod users;

pub mod prelude {
    pub use crate::cli::GatlingInfluxCli;
    pub use crate::config::{default_node_name, PipelineConfig};
    pub use crate::context::{PipelineContext, TestRun};
    pub use crate::coordinator::{
        PipelineSummary, ShutdownCoordinator, ShutdownState, TEST_START_END_MEASUREMENT,
    };
    pub use crate::dispatcher::{BatchDispatcher, DispatchStats, RetryPolicy};
    pub use crate::ingest::LineIngester;
    pub use crate::init::init;
    pub use crate::parser::{
        jittered_timestamp, LineKind, LineParser, LogRecord, ParseError, UserStatus,
        ERRORS_MEASUREMENT, GROUPS_MEASUREMENT, REQUESTS_MEASUREMENT, TESTS_MEASUREMENT,
    };
    pub use crate::pipeline::Pipeline;
    pub use crate::queue::{dispatch_queue, QueueClosedError, QueueReceiver, QueueSender};
    pub use crate::resolver::{DirectoryResolver, ResolveError, SIMULATION_LOG_FILE_NAME};
    pub use crate::run::run;
    pub use crate::tailer::{LineHandler, LineOutcome, LogTailer, TailerExit};
    pub use crate::users::{UserGaugeSampler, UserGaugeTracker, USERS_MEASUREMENT};
}
