use std::future::Future;
use std::time::Duration;

use gatling_influx_core::prelude::DelegatedShutdownListener;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;

use crate::config::DEFAULT_POLL_INTERVAL;

/// What the tailer should do after a line has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Continue,
    Stop,
}

/// Receives every complete line read by the [LogTailer], without its line terminator.
pub trait LineHandler: Send {
    fn handle_line(&mut self, line: &str) -> impl Future<Output = LineOutcome> + Send;
}

/// Why the tailer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerExit {
    /// The shutdown signal was received.
    Cancelled,
    /// No new line was written within the stop timeout.
    IdleTimeout,
    /// The line handler asked to stop.
    Stopped,
}

/// Follows a file that is still being written, one line at a time.
pub struct LogTailer<R> {
    reader: BufReader<R>,
    stop_timeout: Duration,
    poll_interval: Duration,
}

impl<R> LogTailer<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, stop_timeout: Duration) -> Self {
        Self {
            reader: BufReader::new(reader),
            stop_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Read lines and pass them to `handler` until shutdown, until the stop timeout passes without
    /// a new line, or until the handler asks to stop.
    ///
    /// A line that has been partly written is kept until the rest of it arrives.
    pub async fn run<H: LineHandler>(
        mut self,
        mut handler: H,
        mut shutdown_listener: DelegatedShutdownListener,
    ) -> TailerExit {
        log::info!("Starting log file parser...");

        let mut buf = Vec::new();
        let mut idle_since = Instant::now();

        loop {
            if shutdown_listener.should_shutdown() {
                log::info!("Parser received closing signal. Processing stopped");
                return TailerExit::Cancelled;
            }

            match self.reader.read_until(b'\n', &mut buf).await {
                Ok(_) if buf.ends_with(b"\n") => {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    buf.clear();
                    idle_since = Instant::now();

                    if handler.handle_line(trim_line_ending(&line)).await == LineOutcome::Stop {
                        return TailerExit::Stopped;
                    }
                }
                Ok(_) => {
                    if idle_since.elapsed() > self.stop_timeout {
                        log::info!(
                            "No new lines found for {} seconds. Stopping log file parser...",
                            self.stop_timeout.as_secs_f64()
                        );
                        return TailerExit::IdleTimeout;
                    }

                    if sleep_or_shutdown(self.poll_interval, &mut shutdown_listener).await {
                        log::info!("Parser received closing signal. Processing stopped");
                        return TailerExit::Cancelled;
                    }
                }
                Err(e) => {
                    log::error!("Unexpected error encountered while reading log file: {e}");
                    if sleep_or_shutdown(self.poll_interval, &mut shutdown_listener).await {
                        return TailerExit::Cancelled;
                    }
                }
            }
        }
    }
}

/// Returns true if the sleep was cut short by the shutdown signal.
async fn sleep_or_shutdown(
    duration: Duration,
    shutdown_listener: &mut DelegatedShutdownListener,
) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_listener.wait_for_shutdown() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

fn trim_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}
