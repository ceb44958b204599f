use crate::parser::LineParser;
use crate::queue::QueueSender;
use crate::tailer::{LineHandler, LineOutcome};

/// Parses tailed lines and queues the resulting points for dispatch.
///
/// Pushing waits while the dispatch queue is full, which holds back the tailer.
pub struct LineIngester {
    parser: LineParser,
    queue: QueueSender,
}

impl LineIngester {
    pub fn new(parser: LineParser, queue: QueueSender) -> Self {
        Self { parser, queue }
    }
}

impl LineHandler for LineIngester {
    async fn handle_line(&mut self, line: &str) -> LineOutcome {
        match self.parser.parse(line) {
            Ok(Some(point)) => {
                if self.queue.push(point).await.is_err() {
                    log::warn!("Dispatch queue closed, stopping log file parser");
                    return LineOutcome::Stop;
                }
            }
            Ok(None) => {}
            Err(e) if e.is_fatal() => {
                log::error!("Log parser caught an error that can't be handled: {e}");
                return LineOutcome::Stop;
            }
            Err(e) => {
                log::error!("Line processing failed: {e}");
            }
        }

        LineOutcome::Continue
    }
}
