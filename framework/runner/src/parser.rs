//! Decoding of Gatling `simulation.log` lines.
//!
//! Every line is classified once into a [LineKind], checked for the exact number of tab separated
//! values that kind requires and then decoded into a [LogRecord]. The [LineParser] applies the
//! record to the pipeline: it produces a [MetricPoint], updates the active user counters, or sets
//! the test run.

use std::fmt;
use std::num::ParseIntError;
use std::sync::Arc;

use gatling_influx_instruments::MetricPoint;
use rand::Rng;

use crate::context::{PipelineContext, TestRun};

pub const TESTS_MEASUREMENT: &str = "tests";
pub const REQUESTS_MEASUREMENT: &str = "requests";
pub const GROUPS_MEASUREMENT: &str = "groups";
pub const ERRORS_MEASUREMENT: &str = "errors";

const ONE_MILLISECOND_NANOS: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Run,
    User,
    Request,
    Group,
    Error,
    Unknown,
}

impl LineKind {
    /// Classify a line by its keyword. `GROUP` is also recognised after other content.
    pub fn classify(line: &str) -> Self {
        if starts_with_keyword(line, "REQUEST") {
            LineKind::Request
        } else if contains_keyword(line, "GROUP") {
            LineKind::Group
        } else if starts_with_keyword(line, "USER") {
            LineKind::User
        } else if starts_with_keyword(line, "ERROR") {
            LineKind::Error
        } else if starts_with_keyword(line, "RUN") {
            LineKind::Run
        } else {
            LineKind::Unknown
        }
    }

    /// The number of tab separated values, keyword included, that a line of this kind has.
    pub fn field_count(self) -> Option<usize> {
        match self {
            LineKind::Run => Some(6),
            LineKind::User => Some(4),
            LineKind::Request => Some(7),
            LineKind::Group => Some(6),
            LineKind::Error => Some(3),
            LineKind::Unknown => None,
        }
    }
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self {
            LineKind::Run => "RUN",
            LineKind::User => "USER",
            LineKind::Request => "REQUEST",
            LineKind::Group => "GROUP",
            LineKind::Error => "ERROR",
            LineKind::Unknown => "UNKNOWN",
        };
        f.write_str(keyword)
    }
}

fn starts_with_keyword(line: &str, keyword: &str) -> bool {
    line.strip_prefix(keyword)
        .and_then(|rest| rest.chars().next())
        .is_some_and(char::is_whitespace)
}

fn contains_keyword(line: &str, keyword: &str) -> bool {
    line.match_indices(keyword).any(|(index, _)| {
        line[index + keyword.len()..]
            .chars()
            .next()
            .is_some_and(char::is_whitespace)
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{kind} line contains unexpected amount of values: expected {expected}, found {found}")]
    MalformedLine {
        kind: LineKind,
        expected: usize,
        found: usize,
    },
    #[error("unrecognized line type")]
    UnrecognizedLine,
    #[error("failed to parse {field} in {kind} line as integer: {source}")]
    InvalidNumber {
        kind: LineKind,
        field: &'static str,
        source: ParseIntError,
    },
    #[error("unexpected {field} in {kind} line: {value:?}")]
    InvalidValue {
        kind: LineKind,
        field: &'static str,
        value: String,
    },
    /// Without the test run metadata no further line can be processed.
    #[error("{0}")]
    FatalIngestion(#[source] Box<ParseError>),
}

impl ParseError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ParseError::FatalIngestion(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Start,
    End,
}

/// A decoded log line. Timestamps are in nanoseconds since the Unix epoch, see
/// [jittered_timestamp].
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Run {
        simulation: String,
        start_time: u64,
        description: String,
    },
    User {
        scenario: String,
        status: UserStatus,
        timestamp: u64,
    },
    Request {
        groups: String,
        name: String,
        duration: i64,
        result: String,
        error_message: String,
        timestamp: u64,
    },
    Group {
        name: String,
        total_duration: i64,
        raw_duration: i64,
        result: String,
        timestamp: u64,
    },
    Error {
        message: String,
        timestamp: u64,
    },
}

impl LogRecord {
    pub fn decode(line: &str) -> Result<Self, ParseError> {
        Self::decode_kind(LineKind::classify(line), line, &mut rand::thread_rng())
    }

    fn decode_kind<R: Rng + ?Sized>(
        kind: LineKind,
        line: &str,
        rng: &mut R,
    ) -> Result<Self, ParseError> {
        let expected = kind.field_count().ok_or(ParseError::UnrecognizedLine)?;
        let fields = line.split('\t').collect::<Vec<_>>();
        if fields.len() != expected {
            return Err(ParseError::MalformedLine {
                kind,
                expected,
                found: fields.len(),
            });
        }

        let record = match kind {
            LineKind::Run => LogRecord::Run {
                simulation: fields[1].to_string(),
                start_time: timestamp_field(kind, "start time", fields[3], rng)?,
                description: fields[4].to_string(),
            },
            LineKind::User => {
                let status = match fields[2].trim() {
                    "START" => UserStatus::Start,
                    "END" => UserStatus::End,
                    other => {
                        return Err(ParseError::InvalidValue {
                            kind,
                            field: "status",
                            value: other.to_string(),
                        })
                    }
                };
                LogRecord::User {
                    scenario: fields[1].to_string(),
                    status,
                    timestamp: timestamp_field(kind, "timestamp", fields[3], rng)?,
                }
            }
            LineKind::Request => {
                let start = integer_field(kind, "request start time", fields[3])?;
                let end = integer_field(kind, "request end time", fields[4])?;
                LogRecord::Request {
                    groups: fields[1].to_string(),
                    name: fields[2].to_string(),
                    duration: end.saturating_sub(start),
                    result: fields[5].to_string(),
                    error_message: fields[6].trim().to_string(),
                    timestamp: timestamp_field(kind, "request end time", fields[4], rng)?,
                }
            }
            LineKind::Group => {
                let start = integer_field(kind, "group start time", fields[2])?;
                let end = integer_field(kind, "group end time", fields[3])?;
                let result = fields[5]
                    .get(..2)
                    .ok_or_else(|| ParseError::InvalidValue {
                        kind,
                        field: "result",
                        value: fields[5].to_string(),
                    })?;
                LogRecord::Group {
                    name: fields[1].to_string(),
                    total_duration: end.saturating_sub(start),
                    raw_duration: integer_field(kind, "group raw duration", fields[4])?,
                    result: result.to_string(),
                    timestamp: timestamp_field(kind, "group end time", fields[3], rng)?,
                }
            }
            LineKind::Error => LogRecord::Error {
                message: fields[1].to_string(),
                timestamp: timestamp_field(kind, "timestamp", fields[2], rng)?,
            },
            LineKind::Unknown => return Err(ParseError::UnrecognizedLine),
        };

        Ok(record)
    }
}

fn integer_field(kind: LineKind, field: &'static str, value: &str) -> Result<i64, ParseError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|source| ParseError::InvalidNumber {
            kind,
            field,
            source,
        })
}

fn timestamp_field<R: Rng + ?Sized>(
    kind: LineKind,
    field: &'static str,
    value: &str,
    rng: &mut R,
) -> Result<u64, ParseError> {
    let epoch_millis = integer_field(kind, field, value)?;
    jittered_timestamp(epoch_millis, rng).ok_or_else(|| ParseError::InvalidValue {
        kind,
        field,
        value: value.to_string(),
    })
}

/// Convert a millisecond Unix timestamp to nanoseconds, adding a random offset below one
/// millisecond.
///
/// InfluxDB overwrites points with the same measurement, tag set and timestamp, and many events
/// share the same millisecond. The offset makes such collisions improbable.
///
/// Returns `None` for negative or out of range input.
pub fn jittered_timestamp<R: Rng + ?Sized>(epoch_millis: i64, rng: &mut R) -> Option<u64> {
    u64::try_from(epoch_millis)
        .ok()?
        .checked_mul(ONE_MILLISECOND_NANOS)?
        .checked_add(rng.gen_range(0..ONE_MILLISECOND_NANOS))
}

/// Turns log lines into points, using and updating the shared pipeline state.
#[derive(Debug, Clone)]
pub struct LineParser {
    context: Arc<PipelineContext>,
}

impl LineParser {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }

    /// Parse one line, without its line terminator.
    ///
    /// Returns the point to send, or `None` when the line only changed the active user counts.
    /// Any problem with a `RUN` line is returned as [ParseError::FatalIngestion].
    pub fn parse(&self, line: &str) -> Result<Option<MetricPoint>, ParseError> {
        let kind = LineKind::classify(line);
        let record = match LogRecord::decode_kind(kind, line, &mut rand::thread_rng()) {
            Ok(record) => record,
            Err(e) if kind == LineKind::Run => return Err(ParseError::FatalIngestion(Box::new(e))),
            Err(e) => return Err(e),
        };

        Ok(self.apply(record))
    }

    fn apply(&self, record: LogRecord) -> Option<MetricPoint> {
        let context = &self.context;
        match record {
            LogRecord::Run {
                simulation,
                start_time,
                description,
            } => {
                let point = MetricPoint::new(TESTS_MEASUREMENT, start_time)
                    .with_tag("action", "start")
                    .with_tag("simulation", simulation.as_str())
                    .with_tag("testId", context.test_id())
                    .with_tag("nodeName", context.node_name())
                    .with_field("description", description.as_str());

                context.init_test_run(TestRun {
                    test_id: context.test_id().to_string(),
                    simulation_name: simulation,
                    description,
                    node_name: context.node_name().to_string(),
                    start_time,
                });

                Some(point)
            }
            LogRecord::User {
                scenario, status, ..
            } => {
                match status {
                    UserStatus::Start => context.users().increment(&scenario),
                    UserStatus::End => {
                        if !context.users().decrement(&scenario) {
                            log::debug!("User of scenario {scenario} ended without a start");
                        }
                    }
                }
                None
            }
            LogRecord::Request {
                groups,
                name,
                duration,
                result,
                error_message,
                timestamp,
            } => Some(
                MetricPoint::new(REQUESTS_MEASUREMENT, timestamp)
                    .with_tag("name", name)
                    .with_tag("groups", groups)
                    .with_tag("result", result)
                    .with_tag("simulation", context.simulation_name())
                    .with_tag("testId", context.test_id())
                    .with_tag("nodeName", context.node_name())
                    .with_field("duration", duration)
                    .with_field("errorMessage", error_message),
            ),
            LogRecord::Group {
                name,
                total_duration,
                raw_duration,
                result,
                timestamp,
            } => Some(
                MetricPoint::new(GROUPS_MEASUREMENT, timestamp)
                    .with_tag("name", name)
                    .with_tag("result", result)
                    .with_tag("simulation", context.simulation_name())
                    .with_tag("testId", context.test_id())
                    .with_tag("nodeName", context.node_name())
                    .with_field("totalDuration", total_duration)
                    .with_field("rawDuration", raw_duration),
            ),
            LogRecord::Error { message, timestamp } => Some(
                MetricPoint::new(ERRORS_MEASUREMENT, timestamp)
                    .with_tag("testId", context.test_id())
                    .with_tag("nodeName", context.node_name())
                    .with_tag("simulation", context.simulation_name())
                    .with_field("errorMessage", message),
            ),
        }
    }
}
