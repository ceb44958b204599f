mod point;
mod sink;

pub use point::{timestamp_now, FieldValue, MetricPoint};
#[cfg(feature = "test_utils")]
pub use sink::InMemorySink;
pub use sink::{InfluxClientSink, InfluxFileSink, TimeSeriesSink};
