mod influx_client_sink;
mod influx_file_sink;
#[cfg(feature = "test_utils")]
mod in_memory_sink;

use std::future::Future;

use influxdb::{InfluxDbWriteable, Timestamp, Type, WriteQuery};

use crate::point::{FieldValue, MetricPoint};

#[cfg(feature = "test_utils")]
pub use in_memory_sink::InMemorySink;
pub use influx_client_sink::InfluxClientSink;
pub use influx_file_sink::InfluxFileSink;

/// A store that accepts batches of [MetricPoint]s.
///
/// Stores are expected to treat points with the same measurement, tag set and timestamp as the
/// same record, with the last write winning.
pub trait TimeSeriesSink: Send + Sync + 'static {
    /// Write all `points` in one request. An error means none of the points should be assumed
    /// to have been stored, and the caller may retry the whole batch.
    fn write_batch(
        &self,
        points: &[MetricPoint],
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Convert a point to an InfluxDB write query with nanosecond precision.
///
/// Tags with an empty value are left out, InfluxDB does not store them.
pub(crate) fn to_write_query(point: &MetricPoint) -> WriteQuery {
    let mut query =
        Timestamp::Nanoseconds(u128::from(point.timestamp())).into_query(point.measurement());

    for (name, value) in point.fields() {
        query = query.add_field(name.as_str(), Type::from(value));
    }

    for (name, value) in point.tags() {
        if value.is_empty() {
            continue;
        }
        query = query.add_tag(name.as_str(), value.clone());
    }

    query
}

impl From<&FieldValue> for Type {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Integer(i) => Type::SignedInteger(*i),
            FieldValue::Text(s) => Type::Text(s.clone()),
        }
    }
}
