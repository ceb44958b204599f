use std::path::{Path, PathBuf};

use anyhow::Context;
use influxdb::Query;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::point::MetricPoint;
use crate::sink::{to_write_query, TimeSeriesSink};

/// Write points to disk in the InfluxDB line protocol format.
///
/// The file can then be loaded into InfluxDB later, for example by Telegraf. Lines are appended,
/// so an existing file is extended rather than replaced. A batch is either written in full or not
/// at all, so retrying a failed batch never leaves duplicate or torn lines behind.
#[derive(Debug)]
pub struct InfluxFileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl InfluxFileSink {
    pub async fn create(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let file = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {} for writing", path.display()))?;

        log::info!("Writing metrics to {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TimeSeriesSink for InfluxFileSink {
    async fn write_batch(&self, points: &[MetricPoint]) -> anyhow::Result<()> {
        let lines = line_protocol(points)?;

        let mut file = self.file.lock().await;
        let len = file
            .metadata()
            .await
            .with_context(|| format!("Failed to read metadata of {}", self.path.display()))?
            .len();

        if let Err(e) = write_all_and_flush(&mut file, lines.as_bytes()).await {
            if let Err(truncate_err) = file.set_len(len).await {
                log::error!(
                    "Failed to remove partly written batch from {}: {truncate_err}",
                    self.path.display()
                );
            }
            return Err(e).with_context(|| format!("Failed to write to {}", self.path.display()));
        }

        Ok(())
    }
}

/// One line per point, each terminated by a newline.
fn line_protocol(points: &[MetricPoint]) -> anyhow::Result<String> {
    let mut lines = String::new();
    for point in points {
        lines.push_str(&to_write_query(point).build()?.get());
        lines.push('\n');
    }

    Ok(lines)
}

async fn write_all_and_flush(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn appends_one_line_per_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.influx");
        let sink = InfluxFileSink::create(&path).await.unwrap();

        let points = vec![
            MetricPoint::new("errors", 1_000_000).with_field("errorMessage", "a"),
            MetricPoint::new("errors", 2_000_000).with_field("errorMessage", "b"),
        ];
        sink.write_batch(&points).await.unwrap();
        sink.write_batch(&points[..1]).await.unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(" 1000000"), "{}", lines[0]);
        assert!(lines[1].contains("errorMessage=\"b\""), "{}", lines[1]);
    }

    #[tokio::test]
    async fn invalid_batch_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let sink = InfluxFileSink::create(dir.path().join("metrics.influx"))
            .await
            .unwrap();

        // A point without fields cannot be written, so the whole batch is refused.
        let batch = vec![
            MetricPoint::new("errors", 1_000_000).with_field("errorMessage", "a"),
            MetricPoint::new("errors", 2_000_000),
        ];
        assert!(sink.write_batch(&batch).await.is_err());

        let retry = vec![MetricPoint::new("errors", 3_000_000).with_field("errorMessage", "c")];
        sink.write_batch(&retry).await.unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" 3000000"), "{}", lines[0]);
    }
}
