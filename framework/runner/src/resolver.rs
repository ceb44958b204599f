use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use gatling_influx_core::prelude::{DelegatedShutdownListener, ShutdownSignalError};
use walkdir::WalkDir;

pub const SIMULATION_LOG_FILE_NAME: &str = "simulation.log";

pub const DEFAULT_LOOKUP_INTERVAL: Duration = Duration::from_secs(5);

/// Digits after the last `-` of a results directory name: a `yyyyMMddHHmmss` timestamp followed
/// by milliseconds.
const RESULTS_DIR_SUFFIX_LEN: usize = 17;
const RESULTS_DIR_TIMESTAMP_LEN: usize = 14;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Target path {} exists but there is an error: {source}", path.display())]
    TargetUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Was expecting directory at {}, but found a file", path.display())]
    NotADirectory { path: PathBuf },
    #[error("Failed to search {} for a results directory: {source}", path.display())]
    Search {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("Failed to read {}: {source}", path.display())]
    LogUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Something wrong happened when attempting to open {}", path.display())]
    UnexpectedLogFile { path: PathBuf },
}

/// Finds the `simulation.log` of a Gatling run that starts after this process.
///
/// Gatling creates one results directory per run, named after the simulation and the time the run
/// started. Every lookup polls until what it is waiting for shows up, or until shutdown.
pub struct DirectoryResolver {
    started_at: DateTime<Utc>,
    interval: Duration,
    shutdown_listener: DelegatedShutdownListener,
}

impl DirectoryResolver {
    pub fn new(shutdown_listener: DelegatedShutdownListener) -> Self {
        Self {
            started_at: Utc::now(),
            interval: DEFAULT_LOOKUP_INTERVAL,
            shutdown_listener,
        }
    }

    /// Only accept results directories created strictly after `started_at`.
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Resolve the path of the log file to tail, starting from the Gatling results root.
    pub async fn resolve(&mut self, dir: &Path) -> anyhow::Result<PathBuf> {
        let dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()
                .with_context(|| {
                    format!("Failed to construct an absolute path for {}", dir.display())
                })?
                .join(dir)
        };
        log::info!("Searching for directory at {}", dir.display());

        self.wait_for_target_dir(&dir).await?;
        let results_dir = self.wait_for_results_dir(&dir).await?;
        self.wait_for_log_file(&results_dir).await
    }

    pub async fn wait_for_target_dir(&mut self, dir: &Path) -> anyhow::Result<()> {
        log::info!("Looking for target directory...");

        loop {
            self.check_shutdown()?;

            match tokio::fs::metadata(dir).await {
                Ok(metadata) if metadata.is_dir() => {
                    log::info!("Target directory found at {}", dir.display());
                    return Ok(());
                }
                Ok(_) => {
                    return Err(ResolveError::NotADirectory {
                        path: dir.to_path_buf(),
                    }
                    .into())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(ResolveError::TargetUnreadable {
                        path: dir.to_path_buf(),
                        source,
                    }
                    .into())
                }
            }

            self.sleep().await?;
        }
    }

    pub async fn wait_for_results_dir(&mut self, dir: &Path) -> anyhow::Result<PathBuf> {
        log::info!("Searching for results directory...");

        loop {
            self.check_shutdown()?;

            let root = dir.to_path_buf();
            let started_at = self.started_at;
            let found = tokio::task::spawn_blocking(move || find_results_dir(&root, started_at))
                .await
                .context("Results directory search panicked")??;

            if let Some(results_dir) = found {
                log::info!("Found log directory at {}", results_dir.display());
                return Ok(results_dir);
            }

            self.sleep().await?;
        }
    }

    pub async fn wait_for_log_file(&mut self, results_dir: &Path) -> anyhow::Result<PathBuf> {
        let path = results_dir.join(SIMULATION_LOG_FILE_NAME);
        log::info!("Searching for {SIMULATION_LOG_FILE_NAME} file...");

        loop {
            self.check_shutdown()?;

            match tokio::fs::metadata(&path).await {
                Ok(metadata) if is_readable_log(&metadata) => {
                    log::info!("Found {}", path.display());
                    return Ok(path);
                }
                Ok(_) => return Err(ResolveError::UnexpectedLogFile { path }.into()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(ResolveError::LogUnreadable { path, source }.into()),
            }

            self.sleep().await?;
        }
    }

    fn check_shutdown(&self) -> anyhow::Result<()> {
        if self.shutdown_listener.should_shutdown() {
            return Err(ShutdownSignalError::default().into());
        }
        Ok(())
    }

    async fn sleep(&mut self) -> anyhow::Result<()> {
        tokio::select! {
            _ = self.shutdown_listener.wait_for_shutdown() => {
                Err(ShutdownSignalError::default().into())
            }
            _ = tokio::time::sleep(self.interval) => Ok(()),
        }
    }
}

/// The first directory under `root`, in file name order, whose name marks a run that started
/// after `started_at`.
fn find_results_dir(
    root: &Path,
    started_at: DateTime<Utc>,
) -> Result<Option<PathBuf>, ResolveError> {
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| ResolveError::Search {
            path: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let Some(created_at) = entry.file_name().to_str().and_then(results_dir_timestamp) else {
            continue;
        };
        if created_at.timestamp() > started_at.timestamp() {
            return Ok(Some(entry.into_path()));
        }
    }

    Ok(None)
}

/// Parse the timestamp from a results directory name like `basicsimulation-20240102030405123`.
pub fn results_dir_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let (simulation, suffix) = name.rsplit_once('-')?;
    if simulation.is_empty()
        || suffix.len() != RESULTS_DIR_SUFFIX_LEN
        || !suffix.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    NaiveDateTime::parse_from_str(&suffix[..RESULTS_DIR_TIMESTAMP_LEN], "%Y%m%d%H%M%S")
        .ok()
        .map(|t| t.and_utc())
}

#[cfg(unix)]
fn is_readable_log(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;

    metadata.is_file() && metadata.permissions().mode() & 0o777 == 0o644
}

#[cfg(not(unix))]
fn is_readable_log(metadata: &std::fs::Metadata) -> bool {
    metadata.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gatling_influx_core::prelude::ShutdownHandle;
    use pretty_assertions::assert_eq;

    fn started_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    fn resolver(shutdown: &ShutdownHandle) -> DirectoryResolver {
        DirectoryResolver::new(shutdown.new_listener())
            .with_started_at(started_at())
            .with_interval(Duration::from_millis(10))
    }

    fn write_log(dir: &Path) -> PathBuf {
        let path = dir.join(SIMULATION_LOG_FILE_NAME);
        std::fs::write(&path, "").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        }
        path
    }

    #[test]
    fn parses_results_dir_names() {
        assert_eq!(
            results_dir_timestamp("basicsimulation-20240102030406789"),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 6).unwrap())
        );
        assert_eq!(
            results_dir_timestamp("my-sim-20240102030406789"),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 6).unwrap())
        );
        assert_eq!(results_dir_timestamp("-20240102030406789"), None);
        assert_eq!(results_dir_timestamp("basicsimulation-2024010203040678"), None);
        assert_eq!(results_dir_timestamp("basicsimulation-2024010203040a789"), None);
        assert_eq!(results_dir_timestamp("basicsimulation"), None);
        assert_eq!(results_dir_timestamp("basicsimulation-20241302030406789"), None);
    }

    #[test]
    fn skips_runs_that_are_not_newer() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("sim-20240102030405000")).unwrap();
        std::fs::create_dir(root.path().join("sim-20231231235959999")).unwrap();
        std::fs::create_dir(root.path().join("not-a-run")).unwrap();

        assert_eq!(find_results_dir(root.path(), started_at()).unwrap(), None);

        std::fs::create_dir(root.path().join("sim-20240102030406000")).unwrap();
        assert_eq!(
            find_results_dir(root.path(), started_at()).unwrap(),
            Some(root.path().join("sim-20240102030406000"))
        );
    }

    #[test]
    fn ignores_files_named_like_runs() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("sim-20240102030406000"), "").unwrap();

        assert_eq!(find_results_dir(root.path(), started_at()).unwrap(), None);
    }

    #[tokio::test]
    async fn resolves_log_file_that_appears_later() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("gatling");
        let shutdown = ShutdownHandle::new();
        let mut resolver = resolver(&shutdown);

        let lookup = {
            let target = target.clone();
            tokio::spawn(async move { resolver.resolve(&target).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        let results_dir = target.join("basicsimulation-20240102030410000");
        std::fs::create_dir_all(&results_dir).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let log = write_log(&results_dir);

        let found = lookup.await.unwrap().unwrap();
        assert_eq!(found, log);
    }

    #[tokio::test]
    async fn target_must_be_a_directory() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("gatling");
        std::fs::write(&target, "").unwrap();
        let shutdown = ShutdownHandle::new();

        let err = resolver(&shutdown)
            .wait_for_target_dir(&target)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ResolveError>(),
            Some(ResolveError::NotADirectory { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejects_log_with_unexpected_mode() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let log = write_log(root.path());
        std::fs::set_permissions(&log, std::fs::Permissions::from_mode(0o600)).unwrap();
        let shutdown = ShutdownHandle::new();

        let err = resolver(&shutdown)
            .wait_for_log_file(root.path())
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ResolveError>(),
            Some(ResolveError::UnexpectedLogFile { .. })
        ));
    }

    #[tokio::test]
    async fn stops_waiting_on_shutdown() {
        let root = tempfile::tempdir().unwrap();
        let shutdown = ShutdownHandle::new();
        let mut resolver = resolver(&shutdown).with_interval(Duration::from_secs(3600));
        let missing = root.path().join("missing");

        let lookup = tokio::spawn(async move { resolver.wait_for_target_dir(&missing).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.shutdown();

        let err = lookup.await.unwrap().unwrap_err();
        assert!(err.is::<ShutdownSignalError>());
    }
}
