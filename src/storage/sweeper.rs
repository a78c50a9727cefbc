//! Retention sweeps for main and quarantine storage.
//!
//! The sweeper removes artifacts past their retention period, using file
//! modification times. Quarantine has its own (typically shorter) period.
//! Sweeps run off the request path on whichever trigger fires first:
//! a processed-request count or elapsed seconds since the last sweep.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use fs2::FileExt;
use thiserror::Error;
use tokio::fs;

/// Files younger than this are never deleted, whatever the retention
/// period says. Protects staging files that are mid-write when the
/// sweep passes over them.
const MIN_AGE_SAFETY_MARGIN: Duration = Duration::from_secs(120);

/// Upper bound on deletions per tree per sweep; the remainder waits for
/// the next trigger so a huge backlog cannot stall ingestion.
const MAX_REMOVALS_PER_SWEEP: usize = 1000;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Retention configuration for both storage trees.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Max age for main-storage artifacts.
    pub retention_days: u64,

    /// Max age for quarantine entries (usually shorter).
    pub quarantine_retention_days: u64,
}

impl RetentionPolicy {
    pub fn retention_age(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }

    pub fn quarantine_age(&self) -> Duration {
        Duration::from_secs(self.quarantine_retention_days * 24 * 60 * 60)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: 30,
            quarantine_retention_days: 7,
        }
    }
}

/// What a sweep removed from one tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub files_removed: usize,
    pub bytes_freed: u64,
    /// True when the per-sweep removal cap was hit and older files remain.
    pub truncated: bool,
}

/// Combined report for one sweep run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepSummary {
    pub main: SweepReport,
    pub quarantine: SweepReport,
}

impl SweepSummary {
    pub fn files_removed(&self) -> usize {
        self.main.files_removed + self.quarantine.files_removed
    }

    pub fn bytes_freed(&self) -> u64 {
        self.main.bytes_freed + self.quarantine.bytes_freed
    }
}

/// Removes aged artifacts from main and quarantine storage.
#[derive(Debug)]
pub struct RetentionSweeper {
    storage_root: PathBuf,
    quarantine_root: PathBuf,
    policy: RetentionPolicy,
    lock_path: PathBuf,
}

impl RetentionSweeper {
    pub fn new(storage_root: PathBuf, quarantine_root: PathBuf, policy: RetentionPolicy) -> Self {
        let lock_path = quarantine_root.join("sweep.lock");
        Self {
            storage_root,
            quarantine_root,
            policy,
            lock_path,
        }
    }

    /// Sweep both trees. `now` is explicit so tests can simulate clocks.
    ///
    /// An advisory file lock serializes sweeps across tasks and
    /// processes; if another sweep holds the lock this one is skipped.
    pub async fn sweep(&self, now: SystemTime) -> Result<SweepSummary, SweepError> {
        let _lock = match self.try_lock().await? {
            Some(lock) => lock,
            None => {
                tracing::debug!("Retention sweep already running, skipping");
                return Ok(SweepSummary::default());
            }
        };

        let main = sweep_tree(&self.storage_root, self.policy.retention_age(), now).await?;
        let quarantine =
            sweep_tree(&self.quarantine_root, self.policy.quarantine_age(), now).await?;

        let summary = SweepSummary { main, quarantine };
        if summary.files_removed() > 0 {
            tracing::info!(
                "Retention sweep removed {} files ({:.2} MB)",
                summary.files_removed(),
                summary.bytes_freed() as f64 / 1024.0 / 1024.0
            );
        }

        Ok(summary)
    }

    async fn try_lock(&self) -> Result<Option<std::fs::File>, SweepError> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(file)),
            Err(_) => Ok(None),
        }
    }
}

/// Remove files older than `max_age` under `root`, depth-first, in
/// bounded batches. Sidecars are removed together with their artifact.
async fn sweep_tree(
    root: &Path,
    max_age: Duration,
    now: SystemTime,
) -> Result<SweepReport, SweepError> {
    let mut report = SweepReport::default();

    if !root.exists() {
        return Ok(report);
    }

    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot read {} during sweep: {}", dir.display(), e);
                continue;
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            if entry.file_name() == "sweep.lock" {
                continue;
            }

            // Sidecars live and die with their artifact; only orphans
            // (artifact already gone) age out on their own.
            if let Some(name) = path.to_str() {
                if let Some(primary) = name.strip_suffix(".metadata.json") {
                    if Path::new(primary).exists() {
                        continue;
                    }
                }
            }

            if report.files_removed >= MAX_REMOVALS_PER_SWEEP {
                report.truncated = true;
                tracing::info!(
                    "Sweep removal cap reached under {}, remainder deferred",
                    root.display()
                );
                return Ok(report);
            }

            match remove_if_aged(&path, max_age, now).await {
                Ok(Some(freed)) => {
                    report.files_removed += 1;
                    report.bytes_freed += freed;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Error deleting {} during sweep: {}", path.display(), e);
                }
            }
        }
    }

    Ok(report)
}

/// Delete one file if it is past `max_age` (with the safety margin),
/// removing its sidecar alongside. Returns bytes freed.
async fn remove_if_aged(
    path: &Path,
    max_age: Duration,
    now: SystemTime,
) -> Result<Option<u64>, SweepError> {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        // Already gone (e.g. removed together with its artifact).
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let modified = metadata.modified()?;

    let age = match now.duration_since(modified) {
        Ok(age) => age,
        // Modified in the future relative to `now`; leave it alone.
        Err(_) => return Ok(None),
    };

    if age <= max_age || age < MIN_AGE_SAFETY_MARGIN {
        return Ok(None);
    }

    let mut freed = metadata.len();
    fs::remove_file(path).await?;

    let sidecar = super::sidecar_path(path);
    if let Ok(meta) = fs::metadata(&sidecar).await {
        freed += meta.len();
        if let Err(e) = fs::remove_file(&sidecar).await {
            tracing::warn!("Failed to remove sidecar {}: {}", sidecar.display(), e);
        }
    }

    Ok(Some(freed))
}

/// Decides when a sweep is due: every N processed requests or every T
/// seconds, whichever comes first.
#[derive(Debug)]
pub struct SweepScheduler {
    request_interval: u64,
    time_interval: Duration,
    requests_since_sweep: AtomicU64,
    last_sweep: Mutex<Instant>,
}

impl SweepScheduler {
    pub fn new(request_interval: u64, time_interval: Duration) -> Self {
        Self {
            request_interval,
            time_interval,
            requests_since_sweep: AtomicU64::new(0),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Record one processed request; returns true when a sweep is due.
    /// A `true` result resets both triggers (the caller is expected to
    /// start the sweep).
    pub fn note_request(&self) -> bool {
        let count = self.requests_since_sweep.fetch_add(1, Ordering::Relaxed) + 1;

        let mut last = match self.last_sweep.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let due = count >= self.request_interval || last.elapsed() >= self.time_interval;
        if due {
            self.requests_since_sweep.store(0, Ordering::Relaxed);
            *last = Instant::now();
        }
        due
    }
}
