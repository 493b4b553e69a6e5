//! Sorting progress reporting.

use std::io;
use std::path::Path;
use std::time::Duration;

use log;

/// Sorting job summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Number of records read from the input and written to the output.
    pub records: usize,
    /// Number of runs the input was split into.
    pub runs: usize,
    /// Total job duration.
    pub elapsed: Duration,
}

/// Receives notifications about sorting job progress.
///
/// An observer is passed explicitly to every sorting stage. All methods do nothing by default.
pub trait SortObserver: Send + Sync {
    /// Sorting thread pool has been created.
    fn on_thread_pool_created(&self, _threads: usize) {}

    /// Job temporary directory has been created.
    fn on_temp_dir_created(&self, _path: &Path) {}

    /// A sorted run has been written to temporary storage.
    fn on_run_persisted(&self, _path: &Path, _records: usize, _bytes: u64) {}

    /// The whole input has been split into runs.
    fn on_split_finished(&self, _runs: usize, _records: usize) {}

    /// All runs have been opened and merging starts.
    fn on_merge_started(&self, _runs: usize) {}

    /// An exhausted run has been deleted.
    fn on_run_released(&self) {}

    /// Releasing an exhausted run or the temporary directory failed. The failure doesn't affect
    /// the sorting result.
    fn on_release_failed(&self, _err: &io::Error) {}

    /// The job has been cancelled.
    fn on_aborted(&self) {}

    /// The job has completed.
    fn on_sort_finished(&self, _stats: &SortStats) {}
}

/// Observer ignoring all notifications.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl SortObserver for NoopObserver {}

/// Observer forwarding notifications to the [`log`] facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl SortObserver for LogObserver {
    fn on_thread_pool_created(&self, threads: usize) {
        log::debug!("thread pool initialized (threads: {})", threads);
    }

    fn on_temp_dir_created(&self, path: &Path) {
        log::info!("using {} as a temporary directory", path.display());
    }

    fn on_run_persisted(&self, path: &Path, records: usize, bytes: u64) {
        log::debug!("run saved to {} (records: {}, bytes: {})", path.display(), records, bytes);
    }

    fn on_split_finished(&self, runs: usize, records: usize) {
        log::info!("input split into {} runs (records: {})", runs, records);
    }

    fn on_merge_started(&self, runs: usize) {
        log::debug!("merging {} runs ...", runs);
    }

    fn on_run_released(&self) {
        log::trace!("exhausted run released");
    }

    fn on_release_failed(&self, err: &io::Error) {
        log::warn!("temporary data release failed: {}", err);
    }

    fn on_aborted(&self) {
        log::warn!("sorting cancelled");
    }

    fn on_sort_finished(&self, stats: &SortStats) {
        log::info!(
            "sorting completed in {}ms (records: {}, runs: {})",
            stats.elapsed.as_millis(),
            stats.records,
            stats.runs
        );
    }
}
