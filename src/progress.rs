//! Progress tracking for pack and unpack calls.
//!
//! A tracker belongs to one call. Work is counted in padded buffer units: each
//! completed chunk adds the algorithm's buffer size, so a call that finishes
//! reports exactly the total returned by [`work_calculate`].

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Result, SealError};

/// Snapshot of a tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub total_units: u64,
    pub done_units: u64,
    pub done_chunks: u64,
    pub total_files: u64,
    pub done_files: u64,
    pub elapsed_time: Duration,
    pub speed_mbps: f32,
    pub progress_percent: f32,
}

impl ProgressState {
    /// Calculate estimated time remaining based on current speed
    pub fn estimated_time_remaining(&self) -> Duration {
        if self.speed_mbps <= 0.0 {
            return Duration::from_secs(0);
        }
        let remaining = self.total_units.saturating_sub(self.done_units);
        let remaining_mb = remaining as f32 / (1024.0 * 1024.0);
        Duration::from_secs_f32((remaining_mb / self.speed_mbps).max(0.0))
    }

    pub fn is_complete(&self) -> bool {
        self.total_units > 0 && self.done_units >= self.total_units
    }
}

/// Progress callback function type
pub type ProgressCallback = dyn Fn(ProgressState) + Send + Sync;

pub struct ProgressTracker {
    total_units: AtomicU64,
    done_units: AtomicU64,
    done_chunks: AtomicU64,
    total_files: AtomicU64,
    done_files: AtomicU64,
    start_time: Mutex<Instant>,
    last_emit_time: Mutex<Instant>,
    emit_interval: Duration,
    callback: Option<Arc<ProgressCallback>>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("state", &self.snapshot())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new(emit_interval: Duration) -> Self {
        Self {
            total_units: AtomicU64::new(0),
            done_units: AtomicU64::new(0),
            done_chunks: AtomicU64::new(0),
            total_files: AtomicU64::new(0),
            done_files: AtomicU64::new(0),
            start_time: Mutex::new(Instant::now()),
            last_emit_time: Mutex::new(Instant::now()),
            emit_interval,
            callback: None,
        }
    }

    /// Deliver snapshots to `callback`, at most once per emit interval while
    /// work is running, plus a final one from [`force_completion`](Self::force_completion).
    pub fn enable_with_callback<F>(&mut self, callback: F)
    where
        F: Fn(ProgressState) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    /// Zero every counter and restart the clock. Called at the start of each pack/unpack.
    pub fn reset(&self) {
        for counter in [
            &self.total_units,
            &self.done_units,
            &self.done_chunks,
            &self.total_files,
            &self.done_files,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        let now = Instant::now();
        *lock(&self.start_time) = now;
        *lock(&self.last_emit_time) = now;
    }

    pub fn set_totals(&self, files: u64, units: u64) {
        self.total_files.store(files, Ordering::Relaxed);
        self.total_units.store(units, Ordering::Relaxed);
    }

    /// One chunk finished; `units` is the buffer size it accounts for.
    pub fn record_chunk(&self, units: u64) {
        self.done_chunks.fetch_add(1, Ordering::Relaxed);
        self.done_units.fetch_add(units, Ordering::Relaxed);
        self.maybe_emit_progress();
    }

    pub fn record_file(&self) {
        self.done_files.fetch_add(1, Ordering::Relaxed);
        self.maybe_emit_progress();
    }

    /// Completed units so far; never decreases within one call.
    pub fn done_units(&self) -> u64 {
        self.done_units.load(Ordering::Relaxed)
    }

    pub fn total_units(&self) -> u64 {
        self.total_units.load(Ordering::Relaxed)
    }

    /// `done / total`, 0.0 before totals are known.
    pub fn fraction(&self) -> f64 {
        match self.total_units() {
            0 => 0.0,
            total => (self.done_units() as f64 / total as f64).min(1.0),
        }
    }

    pub fn snapshot(&self) -> ProgressState {
        let total_units = self.total_units();
        let done_units = self.done_units();
        let elapsed_time = lock(&self.start_time).elapsed();

        let speed_mbps = if elapsed_time.as_secs_f32() > 0.0 {
            (done_units as f32 / (1024.0 * 1024.0)) / elapsed_time.as_secs_f32()
        } else {
            0.0
        };

        ProgressState {
            total_units,
            done_units,
            done_chunks: self.done_chunks.load(Ordering::Relaxed),
            total_files: self.total_files.load(Ordering::Relaxed),
            done_files: self.done_files.load(Ordering::Relaxed),
            elapsed_time,
            speed_mbps,
            progress_percent: (self.fraction() * 100.0) as f32,
        }
    }

    pub fn emit_progress(&self) {
        if let Some(callback) = &self.callback {
            callback(self.snapshot());
        }
    }

    /// Emit a final 100% snapshot.
    pub fn force_completion(&self) {
        if let Some(callback) = &self.callback {
            let mut state = self.snapshot();
            state.progress_percent = 100.0;
            state.done_units = state.total_units;
            state.done_files = state.total_files;
            callback(state);
        }
    }

    fn maybe_emit_progress(&self) {
        if self.callback.is_none() {
            return;
        }
        let now = Instant::now();
        {
            let mut last = lock(&self.last_emit_time);
            if now.duration_since(*last) < self.emit_interval {
                return;
            }
            *last = now;
        }
        self.emit_progress();
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `size` rounded up to the next multiple of `buffer_size`; aligned sizes stay as they are.
pub fn padded_size(size: u64, buffer_size: usize) -> u64 {
    let b = buffer_size as u64;
    size.div_ceil(b) * b
}

/// Expected unit total for packing `paths` with chunks of `buffer_size`,
/// computed from file sizes alone.
pub fn work_calculate<P: AsRef<Path>>(paths: &[P], buffer_size: usize) -> Result<u64> {
    if paths.is_empty() {
        return Err(SealError::EmptyInput);
    }
    if buffer_size == 0 {
        return Err(SealError::Config("buffer size must be non-zero".into()));
    }
    paths.iter().try_fold(0u64, |acc, path| {
        let path = path.as_ref();
        let meta = fs::metadata(path).map_err(SealError::io(path))?;
        Ok(acc + padded_size(meta.len(), buffer_size))
    })
}
