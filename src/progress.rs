//! Progress tracking for archive builds
//!
//! Workers bump lock-free counters once per finished descriptor; an optional
//! callback receives throttled [`ProgressState`] snapshots for display. Nothing
//! here influences what ends up in the archive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Current progress state, aggregated from all workers
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub total_files: u64,
    pub processed_files: u64,
    pub failed_files: u64,
    pub total_bytes: u64,
    pub processed_bytes: u64,
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

        let remaining_bytes = self.total_bytes.saturating_sub(self.processed_bytes);
        let remaining_mb = remaining_bytes as f32 / (1024.0 * 1024.0);
        let remaining_seconds = remaining_mb / self.speed_mbps;

        Duration::from_secs_f32(remaining_seconds.max(0.0))
    }
}

/// Progress callback function type
pub type ProgressCallback = dyn Fn(ProgressState) + Send + Sync;

/// Thread-safe build progress counter.
pub struct ProgressTracker {
    total_files: AtomicU64,
    total_bytes: AtomicU64,
    processed_files: AtomicU64,
    failed_files: AtomicU64,
    processed_bytes: AtomicU64,
    start_time: Instant,
    last_emit_time: Mutex<Instant>,
    emit_interval: Duration,
    callback: Option<Arc<ProgressCallback>>,
}

impl ProgressTracker {
    pub fn new(emit_interval: Duration) -> Self {
        Self {
            total_files: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            processed_files: AtomicU64::new(0),
            failed_files: AtomicU64::new(0),
            processed_bytes: AtomicU64::new(0),
            start_time: Instant::now(),
            last_emit_time: Mutex::new(Instant::now()),
            emit_interval,
            callback: None,
        }
    }

    /// Attach a display callback. Without one, tracking is counters only.
    pub fn with_callback(mut self, callback: Option<Arc<ProgressCallback>>) -> Self {
        self.callback = callback;
        self
    }

    pub fn set_totals(&self, files: u64, bytes: u64) {
        self.total_files.store(files, Ordering::Relaxed);
        self.total_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Record one descriptor as written.
    pub fn record_file(&self, bytes: u64) {
        self.processed_files.fetch_add(1, Ordering::Relaxed);
        self.processed_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.maybe_emit_progress();
    }

    /// Record one descriptor as skipped. It still counts as processed.
    pub fn record_failure(&self) {
        self.failed_files.fetch_add(1, Ordering::Relaxed);
        self.processed_files.fetch_add(1, Ordering::Relaxed);
        self.maybe_emit_progress();
    }

    /// Emit a final 100% snapshot.
    pub fn finish(&self) {
        if let Some(ref callback) = self.callback {
            let mut state = self.snapshot();
            state.progress_percent = 100.0;
            callback(state);
        }
    }

    fn maybe_emit_progress(&self) {
        let Some(ref callback) = self.callback else { return };

        let now = Instant::now();
        let should_emit = {
            let mut last_emit = self.last_emit_time.lock().unwrap_or_else(PoisonError::into_inner);
            if now.duration_since(*last_emit) >= self.emit_interval {
                *last_emit = now;
                true
            } else {
                false
            }
        };

        if should_emit {
            callback(self.snapshot());
        }
    }

    /// Current counters, speed and percentage.
    pub fn snapshot(&self) -> ProgressState {
        let total_files = self.total_files.load(Ordering::Relaxed);
        let total_bytes = self.total_bytes.load(Ordering::Relaxed);
        let processed_files = self.processed_files.load(Ordering::Relaxed);
        let failed_files = self.failed_files.load(Ordering::Relaxed);
        let processed_bytes = self.processed_bytes.load(Ordering::Relaxed);

        let elapsed_time = self.start_time.elapsed();

        // Calculate speed in MB/s
        let speed_mbps = if elapsed_time.as_secs_f32() > 0.0 {
            let mb_processed = processed_bytes as f32 / (1024.0 * 1024.0);
            mb_processed / elapsed_time.as_secs_f32()
        } else {
            0.0
        };

        let progress_percent = if total_files > 0 {
            ((processed_files as f32 / total_files as f32) * 100.0).min(100.0)
        } else {
            0.0
        };

        ProgressState {
            total_files,
            processed_files,
            failed_files,
            total_bytes,
            processed_bytes,
            elapsed_time,
            speed_mbps,
            progress_percent,
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counts_files_and_failures() {
        let tracker = ProgressTracker::default();
        tracker.set_totals(4, 3072);

        tracker.record_file(1024);
        tracker.record_file(2048);
        tracker.record_failure();

        let state = tracker.snapshot();
        assert_eq!(state.processed_files, 3);
        assert_eq!(state.failed_files, 1);
        assert_eq!(state.processed_bytes, 3072);
        assert_eq!(state.progress_percent, 75.0);
    }

    #[test]
    fn test_callback_receives_updates() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let updates_clone = Arc::clone(&updates);
        let callback: Arc<ProgressCallback> = Arc::new(move |state: ProgressState| {
            updates_clone.lock().unwrap().push(state.progress_percent);
        });

        let tracker = ProgressTracker::new(Duration::ZERO).with_callback(Some(callback));
        tracker.set_totals(2, 0);
        tracker.record_file(0);
        tracker.finish();

        let updates = updates.lock().unwrap();
        assert!(updates.len() >= 2);
        assert_eq!(updates[0], 50.0);
        assert_eq!(*updates.last().unwrap(), 100.0);
    }

    #[test]
    fn test_multithreaded_progress() {
        let tracker = Arc::new(ProgressTracker::new(Duration::from_millis(1)));
        tracker.set_totals(1000, 1024 * 1000);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                // Each thread processes 250 files
                thread::spawn(move || {
                    for _ in 0..250 {
                        tracker.record_file(1024);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let state = tracker.snapshot();
        assert_eq!(state.processed_files, 1000);
        assert_eq!(state.processed_bytes, 1024 * 1000);
        assert_eq!(state.progress_percent, 100.0);
    }
}
