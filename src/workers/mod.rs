//! Parallel worker pool.
//!
//! ## Strategy
//!
//! 1. The calling thread feeds `(slot, descriptor)` pairs into a bounded channel.
//! 2. Each worker stages its file (read + compress into a scratch buffer) with no
//!    lock held.
//! 3. The worker then takes the sink lock just long enough to raw-copy the staged
//!    entry, releases it, and bumps the progress counters.
//!
//! In sorted layout a worker does not start staging until its slot is within
//! `2·W` of the next slot the sink will write, so a slow early file holds back
//! at most that many finished entries.
//!
//! A file that cannot be staged is recorded as an [`EntryFailure`] and skipped.
//! A failure inside the sink is fatal: it trips the abort flag and every worker
//! stops taking new descriptors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use tracing::{debug, error, warn};

use crate::archive::EntrySink;
use crate::common::FileDescriptor;
use crate::compress::{stage_file, CompressionMode};
use crate::error::{BuildError, EntryFailure};
use crate::progress::ProgressTracker;

/// How often a worker parked on the reorder window re-checks the abort flag.
const TURN_RECHECK: Duration = Duration::from_millis(50);

/// Shared cancellation flag for a build.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// `W` workers draining one descriptor queue into one sink.
pub struct WorkerPool {
    workers: usize,
    mode: CompressionMode,
    abort: AbortHandle,
}

/// Per-run state shared by every worker.
struct Shared<'a, S> {
    sink: &'a Mutex<S>,
    turn: Condvar,
    progress: &'a ProgressTracker,
    failures: Mutex<Vec<EntryFailure>>,
}

impl WorkerPool {
    pub fn new(workers: usize, mode: CompressionMode) -> Self {
        Self { workers: workers.max(1), mode, abort: AbortHandle::new() }
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue depth, and in sorted layout the number of slots that may run ahead
    /// of the next one to be written.
    pub fn window(&self) -> usize {
        self.workers * 2
    }

    /// Processes every descriptor exactly once and blocks until all workers exit.
    ///
    /// Returns the skipped files, sorted by path. Returns an error if the sink
    /// failed, a worker panicked, or the build was aborted.
    pub fn run<S: EntrySink + Send>(
        &self,
        descriptors: Vec<FileDescriptor>,
        sink: &Mutex<S>,
        progress: &ProgressTracker,
    ) -> Result<Vec<EntryFailure>, BuildError> {
        debug!(workers = self.workers, files = descriptors.len(), "spawning worker threads");

        let (job_tx, job_rx) = bounded::<(usize, FileDescriptor)>(self.window());
        let shared = Shared { sink, turn: Condvar::new(), progress, failures: Mutex::new(Vec::new()) };
        let fatal: Mutex<Option<BuildError>> = Mutex::new(None);

        let panicked = thread::scope(|s| {
            let handles: Vec<_> = (0..self.workers)
                .map(|worker_id| {
                    let job_rx = job_rx.clone();
                    let shared = &shared;
                    let fatal = &fatal;
                    s.spawn(move || {
                        // a panicking worker must not leave the others waiting for its slot
                        let _unwind = scopeguard::guard_on_unwind((), |()| {
                            self.abort.abort();
                            shared.turn.notify_all();
                        });
                        for (slot, descriptor) in job_rx {
                            if self.abort.is_aborted() {
                                break;
                            }
                            if let Err(e) = self.process(slot, descriptor, shared) {
                                error!(worker = worker_id, error = %e, "archive sink failed, aborting build");
                                fatal.lock().unwrap_or_else(PoisonError::into_inner).get_or_insert(e);
                                self.abort.abort();
                                shared.turn.notify_all();
                                break;
                            }
                        }
                    })
                })
                .collect();
            drop(job_rx);

            // --- Producer (calling thread) ---
            for job in descriptors.into_iter().enumerate() {
                if self.abort.is_aborted() || job_tx.send(job).is_err() {
                    break;
                }
            }
            drop(job_tx);

            handles.into_iter().map(|h| h.join()).filter(Result::is_err).count()
        });

        if panicked > 0 {
            return Err(BuildError::WorkerPanic);
        }
        if let Some(e) = fatal.into_inner().unwrap_or_else(PoisonError::into_inner) {
            return Err(e);
        }
        if self.abort.is_aborted() {
            return Err(BuildError::Aborted);
        }

        let mut failures = shared.failures.into_inner().unwrap_or_else(PoisonError::into_inner);
        failures.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(failures)
    }

    /// Stages and commits one descriptor. Only sink failures are returned.
    fn process<S: EntrySink>(
        &self,
        slot: usize,
        descriptor: FileDescriptor,
        shared: &Shared<'_, S>,
    ) -> Result<(), BuildError> {
        if !self.wait_for_turn(slot, shared) {
            return Ok(());
        }

        let staged = match stage_file(&descriptor, self.mode) {
            Ok(staged) => staged,
            Err(e) => {
                warn!(path = %descriptor.relative_path, error = %e, "failed to read file, skipping");
                shared.record_failure(EntryFailure::new(descriptor.relative_path, &e));
                lock_sink(shared.sink).skip(slot)?;
                shared.turn.notify_all();
                shared.progress.record_failure();
                return Ok(());
            }
        };

        let bytes = staged.size();
        let committed = lock_sink(shared.sink).commit(slot, staged);
        match committed {
            Ok(()) => {
                shared.turn.notify_all();
                shared.progress.record_file(bytes);
            }
            Err(BuildError::DuplicateEntry(name)) => {
                warn!(path = %name, "duplicate entry name, skipping");
                shared.record_failure(EntryFailure::new(name, &"duplicate entry name"));
                lock_sink(shared.sink).skip(slot)?;
                shared.turn.notify_all();
                shared.progress.record_failure();
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Blocks until the sink accepts `slot`. False if the build was aborted
    /// while waiting.
    fn wait_for_turn<S: EntrySink>(&self, slot: usize, shared: &Shared<'_, S>) -> bool {
        let mut sink = lock_sink(shared.sink);
        while !sink.accepts(slot, self.window()) {
            if self.abort.is_aborted() {
                return false;
            }
            sink = shared
                .turn
                .wait_timeout(sink, TURN_RECHECK)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl<S> Shared<'_, S> {
    fn record_failure(&self, failure: EntryFailure) {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).push(failure);
    }
}

/// The critical section: one guard per entry, never held across staging.
fn lock_sink<S>(sink: &Mutex<S>) -> MutexGuard<'_, S> {
    sink.lock().unwrap_or_else(PoisonError::into_inner)
}
