//! # Archive Builder
//!
//! Orchestrates one build:
//! 1. Validates the [`BuildJob`] and compiles its exclusion patterns.
//! 2. Resolves single-file vs directory mode.
//! 3. Enumerates and sorts the source tree (directory mode).
//! 4. Drains the descriptors through the [`WorkerPool`] into the [`ArchiveSink`].
//! 5. Finalizes the sink and reports what was written and what was skipped.
//!
//! The builder is the only long-lived owner of the sink.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{ArchiveSink, EntrySink};
use crate::common::FileDescriptor;
use crate::compress::stage_file;
use crate::config::BuildJob;
use crate::enumerate::Enumerator;
use crate::error::{BuildError, EntryFailure};
use crate::filter::PathFilter;
use crate::fsx;
use crate::progress::{ProgressCallback, ProgressState, ProgressTracker};
use crate::workers::{AbortHandle, WorkerPool};

/// Overall outcome of a finished build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    SuccessWithWarnings,
    Failure,
}

/// What a build produced.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub archive_path: PathBuf,
    /// Entries written into the archive.
    pub file_count: u64,
    pub failed_files: Vec<EntryFailure>,
    /// Uncompressed bytes written.
    pub total_bytes: u64,
    pub elapsed: Duration,
}

impl BuildReport {
    /// Skipped files are a warning, or a failure in strict mode.
    pub fn verdict(&self, strict: bool) -> Verdict {
        match (self.failed_files.is_empty(), strict) {
            (true, _) => Verdict::Success,
            (false, false) => Verdict::SuccessWithWarnings,
            (false, true) => Verdict::Failure,
        }
    }
}

/// Builds archives from [`BuildJob`]s.
#[derive(Default)]
pub struct ArchiveBuilder {
    abort: AbortHandle,
    progress: Option<Arc<ProgressCallback>>,
    progress_interval: Option<Duration>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive throttled progress snapshots while the pool runs.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressState) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }

    /// A handle that cancels the build from another thread. A cancelled build
    /// returns [`BuildError::Aborted`] and publishes nothing.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Enumerates what a build of `job` would archive, without writing anything.
    pub fn preview(&self, job: &BuildJob) -> Result<Vec<FileDescriptor>, BuildError> {
        job.validate()?;
        let filter = PathFilter::new(&job.excludes)?;
        match source_kind(&job.source)? {
            SourceKind::File(descriptor) => Ok(vec![descriptor]),
            SourceKind::Directory => Enumerator::new(&job.source, &filter)
                .skip_path(output_under_root(&job.source, &job.output))
                .collect_sorted(),
        }
    }

    /// Runs the build and returns the report. Per-file failures are in the report;
    /// any error returned here means no archive was published.
    pub fn build(&self, job: &BuildJob) -> Result<BuildReport, BuildError> {
        job.validate()?;
        let filter = PathFilter::new(&job.excludes)?;
        let started = Instant::now();

        let kind = source_kind(&job.source)?;
        info!(
            source = %job.source.display(),
            output = %job.output.display(),
            compression = ?job.compression,
            workers = job.workers,
            "starting build"
        );

        let (sink, failed_files) = match kind {
            SourceKind::File(descriptor) => self.build_single(job, descriptor)?,
            SourceKind::Directory => self.build_directory(job, &filter)?,
        };

        if self.abort.is_aborted() {
            return Err(BuildError::Aborted);
        }

        let file_count = sink.entry_count();
        let total_bytes = sink.bytes_written();
        let archive_path = sink.finalize()?;

        for failure in &failed_files {
            warn!(path = %failure.relative_path, reason = %failure.reason, "file skipped");
        }
        info!(
            entries = file_count,
            skipped = failed_files.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build completed"
        );

        Ok(BuildReport { archive_path, file_count, failed_files, total_bytes, elapsed: started.elapsed() })
    }

    /// Single-file mode: one entry named by the base name, no pool.
    fn build_single(
        &self,
        job: &BuildJob,
        descriptor: FileDescriptor,
    ) -> Result<(ArchiveSink, Vec<EntryFailure>), BuildError> {
        let progress = self.tracker();
        progress.set_totals(1, descriptor.size);

        let mut sink = ArchiveSink::create(&job.output, job.layout)?;
        let mut failures = Vec::new();
        match stage_file(&descriptor, job.compression) {
            Ok(staged) => {
                let bytes = staged.size();
                sink.commit(0, staged)?;
                progress.record_file(bytes);
            }
            Err(e) => {
                warn!(path = %descriptor.relative_path, error = %e, "failed to read file, skipping");
                failures.push(EntryFailure::new(descriptor.relative_path, &e));
                sink.skip(0)?;
                progress.record_failure();
            }
        }
        progress.finish();
        Ok((sink, failures))
    }

    fn build_directory(
        &self,
        job: &BuildJob,
        filter: &PathFilter,
    ) -> Result<(ArchiveSink, Vec<EntryFailure>), BuildError> {
        let descriptors = Enumerator::new(&job.source, filter)
            .skip_path(output_under_root(&job.source, &job.output))
            .collect_sorted()?;
        info!(files = descriptors.len(), excluded_patterns = filter.patterns().len(), "enumerated source tree");

        let progress = self.tracker();
        progress.set_totals(descriptors.len() as u64, descriptors.iter().map(|d| d.size).sum());

        let sink = Mutex::new(ArchiveSink::create(&job.output, job.layout)?);
        let pool = WorkerPool::new(job.workers, job.compression).with_abort(self.abort.clone());
        let failures = pool.run(descriptors, &sink, &progress)?;
        progress.finish();

        let sink = sink.into_inner().unwrap_or_else(PoisonError::into_inner);
        Ok((sink, failures))
    }

    fn tracker(&self) -> ProgressTracker {
        let interval = self.progress_interval.unwrap_or(Duration::from_millis(100));
        ProgressTracker::new(interval).with_callback(self.progress.clone())
    }
}

enum SourceKind {
    File(FileDescriptor),
    Directory,
}

fn source_kind(source: &Path) -> Result<SourceKind, BuildError> {
    let meta = fs::metadata(source).map_err(|e| {
        BuildError::Configuration(format!("invalid source path '{}': {e}", source.display()))
    })?;
    if meta.is_dir() {
        return Ok(SourceKind::Directory);
    }
    if !meta.is_file() {
        return Err(BuildError::Configuration(format!(
            "source '{}' is neither a regular file nor a directory",
            source.display()
        )));
    }

    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BuildError::Configuration(format!("source '{}' has no usable file name", source.display())))?;
    Ok(SourceKind::File(FileDescriptor {
        relative_path: name.to_string(),
        absolute_path: source.to_path_buf(),
        size: meta.len(),
        mode_bits: fsx::mode_bits(&meta),
    }))
}

/// If `output` lives under `root`, returns its path in the form the walker will
/// produce (`root` joined with the relative part).
fn output_under_root(root: &Path, output: &Path) -> Option<PathBuf> {
    let canonical_root = root.canonicalize().ok()?;
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let canonical_output = parent.canonicalize().ok()?.join(output.file_name()?);
    let rel = canonical_output.strip_prefix(&canonical_root).ok()?;
    Some(root.join(rel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::list_entries;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    fn report(failed: usize) -> BuildReport {
        BuildReport {
            archive_path: PathBuf::from("out.zip"),
            file_count: 1,
            failed_files: (0..failed).map(|i| EntryFailure::new(format!("f{i}"), &"boom")).collect(),
            total_bytes: 0,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn verdict_depends_on_failures_and_strictness() {
        assert_eq!(report(0).verdict(false), Verdict::Success);
        assert_eq!(report(0).verdict(true), Verdict::Success);
        assert_eq!(report(1).verdict(false), Verdict::SuccessWithWarnings);
        assert_eq!(report(1).verdict(true), Verdict::Failure);
    }

    #[test]
    fn missing_source_is_a_configuration_error() {
        let dir = tempdir().unwrap();
        let job = BuildJob::new(dir.path().join("missing"), dir.path().join("out.zip"));
        let err = ArchiveBuilder::new().build(&job).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!dir.path().join("out.zip").exists());
    }

    #[test]
    fn malformed_pattern_fails_before_any_io() {
        let dir = tempdir().unwrap();
        let job = BuildJob::new(dir.path(), dir.path().join("out.zip")).exclude("[oops");
        let err = ArchiveBuilder::new().build(&job).unwrap_err();
        assert!(matches!(err, BuildError::Pattern { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn output_inside_source_is_not_archived() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("data.txt"), b"data").unwrap();
        let out = dir.path().join("release.zip");

        let job = BuildJob::new(dir.path(), &out).workers(2);
        ArchiveBuilder::new().build(&job).unwrap();
        // a second build must not pick up the first archive
        let report = ArchiveBuilder::new().build(&job).unwrap();

        assert_eq!(report.file_count, 1);
        let names: Vec<_> = list_entries(&out).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["data.txt"]);
    }

    #[test]
    fn aborted_build_publishes_nothing() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.txt"), b"a").unwrap();
        let out = dir.path().join("out.zip");

        let builder = ArchiveBuilder::new();
        builder.abort_handle().abort();
        let err = builder.build(&BuildJob::new(&src, &out)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert!(!out.exists());
    }

    #[test]
    fn preview_lists_without_writing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("b.log"), b"b").unwrap();
        let out = dir.path().join("out.zip");

        let job = BuildJob::new(dir.path(), &out).exclude("*.log");
        let names: Vec<_> = ArchiveBuilder::new()
            .preview(&job)
            .unwrap()
            .into_iter()
            .map(|d| d.relative_path)
            .collect();
        assert_eq!(names, vec!["a.txt"]);
        assert!(!out.exists());
    }
}
