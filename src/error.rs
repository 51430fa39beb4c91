use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// The broad classes a build failure falls into.
///
/// Everything except [`ErrorKind::Entry`] is fatal: the build stops and no archive is
/// published. Entry failures are collected into the [`crate::BuildReport`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Configuration,
    Enumeration,
    Entry,
    Finalization,
    Aborted,
}

/// The primary error type for archive builds.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build job itself is invalid (bad source path, worker count, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An exclusion pattern could not be compiled.
    #[error("Invalid exclusion pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// The source tree could not be walked.
    #[error("Cannot enumerate '{}': {source}", path.display())]
    Enumeration {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The output location cannot take an archive (missing or unwritable directory).
    #[error("Cannot create archive in '{}': {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An I/O error occurred while reading a source file or writing the archive.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An error from the underlying `zip` writer or reader.
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Two descriptors resolved to the same entry name.
    #[error("Duplicate entry name '{0}'")]
    DuplicateEntry(String),

    /// The central directory could not be written or the archive could not be published.
    #[error("Failed to finalize archive '{}': {reason}", path.display())]
    Finalization { path: PathBuf, reason: String },

    /// The build was cancelled before the archive was finalized.
    #[error("Build aborted; no archive was produced")]
    Aborted,

    /// A worker thread panicked.
    #[error("A worker thread panicked")]
    WorkerPanic,
}

impl BuildError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        BuildError::Io { path: path.as_ref().to_path_buf(), source }
    }

    pub(crate) fn enumeration(path: impl AsRef<Path>, source: io::Error) -> Self {
        BuildError::Enumeration { path: path.as_ref().to_path_buf(), source }
    }

    pub(crate) fn finalization(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        BuildError::Finalization { path: path.as_ref().to_path_buf(), reason: reason.to_string() }
    }

    /// Classifies the error. `Io`, `Archive` and `DuplicateEntry` are entry-level when
    /// they concern a single source file; when they escape a build they were raised by
    /// the sink and are reported as finalization failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Configuration(_) | BuildError::Pattern { .. } | BuildError::Output { .. } => {
                ErrorKind::Configuration
            }
            BuildError::Enumeration { .. } => ErrorKind::Enumeration,
            BuildError::DuplicateEntry(_) => ErrorKind::Entry,
            BuildError::Io { .. } | BuildError::Archive(_) | BuildError::Finalization { .. } => {
                ErrorKind::Finalization
            }
            BuildError::Aborted | BuildError::WorkerPanic => ErrorKind::Aborted,
        }
    }
}

/// A source file that was skipped. The build carries on without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryFailure {
    pub relative_path: String,
    pub reason: String,
}

impl EntryFailure {
    pub fn new(relative_path: impl Into<String>, reason: &dyn std::fmt::Display) -> Self {
        Self { relative_path: relative_path.into(), reason: reason.to_string() }
    }
}

impl std::fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.relative_path, self.reason)
    }
}

/// Errors raised by the post-build release steps (hash, sign, distribute, verify).
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An external tool (gpg, robocopy, net) exited unsuccessfully.
    #[error("{program} failed ({status}):\n{output}")]
    Command { program: String, status: String, output: String },

    #[error("Digest record '{}' is empty or malformed", path.display())]
    MalformedDigest { path: PathBuf },

    #[error("Hash mismatch:\nExpected: {expected}\nActual:   {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Release configuration error: {0}")]
    Configuration(String),
}

impl ReleaseError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        ReleaseError::Io { path: path.as_ref().to_path_buf(), source }
    }
}
