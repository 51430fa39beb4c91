//! Build configuration.
//!
//! A [`BuildJob`] replaces process-wide flags: it is assembled once (usually by
//! the CLI), validated before any I/O, and never mutated while a build runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::LayoutPolicy;
use crate::compress::CompressionMode;
use crate::error::BuildError;

/// Maximum reasonable worker count
pub const MAX_WORKERS: usize = 512;

/// Default archive name when none is given.
pub const DEFAULT_OUTPUT: &str = "output.zip";

/// Everything one build needs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BuildJob {
    /// A single file or a directory tree.
    pub source: PathBuf,
    pub output: PathBuf,
    pub compression: CompressionMode,
    /// Glob patterns matched against `/`-separated relative paths.
    pub excludes: Vec<String>,
    /// Worker threads for directory builds, `1..=MAX_WORKERS`.
    pub workers: usize,
    pub layout: LayoutPolicy,
    /// Escalate any skipped file to a failed verdict.
    pub strict: bool,
}

impl BuildJob {
    /// A job with default settings and one worker per available CPU.
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            compression: CompressionMode::default(),
            excludes: Vec::new(),
            workers: default_workers(),
            layout: LayoutPolicy::default(),
            strict: false,
        }
    }

    pub fn compression(mut self, mode: CompressionMode) -> Self {
        self.compression = mode;
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn layout(mut self, layout: LayoutPolicy) -> Self {
        self.layout = layout;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Static checks that need no filesystem access.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.source.as_os_str().is_empty() {
            return Err(BuildError::Configuration("source path is empty".into()));
        }
        if self.output.as_os_str().is_empty() || self.output.file_name().is_none() {
            return Err(BuildError::Configuration(format!(
                "output path '{}' does not name a file",
                self.output.display()
            )));
        }
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(BuildError::Configuration(format!(
                "worker count must be between 1 and {MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if same_path(&self.source, &self.output) {
            return Err(BuildError::Configuration("output path is the source path".into()));
        }
        Ok(())
    }
}

/// One worker per available CPU.
pub fn default_workers() -> usize {
    num_cpus::get().clamp(1, MAX_WORKERS)
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
