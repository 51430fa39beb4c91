//! Exclusion filtering over archive-relative paths.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::BuildError;

/// A compiled, immutable set of exclusion globs.
///
/// Patterns are matched against the `/`-separated path relative to the source
/// root. `*` and `?` stay inside one path segment, `**` crosses segments, so
/// `*.log` only excludes top-level logs while `**/*.log` excludes them at any depth.
#[derive(Debug, Clone)]
pub struct PathFilter {
    set: GlobSet,
    patterns: Vec<String>,
}

impl PathFilter {
    /// Compiles `patterns`. A malformed pattern is reported here, once, and never
    /// per file.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, BuildError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|source| BuildError::Pattern { pattern: pattern.to_string(), source })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|source| BuildError::Pattern {
            pattern: patterns.iter().map(|p| p.as_ref()).collect::<Vec<_>>().join(", "),
            source,
        })?;
        Ok(Self {
            set,
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
        })
    }

    /// A filter that excludes nothing.
    pub fn empty() -> Self {
        Self { set: GlobSet::empty(), patterns: Vec::new() }
    }

    /// True if `relative_path` matches any exclusion pattern.
    pub fn matches(&self, relative_path: &str) -> bool {
        !self.set.is_empty() && self.set.is_match(relative_path)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::empty()
    }
}
