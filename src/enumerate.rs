//! Source tree enumeration.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::common::FileDescriptor;
use crate::error::BuildError;
use crate::filter::PathFilter;
use crate::fsx;

/// Walks a source root and yields a [`FileDescriptor`] for every regular file
/// that is not excluded.
///
/// Directories and symbolic links never become descriptors, and links are not
/// followed. Any unreadable directory or file metadata is an error.
pub struct Enumerator<'a> {
    root: PathBuf,
    filter: &'a PathFilter,
    skip: Option<PathBuf>,
}

impl<'a> Enumerator<'a> {
    pub fn new(root: impl Into<PathBuf>, filter: &'a PathFilter) -> Self {
        Self { root: root.into(), filter, skip: None }
    }

    /// Never yield `path`. Used to keep the output archive out of its own input
    /// when it is written somewhere under the root.
    pub fn skip_path(mut self, path: Option<PathBuf>) -> Self {
        self.skip = path;
        self
    }

    /// Lazily walks the tree in filesystem order.
    pub fn iter(&self) -> Result<impl Iterator<Item = Result<FileDescriptor, BuildError>> + '_, BuildError> {
        let meta = fs::metadata(&self.root).map_err(|e| BuildError::enumeration(&self.root, e))?;
        if !meta.is_dir() {
            return Err(BuildError::enumeration(
                &self.root,
                io::Error::new(io::ErrorKind::InvalidInput, "source root is not a directory"),
            ));
        }

        let walker = WalkDir::new(&self.root).follow_links(false).min_depth(1).into_iter();
        Ok(walker.filter_map(move |entry| self.describe(entry).transpose()))
    }

    /// Walks the whole tree and sorts the result by relative path, so dispatch
    /// order never depends on directory iteration order.
    pub fn collect_sorted(&self) -> Result<Vec<FileDescriptor>, BuildError> {
        let mut descriptors = self.iter()?.collect::<Result<Vec<_>, _>>()?;
        descriptors.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        debug!(root = %self.root.display(), files = descriptors.len(), "enumerated source tree");
        Ok(descriptors)
    }

    fn describe(&self, entry: walkdir::Result<walkdir::DirEntry>) -> Result<Option<FileDescriptor>, BuildError> {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop detected"));
                return Err(BuildError::enumeration(path, source));
            }
        };

        if !entry.file_type().is_file() {
            return Ok(None);
        }
        if self.skip.as_deref() == Some(entry.path()) {
            debug!(path = %entry.path().display(), "skipping output archive");
            return Ok(None);
        }

        let relative_path = self.relative_path(entry.path())?;
        if self.filter.matches(&relative_path) {
            debug!(path = %relative_path, "excluded");
            return Ok(None);
        }

        let metadata = entry
            .metadata()
            .map_err(|e| {
                let source = e.into_io_error().unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "metadata unavailable"));
                BuildError::enumeration(entry.path(), source)
            })?;

        Ok(Some(FileDescriptor {
            relative_path,
            absolute_path: entry.path().to_path_buf(),
            size: metadata.len(),
            mode_bits: fsx::mode_bits(&metadata),
        }))
    }

    fn relative_path(&self, path: &Path) -> Result<String, BuildError> {
        let rel = path.strip_prefix(&self.root).map_err(|_| {
            BuildError::enumeration(path, io::Error::new(io::ErrorKind::InvalidInput, "path escapes the source root"))
        })?;

        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                    BuildError::enumeration(path, io::Error::new(io::ErrorKind::InvalidData, "file name is not valid UTF-8"))
                })?),
                _ => {
                    return Err(BuildError::enumeration(
                        path,
                        io::Error::new(io::ErrorKind::InvalidInput, "unexpected path component"),
                    ))
                }
            }
        }
        Ok(FileDescriptor::relative_name(parts))
    }
}
