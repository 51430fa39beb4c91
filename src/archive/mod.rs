//! # Archive Sink
//!
//! The single output zip stream of a build. Entries are appended one at a time;
//! callers share the sink behind a `Mutex` and hold the lock only for the raw
//! copy of an already-compressed entry.
//!
//! The archive is written to a hidden temp file next to the destination and is
//! renamed into place by [`ArchiveSink::finalize`]. Dropping a sink without
//! finalizing deletes the temp file, so an aborted build never leaves something
//! that looks like a finished archive.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::compress::StagedEntry;
use crate::error::BuildError;
use crate::fsx;

/// Permission bits of a published archive on Unix.
const ARCHIVE_FILE_MODE: u32 = 0o644;

/// How entries are ordered inside the archive.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutPolicy {
    /// Entries land in the order workers finish them. The entry set and every
    /// entry's content are deterministic, the physical order is not.
    #[default]
    CompletionOrder,
    /// Entries are committed strictly in dispatch (sorted) order, so the archive
    /// bytes do not depend on the worker count.
    Sorted,
}

/// Where the worker pool delivers staged entries, one dispatch slot at a time.
pub trait EntrySink {
    /// Accepts the staged entry for dispatch slot `slot`.
    fn commit(&mut self, slot: usize, entry: StagedEntry) -> Result<(), BuildError>;

    /// Records that dispatch slot `slot` produced no entry.
    fn skip(&mut self, slot: usize) -> Result<(), BuildError>;

    /// False while staging `slot` would leave more than `window` slots waiting
    /// on an earlier one.
    fn accepts(&self, _slot: usize, _window: usize) -> bool {
        true
    }
}

/// The serialized output stream plus its entry table.
pub struct ArchiveSink {
    writer: ZipWriter<BufWriter<NamedTempFile>>,
    destination: PathBuf,
    layout: LayoutPolicy,
    names: HashSet<String>,
    /// Sorted layout only: entries that finished ahead of their turn, keyed by
    /// dispatch slot. `None` marks a skipped file.
    parked: BTreeMap<usize, Option<StagedEntry>>,
    next_slot: usize,
    entries: u64,
    bytes: u64,
}

impl ArchiveSink {
    /// Opens a sink that will publish to `destination` on finalize.
    pub fn create(destination: &Path, layout: LayoutPolicy) -> Result<Self, BuildError> {
        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp = tempfile::Builder::new()
            .prefix(".zipforge-")
            .suffix(".partial")
            .tempfile_in(&dir)
            .map_err(|source| BuildError::Output { path: dir.clone(), source })?;
        debug!(temp = %temp.path().display(), "opened archive sink");

        // use 1 MiB buffer to reduce syscall overhead during raw copies
        let writer = ZipWriter::new(BufWriter::with_capacity(1 << 20, temp));
        Ok(Self {
            writer,
            destination: destination.to_path_buf(),
            layout,
            names: HashSet::new(),
            parked: BTreeMap::new(),
            next_slot: 0,
            entries: 0,
            bytes: 0,
        })
    }

    pub fn layout(&self) -> LayoutPolicy {
        self.layout
    }

    /// Entries finished ahead of their turn and not yet written.
    pub fn parked(&self) -> usize {
        self.parked.len()
    }

    fn drain_parked(&mut self) -> Result<(), BuildError> {
        while let Some(ready) = self.parked.remove(&self.next_slot) {
            self.next_slot += 1;
            if let Some(entry) = ready {
                self.write_entry(entry)?;
            }
        }
        Ok(())
    }

    fn write_entry(&mut self, entry: StagedEntry) -> Result<(), BuildError> {
        let size = entry.size();
        debug!(entry = entry.name(), size, "writing entry");
        entry.write_into(&mut self.writer)?;
        self.entries += 1;
        self.bytes += size;
        Ok(())
    }

    /// Number of entries physically written so far.
    pub fn entry_count(&self) -> u64 {
        self.entries
    }

    /// Uncompressed bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Writes the central directory and atomically publishes the archive.
    ///
    /// Consumes the sink, so no entry can be written afterwards.
    pub fn finalize(mut self) -> Result<PathBuf, BuildError> {
        if !self.parked.is_empty() {
            return Err(BuildError::finalization(
                &self.destination,
                format!("{} entries still waiting for earlier slots", self.parked.len()),
            ));
        }

        let buffered = self
            .writer
            .finish()
            .map_err(|e| BuildError::finalization(&self.destination, e))?;
        let temp = buffered
            .into_inner()
            .map_err(|e| BuildError::finalization(&self.destination, e.error()))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| BuildError::finalization(&self.destination, e))?;
        temp.persist(&self.destination)
            .map_err(|e| BuildError::finalization(&self.destination, e.error))?;
        fsx::set_unix_permissions(&self.destination, ARCHIVE_FILE_MODE)
            .map_err(|e| BuildError::finalization(&self.destination, e))?;

        info!(archive = %self.destination.display(), entries = self.entries, "archive finalized");
        Ok(self.destination)
    }
}

impl EntrySink for ArchiveSink {
    /// Commits the staged entry for dispatch slot `slot`.
    ///
    /// In completion order the entry is written immediately. In sorted layout it
    /// is parked until every earlier slot has been committed or skipped.
    fn commit(&mut self, slot: usize, entry: StagedEntry) -> Result<(), BuildError> {
        if !self.names.insert(entry.name().to_string()) {
            return Err(BuildError::DuplicateEntry(entry.name().to_string()));
        }
        match self.layout {
            LayoutPolicy::CompletionOrder => self.write_entry(entry),
            LayoutPolicy::Sorted => {
                self.parked.insert(slot, Some(entry));
                self.drain_parked()
            }
        }
    }

    /// Records that dispatch slot `slot` produced no entry.
    fn skip(&mut self, slot: usize) -> Result<(), BuildError> {
        match self.layout {
            LayoutPolicy::CompletionOrder => Ok(()),
            LayoutPolicy::Sorted => {
                self.parked.insert(slot, None);
                self.drain_parked()
            }
        }
    }

    /// Completion order never waits. Sorted layout admits a slot only inside
    /// the window that starts at the next slot to be written.
    fn accepts(&self, slot: usize, window: usize) -> bool {
        match self.layout {
            LayoutPolicy::CompletionOrder => true,
            LayoutPolicy::Sorted => slot < self.next_slot + window.max(1),
        }
    }
}

/// One entry as seen when listing a finished archive.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
    pub method: String,
}

/// Lists the entries of a zip archive in central-directory order.
pub fn list_entries(path: &Path) -> Result<Vec<ListedEntry>, BuildError> {
    let file = File::open(path).map_err(|e| BuildError::io(path, e))?;
    let mut archive = ZipArchive::new(file)?;
    let mut listed = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        let method = match entry.compression() {
            CompressionMethod::Stored => "store".to_string(),
            CompressionMethod::Deflated => "deflate".to_string(),
            other => format!("{other:?}").to_lowercase(),
        };
        listed.push(ListedEntry {
            name: entry.name().to_string(),
            size: entry.size(),
            compressed_size: entry.compressed_size(),
            method,
        });
    }
    Ok(listed)
}

/// Prints the archive listing to stdout.
pub fn print_listing(path: &Path) -> Result<(), BuildError> {
    let entries = list_entries(path)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "Archive Index ({} files):", entries.len()).map_err(|e| BuildError::io(path, e))?;
    for entry in entries {
        writeln!(out, "- {} ({} bytes, {})", entry.name, entry.size, entry.method).map_err(|e| BuildError::io(path, e))?;
    }
    Ok(())
}
