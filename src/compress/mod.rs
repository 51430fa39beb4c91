//! # Entry Model and Compression
//!
//! Every entry in a build shares one [`CompressionMode`] and the same fixed
//! timestamp, so two builds of identical inputs produce identical entries.
//!
//! Compression happens in [`stage_file`], outside the sink lock: the source is
//! deflated into a single-entry scratch archive held in a spooled buffer (memory
//! first, a temp file once it grows), and the sink later raw-copies that entry
//! without recompressing it.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tempfile::SpooledTempFile;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::common::FileDescriptor;
use crate::error::BuildError;

/// Staged entries stay in memory up to this size, then spill to a temp file.
pub const SPOOL_THRESHOLD: usize = 4 * 1024 * 1024; // 4 MiB

/// Compression applied uniformly to every entry of a build.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// No compression.
    Store,
    /// Deflate, level 1.
    Fastest,
    /// Deflate, level 6.
    #[default]
    Default,
    /// Deflate, level 9.
    Best,
}

impl CompressionMode {
    pub fn method(self) -> CompressionMethod {
        match self {
            CompressionMode::Store => CompressionMethod::Stored,
            _ => CompressionMethod::Deflated,
        }
    }

    pub fn level(self) -> Option<i32> {
        match self {
            CompressionMode::Store => None,
            CompressionMode::Fastest => Some(1),
            CompressionMode::Default => Some(6),
            CompressionMode::Best => Some(9),
        }
    }
}

/// The sentinel written as every entry's modification time (1980-01-01 00:00:00,
/// the earliest instant the zip format can represent).
pub fn deterministic_mtime() -> DateTime {
    DateTime::default()
}

/// Header options for one entry: method, level, fixed timestamp and mode bits.
pub fn entry_options(mode: CompressionMode, mode_bits: u32) -> FileOptions {
    FileOptions::default()
        .compression_method(mode.method())
        .compression_level(mode.level())
        .last_modified_time(deterministic_mtime())
        .unix_permissions(mode_bits)
        .large_file(false)
}

/// A fully compressed entry waiting to be committed to the sink.
pub struct StagedEntry {
    name: String,
    size: u64,
    scratch: ZipArchive<SpooledTempFile>,
}

impl StagedEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uncompressed size of the payload.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Copies the compressed entry, header included, into `writer`.
    pub(crate) fn write_into<W: io::Write + Seek>(mut self, writer: &mut ZipWriter<W>) -> Result<(), BuildError> {
        let file = self.scratch.by_index_raw(0)?;
        writer.raw_copy_file(file)?;
        Ok(())
    }
}

/// Reads and compresses one source file into a [`StagedEntry`].
///
/// The source handle is opened here and dropped on every path out of this
/// function. Large files that need zip64 get `large_file` set from the
/// enumerated size.
pub fn stage_file(descriptor: &FileDescriptor, mode: CompressionMode) -> Result<StagedEntry, BuildError> {
    let mut source = File::open(&descriptor.absolute_path).map_err(|e| BuildError::io(&descriptor.absolute_path, e))?;

    let options = entry_options(mode, descriptor.mode_bits).large_file(descriptor.size >= u32::MAX as u64);
    let mut writer = ZipWriter::new(tempfile::spooled_tempfile(SPOOL_THRESHOLD));
    writer.start_file(descriptor.relative_path.as_str(), options)?;
    let size = io::copy(&mut source, &mut writer).map_err(|e| BuildError::io(&descriptor.absolute_path, e))?;
    drop(source);

    let mut spool = writer.finish()?;
    spool
        .seek(SeekFrom::Start(0))
        .map_err(|e| BuildError::io(&descriptor.absolute_path, e))?;
    let scratch = ZipArchive::new(spool)?;

    Ok(StagedEntry { name: descriptor.relative_path.clone(), size, scratch })
}
