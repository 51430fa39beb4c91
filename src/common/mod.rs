//! Common types shared by the enumerator, the worker pool and the sink.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One source file queued for archiving.
///
/// Created by the enumerator and owned by whichever worker claims it. The
/// modification time is deliberately absent: entries always carry the fixed
/// sentinel timestamp.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Path relative to the source root, `/`-separated. Becomes the entry name.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub size: u64,
    /// Unix permission bits (`0o777` mask).
    pub mode_bits: u32,
}

impl FileDescriptor {
    /// Builds the entry name from path components so the result never depends on
    /// the host separator.
    pub fn relative_name<'a, I>(components: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        components.into_iter().filter(|c| !c.is_empty()).collect::<Vec<_>>().join("/")
    }
}
