//! # zipforge Core Library
//!
//! Builds zip archives from a file or a directory tree with a pool of worker
//! threads, then optionally hashes, signs, distributes and verifies them.
//!
//! The `zipforge` binary is a thin layer over this API; everything it does is
//! reachable from here.
//!
//! ## Key Modules
//!
//! - [`builder`]: [`ArchiveBuilder`] drives one build from a [`BuildJob`].
//! - [`enumerate`] and [`filter`]: walk the source tree and apply exclusion globs.
//! - [`workers`]: the parallel compression pool.
//! - [`archive`]: the shared zip sink and archive listing.
//! - [`release`]: hash → sign → distribute → verify steps.
//!
//! ## Examples
//!
//! ```no_run
//! use zipforge::{ArchiveBuilder, BuildJob, CompressionMode};
//!
//! let job = BuildJob::new("dist", "release.zip")
//!     .compression(CompressionMode::Best)
//!     .exclude("**/*.log");
//! let report = ArchiveBuilder::new().build(&job)?;
//! println!("{} files in {}", report.file_count, report.archive_path.display());
//! # Ok::<(), zipforge::BuildError>(())
//! ```

pub mod archive;
pub mod builder;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod compress;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod filter;
pub mod fsx;
pub mod progress;
pub mod release;
pub mod workers;

pub use archive::{ArchiveSink, EntrySink, LayoutPolicy};
pub use builder::{ArchiveBuilder, BuildReport, Verdict};
pub use common::FileDescriptor;
pub use compress::CompressionMode;
pub use config::BuildJob;
pub use enumerate::Enumerator;
pub use error::{BuildError, EntryFailure, ErrorKind, ReleaseError};
pub use filter::PathFilter;
pub use progress::{ProgressState, ProgressTracker};
pub use workers::{AbortHandle, WorkerPool};
