use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;

use crate::archive::LayoutPolicy;
use crate::compress::CompressionMode;
use crate::config::{self, BuildJob};
use crate::release::{ReleaseOptions, ShareCredentials};

/// Environment variable consulted for the share password.
pub const SHARE_PASSWORD_ENV: &str = "ZIPFORGE_SHARE_PASSWORD";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Build a zip archive from a file or directory, then run the requested release steps.
    #[command(alias = "b")]
    Build {
        /// Source file or directory to zip.
        #[arg(required = true)]
        source: PathBuf,

        /// Output zip file path.
        #[arg(short, long, default_value = config::DEFAULT_OUTPUT)]
        output: PathBuf,

        /// Compression level.
        #[arg(long, value_enum, default_value_t = CompressionMode::Default)]
        level: CompressionMode,

        /// Exclude pattern, matched against paths relative to the source (repeatable, e.g. `**/*.log`, `.git/**`).
        #[arg(short = 'x', long = "exclude", value_name = "GLOB")]
        excludes: Vec<String>,

        /// Number of parallel workers for directories. [0 = auto-detect based on CPU cores]
        #[arg(long, default_value_t = 0)]
        threads: usize,

        /// Write entries in sorted order so the archive is byte-identical for any thread count.
        #[arg(long)]
        reproducible: bool,

        /// Treat any skipped file as a failed build.
        #[arg(long)]
        strict: bool,

        /// Show a progress bar on stderr.
        #[arg(long)]
        progress: bool,

        /// Write a SHA256 sidecar (<output>.sha256).
        #[arg(long)]
        hash: bool,

        /// Sign the SHA256 sidecar with gpg (requires --hash).
        #[arg(long, requires = "hash")]
        sign: bool,

        /// Copy the archive (and sidecars) to this directory or UNC share.
        #[arg(long, value_name = "DIR")]
        copy_to: Option<PathBuf>,

        /// Username for mapping the share.
        #[arg(long, requires = "copy_to")]
        user: Option<String>,

        /// Password for mapping the share. Falls back to ZIPFORGE_SHARE_PASSWORD, then a prompt.
        #[arg(long, requires = "user")]
        pass: Option<String>,

        /// Use robocopy instead of a plain copy.
        #[arg(long, requires = "copy_to")]
        robocopy: bool,

        /// Verify the SHA256 of the copied archive (requires --hash and --copy-to).
        #[arg(long, requires_all = ["hash", "copy_to"])]
        verify_target: bool,

        /// Print what would happen without creating or copying anything.
        #[arg(long)]
        dry_run: bool,

        /// Print the build report as JSON on stdout.
        #[arg(long)]
        json: bool,
    },

    /// List the entries of an archive.
    #[command(alias = "l")]
    List {
        #[arg(required = true)]
        archive: PathBuf,
    },

    /// Check an archive against its <archive>.sha256 sidecar.
    Verify {
        #[arg(required = true)]
        archive: PathBuf,
    },
}

impl Commands {
    /// The [`BuildJob`] for a `build` command.
    pub fn build_job(&self) -> Option<BuildJob> {
        let Commands::Build { source, output, level, excludes, threads, reproducible, strict, .. } = self else {
            return None;
        };
        let workers = if *threads == 0 { config::default_workers() } else { *threads };
        let layout = if *reproducible { LayoutPolicy::Sorted } else { LayoutPolicy::CompletionOrder };
        Some(BuildJob {
            source: source.clone(),
            output: output.clone(),
            compression: *level,
            excludes: excludes.clone(),
            workers,
            layout,
            strict: *strict,
        })
    }

    /// The [`ReleaseOptions`] for a `build` command. On Windows this may prompt for
    /// the share password; elsewhere shares are never mapped and credentials are dropped.
    pub fn release_options(&self) -> Result<Option<ReleaseOptions>, std::io::Error> {
        let Commands::Build { hash, sign, copy_to, user, pass, robocopy, verify_target, dry_run, .. } = self else {
            return Ok(None);
        };
        let credentials = match user {
            Some(user) if !cfg!(windows) => {
                warn!(user = %user, "share credentials are only used on Windows, ignoring --user");
                None
            }
            Some(user) if !*dry_run => {
                let password = match get_password_from_opt_or_env(pass.clone())? {
                    Some(p) => p,
                    None => rpassword::prompt_password(format!("Password for {user}: "))?,
                };
                Some(ShareCredentials { user: user.clone(), password })
            }
            _ => None,
        };
        Ok(Some(ReleaseOptions {
            hash: *hash,
            sign: *sign,
            copy_to: copy_to.clone(),
            robocopy: *robocopy,
            credentials,
            verify_target: *verify_target,
        }))
    }
}

/// Gets the share password from the command-line option or the `ZIPFORGE_SHARE_PASSWORD`
/// environment variable.
///
/// Priority:
/// 1. `--pass` command-line argument.
/// 2. `ZIPFORGE_SHARE_PASSWORD` environment variable.
/// 3. Returns `Ok(None)` if neither is present, allowing the caller to prompt interactively.
pub fn get_password_from_opt_or_env(password_opt: Option<String>) -> Result<Option<String>, std::io::Error> {
    if let Some(pass) = password_opt {
        return Ok(Some(pass));
    }
    if let Ok(pass) = std::env::var(SHARE_PASSWORD_ENV) {
        return Ok(Some(pass));
    }
    Ok(None)
}

/// Parses command-line arguments using `clap`.
pub fn run() -> Args {
    Args::parse()
}
