use std::path::{Path, PathBuf};

use tracing::info;

use super::hash::{digest_path, read_digest, sha256_file};
use super::Verifier;
use crate::error::ReleaseError;

/// Re-hashes an archive where it was distributed and compares it with the
/// sidecar that travelled with it.
#[derive(Debug, Clone)]
pub struct Sha256Verifier {
    target: PathBuf,
}

impl Sha256Verifier {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self { target: target.into() }
    }
}

impl Verifier for Sha256Verifier {
    fn verify(&self, archive_name: &str) -> Result<(), ReleaseError> {
        let remote_archive = self.target.join(archive_name);
        verify_against_sidecar(&remote_archive)?;
        info!(archive = %remote_archive.display(), "remote hash verified");
        Ok(())
    }
}

/// Compares `archive` with `<archive>.sha256`.
pub fn verify_against_sidecar(archive: &Path) -> Result<(), ReleaseError> {
    let expected = read_digest(&digest_path(archive))?;
    let actual = sha256_file(archive)?;
    if actual != expected {
        return Err(ReleaseError::HashMismatch { expected, actual });
    }
    Ok(())
}
