use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use super::Hasher;
use crate::error::ReleaseError;

/// Suffix of the digest sidecar written next to an archive.
pub const DIGEST_SUFFIX: &str = ".sha256";

/// A digest sidecar on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestRecord {
    pub path: PathBuf,
    /// Lowercase hex SHA-256.
    pub hex: String,
}

/// Path of the sidecar for `archive` (`<archive>.sha256`).
pub fn digest_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push(DIGEST_SUFFIX);
    PathBuf::from(name)
}

/// Streams `path` through SHA-256.
pub fn sha256_file(path: &Path) -> Result<String, ReleaseError> {
    let file = File::open(path).map_err(|e| ReleaseError::io(path, e))?;
    let mut reader = BufReader::with_capacity(1 << 20, file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).map_err(|e| ReleaseError::io(path, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Reads the expected digest from a sidecar: the first whitespace-separated
/// field, lowercased.
pub fn read_digest(record: &Path) -> Result<String, ReleaseError> {
    let content = fs::read_to_string(record).map_err(|e| ReleaseError::io(record, e))?;
    let hex = content
        .split_whitespace()
        .next()
        .ok_or_else(|| ReleaseError::MalformedDigest { path: record.to_path_buf() })?;
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ReleaseError::MalformedDigest { path: record.to_path_buf() });
    }
    Ok(hex.to_ascii_lowercase())
}

/// Writes `<hex>  <archive file name>` sidecars, the format `sha256sum -c` reads.
#[derive(Debug, Default, Clone)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn hash(&self, archive: &Path) -> Result<DigestRecord, ReleaseError> {
        let hex = sha256_file(archive)?;
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = digest_path(archive);
        fs::write(&path, format!("{hex}  {name}\n")).map_err(|e| ReleaseError::io(&path, e))?;
        info!(record = %path.display(), "SHA-256 written");
        Ok(DigestRecord { path, hex })
    }
}
