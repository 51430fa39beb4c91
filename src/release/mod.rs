//! # Release Steps
//!
//! Post-processing over a finished archive: hash → sign → distribute → verify.
//! Every step is optional and treats the archive as read-only. Steps are
//! traits so callers can swap in their own hashing, signing or transport.

pub mod distribute;
pub mod hash;
pub mod sign;
pub mod verify;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Output;

use serde::Serialize;
use tracing::info;

use crate::error::ReleaseError;
pub use distribute::{CopyDistributor, RobocopyDistributor, ShareCredentials, ShareSession};
pub use hash::{DigestRecord, Sha256Hasher};
pub use sign::GpgSigner;
pub use verify::Sha256Verifier;

/// Computes a digest of the archive and writes a sidecar record.
pub trait Hasher {
    fn hash(&self, archive: &Path) -> Result<DigestRecord, ReleaseError>;
}

/// Produces a detached signature for a digest record.
pub trait Signer {
    fn sign(&self, record: &Path) -> Result<PathBuf, ReleaseError>;
}

/// Copies artifacts to a remote location and returns where they landed.
pub trait Distributor {
    fn distribute(&self, artifacts: &[PathBuf]) -> Result<Vec<PathBuf>, ReleaseError>;

    fn target(&self) -> &Path;
}

/// Checks a distributed archive against its expected digest.
pub trait Verifier {
    fn verify(&self, archive_name: &str) -> Result<(), ReleaseError>;
}

pub(crate) fn command_failure(program: impl AsRef<OsStr>, output: &Output) -> ReleaseError {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    ReleaseError::Command {
        program: program.as_ref().to_string_lossy().into_owned(),
        status: output.status.to_string(),
        output: text.trim_end().to_string(),
    }
}

/// Which release steps to run.
#[derive(Debug, Clone, Default)]
pub struct ReleaseOptions {
    pub hash: bool,
    /// Only honored together with `hash`: the signature covers the digest record.
    pub sign: bool,
    pub copy_to: Option<PathBuf>,
    pub robocopy: bool,
    pub credentials: Option<ShareCredentials>,
    /// Only honored with `hash` and `copy_to`.
    pub verify_target: bool,
}

/// What the release steps produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReleaseOutcome {
    pub digest: Option<DigestRecord>,
    pub signature: Option<PathBuf>,
    pub copied: Vec<PathBuf>,
    pub verified: bool,
}

/// The configured sequence of release steps.
#[derive(Default)]
pub struct ReleasePipeline {
    hasher: Option<Box<dyn Hasher>>,
    signer: Option<Box<dyn Signer>>,
    distributor: Option<Box<dyn Distributor>>,
    verifier: Option<Box<dyn Verifier>>,
}

impl ReleasePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock pipeline: SHA-256 sidecars, gpg, plain copy or robocopy, and
    /// SHA-256 verification on the target.
    pub fn from_options(options: &ReleaseOptions) -> Self {
        let mut pipeline = Self::new();
        if options.hash {
            pipeline = pipeline.hasher(Sha256Hasher);
            if options.sign {
                pipeline = pipeline.signer(GpgSigner::new());
            }
        }
        if let Some(target) = &options.copy_to {
            pipeline = if options.robocopy {
                pipeline.distributor(RobocopyDistributor::new(target, options.credentials.clone()))
            } else {
                pipeline.distributor(CopyDistributor::new(target, options.credentials.clone()))
            };
            if options.verify_target && options.hash {
                pipeline = pipeline.verifier(Sha256Verifier::new(target));
            }
        }
        pipeline
    }

    pub fn hasher(mut self, hasher: impl Hasher + 'static) -> Self {
        self.hasher = Some(Box::new(hasher));
        self
    }

    pub fn signer(mut self, signer: impl Signer + 'static) -> Self {
        self.signer = Some(Box::new(signer));
        self
    }

    pub fn distributor(mut self, distributor: impl Distributor + 'static) -> Self {
        self.distributor = Some(Box::new(distributor));
        self
    }

    pub fn verifier(mut self, verifier: impl Verifier + 'static) -> Self {
        self.verifier = Some(Box::new(verifier));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.hasher.is_none() && self.distributor.is_none()
    }

    /// Describes each step that [`ReleasePipeline::run`] would take, touching nothing.
    pub fn plan(&self, archive: &Path) -> Vec<String> {
        let mut steps = Vec::new();
        let record = hash::digest_path(archive);
        let mut artifacts = vec![archive.to_path_buf()];

        if self.hasher.is_some() {
            steps.push(format!("Would generate SHA256 → {}", record.display()));
            artifacts.push(record.clone());
            if self.signer.is_some() {
                let signature = sign::signature_path(&record);
                steps.push(format!("Would sign {} → {}", record.display(), signature.display()));
                artifacts.push(signature);
            }
        }
        if let Some(distributor) = &self.distributor {
            steps.push(format!("Would connect to: {}", distributor.target().display()));
            for artifact in &artifacts {
                steps.push(format!("Would copy {} → {}", artifact.display(), distributor.target().display()));
            }
            if self.verifier.is_some() && self.hasher.is_some() {
                steps.push(format!("Would verify SHA256 on {}", distributor.target().display()));
            }
        }
        steps
    }

    /// Runs hash → sign → distribute → verify. The first failing step stops the
    /// pipeline.
    pub fn run(&self, archive: &Path) -> Result<ReleaseOutcome, ReleaseError> {
        let mut outcome = ReleaseOutcome::default();
        let mut artifacts = vec![archive.to_path_buf()];

        if let Some(hasher) = &self.hasher {
            let record = hasher.hash(archive)?;
            artifacts.push(record.path.clone());
            if let Some(signer) = &self.signer {
                let signature = signer.sign(&record.path)?;
                artifacts.push(signature.clone());
                outcome.signature = Some(signature);
            }
            outcome.digest = Some(record);
        }

        if let Some(distributor) = &self.distributor {
            outcome.copied = distributor.distribute(&artifacts)?;
            info!(target = %distributor.target().display(), files = outcome.copied.len(), "copy completed");

            if let (Some(verifier), Some(_)) = (&self.verifier, &outcome.digest) {
                let name = archive
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| ReleaseError::Configuration(format!("'{}' has no file name", archive.display())))?;
                verifier.verify(name)?;
                outcome.verified = true;
            }
        }

        Ok(outcome)
    }
}
