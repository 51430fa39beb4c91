use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use super::{command_failure, Signer};
use crate::error::ReleaseError;

/// Produces `<record>.asc` with `gpg --armor --sign`, using loopback pinentry so
/// it can run unattended when the agent already holds the passphrase.
#[derive(Debug, Clone)]
pub struct GpgSigner {
    program: OsString,
}

impl GpgSigner {
    pub fn new() -> Self {
        Self { program: "gpg".into() }
    }

    /// Use a different gpg binary (e.g. `gpg2`).
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self { program: program.into() }
    }
}

impl Default for GpgSigner {
    fn default() -> Self {
        Self::new()
    }
}

/// Path of the detached signature for `record`.
pub fn signature_path(record: &Path) -> PathBuf {
    let mut name = record.as_os_str().to_owned();
    name.push(".asc");
    PathBuf::from(name)
}

impl Signer for GpgSigner {
    fn sign(&self, record: &Path) -> Result<PathBuf, ReleaseError> {
        let output_path = signature_path(record);
        let output = Command::new(&self.program)
            .args(["--yes", "--armor", "--pinentry-mode", "loopback", "--output"])
            .arg(&output_path)
            .arg("--sign")
            .arg(record)
            .output()
            .map_err(|e| ReleaseError::io(Path::new(&self.program), e))?;

        if !output.status.success() {
            return Err(command_failure(&self.program, &output));
        }
        info!(signature = %output_path.display(), "signature created");
        Ok(output_path)
    }
}
