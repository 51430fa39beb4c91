use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use super::{command_failure, Distributor};
use crate::error::ReleaseError;

/// Username and password for mapping a network share.
#[derive(Clone)]
pub struct ShareCredentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for ShareCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareCredentials").field("user", &self.user).field("password", &"***").finish()
    }
}

/// A mapped network share (`net use`), disconnected again by [`ShareSession::disconnect`].
///
/// Mapping only happens on Windows and only with credentials; otherwise the
/// target is assumed to be reachable already and the session is a no-op.
#[derive(Debug)]
pub struct ShareSession {
    target: PathBuf,
    mapped: bool,
}

impl ShareSession {
    pub fn connect(target: &Path, credentials: Option<&ShareCredentials>) -> Result<Self, ReleaseError> {
        let Some(creds) = credentials else {
            return Ok(Self { target: target.to_path_buf(), mapped: false });
        };
        if !cfg!(windows) {
            warn!(target = %target.display(), "share credentials are only used on Windows; ignoring");
            return Ok(Self { target: target.to_path_buf(), mapped: false });
        }

        let mut cmd = Command::new("net");
        cmd.arg("use")
            .arg(target)
            .arg(&creds.password)
            .arg(format!("/user:{}", creds.user))
            .arg("/persistent:no");

        let output = cmd.output().map_err(|e| ReleaseError::io("net", e))?;
        if !output.status.success() {
            return Err(command_failure("net use", &output));
        }
        debug!(target = %target.display(), "share mapped");
        Ok(Self { target: target.to_path_buf(), mapped: true })
    }

    /// Best effort: a failed disconnect never fails the release.
    pub fn disconnect(self) {
        if !self.mapped {
            return;
        }
        let result = Command::new("net").arg("use").arg(&self.target).args(["/delete", "/yes"]).output();
        match result {
            Ok(out) if out.status.success() => debug!(target = %self.target.display(), "share disconnected"),
            _ => warn!(target = %self.target.display(), "failed to disconnect share"),
        }
    }
}

fn target_file(target: &Path, artifact: &Path) -> Result<PathBuf, ReleaseError> {
    let name = artifact
        .file_name()
        .ok_or_else(|| ReleaseError::Configuration(format!("'{}' has no file name", artifact.display())))?;
    Ok(target.join(name))
}

/// Copies each artifact into the target directory with a plain file copy.
#[derive(Debug, Clone)]
pub struct CopyDistributor {
    target: PathBuf,
    credentials: Option<ShareCredentials>,
}

impl CopyDistributor {
    pub fn new(target: impl Into<PathBuf>, credentials: Option<ShareCredentials>) -> Self {
        Self { target: target.into(), credentials }
    }
}

impl Distributor for CopyDistributor {
    fn distribute(&self, artifacts: &[PathBuf]) -> Result<Vec<PathBuf>, ReleaseError> {
        let session = ShareSession::connect(&self.target, self.credentials.as_ref())?;
        let _session = scopeguard::guard(session, ShareSession::disconnect);

        let mut copied = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let dest = target_file(&self.target, artifact)?;
            let bytes = fs::copy(artifact, &dest).map_err(|e| ReleaseError::io(&dest, e))?;
            info!(from = %artifact.display(), to = %dest.display(), bytes, "copied");
            copied.push(dest);
        }
        Ok(copied)
    }

    fn target(&self) -> &Path {
        &self.target
    }
}

/// Mirrors artifacts with `robocopy`, restartable and with retries.
#[derive(Debug, Clone)]
pub struct RobocopyDistributor {
    target: PathBuf,
    credentials: Option<ShareCredentials>,
    program: OsString,
}

/// Flags: restartable mode, 3 retries 5 s apart, no file/dir listings.
const ROBOCOPY_FLAGS: [&str; 5] = ["/Z", "/R:3", "/W:5", "/NFL", "/NDL"];

/// robocopy exit codes below 8 mean success (with or without copies).
const ROBOCOPY_FAILURE_CODE: i32 = 8;

impl RobocopyDistributor {
    pub fn new(target: impl Into<PathBuf>, credentials: Option<ShareCredentials>) -> Self {
        Self { target: target.into(), credentials, program: "robocopy".into() }
    }

    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    /// robocopy works per source directory, so artifacts are grouped by parent.
    fn grouped(artifacts: &[PathBuf]) -> BTreeMap<PathBuf, Vec<OsString>> {
        let mut groups: BTreeMap<PathBuf, Vec<OsString>> = BTreeMap::new();
        for artifact in artifacts {
            let dir = match artifact.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            if let Some(name) = artifact.file_name() {
                groups.entry(dir).or_default().push(name.to_os_string());
            }
        }
        groups
    }
}

impl Distributor for RobocopyDistributor {
    fn distribute(&self, artifacts: &[PathBuf]) -> Result<Vec<PathBuf>, ReleaseError> {
        let session = ShareSession::connect(&self.target, self.credentials.as_ref())?;
        let _session = scopeguard::guard(session, ShareSession::disconnect);

        for (dir, names) in Self::grouped(artifacts) {
            let output = Command::new(&self.program)
                .arg(&dir)
                .arg(&self.target)
                .args(&names)
                .args(ROBOCOPY_FLAGS)
                .output()
                .map_err(|e| ReleaseError::io(Path::new(&self.program), e))?;

            match output.status.code() {
                Some(code) if code < ROBOCOPY_FAILURE_CODE => {
                    debug!(dir = %dir.display(), code, "robocopy finished");
                }
                _ => return Err(command_failure(&self.program, &output)),
            }
        }

        artifacts.iter().map(|a| target_file(&self.target, a)).collect()
    }

    fn target(&self) -> &Path {
        &self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copy_distributor_copies_every_artifact() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let zip = src.path().join("out.zip");
        let sum = src.path().join("out.zip.sha256");
        fs::write(&zip, b"zip bytes").unwrap();
        fs::write(&sum, b"digest").unwrap();

        let copied = CopyDistributor::new(dst.path(), None)
            .distribute(&[zip.clone(), sum.clone()])
            .unwrap();

        assert_eq!(copied, vec![dst.path().join("out.zip"), dst.path().join("out.zip.sha256")]);
        assert_eq!(fs::read(dst.path().join("out.zip")).unwrap(), b"zip bytes");
        assert_eq!(fs::read(dst.path().join("out.zip.sha256")).unwrap(), b"digest");
    }

    #[test]
    fn copy_into_missing_directory_fails() {
        let src = tempdir().unwrap();
        let zip = src.path().join("out.zip");
        fs::write(&zip, b"z").unwrap();
        let err = CopyDistributor::new(src.path().join("no/such/dir"), None)
            .distribute(&[zip])
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Io { .. }));
    }

    #[test]
    fn robocopy_groups_by_directory() {
        let groups = RobocopyDistributor::grouped(&[
            PathBuf::from("dist/a.zip"),
            PathBuf::from("dist/a.zip.sha256"),
            PathBuf::from("other/b.zip"),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[Path::new("dist")], vec![OsString::from("a.zip"), OsString::from("a.zip.sha256")]);
        assert_eq!(groups[Path::new("other")], vec![OsString::from("b.zip")]);
    }

    #[test]
    fn robocopy_missing_program_is_an_io_error() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let zip = src.path().join("out.zip");
        fs::write(&zip, b"z").unwrap();

        let err = RobocopyDistributor::new(dst.path(), None)
            .with_program("zipforge-no-such-robocopy")
            .distribute(&[zip])
            .unwrap_err();

        assert!(matches!(err, ReleaseError::Io { .. }), "{err}");
        assert_eq!(fs::read_dir(dst.path()).unwrap().count(), 0);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = ShareCredentials { user: "svc".into(), password: "hunter2".into() };
        let shown = format!("{creds:?}");
        assert!(shown.contains("svc"));
        assert!(!shown.contains("hunter2"));
    }
}
