//! Cross-platform filesystem helpers.
//!
//! Entry headers carry Unix permission bits on every host. On Unix they come
//! straight from the file mode; on Windows they are synthesized from the
//! read-only flag so that the same tree produces the same headers everywhere.

use std::fs::Metadata;
use std::io;
use std::path::Path;

/// Mode bits used when nothing better is known.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

#[cfg(unix)]
pub fn mode_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
pub fn mode_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        DEFAULT_FILE_MODE
    }
}

#[cfg(unix)]
/// Set POSIX permission bits on Unix.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
/// No-op off Unix: POSIX permission bits do not apply.
pub fn set_unix_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
