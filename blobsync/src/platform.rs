//! Platform capabilities.
//!
//! The only capability the sync needs beyond portable std is marking output
//! files executable, which not every platform can express. Callers resolve a
//! [`PermissionSetter`] once at startup and use it for every file.

use std::io;
use std::path::Path;

/// Applies the executable bit where the platform supports one.
pub trait PermissionSetter: Send + Sync {
    /// Make `path` executable by everyone who can already read it.
    fn make_executable(&self, path: &Path) -> io::Result<()>;
}

/// Unix permission handling: copy each read bit to the matching execute bit.
#[cfg(unix)]
pub struct UnixPermissions;

#[cfg(unix)]
impl PermissionSetter for UnixPermissions {
    fn make_executable(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(path)?;
        let mode = metadata.permissions().mode();
        let wanted = mode | ((mode & 0o444) >> 2);
        if wanted != mode {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(wanted))?;
        }
        Ok(())
    }
}

/// Fallback for platforms without an executable bit.
pub struct NoopPermissions;

impl PermissionSetter for NoopPermissions {
    fn make_executable(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// Pick the permission setter for the current platform.
pub fn detect() -> Box<dyn PermissionSetter> {
    #[cfg(unix)]
    {
        Box::new(UnixPermissions)
    }
    #[cfg(not(unix))]
    {
        Box::new(NoopPermissions)
    }
}
