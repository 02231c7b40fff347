//! Device nodes mirrored into non-interactive sandboxes.

use crate::{Error, Result};
use std::path::Path;

/// The device nodes builds usually need.
///
/// Interactive sandboxes bind the host `/dev` instead, due to the sheer
/// number of devices an interactive session may touch.
pub const DEVICES: &[&str] = &[
    "/dev/null",
    "/dev/zero",
    "/dev/random",
    "/dev/urandom",
    "/dev/tty",
];

/// Create a character-special node at `target` mirroring the host device at
/// `source`: same major/minor, same permission bits.
///
/// Requires privileges; a permission failure is reported distinctly from
/// other I/O errors.
#[cfg(unix)]
pub fn mknod_mirror(source: &Path, target: &Path) -> Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_source = CString::new(source.as_os_str().as_bytes())
        .map_err(|_| Error::io(std::io::Error::other("path contains NUL"), source, "mknod"))?;
    let c_target = CString::new(target.as_os_str().as_bytes())
        .map_err(|_| Error::io(std::io::Error::other("path contains NUL"), target, "mknod"))?;

    // SAFETY: plain libc calls on validated C strings
    unsafe {
        let mut stat: libc::stat = std::mem::zeroed();
        if libc::stat(c_source.as_ptr(), &raw mut stat) != 0 {
            return Err(Error::io(
                std::io::Error::last_os_error(),
                source,
                "stat",
            ));
        }
        let dev = libc::makedev(libc::major(stat.st_rdev), libc::minor(stat.st_rdev));
        let mode = libc::S_IFCHR | (stat.st_mode & 0o7777);
        if libc::mknod(c_target.as_ptr(), mode, dev) != 0 {
            let err = std::io::Error::last_os_error();
            return Err(match err.kind() {
                std::io::ErrorKind::PermissionDenied => Error::Permission {
                    operation: "mknod".to_string(),
                    path: target.display().to_string(),
                },
                _ => Error::Mknod {
                    path: target.display().to_string(),
                    source: err,
                },
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_list_covers_the_build_essentials() {
        assert!(DEVICES.contains(&"/dev/null"));
        assert!(DEVICES.contains(&"/dev/urandom"));
        assert_eq!(DEVICES.len(), 5);
    }

    #[cfg(unix)]
    #[test]
    fn mknod_without_privileges_is_a_permission_error() {
        // Unprivileged processes cannot create character devices
        if unsafe { libc::geteuid() } == 0 {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let err = mknod_mirror(
            Path::new("/dev/null"),
            &dir.path().join("null"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Permission { .. }), "{err}");
    }
}
