//! The mount map and bind-mount primitives.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Logical mount points and the host sources that back them.
///
/// The map is ordered by mount point, which guarantees that `/` sorts
/// first and parents sort before their children, so iterating in order is
/// a valid mount sequence and reverse order a valid unmount sequence.
#[derive(Debug, Default, Clone)]
pub struct MountMap {
    entries: BTreeMap<String, PathBuf>,
}

impl MountMap {
    /// An empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mount point. Later registrations of the same point win.
    pub fn add(&mut self, mount_point: impl Into<String>, host_source: impl Into<PathBuf>) {
        self.entries.insert(mount_point.into(), host_source.into());
    }

    /// The host source backing a mount point.
    #[must_use]
    pub fn source_of(&self, mount_point: &str) -> Option<&Path> {
        self.entries.get(mount_point).map(PathBuf::as_path)
    }

    /// Iterate mount points in mount order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries
            .iter()
            .map(|(point, source)| (point.as_str(), source.as_path()))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a mount point to its absolute path under a rootfs.
    #[must_use]
    pub fn target_under(rootfs: &Path, mount_point: &str) -> PathBuf {
        rootfs.join(mount_point.trim_start_matches('/'))
    }
}

/// Bind-mount `source` onto `target`.
#[cfg(unix)]
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    trace!(source = %source.display(), target = %target.display(), "bind mount");
    mount_call(Some(source), target, libc::MS_BIND)
}

/// Remount an existing bind mount read-only.
#[cfg(unix)]
pub fn remount_readonly(target: &Path) -> Result<()> {
    trace!(target = %target.display(), "remount read-only");
    mount_call(
        None,
        target,
        libc::MS_REMOUNT | libc::MS_BIND | libc::MS_RDONLY,
    )
}

/// Detach a mount; lazy so teardown still succeeds while a straggling
/// process holds the mount busy.
#[cfg(unix)]
pub fn unmount(target: &Path) -> std::io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_target = CString::new(target.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::other("path contains NUL"))?;
    // SAFETY: plain libc call on a validated C string
    let rc = unsafe { libc::umount2(c_target.as_ptr(), libc::MNT_DETACH) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(unix)]
fn mount_call(source: Option<&Path>, target: &Path, flags: libc::c_ulong) -> Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_source = source
        .map(|s| CString::new(s.as_os_str().as_bytes()))
        .transpose()
        .map_err(|_| {
            Error::io(
                std::io::Error::other("path contains NUL"),
                target,
                "mount",
            )
        })?;
    let c_target = CString::new(target.as_os_str().as_bytes()).map_err(|_| {
        Error::io(
            std::io::Error::other("path contains NUL"),
            target,
            "mount",
        )
    })?;

    // SAFETY: plain libc call on validated C strings
    let rc = unsafe {
        libc::mount(
            c_source
                .as_ref()
                .map_or(std::ptr::null(), |s| s.as_ptr()),
            c_target.as_ptr(),
            std::ptr::null(),
            flags,
            std::ptr::null(),
        )
    };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        return Err(match err.kind() {
            std::io::ErrorKind::PermissionDenied => Error::Permission {
                operation: "mount".to_string(),
                path: target.display().to_string(),
            },
            _ => Error::Mount {
                target: target.display().to_string(),
                source: err,
            },
        });
    }
    Ok(())
}
