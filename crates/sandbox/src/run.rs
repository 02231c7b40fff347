//! Sandbox assembly and command execution.

use crate::cleanup::CleanupStack;
use crate::devices::{DEVICES, mknod_mirror};
use crate::mount::{MountMap, bind_mount, remount_readonly, unmount};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

static ROOTFS_COUNTER: AtomicU64 = AtomicU64::new(0);

/// How long a terminated command gets between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Behavior switches for a sandbox run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SandboxFlags {
    /// Remount `/` read-only after all sub-mounts are established.
    pub root_read_only: bool,
    /// Attach the user's terminal and bind the host `/dev`.
    pub interactive: bool,
    /// Leave networking alone (isolation is best-effort either way).
    pub network_enabled: bool,
    /// Run as the invoking user instead of root.
    pub inherit_uid: bool,
}

/// A directory the element expects at a fixed path inside the sandbox,
/// e.g. the build directory or the install root.
#[derive(Debug, Clone)]
pub struct MarkedDirectory {
    /// Path inside the sandbox.
    pub path: String,
    /// Backing directory on the host.
    pub host_source: PathBuf,
}

/// One transient build sandbox.
///
/// Created per build, torn down with guaranteed release of all mounts,
/// device nodes and temporary directories on every exit path.
pub struct Sandbox {
    runtime_root: PathBuf,
    root_source: PathBuf,
    marked: Vec<MarkedDirectory>,
    environment: BTreeMap<String, String>,
    work_dir: Option<String>,
    cancel: CancellationToken,
    terminate: bool,
}

impl Sandbox {
    /// A sandbox whose `/` will be served from `root_source`, with rootfs
    /// scaffolding created under `runtime_root`.
    #[must_use]
    pub fn new(runtime_root: impl Into<PathBuf>, root_source: impl Into<PathBuf>) -> Self {
        Self {
            runtime_root: runtime_root.into(),
            root_source: root_source.into(),
            marked: Vec::new(),
            environment: BTreeMap::new(),
            work_dir: None,
            cancel: CancellationToken::new(),
            terminate: false,
        }
    }

    /// Expose a host directory at a fixed path inside the sandbox.
    #[must_use]
    pub fn with_marked_directory(mut self, path: impl Into<String>, host: impl Into<PathBuf>) -> Self {
        self.marked.push(MarkedDirectory {
            path: path.into(),
            host_source: host.into(),
        });
        self
    }

    /// The default environment for commands.
    #[must_use]
    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// The default working directory for commands.
    #[must_use]
    pub fn with_work_dir(mut self, work_dir: impl Into<String>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    /// Enable SIGTERM-then-SIGKILL termination when `cancel` fires.
    /// Without this, an in-flight command is allowed to finish.
    #[must_use]
    pub fn with_termination(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self.terminate = true;
        self
    }

    /// Build the mount map for a run: `/` from the prepared root, the
    /// marked directories, `/proc` and `/tmp`, plus `/dev` when
    /// interactive.
    #[must_use]
    pub fn mount_map(&self, flags: SandboxFlags) -> MountMap {
        let mut map = MountMap::new();
        map.add("/", &self.root_source);
        for mark in &self.marked {
            map.add(mark.path.clone(), &mark.host_source);
        }
        map.add("/proc", "/proc");
        map.add("/tmp", "/tmp");
        if flags.interactive {
            map.add("/dev", "/dev");
        }
        map
    }

    /// Run a command inside the sandbox.
    ///
    /// Returns the command's numeric exit code; a non-zero exit is a
    /// result, not an error. Errors mean the sandbox could not be
    /// assembled or the command could not launch.
    pub async fn run(
        &self,
        command: &[String],
        flags: SandboxFlags,
        cwd: Option<&str>,
        env: Option<&BTreeMap<String, String>>,
    ) -> Result<i32> {
        if command.is_empty() {
            return Err(Error::Spawn {
                message: "empty command".to_string(),
            });
        }
        let cwd = cwd.or(self.work_dir.as_deref()).unwrap_or("/");
        let env = env.unwrap_or(&self.environment);
        let map = self.mount_map(flags);

        fs::create_dir_all(&self.runtime_root)
            .map_err(|e| Error::io(e, &self.runtime_root, "create_dir_all"))?;

        let mut cleanup = CleanupStack::new();

        // Fresh rootfs directory; its removal runs after every unmount
        let rootfs = self.runtime_root.join(format!(
            "rootfs-{}-{}",
            std::process::id(),
            ROOTFS_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&rootfs).map_err(|e| Error::io(e, &rootfs, "create_dir_all"))?;
        {
            let rootfs = rootfs.clone();
            cleanup.push("remove rootfs", move || fs::remove_dir_all(&rootfs));
        }

        for (point, source) in map.iter() {
            if !source.exists() {
                return Err(Error::HostPathMissing {
                    path: source.display().to_string(),
                    mount_point: point.to_string(),
                });
            }
        }

        // Device nodes live in the root source so they appear under /
        // once it is bind-mounted
        if !flags.interactive {
            for device in DEVICES {
                let target = MountMap::target_under(&self.root_source, device);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|e| Error::io(e, parent, "create_dir_all"))?;
                }
                if target.exists() {
                    fs::remove_file(&target).map_err(|e| Error::io(e, &target, "remove_file"))?;
                }
                mknod_mirror(Path::new(device), &target)?;
                let target = target.clone();
                cleanup.push(format!("remove device {device}"), move || {
                    fs::remove_file(&target)
                });
            }
        }

        // Bind mounts, parents before children
        for (point, source) in map.iter() {
            let target = MountMap::target_under(&rootfs, point);
            fs::create_dir_all(&target).map_err(|e| Error::io(e, &target, "create_dir_all"))?;
            bind_mount(source, &target)?;
            {
                let target = target.clone();
                cleanup.push(format!("unmount {point}"), move || unmount(&target));
            }
        }

        // Only after every sub-mount is in place
        if flags.root_read_only {
            remount_readonly(&rootfs)?;
        }

        let code = self.spawn_chrooted(command, flags, cwd, env, &rootfs).await;

        cleanup.run_all();
        code
    }

    async fn spawn_chrooted(
        &self,
        command: &[String],
        flags: SandboxFlags,
        cwd: &str,
        env: &BTreeMap<String, String>,
        rootfs: &Path,
    ) -> Result<i32> {
        info!(
            command = %command.join(" "),
            rootfs = %rootfs.display(),
            cwd,
            "Running sandboxed command"
        );

        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..]);
        cmd.env_clear();
        for (k, v) in env {
            cmd.env(k, v);
        }
        cmd.stdin(if flags.interactive {
            Stdio::inherit()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        #[cfg(unix)]
        {
            use std::ffi::CString;
            use std::os::unix::ffi::OsStrExt;

            let c_rootfs = CString::new(rootfs.as_os_str().as_bytes()).map_err(|_| {
                Error::io(
                    std::io::Error::other("path contains NUL"),
                    rootfs,
                    "chroot",
                )
            })?;
            let c_cwd = CString::new(cwd.as_bytes()).map_err(|_| Error::Spawn {
                message: format!("working directory '{cwd}' contains NUL"),
            })?;
            // New session for interactive shells and for terminatable
            // builds, so signals reach the whole group
            let new_session = flags.interactive || self.terminate;

            // SAFETY: only async-signal-safe libc calls between fork and exec
            unsafe {
                cmd.pre_exec(move || {
                    if libc::chroot(c_rootfs.as_ptr()) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    if libc::chdir(c_cwd.as_ptr()) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    if new_session && libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => Error::Permission {
                operation: "chroot".to_string(),
                path: rootfs.display().to_string(),
            },
            _ => Error::Spawn {
                message: format!(
                    "could not chroot into '{}' or chdir into '{cwd}': {e}",
                    rootfs.display()
                ),
            },
        })?;

        let status = if self.terminate {
            tokio::select! {
                status = child.wait() => status,
                () = self.cancel.cancelled() => {
                    debug!("Cancellation requested, terminating sandboxed command");
                    #[cfg(unix)]
                    if let Some(pid) = child.id() {
                        // Negative pid signals the whole session group
                        // SAFETY: plain libc call
                        unsafe {
                            libc::kill(-(pid as i32), libc::SIGTERM);
                        }
                    }
                    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                        Ok(status) => status,
                        Err(_) => {
                            let _ = child.start_kill();
                            child.wait().await
                        }
                    }
                }
            }
        } else {
            child.wait().await
        };

        let status = status.map_err(|e| Error::Spawn {
            message: format!("failed waiting for sandboxed command: {e}"),
        })?;
        Ok(status.code().unwrap_or(-1))
    }
}
