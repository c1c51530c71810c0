//! Local operating-system surface used by the lifecycle orchestrator.
//!
//! Block devices, filesystems, mounts, and the per-volume tracking
//! directories all live here. Everything that shells out goes through a
//! [`CommandRunner`] so tests can script command outcomes, and the
//! orchestrator itself only sees the [`HostOps`] capability trait.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::process::Command;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

mod addresses;
mod device;
mod filesystem;
mod mount;
mod tracking;

pub use addresses::local_addresses;
pub use device::{DEFAULT_DEVICE_ATTEMPTS, DEFAULT_POLL_INTERVAL, DevicePattern, DeviceWaiter};
pub use filesystem::{FilesystemManager, FsType};
pub use mount::{DEFAULT_MOUNT_TABLE, MountManager, UnmountOutcome};
pub use tracking::{create_tracking_dir, remove_tracking_dir};

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Returns stdout and stderr joined, trimmed of surrounding whitespace.
    #[must_use]
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_owned(),
            (false, true) => stdout.to_owned(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }

    fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, HostError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, HostError> {
        debug!(program, ?args, "running command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| HostError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(program, code = ?result.code, output = %result.combined(), "command finished");
        Ok(result)
    }
}

/// Errors raised by local device, filesystem, and mount operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HostError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {output}")]
    CommandFailure {
        /// Command name used for the attempted operation.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Combined stdout and stderr captured from the process.
        output: String,
    },
    /// Raised when a directory or file operation fails.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

impl HostError {
    pub(crate) fn command_failure(program: &str, output: &CommandOutput) -> Self {
        Self::CommandFailure {
            program: program.to_owned(),
            status: output.code,
            status_text: output.status_text(),
            output: output.combined(),
        }
    }

    pub(crate) fn io(path: &Utf8Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Future returned by asynchronous host operations.
pub type HostFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability interface over the local operating system.
///
/// The lifecycle orchestrator only talks to the host through this trait,
/// which keeps its branching logic testable without a real block device.
pub trait HostOps {
    /// Polls for a device matching `pattern`, at most `max_attempts` times.
    /// Returns `None` once the attempts are exhausted.
    fn wait_for_device<'a>(
        &'a self,
        pattern: &'a DevicePattern,
        max_attempts: u32,
    ) -> HostFuture<'a, Option<Utf8PathBuf>>;

    /// Returns the filesystem type found on `device`, or `None` when the
    /// device carries no recognised filesystem.
    fn probe_filesystem(&self, device: &Utf8Path) -> Option<String>;

    /// Formats `device` with `fs_type`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the formatter cannot run or fails.
    fn format_filesystem(&self, device: &Utf8Path, fs_type: FsType) -> Result<(), HostError>;

    /// Mounts `device` at `mount_path`, creating the directory when needed.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the directory or mount cannot be created.
    fn mount(&self, device: &Utf8Path, mount_path: &Utf8Path) -> Result<(), HostError>;

    /// Unmounts `mount_path`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when `umount` fails for any reason other than
    /// the path not being mounted.
    fn unmount(&self, mount_path: &Utf8Path) -> Result<UnmountOutcome, HostError>;

    /// Reports whether `mount_path` currently has an active mount.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] when the mount table cannot be read.
    fn is_mounted(&self, mount_path: &Utf8Path) -> Result<bool, HostError>;

    /// Creates the tracking directory for a volume.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] when the directory cannot be created.
    fn create_tracking_dir(&self, path: &Utf8Path) -> Result<(), HostError>;

    /// Removes the tracking directory for a volume.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] when the directory cannot be removed.
    fn remove_tracking_dir(&self, path: &Utf8Path) -> Result<(), HostError>;
}

/// [`HostOps`] implementation backed by the real operating system.
#[derive(Clone, Debug)]
pub struct LocalHost<R: CommandRunner> {
    devices: DeviceWaiter,
    filesystems: FilesystemManager<R>,
    mounts: MountManager<R>,
}

impl LocalHost<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub fn with_process_runner() -> Self {
        Self::new(ProcessCommandRunner)
    }
}

impl<R: CommandRunner + Clone> LocalHost<R> {
    /// Creates a host using `runner` for every shell-out, the default device
    /// poll interval, and the system mount table.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self {
            devices: DeviceWaiter::new(DEFAULT_POLL_INTERVAL),
            filesystems: FilesystemManager::new(runner.clone()),
            mounts: MountManager::new(runner),
        }
    }

    /// Overrides the delay between device polls.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.devices = DeviceWaiter::new(interval);
        self
    }

    /// Overrides the mount table consulted by [`HostOps::is_mounted`].
    #[must_use]
    pub fn with_mount_table(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.mounts = self.mounts.with_mount_table(path);
        self
    }
}

impl<R> HostOps for LocalHost<R>
where
    R: CommandRunner + Send + Sync,
{
    fn wait_for_device<'a>(
        &'a self,
        pattern: &'a DevicePattern,
        max_attempts: u32,
    ) -> HostFuture<'a, Option<Utf8PathBuf>> {
        Box::pin(self.devices.wait_for_device(pattern, max_attempts))
    }

    fn probe_filesystem(&self, device: &Utf8Path) -> Option<String> {
        self.filesystems.probe(device)
    }

    fn format_filesystem(&self, device: &Utf8Path, fs_type: FsType) -> Result<(), HostError> {
        self.filesystems.format(device, fs_type)
    }

    fn mount(&self, device: &Utf8Path, mount_path: &Utf8Path) -> Result<(), HostError> {
        self.mounts.mount(device, mount_path)
    }

    fn unmount(&self, mount_path: &Utf8Path) -> Result<UnmountOutcome, HostError> {
        self.mounts.unmount(mount_path)
    }

    fn is_mounted(&self, mount_path: &Utf8Path) -> Result<bool, HostError> {
        self.mounts.is_mounted(mount_path)
    }

    fn create_tracking_dir(&self, path: &Utf8Path) -> Result<(), HostError> {
        create_tracking_dir(path)
    }

    fn remove_tracking_dir(&self, path: &Utf8Path) -> Result<(), HostError> {
        remove_tracking_dir(path)
    }
}
