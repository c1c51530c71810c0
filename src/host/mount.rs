//! Mounting and unmounting volumes under the mount root.

use std::ffi::OsString;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::{debug, info, warn};

use super::{CommandRunner, HostError};

const MOUNT_BIN: &str = "mount";
const UMOUNT_BIN: &str = "umount";
const NOT_MOUNTED_MARKER: &str = "not mounted";

/// Mount table consulted by default.
pub const DEFAULT_MOUNT_TABLE: &str = "/proc/mounts";

/// Outcome of an unmount request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnmountOutcome {
    /// The path was mounted and has been released.
    Unmounted,
    /// The path had no active mount; nothing was done.
    NotMounted,
}

/// Performs mount and unmount operations via the OS tools.
#[derive(Clone, Debug)]
pub struct MountManager<R: CommandRunner> {
    runner: R,
    mount_table: Utf8PathBuf,
}

impl<R: CommandRunner> MountManager<R> {
    /// Creates a manager that reads the system mount table.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            mount_table: Utf8PathBuf::from(DEFAULT_MOUNT_TABLE),
        }
    }

    /// Overrides the mount table path.
    #[must_use]
    pub fn with_mount_table(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.mount_table = path.into();
        self
    }

    /// Ensures `mount_path` exists and mounts `device` on it.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] when the directory cannot be created and
    /// [`HostError::CommandFailure`] when `mount` exits non-zero.
    pub fn mount(&self, device: &Utf8Path, mount_path: &Utf8Path) -> Result<(), HostError> {
        info!(%device, %mount_path, "mounting device");
        Dir::create_ambient_dir_all(mount_path, ambient_authority())
            .map_err(|err| HostError::io(mount_path, &err))?;

        let args = [
            OsString::from(device.as_str()),
            OsString::from(mount_path.as_str()),
        ];
        let output = self.runner.run(MOUNT_BIN, &args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(HostError::command_failure(MOUNT_BIN, &output))
    }

    /// Unmounts `mount_path`, reporting [`UnmountOutcome::NotMounted`] when
    /// `umount` says the path was not mounted.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::CommandFailure`] for any other non-zero exit.
    pub fn unmount(&self, mount_path: &Utf8Path) -> Result<UnmountOutcome, HostError> {
        info!(%mount_path, "unmounting");
        let output = self
            .runner
            .run(UMOUNT_BIN, &[OsString::from(mount_path.as_str())])?;
        if output.is_success() {
            return Ok(UnmountOutcome::Unmounted);
        }

        let combined = output.combined();
        if combined.contains(NOT_MOUNTED_MARKER) {
            warn!(%mount_path, "unmount requested but path is not mounted");
            return Ok(UnmountOutcome::NotMounted);
        }
        Err(HostError::command_failure(UMOUNT_BIN, &output))
    }

    /// Reports whether the mount table lists `mount_path` as a mount point.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] when the mount table cannot be read.
    pub fn is_mounted(&self, mount_path: &Utf8Path) -> Result<bool, HostError> {
        let table = read_mount_table(&self.mount_table)?;
        let mounted = table
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|field| unescape_mount_field(field) == mount_path.as_str());
        debug!(%mount_path, mounted, "checked mount table");
        Ok(mounted)
    }
}

/// Reverses the octal escapes (`\040` for a space) the kernel writes into
/// mount table fields.
fn unescape_mount_field(field: &str) -> String {
    let mut decoded = Vec::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find('\\') {
        let (head, tail) = rest.split_at(pos);
        decoded.extend_from_slice(head.as_bytes());
        let escaped = tail
            .get(1..4)
            .filter(|digits| digits.bytes().all(|digit| matches!(digit, b'0'..=b'7')))
            .and_then(|digits| u8::from_str_radix(digits, 8).ok());
        match escaped {
            Some(byte) => {
                decoded.push(byte);
                rest = tail.get(4..).unwrap_or_default();
            }
            None => {
                decoded.push(b'\\');
                rest = tail.get(1..).unwrap_or_default();
            }
        }
    }
    decoded.extend_from_slice(rest.as_bytes());
    String::from_utf8_lossy(&decoded).into_owned()
}

fn read_mount_table(path: &Utf8Path) -> Result<String, HostError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("/"));
    let file_name = path.file_name().ok_or_else(|| HostError::Io {
        path: path.to_path_buf(),
        message: String::from("mount table path is missing a filename"),
    })?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| HostError::io(parent, &err))?;
    dir.read_to_string(file_name).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            HostError::Io {
                path: path.to_path_buf(),
                message: String::from("mount table does not exist"),
            }
        } else {
            HostError::io(path, &err)
        }
    })
}
