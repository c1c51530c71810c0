//! Filesystem detection and formatting.

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;

use camino::Utf8Path;
use tracing::{debug, info, warn};

use super::{CommandRunner, HostError};

const BLKID_BIN: &str = "blkid";

/// Filesystem families the plugin can create.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FsType {
    /// `ext4`, formatted with `mkfs.ext4`.
    #[default]
    Ext4,
    /// `xfs`, formatted with `mkfs.xfs`.
    Xfs,
}

impl FsType {
    /// Name used by `blkid` and `mount`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
        }
    }

    const fn formatter(self) -> (&'static str, &'static str) {
        match self {
            Self::Ext4 => ("mkfs.ext4", "-F"),
            Self::Xfs => ("mkfs.xfs", "-f"),
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for FsType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ext4" => Ok(Self::Ext4),
            "xfs" => Ok(Self::Xfs),
            other => Err(format!("unsupported filesystem type '{other}'")),
        }
    }
}

/// Detects and creates filesystems on block devices.
#[derive(Clone, Debug)]
pub struct FilesystemManager<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> FilesystemManager<R> {
    /// Creates a manager that shells out through `runner`.
    #[must_use]
    pub const fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Returns the filesystem type reported by `blkid`, or `None` when the
    /// device has no recognised filesystem or the probe fails.
    pub fn probe(&self, device: &Utf8Path) -> Option<String> {
        let output = match self.runner.run(BLKID_BIN, &[OsString::from(device.as_str())]) {
            Ok(output) => output,
            Err(err) => {
                warn!(%device, error = %err, "filesystem probe failed to run");
                return None;
            }
        };

        if !output.is_success() {
            debug!(%device, code = ?output.code, "blkid found no filesystem");
            return None;
        }

        let fs_type = parse_blkid_type(&output.stdout);
        debug!(%device, fs_type = ?fs_type, "probed filesystem");
        fs_type
    }

    /// Formats `device` with `fs_type`, forcing over any partial signature.
    ///
    /// Only call this after [`FilesystemManager::probe`] returned `None`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::CommandFailure`] with the formatter output when
    /// it exits non-zero, or [`HostError::Spawn`] when it cannot start.
    pub fn format(&self, device: &Utf8Path, fs_type: FsType) -> Result<(), HostError> {
        let (program, force_flag) = fs_type.formatter();
        info!(%device, %fs_type, program, "formatting device");
        let args = [OsString::from(force_flag), OsString::from(device.as_str())];
        let output = self.runner.run(program, &args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(HostError::command_failure(program, &output))
    }
}

/// Extracts the value of the `TYPE="..."` token from `blkid` output.
fn parse_blkid_type(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .filter_map(|token| token.split_once('='))
        .find(|(key, _)| *key == "TYPE")
        .map(|(_, value)| value.trim_matches('"').to_owned())
        .filter(|value| !value.is_empty())
}
