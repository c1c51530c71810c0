//! Polling for block devices to appear after a remote attach.

use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Default number of polls before giving up on a device.
pub const DEFAULT_DEVICE_ATTEMPTS: u32 = 60;

/// Default delay between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A `directory/prefix*` glob over the device namespace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DevicePattern {
    directory: Utf8PathBuf,
    prefix: String,
}

impl DevicePattern {
    /// Creates a pattern matching entries of `directory` whose names start
    /// with `prefix`.
    #[must_use]
    pub fn new(directory: impl Into<Utf8PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
        }
    }

    /// Directory searched for matching entries.
    #[must_use]
    pub fn directory(&self) -> &Utf8Path {
        &self.directory
    }

    /// Entry name prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the first matching entry in sorted order, or `None`.
    ///
    /// A missing or unreadable directory counts as no match.
    #[must_use]
    pub fn first_match(&self) -> Option<Utf8PathBuf> {
        let dir = match Dir::open_ambient_dir(&self.directory, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) => {
                debug!(directory = %self.directory, error = %err, "device directory unavailable");
                return None;
            }
        };

        let entries = match dir.entries() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(directory = %self.directory, error = %err, "failed to list device directory");
                return None;
            }
        };

        let mut names = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().ok())
            .filter(|name| name.starts_with(&self.prefix))
            .collect::<Vec<_>>();
        names.sort();
        names.first().map(|name| self.directory.join(name))
    }
}

impl fmt::Display for DevicePattern {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}*", self.directory.join(&self.prefix))
    }
}

/// Waits for the kernel to register an attached volume's block device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeviceWaiter {
    poll_interval: Duration,
}

impl DeviceWaiter {
    /// Creates a waiter that sleeps `poll_interval` between attempts.
    #[must_use]
    pub const fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Polls `pattern` up to `max_attempts` times and returns the first
    /// match, or `None` when the attempts are exhausted.
    pub async fn wait_for_device(
        &self,
        pattern: &DevicePattern,
        max_attempts: u32,
    ) -> Option<Utf8PathBuf> {
        info!(%pattern, max_attempts, "waiting for device");
        for attempt in 1..=max_attempts {
            if let Some(device) = pattern.first_match() {
                debug!(%device, attempt, "device appeared");
                return Some(device);
            }
            if attempt < max_attempts {
                sleep(self.poll_interval).await;
            }
        }
        None
    }
}
