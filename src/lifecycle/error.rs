//! Error taxonomy for lifecycle operations.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::host::HostError;

/// Errors raised by lifecycle operations.
///
/// Every variant is terminal for the call that raised it; the plugin layer
/// reports the `Display` text to Docker.
#[derive(Debug, Error)]
pub enum LifecycleError<E>
where
    E: std::error::Error + 'static,
{
    /// No remote volume carries the requested name.
    #[error("volume {name} not found")]
    NotFound {
        /// Requested volume name.
        name: String,
    },
    /// The operation is invalid for the volume's current remote status.
    #[error("{reason} (volume {name})")]
    Conflict {
        /// Requested volume name.
        name: String,
        /// Why the operation was refused.
        reason: String,
    },
    /// The block device never appeared.
    #[error(
        "waited {attempts} attempts for volume {name}, located as device {pattern}, to appear but it never did"
    )]
    Timeout {
        /// Requested volume name.
        name: String,
        /// Device pattern that was polled.
        pattern: String,
        /// Number of polls performed.
        attempts: u32,
    },
    /// Formatting the device failed.
    #[error("failed to format device {device}: {source}")]
    Format {
        /// Device that could not be formatted.
        device: Utf8PathBuf,
        /// Underlying tool failure.
        #[source]
        source: HostError,
    },
    /// Mounting, unmounting or inspecting the mount failed.
    #[error("failed to {action} volume {name}: {source}")]
    Mount {
        /// Operation that failed (`mount`, `unmount`, or `inspect`).
        action: &'static str,
        /// Requested volume name.
        name: String,
        /// Underlying tool failure.
        #[source]
        source: HostError,
    },
    /// A call to the remote API failed.
    #[error("remote {operation} failed: {source}")]
    Remote {
        /// Gateway operation that failed.
        operation: &'static str,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Creating or removing the tracking directory failed.
    #[error("tracking directory {path} failed: {source}")]
    LocalIo {
        /// Tracking directory path.
        path: Utf8PathBuf,
        /// Underlying filesystem failure.
        #[source]
        source: HostError,
    },
}

impl<E> LifecycleError<E>
where
    E: std::error::Error + 'static,
{
    pub(crate) fn remote(operation: &'static str) -> impl FnOnce(E) -> Self {
        move |source| Self::Remote { operation, source }
    }

    pub(crate) fn mount(action: &'static str, name: &str) -> impl FnOnce(HostError) -> Self {
        let volume = name.to_owned();
        move |source| Self::Mount {
            action,
            name: volume,
            source,
        }
    }

    pub(crate) fn conflict(name: &str, reason: String) -> Self {
        Self::Conflict {
            name: name.to_owned(),
            reason,
        }
    }
}
