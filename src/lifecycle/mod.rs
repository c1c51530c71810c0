//! Volume lifecycle orchestration.
//!
//! [`LifecycleOrchestrator`] turns each Docker lifecycle request into an
//! ordered sequence of remote lookups, remote mutations, and local device
//! work. Remote state is never cached: every operation re-fetches the
//! volume by name. Create, Remove, Mount, and Unmount run one at a time.

use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::host::{DEFAULT_DEVICE_ATTEMPTS, DevicePattern, FsType, HostOps, UnmountOutcome};
use crate::volume::{CreateOptions, Volume, VolumeDefaults, VolumeGateway, VolumeStatus};

mod error;

pub use error::LifecycleError;

/// Number of volume-id characters the kernel keeps in a virtio serial.
const VIRTIO_SERIAL_LEN: usize = 19;

/// Pause before re-reading a volume that is still being created.
pub const DEFAULT_CREATING_RECHECK: Duration = Duration::from_secs(5);

/// Static context shared by every lifecycle operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LifecycleContext {
    /// Directory holding one tracking directory per volume.
    pub mount_root: Utf8PathBuf,
    /// Provider id of the instance this process runs on.
    pub instance_id: String,
    /// Defaults applied to newly created volumes.
    pub defaults: VolumeDefaults,
    /// Filesystem used when a device carries none.
    pub filesystem: FsType,
    /// Directory where attached block devices appear.
    pub device_directory: Utf8PathBuf,
    /// Device name prefix preceding the truncated volume id.
    pub device_prefix: String,
}

impl LifecycleContext {
    /// Returns `mount_root/name`.
    #[must_use]
    pub fn mount_path(&self, name: &str) -> Utf8PathBuf {
        self.mount_root.join(name)
    }

    /// Returns the pattern matching the block device of `volume_id`.
    #[must_use]
    pub fn device_pattern(&self, volume_id: &str) -> DevicePattern {
        let serial = volume_id.chars().take(VIRTIO_SERIAL_LEN).collect::<String>();
        DevicePattern::new(
            self.device_directory.clone(),
            format!("{}{serial}", self.device_prefix),
        )
    }
}

/// Retry bounds for the two waits in Mount.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LifecycleSettings {
    /// Delay before the single re-fetch of a `creating` volume.
    pub creating_recheck_delay: Duration,
    /// Maximum device polls.
    pub device_attempts: u32,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            creating_recheck_delay: DEFAULT_CREATING_RECHECK,
            device_attempts: DEFAULT_DEVICE_ATTEMPTS,
        }
    }
}

/// Projection of a volume returned by Get and List.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeInfo {
    /// Volume name.
    pub name: String,
    /// Local path the volume is (or would be) mounted at.
    pub mountpoint: Utf8PathBuf,
    /// Remote status at the time of the call.
    pub status: VolumeStatus,
}

/// Scope reported to Docker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope {
    /// Volumes are visible cluster-wide.
    Global,
    /// Volumes are local to one engine.
    Local,
}

impl Scope {
    /// Docker spelling of the scope.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Capabilities descriptor returned by Capabilities.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Capabilities {
    /// Volume scope.
    pub scope: Scope,
}

/// Implements the eight Docker lifecycle operations.
#[derive(Debug)]
pub struct LifecycleOrchestrator<G, H> {
    gateway: G,
    host: H,
    context: LifecycleContext,
    settings: LifecycleSettings,
    exclusive: Mutex<()>,
}

type LifecycleResult<T, G> = Result<T, LifecycleError<<G as VolumeGateway>::Error>>;

impl<G, H> LifecycleOrchestrator<G, H>
where
    G: VolumeGateway + Sync,
    H: HostOps + Sync,
{
    /// Creates an orchestrator with the default retry bounds.
    #[must_use]
    pub fn new(gateway: G, host: H, context: LifecycleContext) -> Self {
        Self {
            gateway,
            host,
            context,
            settings: LifecycleSettings::default(),
            exclusive: Mutex::new(()),
        }
    }

    /// Overrides the retry bounds.
    #[must_use]
    pub const fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns the shared context.
    #[must_use]
    pub const fn context(&self) -> &LifecycleContext {
        &self.context
    }

    /// Creates the remote volume when absent and records it locally.
    ///
    /// An existing volume is reused when it is `available` or already
    /// attached to this instance.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Conflict`] for an existing volume in any
    /// other state, [`LifecycleError::Remote`] when the provider fails, and
    /// [`LifecycleError::LocalIo`] when the tracking directory cannot be
    /// created.
    pub async fn create(&self, name: &str, options: &CreateOptions) -> LifecycleResult<(), G> {
        let _exclusive = self.exclusive.lock().await;
        info!(volume = name, "create requested");

        match self.lookup(name).await? {
            None => {
                let ignored = options
                    .iter()
                    .filter(|(key, _)| !matches!(*key, "size" | "type"));
                for (key, value) in ignored {
                    debug!(volume = name, key, value, "ignoring unsupported option");
                }
                let spec = self.context.defaults.spec_for(name, options);
                let created = self
                    .gateway
                    .create_volume(&spec)
                    .await
                    .map_err(LifecycleError::remote("create"))?;
                info!(
                    volume = name,
                    volume_id = %created.id,
                    size = spec.size,
                    volume_type = %spec.volume_type,
                    "created remote volume"
                );
            }
            Some(existing)
                if existing.status != VolumeStatus::Available
                    && !existing.is_attached_to(&self.context.instance_id) =>
            {
                return Err(LifecycleError::conflict(
                    name,
                    format!(
                        "volume exists and is not available, state is {}",
                        existing.status
                    ),
                ));
            }
            Some(existing) => {
                debug!(
                    volume = name,
                    volume_id = %existing.id,
                    status = %existing.status,
                    "reusing existing volume"
                );
            }
        }

        let path = self.context.mount_path(name);
        self.host
            .create_tracking_dir(&path)
            .map_err(|source| LifecycleError::LocalIo { path, source })
    }

    /// Deletes the remote volume and its tracking directory.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] for an unknown name,
    /// [`LifecycleError::Conflict`] while the volume is attached or
    /// attaching, [`LifecycleError::Remote`] when deletion fails, and
    /// [`LifecycleError::LocalIo`] when the directory cannot be removed.
    pub async fn remove(&self, name: &str) -> LifecycleResult<(), G> {
        let _exclusive = self.exclusive.lock().await;
        info!(volume = name, "remove requested");

        let volume = self.require(name).await?;
        if volume.status.is_attached_or_attaching() {
            return Err(LifecycleError::conflict(
                name,
                format!("cannot delete volume while in {} state", volume.status),
            ));
        }

        self.gateway
            .delete_volume(&volume.id)
            .await
            .map_err(LifecycleError::remote("delete"))?;
        info!(volume = name, volume_id = %volume.id, "deleted remote volume");

        let path = self.context.mount_path(name);
        self.host
            .remove_tracking_dir(&path)
            .map_err(|source| LifecycleError::LocalIo { path, source })
    }

    /// Attaches, formats when blank, and mounts the volume; returns the
    /// mount path.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`], [`LifecycleError::Conflict`]
    /// for a volume that is neither available nor attached here,
    /// [`LifecycleError::Remote`], [`LifecycleError::Timeout`] when the
    /// device never appears, [`LifecycleError::Format`], or
    /// [`LifecycleError::Mount`].
    pub async fn mount(&self, name: &str) -> LifecycleResult<Utf8PathBuf, G> {
        let _exclusive = self.exclusive.lock().await;
        info!(volume = name, "mount requested");

        let mut volume = self.require(name).await?;
        if volume.status == VolumeStatus::Creating {
            debug!(
                volume = name,
                delay = ?self.settings.creating_recheck_delay,
                "volume still creating; re-checking once"
            );
            tokio::time::sleep(self.settings.creating_recheck_delay).await;
            volume = self.require(name).await?;
        }

        let attached_to_self = volume.is_attached_to(&self.context.instance_id);
        if volume.status.is_attached_or_attaching() && attached_to_self {
            debug!(volume = name, status = %volume.status, "already attached to this instance");
        } else if volume.status != VolumeStatus::Available {
            return Err(LifecycleError::conflict(
                name,
                format!(
                    "invalid status for mount, must be available but is {}",
                    volume.status
                ),
            ));
        } else {
            self.gateway
                .attach_volume(&volume.id, &self.context.instance_id)
                .await
                .map_err(LifecycleError::remote("attach"))?;
            info!(
                volume = name,
                volume_id = %volume.id,
                instance_id = %self.context.instance_id,
                "attached volume"
            );
        }

        let pattern = self.context.device_pattern(&volume.id);
        let device = self
            .host
            .wait_for_device(&pattern, self.settings.device_attempts)
            .await
            .ok_or_else(|| LifecycleError::Timeout {
                name: name.to_owned(),
                pattern: pattern.to_string(),
                attempts: self.settings.device_attempts,
            })?;
        debug!(volume = name, %device, "device present");

        if self.host.probe_filesystem(&device).is_none() {
            info!(
                volume = name,
                %device,
                fs_type = %self.context.filesystem,
                "formatting blank device"
            );
            self.host
                .format_filesystem(&device, self.context.filesystem)
                .map_err(|source| LifecycleError::Format {
                    device: device.clone(),
                    source,
                })?;
        }

        let mount_path = self.context.mount_path(name);
        if attached_to_self
            && self
                .host
                .is_mounted(&mount_path)
                .map_err(LifecycleError::mount("inspect", name))?
        {
            debug!(volume = name, %mount_path, "already mounted");
            return Ok(mount_path);
        }

        self.host
            .mount(&device, &mount_path)
            .map_err(LifecycleError::mount("mount", name))?;
        info!(volume = name, %device, %mount_path, "mounted volume");
        Ok(mount_path)
    }

    /// Unmounts the volume and detaches it from this instance. A volume
    /// that is not mounted is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`], [`LifecycleError::Mount`] when
    /// `umount` fails for another reason, or [`LifecycleError::Remote`] when
    /// the detach fails.
    pub async fn unmount(&self, name: &str) -> LifecycleResult<(), G> {
        let _exclusive = self.exclusive.lock().await;
        info!(volume = name, "unmount requested");

        let volume = self.require(name).await?;
        let mount_path = self.context.mount_path(name);
        let outcome = self
            .host
            .unmount(&mount_path)
            .map_err(LifecycleError::mount("unmount", name))?;
        if outcome == UnmountOutcome::NotMounted {
            warn!(volume = name, %mount_path, "unmount requested but volume is not mounted");
            return Ok(());
        }

        self.gateway
            .detach_volume(&volume.id, &self.context.instance_id)
            .await
            .map_err(LifecycleError::remote("detach"))?;
        info!(volume = name, volume_id = %volume.id, "detached volume");
        Ok(())
    }

    /// Describes one volume.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] or [`LifecycleError::Remote`].
    pub async fn get(&self, name: &str) -> LifecycleResult<VolumeInfo, G> {
        debug!(volume = name, "get requested");
        let volume = self.require(name).await?;
        Ok(self.describe(volume))
    }

    /// Describes every volume in the project.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Remote`] when the listing fails.
    pub async fn list(&self) -> LifecycleResult<Vec<VolumeInfo>, G> {
        debug!("list requested");
        let volumes = self
            .gateway
            .list_volumes()
            .await
            .map_err(LifecycleError::remote("list"))?;
        Ok(volumes
            .into_iter()
            .map(|volume| self.describe(volume))
            .collect())
    }

    /// Returns the local path for `name`, whether or not it exists.
    #[must_use]
    pub fn path(&self, name: &str) -> Utf8PathBuf {
        self.context.mount_path(name)
    }

    /// Reports the plugin capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: Scope::Global,
        }
    }

    async fn lookup(&self, name: &str) -> LifecycleResult<Option<Volume>, G> {
        self.gateway
            .volume_by_name(name)
            .await
            .map_err(LifecycleError::remote("lookup"))
    }

    async fn require(&self, name: &str) -> LifecycleResult<Volume, G> {
        self.lookup(name)
            .await?
            .ok_or_else(|| LifecycleError::NotFound {
                name: name.to_owned(),
            })
    }

    fn describe(&self, volume: Volume) -> VolumeInfo {
        VolumeInfo {
            mountpoint: self.context.mount_path(&volume.name),
            name: volume.name,
            status: volume.status,
        }
    }
}
