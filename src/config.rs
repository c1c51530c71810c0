//! Configuration loading via `ortho-config`.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::host::{DEFAULT_DEVICE_ATTEMPTS, FsType};
use crate::lifecycle::{DEFAULT_CREATING_RECHECK, LifecycleContext, LifecycleSettings};
use crate::ovh::{OvhCredentials, endpoint_aliases, resolve_endpoint};
use crate::plugin::{DEFAULT_SOCKET_PATH, SocketSettings};
use crate::volume::VolumeDefaults;

/// Smallest volume size, in GiB, the provider accepts.
pub const MIN_VOLUME_SIZE_GB: u32 = 10;

/// Default directory holding one tracking directory per volume.
pub const DEFAULT_MOUNT_ROOT: &str = "/var/lib/ovh-volume-plugin/mount";

/// Plugin settings merged from defaults, `ovhvol.toml`, and `OVH_*`
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "OVH",
    discovery(
        app_name = "ovhvol",
        env_var = "OVHVOL_CONFIG_PATH",
        config_file_name = "ovhvol.toml",
        dotfile_name = ".ovhvol.toml",
        project_file_name = "ovhvol.toml"
    )
)]
pub struct PluginConfig {
    /// Application key issued by OVH.
    pub application_key: String,
    /// Application secret used to sign requests.
    pub application_secret: String,
    /// Consumer key authorising the application on the account.
    pub consumer_key: String,
    /// API endpoint alias (`ovh-eu`, `ovh-ca`, `ovh-us`) or base URL.
    #[ortho_config(default = "ovh-eu".to_owned())]
    pub endpoint: String,
    /// Public Cloud project holding the volumes.
    pub project_id: String,
    /// Instance id of this host. Discovered from local addresses when unset.
    pub server_id: Option<String>,
    /// Region new volumes are created in.
    pub default_region: String,
    /// Size of new volumes in GiB.
    #[ortho_config(default = 10)]
    pub default_volume_size_gb: u32,
    /// Provider type of new volumes.
    #[ortho_config(default = "classic".to_owned())]
    pub default_volume_type: String,
    /// Filesystem created on blank devices (`ext4` or `xfs`).
    #[ortho_config(default = "ext4".to_owned())]
    pub default_filesystem: String,
    /// Directory volumes are mounted under.
    #[ortho_config(default = DEFAULT_MOUNT_ROOT.to_owned())]
    pub mount_point: String,
    /// Unix socket Docker talks to.
    #[ortho_config(default = DEFAULT_SOCKET_PATH.to_owned())]
    pub socket_path: String,
    /// Group owning the socket.
    #[ortho_config(default = "root".to_owned())]
    pub socket_group: String,
    /// Directory where attached block devices appear.
    #[ortho_config(default = "/dev/disk/by-id".to_owned())]
    pub device_directory: String,
    /// Device name prefix preceding the truncated volume id.
    #[ortho_config(default = "virtio-".to_owned())]
    pub device_prefix: String,
    /// Number of one-second polls for an attached device.
    #[ortho_config(default = DEFAULT_DEVICE_ATTEMPTS)]
    pub device_wait_attempts: u32,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

const REQUIRED_FIELDS: [FieldMetadata; 5] = [
    FieldMetadata::new(
        "OVH application key",
        "OVH_APPLICATION_KEY",
        "application_key",
    ),
    FieldMetadata::new(
        "OVH application secret",
        "OVH_APPLICATION_SECRET",
        "application_secret",
    ),
    FieldMetadata::new("OVH consumer key", "OVH_CONSUMER_KEY", "consumer_key"),
    FieldMetadata::new("Public Cloud project ID", "OVH_PROJECT_ID", "project_id"),
    FieldMetadata::new("default region", "OVH_DEFAULT_REGION", "default_region"),
];

impl PluginConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to ovhvol.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Loads configuration, reading `config_path` instead of the discovered
    /// files when given. Environment variables still override file values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails or `config_path`
    /// cannot be read.
    pub fn load(config_path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let mut args = vec![OsString::from("ovhvol")];
        if let Some(path) = config_path {
            args.push(OsString::from("--config-path"));
            args.push(OsString::from(path.as_str()));
        }
        Self::load_from_iter(args).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply a missing value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] for an unknown endpoint or filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            &self.application_key,
            &self.application_secret,
            &self.consumer_key,
            &self.project_id,
            &self.default_region,
        ];
        for (value, metadata) in required.into_iter().zip(REQUIRED_FIELDS.iter()) {
            Self::require_field(value, metadata)?;
        }
        self.api_endpoint()?;
        self.filesystem()?;
        if self.device_wait_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "device_wait_attempts must be at least 1",
            )));
        }
        Ok(())
    }

    /// Resolves the endpoint alias to an API base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown alias.
    pub fn api_endpoint(&self) -> Result<String, ConfigError> {
        resolve_endpoint(&self.endpoint).map_err(|_| {
            let known = endpoint_aliases().collect::<Vec<_>>().join(", ");
            ConfigError::Invalid(format!(
                "unknown endpoint '{}': use one of {known} or an https:// URL",
                self.endpoint
            ))
        })
    }

    /// Parses the configured filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for anything but `ext4` or `xfs`.
    pub fn filesystem(&self) -> Result<FsType, ConfigError> {
        self.default_filesystem
            .parse()
            .map_err(ConfigError::Invalid)
    }

    /// Returns the default volume size raised to [`MIN_VOLUME_SIZE_GB`].
    #[must_use]
    pub fn effective_volume_size(&self) -> u32 {
        self.default_volume_size_gb.max(MIN_VOLUME_SIZE_GB)
    }

    /// Returns the configured server id when it is non-blank.
    #[must_use]
    pub fn configured_server_id(&self) -> Option<&str> {
        self.server_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// API credentials for the gateway.
    #[must_use]
    pub fn credentials(&self) -> OvhCredentials {
        OvhCredentials {
            application_key: self.application_key.clone(),
            application_secret: self.application_secret.clone(),
            consumer_key: self.consumer_key.clone(),
        }
    }

    /// Defaults applied to new volumes.
    #[must_use]
    pub fn volume_defaults(&self) -> VolumeDefaults {
        VolumeDefaults {
            region: self.default_region.clone(),
            size_gib: self.effective_volume_size(),
            volume_type: self.default_volume_type.clone(),
        }
    }

    /// Builds the lifecycle context for the instance `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the filesystem is unsupported.
    pub fn lifecycle_context(&self, instance_id: &str) -> Result<LifecycleContext, ConfigError> {
        Ok(LifecycleContext {
            mount_root: Utf8PathBuf::from(&self.mount_point),
            instance_id: instance_id.to_owned(),
            defaults: self.volume_defaults(),
            filesystem: self.filesystem()?,
            device_directory: Utf8PathBuf::from(&self.device_directory),
            device_prefix: self.device_prefix.clone(),
        })
    }

    /// Retry bounds for Mount.
    #[must_use]
    pub const fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            creating_recheck_delay: DEFAULT_CREATING_RECHECK,
            device_attempts: self.device_wait_attempts,
        }
    }

    /// Location and ownership of the plugin socket.
    #[must_use]
    pub fn socket_settings(&self) -> SocketSettings {
        SocketSettings {
            path: Utf8PathBuf::from(&self.socket_path),
            group: self.socket_group.clone(),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
