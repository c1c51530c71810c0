//! Core library for the `ovhvol` Docker volume plugin.
//!
//! Docker asks the plugin to create, mount, unmount, and remove named
//! volumes. The crate maps those requests onto OVH Public Cloud block
//! storage: volumes are created and attached through the OVH API, then the
//! attached device is formatted on first use and mounted under a local root.
//!
//! The lifecycle logic in [`lifecycle`] is generic over a [`VolumeGateway`]
//! (remote API) and a [`HostOps`] implementation (local devices and mounts),
//! so it can be exercised without a cloud account or root privileges.

pub mod config;
pub mod host;
pub mod identity;
pub mod lifecycle;
pub mod ovh;
pub mod plugin;
pub mod telemetry;
pub mod test_support;
pub mod volume;

pub use config::{ConfigError, PluginConfig};
pub use host::{HostError, HostOps, LocalHost};
pub use identity::{IdentityError, resolve_instance_id};
pub use lifecycle::{LifecycleContext, LifecycleError, LifecycleOrchestrator, LifecycleSettings};
pub use ovh::{OvhCredentials, OvhGateway, OvhGatewayError};
pub use plugin::{PluginError, SocketSettings, router, serve};
pub use volume::{CreateOptions, Volume, VolumeGateway, VolumeSpec, VolumeStatus};
