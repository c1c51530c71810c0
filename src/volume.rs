//! Remote volume model and the gateway abstraction over the provider API.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Description attached to volumes created by the plugin.
pub const DEFAULT_DESCRIPTION: &str = "Docker volume.";

/// Provider-reported volume status.
///
/// Only the listed constants drive lifecycle decisions; anything else is
/// preserved verbatim in [`VolumeStatus::Other`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(from = "String", into = "String")]
pub enum VolumeStatus {
    /// The provider is still creating the volume.
    Creating,
    /// The volume exists and is not attached.
    Available,
    /// An attach request is in progress.
    Attaching,
    /// The volume is attached to an instance.
    InUse,
    /// The provider reports a failure.
    Error,
    /// Any other provider status.
    Other(String),
}

impl VolumeStatus {
    /// Provider spelling of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "creating",
            Self::Available => "available",
            Self::Attaching => "attaching",
            Self::InUse => "in-use",
            Self::Error => "error",
            Self::Other(value) => value.as_str(),
        }
    }

    /// Returns `true` for `attaching` and `in-use`.
    #[must_use]
    pub const fn is_attached_or_attaching(&self) -> bool {
        matches!(self, Self::Attaching | Self::InUse)
    }
}

impl From<&str> for VolumeStatus {
    fn from(value: &str) -> Self {
        match value {
            "creating" => Self::Creating,
            "available" => Self::Available,
            "attaching" => Self::Attaching,
            "in-use" => Self::InUse,
            "error" => Self::Error,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for VolumeStatus {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<VolumeStatus> for String {
    fn from(value: VolumeStatus) -> Self {
        match value {
            VolumeStatus::Other(other) => other,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A block-storage volume as reported by the provider.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Provider-assigned identifier.
    pub id: String,
    /// Caller-chosen label, unique per project by convention. Empty for
    /// volumes created without one.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Free-form description.
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    /// Instances the volume is attached to.
    #[serde(default, deserialize_with = "null_as_default")]
    pub attached_to: Vec<String>,
    /// Current provider status.
    pub status: VolumeStatus,
    /// Size in GiB.
    #[serde(default)]
    pub size: u32,
    /// Provider volume type (for example `classic`).
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub volume_type: String,
    /// Region the volume lives in.
    #[serde(default, deserialize_with = "null_as_default")]
    pub region: String,
}

impl Volume {
    /// Returns `true` when `instance_id` appears in the attachment list.
    #[must_use]
    pub fn is_attached_to(&self, instance_id: &str) -> bool {
        self.attached_to.iter().any(|id| id == instance_id)
    }
}

/// Body of a volume creation request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Target region.
    pub region: String,
    /// Size in GiB.
    pub size: u32,
    /// Provider volume type.
    #[serde(rename = "type")]
    pub volume_type: String,
    /// Volume name.
    pub name: String,
    /// Volume description.
    pub description: String,
    /// Optional image to initialise the volume from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    /// Optional snapshot to initialise the volume from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

/// Defaults used to build a [`VolumeSpec`] before caller overrides.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeDefaults {
    /// Region for new volumes.
    pub region: String,
    /// Size in GiB for new volumes.
    pub size_gib: u32,
    /// Provider volume type for new volumes.
    pub volume_type: String,
}

impl VolumeDefaults {
    /// Builds a creation spec for `name`, applying `options` on top of the
    /// defaults.
    #[must_use]
    pub fn spec_for(&self, name: &str, options: &CreateOptions) -> VolumeSpec {
        VolumeSpec {
            region: self.region.clone(),
            size: options.size_gib().unwrap_or(self.size_gib),
            volume_type: options
                .volume_type()
                .map_or_else(|| self.volume_type.clone(), str::to_owned),
            name: name.to_owned(),
            description: DEFAULT_DESCRIPTION.to_owned(),
            image_id: None,
            snapshot_id: None,
        }
    }
}

/// Caller-supplied creation options.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateOptions(HashMap<String, String>);

impl CreateOptions {
    /// Size override in GiB. Unparseable values are ignored.
    #[must_use]
    pub fn size_gib(&self) -> Option<u32> {
        let raw = self.0.get("size")?;
        match raw.trim().parse::<u32>() {
            Ok(size) => Some(size),
            Err(err) => {
                debug!(value = %raw, error = %err, "ignoring unparseable size option");
                None
            }
        }
    }

    /// Volume type override. Empty values are ignored.
    #[must_use]
    pub fn volume_type(&self) -> Option<&str> {
        self.0
            .get("type")
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Iterates over every option, including ones the plugin ignores.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl From<HashMap<String, String>> for CreateOptions {
    fn from(value: HashMap<String, String>) -> Self {
        Self(value)
    }
}

impl<K, V> FromIterator<(K, V)> for CreateOptions
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// An address assigned to a provider instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIp {
    /// Address in textual form.
    pub ip: String,
    /// Address kind (`public` or `private`).
    #[serde(rename = "type", default)]
    pub ip_type: String,
    /// IP version (4 or 6).
    #[serde(default)]
    pub version: u8,
}

/// A compute instance as reported by the provider.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Provider-assigned identifier.
    pub id: String,
    /// Instance name.
    #[serde(default)]
    pub name: String,
    /// Provider status.
    #[serde(default)]
    pub status: String,
    /// Region hosting the instance.
    #[serde(default)]
    pub region: String,
    /// Addresses assigned to the instance.
    #[serde(default, deserialize_with = "null_as_default")]
    pub ip_addresses: Vec<InstanceIp>,
}

impl Instance {
    /// Returns `true` when any of the instance's addresses is in `ips`.
    #[must_use]
    pub fn has_any_address(&self, ips: &[IpAddr]) -> bool {
        self.ip_addresses.iter().any(|address| {
            address
                .ip
                .parse::<IpAddr>()
                .is_ok_and(|parsed| ips.contains(&parsed))
        })
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Future returned by gateway operations.
pub type GatewayFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Remote volume operations for a single provider project.
pub trait VolumeGateway {
    /// Provider specific error type returned by the gateway.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists every volume in the project.
    fn list_volumes(&self) -> GatewayFuture<'_, Vec<Volume>, Self::Error>;

    /// Creates a volume.
    fn create_volume<'a>(&'a self, spec: &'a VolumeSpec) -> GatewayFuture<'a, Volume, Self::Error>;

    /// Deletes the volume with `volume_id`.
    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> GatewayFuture<'a, (), Self::Error>;

    /// Attaches the volume to `instance_id` and returns the provider's view
    /// of the volume afterwards.
    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, Volume, Self::Error>;

    /// Detaches the volume from `instance_id` and returns the provider's view
    /// of the volume afterwards.
    fn detach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, Volume, Self::Error>;

    /// Lists every instance in the project.
    fn list_instances(&self) -> GatewayFuture<'_, Vec<Instance>, Self::Error>;

    /// Looks a volume up by name with a linear scan over
    /// [`VolumeGateway::list_volumes`]; the provider has no name filter.
    ///
    /// `Ok(None)` means no volume carries that name.
    fn volume_by_name<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, Option<Volume>, Self::Error>
    where
        Self: Sync,
    {
        Box::pin(async move {
            let volumes = self.list_volumes().await?;
            Ok(volumes.into_iter().find(|volume| volume.name == name))
        })
    }

    /// Finds the first instance owning any address in `ips`.
    ///
    /// `Ok(None)` means no instance matched.
    fn instance_by_ips<'a>(
        &'a self,
        ips: &'a [IpAddr],
    ) -> GatewayFuture<'a, Option<Instance>, Self::Error>
    where
        Self: Sync,
    {
        Box::pin(async move {
            let instances = self.list_instances().await?;
            Ok(instances
                .into_iter()
                .find(|instance| instance.has_any_address(ips)))
        })
    }
}
