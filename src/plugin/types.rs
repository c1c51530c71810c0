//! Wire types of the Docker volume plugin protocol.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::lifecycle::{Capabilities, VolumeInfo};

/// Body of requests that only carry a volume name.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NameRequest {
    /// Volume name.
    pub name: String,
}

/// Body of `/VolumeDriver.Create`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRequest {
    /// Volume name.
    pub name: String,
    /// Options passed with `docker volume create -o`.
    #[serde(default)]
    pub opts: Option<HashMap<String, String>>,
}

/// Body of `/VolumeDriver.Mount` and `/VolumeDriver.Unmount`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MountRequest {
    /// Volume name.
    pub name: String,
    /// Caller id generated by Docker.
    #[serde(rename = "ID", default)]
    pub id: String,
}

/// Response carrying only an error string.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrResponse {
    /// Error message; empty on success.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub err: String,
}

/// Response of `/VolumeDriver.Mount` and `/VolumeDriver.Path`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountpointResponse {
    /// Host path of the volume.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mountpoint: String,
    /// Error message; empty on success.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub err: String,
}

/// Volume entry in Get and List responses.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeDescriptor {
    /// Volume name.
    pub name: String,
    /// Host path of the volume.
    pub mountpoint: String,
    /// Free-form status shown by `docker volume inspect`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub status: BTreeMap<String, String>,
}

impl From<VolumeInfo> for VolumeDescriptor {
    fn from(info: VolumeInfo) -> Self {
        Self {
            name: info.name,
            mountpoint: info.mountpoint.into_string(),
            status: BTreeMap::from([(String::from("status"), info.status.to_string())]),
        }
    }
}

/// Response of `/VolumeDriver.Get`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    /// The volume, absent on error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeDescriptor>,
    /// Error message; empty on success.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub err: String,
}

/// Response of `/VolumeDriver.List`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    /// Every volume in the project.
    pub volumes: Vec<VolumeDescriptor>,
    /// Error message; empty on success.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub err: String,
}

/// Scope descriptor nested in [`CapabilitiesResponse`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesBody {
    /// `global` or `local`.
    pub scope: String,
}

/// Response of `/VolumeDriver.Capabilities`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    /// Reported capabilities.
    pub capabilities: CapabilitiesBody,
}

impl From<Capabilities> for CapabilitiesResponse {
    fn from(capabilities: Capabilities) -> Self {
        Self {
            capabilities: CapabilitiesBody {
                scope: capabilities.scope.as_str().to_owned(),
            },
        }
    }
}

/// Response of `/Plugin.Activate`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    /// Plugin subsystems implemented.
    pub implements: Vec<String>,
}

impl Default for ActivateResponse {
    fn default() -> Self {
        Self {
            implements: vec![String::from("VolumeDriver")],
        }
    }
}
