//! Self-identification of the local compute instance.

use std::net::IpAddr;

use thiserror::Error;
use tracing::{debug, info};

use crate::volume::VolumeGateway;

/// Errors raised while resolving the local instance id.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Raised when the instance list cannot be fetched.
    #[error("failed to list instances: {message}")]
    Remote {
        /// Gateway error message.
        message: String,
    },
    /// Raised when no instance owns any of the local addresses.
    #[error(
        "could not identify this host: no instance owns any of [{addresses}]; set server_id explicitly"
    )]
    NoMatch {
        /// Local addresses that were tried, comma separated.
        addresses: String,
    },
}

/// Returns `configured` when set, otherwise the id of the first instance
/// that owns one of `local_ips`.
///
/// # Errors
///
/// Returns [`IdentityError::Remote`] when the instance list cannot be
/// fetched and [`IdentityError::NoMatch`] when no instance matches.
pub async fn resolve_instance_id<G>(
    gateway: &G,
    configured: Option<&str>,
    local_ips: &[IpAddr],
) -> Result<String, IdentityError>
where
    G: VolumeGateway + Sync,
{
    if let Some(id) = configured.map(str::trim).filter(|id| !id.is_empty()) {
        debug!(instance_id = id, "using configured instance id");
        return Ok(id.to_owned());
    }

    let instance = gateway
        .instance_by_ips(local_ips)
        .await
        .map_err(|err| IdentityError::Remote {
            message: err.to_string(),
        })?;

    match instance {
        Some(found) => {
            info!(instance_id = %found.id, name = %found.name, "identified local instance");
            Ok(found.id)
        }
        None => Err(IdentityError::NoMatch {
            addresses: local_ips
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}
