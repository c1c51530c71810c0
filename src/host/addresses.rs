//! Local interface address discovery.

use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};

use nix::ifaddrs::getifaddrs;

use super::HostError;

/// Lists the IPv4 and IPv6 addresses assigned to local interfaces.
///
/// # Errors
///
/// Returns [`HostError::Io`] when the interface list cannot be read.
pub fn local_addresses() -> Result<Vec<IpAddr>, HostError> {
    let interfaces = getifaddrs().map_err(|errno| HostError::Io {
        path: "getifaddrs".into(),
        message: errno.desc().to_owned(),
    })?;

    let mut addresses = Vec::new();
    for interface in interfaces {
        let Some(address) = interface.address else {
            continue;
        };
        if let Some(v4) = address.as_sockaddr_in() {
            addresses.push(IpAddr::V4(*SocketAddrV4::from(*v4).ip()));
        } else if let Some(v6) = address.as_sockaddr_in6() {
            addresses.push(IpAddr::V6(*SocketAddrV6::from(*v6).ip()));
        }
    }
    addresses.dedup();
    Ok(addresses)
}
