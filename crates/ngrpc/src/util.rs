//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Address helpers

use crate::error::{NgrpcError, NgrpcResult};
use std::net::{IpAddr, Ipv4Addr};

/// First non-loopback IPv4 address of `interface`, or of any interface when
/// `None`
pub fn local_ipv4(interface: Option<&str>) -> NgrpcResult<Ipv4Addr> {
    let interfaces = if_addrs::get_if_addrs()?;
    interfaces
        .into_iter()
        .filter(|iface| interface.map_or(true, |name| iface.name == name))
        .find_map(|iface| match iface.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() => Some(ip),
            _ => None,
        })
        .ok_or_else(|| NgrpcError::Internal("not found local ip".to_string()))
}

/// Port of a `host:port` address
pub fn port_of(address: &str) -> Option<u16> {
    let (_, port) = address.rsplit_once(':')?;
    port.parse().ok()
}

/// Turn a bare `:port` listen address into `0.0.0.0:port`
pub fn normalize_listen_address(address: &str) -> String {
    let address = address.trim();
    if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_of() {
        assert_eq!(port_of("10.0.0.5:5000"), Some(5000));
        assert_eq!(port_of(":8080"), Some(8080));
        assert_eq!(port_of("[::1]:9000"), Some(9000));
        assert_eq!(port_of("localhost"), None);
        assert_eq!(port_of("host:http"), None);
    }

    #[test]
    fn test_normalize_listen_address() {
        assert_eq!(normalize_listen_address(":5000"), "0.0.0.0:5000");
        assert_eq!(normalize_listen_address("127.0.0.1:5000"), "127.0.0.1:5000");
        assert_eq!(normalize_listen_address(" :1 "), "0.0.0.0:1");
    }

    #[test]
    fn test_unknown_interface_has_no_address() {
        let err = local_ipv4(Some("definitely-not-an-interface0")).unwrap_err();
        assert_eq!(err.to_string(), "Internal error: not found local ip");
    }
}
