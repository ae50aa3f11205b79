//! Host address lookup
//!
//! Every event carries the IPv4 and hardware address of the machine the agent
//! runs on. Lookup goes through [`NetworkInfoProvider`] so parsing can be
//! tested without touching real interfaces.

use crate::error::{Error, Result};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::Ipv4Addr;

/// Interface name fragments that mark hypervisor adapters.
const VIRTUAL_MARKERS: [&str; 3] = ["virtual", "vmware", "hyper-v"];

/// IPv4 and hardware address pair reported on events.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostAddress {
    pub ip: String,
    pub mac: String,
}

/// Source of the host address pair.
pub trait NetworkInfoProvider: Send + Sync {
    /// Returns the first usable address, or an error when none qualifies.
    fn host_address(&self) -> Result<HostAddress>;
}

/// Minimal view of a network interface used for selection.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub mac: Option<String>,
    pub ipv4: Vec<Ipv4Addr>,
}

/// Pick the first non-loopback IPv4 address on a non-virtual interface that
/// has a hardware address.
pub fn select_address(interfaces: &[InterfaceInfo]) -> Option<HostAddress> {
    interfaces
        .iter()
        .filter(|iface| !is_virtual(&iface.name))
        .find_map(|iface| {
            let mac = iface.mac.as_deref().filter(|m| !m.is_empty())?;
            let ip = iface.ipv4.iter().find(|ip| !ip.is_loopback())?;
            Some(HostAddress {
                ip: ip.to_string(),
                mac: mac.to_string(),
            })
        })
}

fn is_virtual(name: &str) -> bool {
    let name = name.to_lowercase();
    VIRTUAL_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Reads interfaces from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemNetworkInfo;

impl NetworkInfoProvider for SystemNetworkInfo {
    fn host_address(&self) -> Result<HostAddress> {
        let interfaces = NetworkInterface::show()
            .map_err(|e| Error::Network(format!("failed to list interfaces: {}", e)))?;

        let infos: Vec<InterfaceInfo> = interfaces
            .into_iter()
            .map(|iface| InterfaceInfo {
                ipv4: iface
                    .addr
                    .iter()
                    .filter_map(|addr| match addr {
                        Addr::V4(v4) => Some(v4.ip),
                        Addr::V6(_) => None,
                    })
                    .collect(),
                mac: iface.mac_addr,
                name: iface.name,
            })
            .collect();

        select_address(&infos)
            .ok_or_else(|| Error::Network("no suitable network interface found".to_string()))
    }
}

/// Always reports the same address. Useful in tests and on hosts where the
/// address is pinned by configuration.
#[derive(Debug, Clone, Default)]
pub struct FixedNetworkInfo(pub HostAddress);

impl NetworkInfoProvider for FixedNetworkInfo {
    fn host_address(&self) -> Result<HostAddress> {
        Ok(self.0.clone())
    }
}
