use std::io;
use std::net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6};

use nix::ifaddrs::getifaddrs;
use nix::net::if_::{InterfaceFlags, if_nametoindex};
use thiserror::Error;
use tracing::debug;

use crate::Family;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed opening {family} socket: {source}")]
    Socket { family: Family, source: io::Error },

    #[error("failed binding to {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("must be root to use privileged port {0} (< 1024)")]
    PrivilegedPort(u16),

    #[error("invalid interface: {0}")]
    Interface(String),

    #[error("no outbound interface available, use `-i IFNAME`")]
    NoInterface,

    #[error("interface {iface} has no {family} address yet")]
    NoAddress { iface: String, family: Family },

    #[error("failed joining group ({label}) on {iface}: {source}")]
    Join {
        label: String,
        iface: String,
        source: io::Error,
    },
}

impl TransportError {
    /// Binding below port 1024 without root gets its own, clearer error.
    pub fn from_bind(addr: SocketAddr, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied
            && addr.port() < 1024
            && !nix::unistd::geteuid().is_root()
        {
            return TransportError::PrivilegedPort(addr.port());
        }
        TransportError::Bind { addr, source }
    }
}

/// The interface multicast is sent and received on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// `None` lets the kernel pick, which is what index 0 means to it.
    pub name: Option<String>,
    pub index: u32,
}

impl Interface {
    pub fn any() -> Self {
        Interface {
            name: None,
            index: 0,
        }
    }

    /// Resolves `name`, or the default route interface when not given.
    pub fn resolve(name: Option<&str>) -> Result<Self, TransportError> {
        let name = match name {
            Some(name) => name.to_string(),
            None => match default_interface() {
                Some(name) => name,
                None => return Ok(Interface::any()),
            },
        };

        let index =
            if_nametoindex(name.as_str()).map_err(|_| TransportError::Interface(name.clone()))?;
        debug!("Using iface {}, idx {}", name, index);

        Ok(Interface {
            name: Some(name),
            index,
        })
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("*")
    }

    /// First multicast capable address of the given family on this interface.
    pub fn address(&self, family: Family) -> Option<IpAddr> {
        let name = self.name.as_deref()?;
        let addrs = getifaddrs().ok()?;
        for ifa in addrs {
            if ifa.interface_name != name || !ifa.flags.contains(InterfaceFlags::IFF_MULTICAST) {
                continue;
            }
            let Some(storage) = ifa.address else {
                continue;
            };
            let ip = match family {
                Family::V4 => storage
                    .as_sockaddr_in()
                    .map(|sin| IpAddr::V4(*SocketAddrV4::from(*sin).ip())),
                Family::V6 => storage
                    .as_sockaddr_in6()
                    .map(|sin6| IpAddr::V6(*SocketAddrV6::from(*sin6).ip())),
            };
            if ip.is_some() {
                return ip;
            }
        }
        None
    }
}

/// Name of the up, lowest metric default route interface.
pub fn default_interface() -> Option<String> {
    let table = std::fs::read_to_string("/proc/net/route").ok()?;
    parse_default_route(&table)
}

/// Parses the `/proc/net/route` table format.
pub fn parse_default_route(table: &str) -> Option<String> {
    const RTF_UP: u32 = 0x1;

    let mut best: Option<(u32, &str)> = None;
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }
        let (Ok(dest), Ok(flags), Ok(metric), Ok(mask)) = (
            u32::from_str_radix(fields[1], 16),
            u32::from_str_radix(fields[3], 16),
            fields[6].parse::<u32>(),
            u32::from_str_radix(fields[7], 16),
        ) else {
            continue;
        };
        if flags & RTF_UP == 0 || dest != 0 || mask != 0 {
            continue;
        }
        if best.is_none_or(|(m, _)| metric < m) {
            best = Some((metric, fields[0]));
        }
    }

    best.map(|(_, name)| name.to_string())
}
