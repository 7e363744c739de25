use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};

use common::{Family, Interface, TransportError};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info};

use crate::engine::Emit;

/// Send sockets, at most one per address family.
#[derive(Debug, Default)]
pub struct MulticastEmitter {
    v4: Option<Socket>,
    v6: Option<Socket>,
}

impl MulticastEmitter {
    /// Opens a socket for each family in `families`. A family that cannot
    /// be set up is left out, its groups get skipped. Fails only when no
    /// family at all could be opened.
    pub fn open(families: &[Family], iface: &Interface, ttl: u32) -> Result<Self, TransportError> {
        let mut emitter = MulticastEmitter::default();
        let mut last_err = None;

        for &family in families {
            match open_socket(family, iface, ttl) {
                Ok(socket) => match family {
                    Family::V4 => emitter.v4 = Some(socket),
                    Family::V6 => emitter.v6 = Some(socket),
                },
                Err(err) => {
                    debug!("No {} send socket: {}", family, err);
                    last_err = Some(err);
                }
            }
        }

        match (&emitter.v4, &emitter.v6, last_err) {
            (None, None, Some(err)) => Err(err),
            (None, None, None) => Err(TransportError::NoInterface),
            _ => Ok(emitter),
        }
    }
}

impl Emit for MulticastEmitter {
    fn supports(&self, family: Family) -> bool {
        match family {
            Family::V4 => self.v4.is_some(),
            Family::V6 => self.v6.is_some(),
        }
    }

    fn send_to(&mut self, payload: &[u8], destination: SocketAddr) -> io::Result<usize> {
        let socket = match destination {
            SocketAddr::V4(_) => self.v4.as_ref(),
            SocketAddr::V6(_) => self.v6.as_ref(),
        };
        match socket {
            Some(socket) => socket.send_to(payload, &SockAddr::from(destination)),
            None => Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no socket for this address family",
            )),
        }
    }
}

fn open_socket(family: Family, iface: &Interface, ttl: u32) -> Result<Socket, TransportError> {
    let (domain, unspecified) = match family {
        Family::V4 => (Domain::IPV4, IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        Family::V6 => (Domain::IPV6, IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|source| TransportError::Socket { family, source })?;

    let local = match (&iface.name, iface.address(family)) {
        (_, Some(addr)) => addr,
        (Some(name), None) => {
            return Err(TransportError::NoAddress {
                iface: name.clone(),
                family,
            });
        }
        (None, None) => unspecified,
    };

    let setup = match local {
        IpAddr::V4(addr) => socket
            .set_multicast_ttl_v4(ttl)
            .and_then(|_| socket.set_multicast_loop_v4(true))
            .and_then(|_| match addr.is_unspecified() {
                true => Ok(()),
                false => socket.set_multicast_if_v4(&addr),
            }),
        IpAddr::V6(_) => socket
            .set_only_v6(true)
            .and_then(|_| socket.set_multicast_hops_v6(ttl))
            .and_then(|_| socket.set_multicast_loop_v6(true))
            .and_then(|_| socket.set_multicast_if_v6(iface.index)),
    };
    setup.map_err(|source| TransportError::Socket { family, source })?;

    let addr = match local {
        // Link-local addresses only bind with their scope.
        IpAddr::V6(ip) if ip.is_unicast_link_local() => {
            SocketAddr::V6(SocketAddrV6::new(ip, 0, 0, iface.index))
        }
        ip => SocketAddr::new(ip, 0),
    };
    socket
        .bind(&addr.into())
        .map_err(|source| TransportError::from_bind(addr, source))?;

    info!("Sending {} multicast from {} on {}", family, local, iface.display_name());
    Ok(socket)
}
