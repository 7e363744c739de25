use std::io::{self, IoSliceMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use common::{Family, Group, Interface, TransportError};
use nix::errno::Errno;
use nix::sys::socket::{ControlMessageOwned, MsgFlags, SockaddrStorage, recvmsg};
use socket2::{Domain, InterfaceIndexOrAddress, Protocol, SockAddr, Socket, Type};
use tracing::info;

// Linux option numbers, not exported by every libc release.
#[cfg(target_os = "linux")]
const IP_MULTICAST_ALL: libc::c_int = 49;
#[cfg(target_os = "linux")]
const IPV6_MULTICAST_ALL: libc::c_int = 29;
#[cfg(target_os = "linux")]
const MCAST_JOIN_SOURCE_GROUP: libc::c_int = 46;

/// One datagram pulled off a group socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub len: usize,
    /// Destination address from the IP header, `None` when the kernel
    /// attached no packet info.
    pub destination: Option<IpAddr>,
}

/// A UDP socket bound to a group's port and joined to the group.
#[derive(Debug)]
pub struct MulticastSocket {
    socket: Socket,
}

impl MulticastSocket {
    /// Opens, binds and joins. Source specific groups use an SSM join,
    /// the rest a plain any-source join.
    pub fn join(group: &Group, iface: &Interface) -> Result<Self, TransportError> {
        let family = group.family();
        let domain = match family {
            Family::V4 => Domain::IPV4,
            Family::V6 => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|source| TransportError::Socket { family, source })?;

        configure(&socket, family).map_err(|source| TransportError::Socket { family, source })?;

        let unspecified = match family {
            Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let addr = SocketAddr::new(unspecified, group.port);
        socket
            .bind(&addr.into())
            .map_err(|source| TransportError::from_bind(addr, source))?;

        let joined = match group.source {
            Some(source) => join_source_group(&socket, source, group.group, iface.index),
            None => join_any_source(&socket, group.group, iface.index),
        };
        joined.map_err(|source| TransportError::Join {
            label: group.label(),
            iface: iface.display_name().to_string(),
            source,
        })?;

        info!(
            "Joined group ({}) on {}, port {}",
            group.label(),
            iface.display_name(),
            group.port
        );

        Ok(MulticastSocket { socket })
    }

    /// Reads one datagram without blocking. `Ok(None)` when nothing is
    /// queued.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<Received>> {
        let mut iov = [IoSliceMut::new(buf)];
        let mut cmsg = nix::cmsg_space!(libc::in_pktinfo, libc::in6_pktinfo);

        let msg = match recvmsg::<SockaddrStorage>(
            self.socket.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg),
            MsgFlags::MSG_DONTWAIT,
        ) {
            Ok(msg) => msg,
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => return Ok(None),
            Err(errno) => return Err(io::Error::from(errno)),
        };

        let mut destination = None;
        for cmsg in msg.cmsgs().map_err(io::Error::from)? {
            match cmsg {
                ControlMessageOwned::Ipv4PacketInfo(info) => {
                    destination = Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(
                        info.ipi_addr.s_addr,
                    ))));
                }
                ControlMessageOwned::Ipv6PacketInfo(info) => {
                    destination = Some(IpAddr::V6(Ipv6Addr::from(info.ipi6_addr.s6_addr)));
                }
                _ => {}
            }
        }

        Ok(Some(Received {
            len: msg.bytes,
            destination,
        }))
    }
}

impl AsFd for MulticastSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

fn configure(socket: &Socket, family: Family) -> io::Result<()> {
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;

    let fd = socket.as_raw_fd();
    match family {
        Family::V4 => {
            setsockopt_int(fd, libc::IPPROTO_IP, libc::IP_PKTINFO, 1)?;
        }
        Family::V6 => {
            socket.set_only_v6(true)?;
            setsockopt_int(fd, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO, 1)?;
        }
    }
    own_groups_only(fd, family);
    Ok(())
}

/// Only deliver groups joined on this socket, not every group joined on
/// the host for the same port. The wrong destination check covers for
/// kernels without the option.
#[cfg(target_os = "linux")]
fn own_groups_only(fd: RawFd, family: Family) {
    let (level, name) = match family {
        Family::V4 => (libc::IPPROTO_IP, IP_MULTICAST_ALL),
        // Missing before Linux 4.20.
        Family::V6 => (libc::IPPROTO_IPV6, IPV6_MULTICAST_ALL),
    };
    if let Err(err) = setsockopt_int(fd, level, name, 0) {
        tracing::debug!("{} MULTICAST_ALL not supported: {}", family, err);
    }
}

#[cfg(not(target_os = "linux"))]
fn own_groups_only(_: RawFd, _: Family) {}

fn join_any_source(socket: &Socket, group: IpAddr, ifindex: u32) -> io::Result<()> {
    match group {
        IpAddr::V4(group) => {
            socket.join_multicast_v4_n(&group, &InterfaceIndexOrAddress::Index(ifindex))
        }
        IpAddr::V6(group) => socket.join_multicast_v6(&group, ifindex),
    }
}

#[cfg(target_os = "linux")]
#[repr(C)]
struct GroupSourceReq {
    gsr_interface: u32,
    gsr_group: libc::sockaddr_storage,
    gsr_source: libc::sockaddr_storage,
}

#[cfg(target_os = "linux")]
fn join_source_group(socket: &Socket, source: IpAddr, group: IpAddr, ifindex: u32) -> io::Result<()> {
    let level = match group {
        IpAddr::V4(_) => libc::IPPROTO_IP,
        IpAddr::V6(_) => libc::IPPROTO_IPV6,
    };
    let req = GroupSourceReq {
        gsr_interface: ifindex,
        gsr_group: to_storage(group),
        gsr_source: to_storage(source),
    };

    // SAFETY:
    // - the fd is owned by `socket` and open for the duration of the call
    // - req is a fully initialized group_source_req laid out as the kernel expects
    // - the option length is the size of that struct
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            MCAST_JOIN_SOURCE_GROUP,
            &req as *const GroupSourceReq as *const libc::c_void,
            std::mem::size_of::<GroupSourceReq>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
fn join_source_group(_: &Socket, _: IpAddr, _: IpAddr, _: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "source specific multicast is only supported on Linux",
    ))
}

#[cfg(target_os = "linux")]
fn to_storage(ip: IpAddr) -> libc::sockaddr_storage {
    let addr = SockAddr::from(SocketAddr::new(ip, 0));
    // SAFETY: an all zero sockaddr_storage is a valid, empty address.
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = (addr.len() as usize).min(std::mem::size_of::<libc::sockaddr_storage>());
    // SAFETY:
    // - addr.as_ptr() points at `addr.len()` initialized bytes
    // - storage is large enough for any socket address and does not overlap addr
    unsafe {
        std::ptr::copy_nonoverlapping(
            addr.as_ptr() as *const u8,
            &mut storage as *mut libc::sockaddr_storage as *mut u8,
            len,
        );
    }
    storage
}

fn setsockopt_int(fd: RawFd, level: libc::c_int, name: libc::c_int, val: libc::c_int) -> io::Result<()> {
    // SAFETY:
    // - fd is a valid socket owned by the caller
    // - val is an initialized c_int on the stack and the length matches it
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &val as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
