/*!
 * IP Backend
 * TCP and UDP over IPv4 and IPv6; the transport object is created with the
 * socket
 */

use super::addr;
use super::handle::{SockGuard, SockHandle};
use super::msg::AddrBuf;
use super::ops::{clamp_backlog, io_transport, report_addr, SockOps};
use super::sockopt::{
    get_socket_option, push_options, read_int, set_socket_option, unknown_option, write_int,
};
use super::types::{AddressFamily, ConnState, SockType};
use crate::core::errors::{SockError, SockResult};
use crate::substrate::{DeleteMode, PalError, PalSocketAddr, StreamOptions};
use nix::errno::Errno;
use nix::libc;
use std::io::{IoSlice, IoSliceMut};
use tracing::{debug, trace};

pub(crate) struct IpOps;

impl IpOps {
    fn not_stream(op: &str) -> SockError {
        SockError::posix(Errno::EOPNOTSUPP, format!("{} on a datagram socket", op))
    }

    fn decode_peer(family: AddressFamily, raw: &[u8]) -> SockResult<PalSocketAddr> {
        match addr::decode(family, raw)? {
            PalSocketAddr::Unspec => Err(SockError::posix(Errno::EAFNOSUPPORT, "AF_UNSPEC")),
            peer => Ok(peer),
        }
    }
}

impl SockOps for IpOps {
    fn create(&self, sock: &mut SockHandle) -> SockResult<()> {
        let protocol = match (sock.sock_type(), sock.protocol()) {
            (SockType::Stream, 0 | libc::IPPROTO_TCP) => libc::IPPROTO_TCP,
            (SockType::Datagram, 0 | libc::IPPROTO_UDP) => libc::IPPROTO_UDP,
            (_, other) => {
                return Err(SockError::posix(
                    Errno::EPROTONOSUPPORT,
                    format!("protocol {}", other),
                ))
            }
        };
        sock.set_protocol(protocol);

        let handle = sock.substrate().socket_create(
            sock.family().pal_domain(),
            sock.sock_type().pal_kind(),
            StreamOptions::nonblocking(sock.cached_nonblocking()),
        )?;
        match handle.attributes_query() {
            Ok(attr) => sock.state_mut().options = attr.socket,
            Err(err) => {
                handle.release();
                return Err(err.into());
            }
        }
        sock.set_transport(handle);
        Ok(())
    }

    fn bind(&self, guard: &mut SockGuard<'_>, raw: &[u8]) -> SockResult<()> {
        if guard.conn != ConnState::New {
            return Err(SockError::invalid("socket already bound"));
        }
        let mut local = Self::decode_peer(guard.sock().family(), raw)?;
        let transport = io_transport(guard.sock())?;
        transport.bind(&mut local)?;

        debug!(addr = %local, "ip socket bound");
        guard.local_addr = Some(local);
        guard.conn = ConnState::Bound;
        Ok(())
    }

    fn listen(&self, guard: &mut SockGuard<'_>, backlog: u32) -> SockResult<()> {
        let sock = guard.sock();
        if sock.sock_type() != SockType::Stream {
            return Err(Self::not_stream("listen"));
        }
        let transport = io_transport(sock)?;

        let conn = guard.conn;
        match conn {
            ConnState::New => {
                let mut local = PalSocketAddr::wildcard(sock.family().pal_domain(), 0);
                transport.bind(&mut local)?;
                trace!(addr = %local, "auto-bound for listen");
                guard.local_addr = Some(local);
            }
            ConnState::Bound | ConnState::Listening => {}
            _ => return Err(SockError::invalid("listen on a connected socket")),
        }

        let backlog = clamp_backlog(backlog);
        transport.listen(backlog)?;
        guard.backlog = backlog;
        guard.conn = ConnState::Listening;
        Ok(())
    }

    fn accept(&self, sock: &SockHandle, nonblocking: bool) -> SockResult<SockHandle> {
        if sock.sock_type() != SockType::Stream {
            return Err(Self::not_stream("accept"));
        }
        let transport = io_transport(sock)?;
        let accepted = transport.accept(StreamOptions::nonblocking(nonblocking))?;
        trace!(peer = %accepted.peer, id = accepted.handle.id(), "ip connection accepted");
        SockHandle::from_accepted(sock, accepted, nonblocking)
    }

    fn connect(&self, guard: &mut SockGuard<'_>, raw: &[u8]) -> SockResult<()> {
        let sock = guard.sock();
        if sock.sock_type() == SockType::Stream {
            if let Some(err) = guard.conn.connect_error() {
                return Err(err);
            }
            if guard.conn == ConnState::Disconnected {
                return Err(SockError::posix(Errno::EISCONN, "connection was shut down"));
            }
        }
        let peer = Self::decode_peer(sock.family(), raw)?;
        let transport = io_transport(sock)?;
        let local = transport.connect(&peer)?;

        debug!(peer = %peer, local = %local, "ip socket connected");
        guard.local_addr = Some(local);
        guard.peer_addr = Some(peer);
        guard.conn = ConnState::Connected;
        Ok(())
    }

    fn disconnect(&self, guard: &mut SockGuard<'_>) -> SockResult<()> {
        let sock = guard.sock();
        let transport = io_transport(sock)?;
        match sock.sock_type() {
            SockType::Datagram => {
                transport.connect(&PalSocketAddr::Unspec)?;
                guard.peer_addr = None;
                guard.conn = if guard.local_addr.is_some() {
                    ConnState::Bound
                } else {
                    ConnState::New
                };
            }
            SockType::Stream => {
                if guard.conn != ConnState::Connected {
                    return Err(SockError::posix(Errno::ENOTCONN, "disconnect"));
                }
                transport.delete(DeleteMode::All)?;
                guard.conn = ConnState::Disconnected;
            }
        }
        trace!("ip socket disconnected");
        Ok(())
    }

    fn getsockopt(
        &self,
        guard: &mut SockGuard<'_>,
        level: i32,
        name: i32,
        optval: &mut [u8],
    ) -> SockResult<usize> {
        let sock = guard.sock();
        let options = &guard.options;
        let value = match (level, name) {
            (libc::SOL_SOCKET, _) => return get_socket_option(guard, name, optval),
            (libc::IPPROTO_TCP, libc::TCP_NODELAY) if sock.sock_type() == SockType::Stream => {
                options.tcp_nodelay
            }
            (libc::IPPROTO_TCP, libc::TCP_CORK) if sock.sock_type() == SockType::Stream => {
                options.tcp_cork
            }
            (libc::IPPROTO_IPV6, libc::IPV6_V6ONLY) if sock.family() == AddressFamily::Inet6 => {
                options.ipv6_v6only
            }
            _ => return Err(unknown_option(level, name)),
        };
        Ok(write_int(optval, i32::from(value)))
    }

    fn setsockopt(
        &self,
        guard: &mut SockGuard<'_>,
        level: i32,
        name: i32,
        optval: &[u8],
    ) -> SockResult<()> {
        let sock = guard.sock();
        match (level, name) {
            (libc::SOL_SOCKET, _) => return set_socket_option(guard, name, optval),
            (libc::IPPROTO_TCP, libc::TCP_NODELAY) if sock.sock_type() == SockType::Stream => {
                guard.options.tcp_nodelay = read_int(optval)? != 0;
            }
            (libc::IPPROTO_TCP, libc::TCP_CORK) if sock.sock_type() == SockType::Stream => {
                guard.options.tcp_cork = read_int(optval)? != 0;
            }
            (libc::IPPROTO_IPV6, libc::IPV6_V6ONLY) if sock.family() == AddressFamily::Inet6 => {
                if guard.conn != ConnState::New {
                    return Err(SockError::invalid("IPV6_V6ONLY after bind"));
                }
                guard.options.ipv6_v6only = read_int(optval)? != 0;
            }
            _ => return Err(unknown_option(level, name)),
        }
        push_options(guard)
    }

    fn send(
        &self,
        sock: &SockHandle,
        iov: &[IoSlice<'_>],
        addr: Option<&[u8]>,
        force_nonblocking: bool,
    ) -> SockResult<usize> {
        let transport = io_transport(sock)?;
        match sock.sock_type() {
            // Connected streams ignore the destination
            SockType::Stream => Ok(transport.send(iov, None, force_nonblocking)?),
            SockType::Datagram => {
                let dest = addr
                    .map(|raw| Self::decode_peer(sock.family(), raw))
                    .transpose()?;
                match transport.send(iov, dest.as_ref(), force_nonblocking) {
                    Err(PalError::NotConnection) => Err(SockError::posix(
                        Errno::EDESTADDRREQ,
                        "no destination for datagram",
                    )),
                    result => Ok(result?),
                }
            }
        }
    }

    fn recv(
        &self,
        sock: &SockHandle,
        iov: &mut [IoSliceMut<'_>],
        addr: Option<&mut AddrBuf<'_>>,
        force_nonblocking: bool,
    ) -> SockResult<usize> {
        let transport = io_transport(sock)?;
        let (size, from) = transport.recv(iov, force_nonblocking)?;
        report_addr(addr, from.as_ref());
        Ok(size)
    }
}
