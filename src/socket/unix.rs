/*!
 * Unix-Domain Backend
 * Stream sockets over the substrate; the transport object is created at
 * bind or connect
 */

use super::addr;
use super::handle::{SockGuard, SockHandle};
use super::msg::AddrBuf;
use super::ops::{clamp_backlog, io_transport, report_addr, SockOps};
use super::sockopt::{get_socket_option, set_socket_option, unknown_option};
use super::types::{ConnState, SockType};
use crate::core::errors::{SockError, SockResult};
use crate::substrate::{PalHandle, PalSocketAddr, StreamOptions};
use nix::errno::Errno;
use nix::libc;
use std::io::{IoSlice, IoSliceMut};
use tracing::{debug, trace};

pub(crate) struct UnixOps;

impl UnixOps {
    /// Create the transport object and push cached attributes to it
    fn new_transport(guard: &SockGuard<'_>) -> SockResult<PalHandle> {
        let sock = guard.sock();
        let handle = sock.substrate().socket_create(
            sock.family().pal_domain(),
            sock.sock_type().pal_kind(),
            StreamOptions::nonblocking(sock.cached_nonblocking()),
        )?;
        if let Err(err) = guard.apply_attributes(&handle) {
            handle.release();
            return Err(err);
        }
        Ok(handle)
    }
}

impl SockOps for UnixOps {
    fn create(&self, sock: &mut SockHandle) -> SockResult<()> {
        if sock.sock_type() != SockType::Stream {
            return Err(SockError::posix(
                Errno::ESOCKTNOSUPPORT,
                "unix sockets support SOCK_STREAM only",
            ));
        }
        if sock.protocol() != 0 {
            return Err(SockError::posix(Errno::EPROTONOSUPPORT, "unix protocol"));
        }
        Ok(())
    }

    fn bind(&self, guard: &mut SockGuard<'_>, raw: &[u8]) -> SockResult<()> {
        if guard.conn != ConnState::New {
            return Err(SockError::invalid("socket already bound"));
        }
        let mut local = addr::decode(guard.sock().family(), raw)?;
        if matches!(local, PalSocketAddr::Unspec) {
            return Err(SockError::posix(Errno::EAFNOSUPPORT, "AF_UNSPEC bind"));
        }

        let handle = Self::new_transport(guard)?;
        if let Err(err) = handle.bind(&mut local) {
            handle.release();
            return Err(err.into());
        }
        guard.install_transport(handle);

        debug!(addr = %local, "unix socket bound");
        guard.local_addr = Some(local);
        guard.conn = ConnState::Bound;
        Ok(())
    }

    fn listen(&self, guard: &mut SockGuard<'_>, backlog: u32) -> SockResult<()> {
        if !matches!(guard.conn, ConnState::Bound | ConnState::Listening) {
            return Err(SockError::invalid("listen on unbound unix socket"));
        }
        let transport = io_transport(guard.sock())?;
        let backlog = clamp_backlog(backlog);
        transport.listen(backlog)?;

        guard.backlog = backlog;
        guard.conn = ConnState::Listening;
        Ok(())
    }

    fn accept(&self, sock: &SockHandle, nonblocking: bool) -> SockResult<SockHandle> {
        let transport = sock
            .transport()
            .ok_or_else(|| SockError::invalid("accept on unbound unix socket"))?;
        let accepted = transport.accept(StreamOptions::nonblocking(nonblocking))?;
        trace!(peer = %accepted.peer, id = accepted.handle.id(), "unix connection accepted");
        SockHandle::from_accepted(sock, accepted, nonblocking)
    }

    fn connect(&self, guard: &mut SockGuard<'_>, raw: &[u8]) -> SockResult<()> {
        if let Some(err) = guard.conn.connect_error() {
            return Err(err);
        }
        let peer = addr::decode(guard.sock().family(), raw)?;
        match &peer {
            PalSocketAddr::Unix(path) if !path.is_empty() => {}
            _ => return Err(SockError::invalid("unix connect needs a named peer")),
        }

        let local = match guard.transport() {
            Some(transport) => transport.connect(&peer)?,
            None => {
                let handle = Self::new_transport(guard)?;
                match handle.connect(&peer) {
                    Ok(local) => {
                        guard.install_transport(handle);
                        local
                    }
                    Err(err) => {
                        handle.release();
                        return Err(err.into());
                    }
                }
            }
        };

        debug!(peer = %peer, "unix socket connected");
        if guard.local_addr.is_none() {
            guard.local_addr = Some(local);
        }
        guard.peer_addr = Some(peer);
        guard.conn = ConnState::Connected;
        Ok(())
    }

    fn disconnect(&self, _guard: &mut SockGuard<'_>) -> SockResult<()> {
        Err(SockError::invalid("unix stream sockets cannot dissolve a connection"))
    }

    fn getsockopt(
        &self,
        guard: &mut SockGuard<'_>,
        level: i32,
        name: i32,
        optval: &mut [u8],
    ) -> SockResult<usize> {
        match level {
            libc::SOL_SOCKET => get_socket_option(guard, name, optval),
            _ => Err(unknown_option(level, name)),
        }
    }

    fn setsockopt(
        &self,
        guard: &mut SockGuard<'_>,
        level: i32,
        name: i32,
        optval: &[u8],
    ) -> SockResult<()> {
        match level {
            libc::SOL_SOCKET => set_socket_option(guard, name, optval),
            _ => Err(unknown_option(level, name)),
        }
    }

    fn send(
        &self,
        sock: &SockHandle,
        iov: &[IoSlice<'_>],
        _addr: Option<&[u8]>,
        force_nonblocking: bool,
    ) -> SockResult<usize> {
        // Destination ignored: the stream has exactly one peer
        let transport = io_transport(sock)?;
        Ok(transport.send(iov, None, force_nonblocking)?)
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
