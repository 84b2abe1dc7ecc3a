/*!
 * Backend Operation Table
 * The capability contract every family backend implements, and the closed
 * dispatch over the known backends
 */

use super::addr;
use super::handle::{SockGuard, SockHandle};
use super::ip::IpOps;
use super::msg::AddrBuf;
use super::types::AddressFamily;
use super::unix::UnixOps;
use crate::core::errors::{SockError, SockResult};
use crate::core::limits::SHIM_SOCK_MAX_CONNS;
use crate::substrate::{PalHandle, PalSocketAddr};
use nix::errno::Errno;
use std::io::{IoSlice, IoSliceMut};
use std::sync::Arc;

/// Operations a family backend provides
///
/// # Locking
///
/// - `create` runs on a default-initialized handle owned exclusively by the caller
/// - `bind`, `listen`, `connect`, `disconnect`, `getsockopt` and `setsockopt`
///   receive the handle guard and run with the lock held throughout
/// - `accept` runs without the lock and must tolerate concurrent callers
/// - `send` and `recv` run without the lock against the transport slot
pub(crate) trait SockOps {
    fn create(&self, sock: &mut SockHandle) -> SockResult<()>;

    fn bind(&self, guard: &mut SockGuard<'_>, addr: &[u8]) -> SockResult<()>;

    fn listen(&self, guard: &mut SockGuard<'_>, backlog: u32) -> SockResult<()>;

    fn accept(&self, sock: &SockHandle, nonblocking: bool) -> SockResult<SockHandle>;

    fn connect(&self, guard: &mut SockGuard<'_>, addr: &[u8]) -> SockResult<()>;

    fn disconnect(&self, guard: &mut SockGuard<'_>) -> SockResult<()>;

    fn getsockopt(
        &self,
        guard: &mut SockGuard<'_>,
        level: i32,
        name: i32,
        optval: &mut [u8],
    ) -> SockResult<usize>;

    fn setsockopt(
        &self,
        guard: &mut SockGuard<'_>,
        level: i32,
        name: i32,
        optval: &[u8],
    ) -> SockResult<()>;

    /// Gather `iov` into one payload; `addr` is the raw destination, if any
    fn send(
        &self,
        sock: &SockHandle,
        iov: &[IoSlice<'_>],
        addr: Option<&[u8]>,
        force_nonblocking: bool,
    ) -> SockResult<usize>;

    /// Scatter one payload into `iov`, reporting the source through `addr`
    fn recv(
        &self,
        sock: &SockHandle,
        iov: &mut [IoSliceMut<'_>],
        addr: Option<&mut AddrBuf<'_>>,
        force_nonblocking: bool,
    ) -> SockResult<usize>;
}

/// Backend selected by address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Unix,
    Ip,
}

macro_rules! dispatch {
    ($backend:expr, $method:ident($($arg:expr),* $(,)?)) => {
        match $backend {
            Backend::Unix => UnixOps.$method($($arg),*),
            Backend::Ip => IpOps.$method($($arg),*),
        }
    };
}

impl Backend {
    #[inline]
    pub const fn for_family(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Unix => Backend::Unix,
            AddressFamily::Inet | AddressFamily::Inet6 => Backend::Ip,
        }
    }

    pub(crate) fn create(self, sock: &mut SockHandle) -> SockResult<()> {
        dispatch!(self, create(sock))
    }

    pub(crate) fn bind(self, guard: &mut SockGuard<'_>, addr: &[u8]) -> SockResult<()> {
        dispatch!(self, bind(guard, addr))
    }

    pub(crate) fn listen(self, guard: &mut SockGuard<'_>, backlog: u32) -> SockResult<()> {
        dispatch!(self, listen(guard, backlog))
    }

    pub(crate) fn accept(self, sock: &SockHandle, nonblocking: bool) -> SockResult<SockHandle> {
        dispatch!(self, accept(sock, nonblocking))
    }

    pub(crate) fn connect(self, guard: &mut SockGuard<'_>, addr: &[u8]) -> SockResult<()> {
        dispatch!(self, connect(guard, addr))
    }

    pub(crate) fn disconnect(self, guard: &mut SockGuard<'_>) -> SockResult<()> {
        dispatch!(self, disconnect(guard))
    }

    pub(crate) fn getsockopt(
        self,
        guard: &mut SockGuard<'_>,
        level: i32,
        name: i32,
        optval: &mut [u8],
    ) -> SockResult<usize> {
        dispatch!(self, getsockopt(guard, level, name, optval))
    }

    pub(crate) fn setsockopt(
        self,
        guard: &mut SockGuard<'_>,
        level: i32,
        name: i32,
        optval: &[u8],
    ) -> SockResult<()> {
        dispatch!(self, setsockopt(guard, level, name, optval))
    }

    pub(crate) fn send(
        self,
        sock: &SockHandle,
        iov: &[IoSlice<'_>],
        addr: Option<&[u8]>,
        force_nonblocking: bool,
    ) -> SockResult<usize> {
        dispatch!(self, send(sock, iov, addr, force_nonblocking))
    }

    pub(crate) fn recv(
        self,
        sock: &SockHandle,
        iov: &mut [IoSliceMut<'_>],
        addr: Option<&mut AddrBuf<'_>>,
        force_nonblocking: bool,
    ) -> SockResult<usize> {
        dispatch!(self, recv(sock, iov, addr, force_nonblocking))
    }
}

// ============================================================================
// Helpers shared by the backends
// ============================================================================

/// Backlog handed to the substrate, capped at [`SHIM_SOCK_MAX_CONNS`]
#[inline]
pub(crate) fn clamp_backlog(backlog: u32) -> u32 {
    backlog.min(SHIM_SOCK_MAX_CONNS)
}

/// Transport object for I/O, or `ENOTCONN` when none was established
#[inline]
pub(crate) fn io_transport(sock: &SockHandle) -> SockResult<Arc<PalHandle>> {
    sock.transport()
        .ok_or_else(|| SockError::posix(Errno::ENOTCONN, "no transport object"))
}

/// Report a source address through the caller's buffer
#[inline]
pub(crate) fn report_addr(out: Option<&mut AddrBuf<'_>>, from: Option<&PalSocketAddr>) {
    if let (Some(out), Some(from)) = (out, from) {
        out.fill(&addr::encode(from));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_selection() {
        assert_eq!(Backend::for_family(AddressFamily::Unix), Backend::Unix);
        assert_eq!(Backend::for_family(AddressFamily::Inet), Backend::Ip);
        assert_eq!(Backend::for_family(AddressFamily::Inet6), Backend::Ip);
    }

    #[test]
    fn test_backlog_cap() {
        assert_eq!(clamp_backlog(16), 16);
        assert_eq!(clamp_backlog(u32::MAX), SHIM_SOCK_MAX_CONNS);
    }
}
