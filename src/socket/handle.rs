/*!
 * Socket Handle
 * Per-descriptor socket state, the lock guard, and the attached/detached
 * lifecycle used around checkpoints
 *
 * ## Type States
 *
 * - `SockHandle`: attached; backend selected and lock present
 * - `DetachedSock`: produced by `checkout`; no backend, no lock, only the
 *   serializable record and the transport object
 *
 * Lock-requiring backend operations take a `SockGuard`, which can only be
 * obtained from an attached handle.
 */

use super::addr;
use super::msg::AddrBuf;
use super::ops::Backend;
use super::types::{AddressFamily, ConnState, SockType};
use crate::core::bincode;
use crate::core::errors::{SockError, SockResult};
use crate::core::limits::DEFAULT_SOCK_BUF_SIZE;
use crate::monitoring::span_operation;
use crate::substrate::{Accepted, PalError, PalHandle, PalSocketAddr, SocketAttr, Substrate};
use arc_swap::ArcSwapOption;
use nix::errno::Errno;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Backend-owned mutable state, guarded by the handle lock
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SockState {
    pub conn: ConnState,
    pub local_addr: Option<PalSocketAddr>,
    pub peer_addr: Option<PalSocketAddr>,
    /// Backlog requested by the last successful `listen`
    pub backlog: u32,
    pub options: SocketAttr,
}

impl SockState {
    fn with_default_buffers() -> Self {
        Self {
            options: SocketAttr {
                recv_buf_size: DEFAULT_SOCK_BUF_SIZE,
                send_buf_size: DEFAULT_SOCK_BUF_SIZE,
                ..SocketAttr::default()
            },
            ..Self::default()
        }
    }
}

/// One open socket
pub struct SockHandle {
    family: AddressFamily,
    sock_type: SockType,
    protocol: i32,
    backend: Backend,
    substrate: Arc<dyn Substrate>,
    /// Cached substrate attribute; `setflags` keeps it current
    nonblocking: AtomicBool,
    /// Written only through the guard or while exclusively owned
    transport: ArcSwapOption<PalHandle>,
    state: Mutex<SockState>,
}

impl SockHandle {
    /// Create a socket as `socket(2)` would
    pub fn create(
        substrate: Arc<dyn Substrate>,
        domain: i32,
        sock_type: i32,
        protocol: i32,
    ) -> SockResult<Self> {
        let family = AddressFamily::from_raw(domain).ok_or_else(|| {
            SockError::posix(Errno::EAFNOSUPPORT, format!("address family {}", domain))
        })?;
        let (sock_type, nonblocking) = SockType::parse(sock_type)?;

        let backend = Backend::for_family(family);
        let mut sock = Self {
            family,
            sock_type,
            protocol,
            backend,
            substrate,
            nonblocking: AtomicBool::new(nonblocking),
            transport: ArcSwapOption::empty(),
            state: Mutex::new(SockState::with_default_buffers()),
        };
        backend.create(&mut sock)?;

        debug!(
            family = %family,
            sock_type = ?sock_type,
            protocol = sock.protocol,
            nonblocking,
            "socket created"
        );
        Ok(sock)
    }

    /// Handle for a connection returned by the substrate's accept
    pub(crate) fn from_accepted(
        listener: &SockHandle,
        accepted: Accepted,
        nonblocking: bool,
    ) -> SockResult<Self> {
        let options = match accepted.handle.attributes_query() {
            Ok(attr) => attr.socket,
            Err(err) => {
                accepted.handle.release();
                return Err(err.into());
            }
        };
        Ok(Self {
            family: listener.family,
            sock_type: listener.sock_type,
            protocol: listener.protocol,
            backend: listener.backend,
            substrate: Arc::clone(&listener.substrate),
            nonblocking: AtomicBool::new(nonblocking),
            transport: ArcSwapOption::from_pointee(accepted.handle),
            state: Mutex::new(SockState {
                conn: ConnState::Connected,
                local_addr: Some(accepted.local),
                peer_addr: Some(accepted.peer),
                backlog: 0,
                options,
            }),
        })
    }

    #[inline]
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    #[inline]
    pub fn sock_type(&self) -> SockType {
        self.sock_type
    }

    #[inline]
    pub fn protocol(&self) -> i32 {
        self.protocol
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    #[inline]
    pub(crate) fn substrate(&self) -> &Arc<dyn Substrate> {
        &self.substrate
    }

    #[inline]
    pub(crate) fn set_protocol(&mut self, protocol: i32) {
        self.protocol = protocol;
    }

    /// Install a transport object while the handle is exclusively owned
    pub(crate) fn set_transport(&mut self, handle: PalHandle) {
        self.transport.store(Some(Arc::new(handle)));
    }

    /// Backend state, for use while the handle is exclusively owned
    #[inline]
    pub(crate) fn state_mut(&mut self) -> &mut SockState {
        self.state.get_mut()
    }

    /// Acquire-ordered snapshot of the transport slot
    #[inline]
    pub(crate) fn transport(&self) -> Option<Arc<PalHandle>> {
        self.transport.load_full()
    }

    #[inline]
    pub(crate) fn cached_nonblocking(&self) -> bool {
        self.nonblocking.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn store_nonblocking(&self, nonblocking: bool) {
        self.nonblocking.store(nonblocking, Ordering::Release);
    }

    /// Acquire the handle lock for a mutating operation
    pub fn lock(&self) -> SockGuard<'_> {
        SockGuard {
            sock: self,
            state: self.state.lock(),
        }
    }

    /// Non-blocking mode, read without taking the socket lock
    ///
    /// Mirrors the substrate attribute record when a transport object exists.
    pub fn is_nonblocking(&self) -> bool {
        match self.transport() {
            Some(transport) => match transport.attributes_query() {
                Ok(attr) => attr.nonblocking,
                Err(_) => self.cached_nonblocking(),
            },
            None => self.cached_nonblocking(),
        }
    }

    pub fn bind(&self, addr: &[u8]) -> SockResult<()> {
        let mut guard = self.lock();
        self.backend.bind(&mut guard, addr)
    }

    /// Negative backlogs request the maximum, as on Linux
    pub fn listen(&self, backlog: i32) -> SockResult<()> {
        let backlog = u32::try_from(backlog).unwrap_or(u32::MAX);
        let mut guard = self.lock();
        self.backend.listen(&mut guard, backlog)
    }

    /// Accept one pending connection; runs without the socket lock
    pub fn accept(&self, nonblocking: bool) -> SockResult<SockHandle> {
        let span = span_operation("accept");
        let result = self.backend.accept(self, nonblocking);
        match &result {
            Ok(_) => span.record_result(true),
            Err(err) => span.record_error(err.errno().desc()),
        }
        result
    }

    /// Connect to `addr`; an `AF_UNSPEC` address dissolves the association
    pub fn connect(&self, addr: &[u8]) -> SockResult<()> {
        if addr::raw_family(addr)? == nix::libc::AF_UNSPEC {
            return self.disconnect();
        }
        let span = span_operation("connect");
        let mut guard = self.lock();
        let result = self.backend.connect(&mut guard, addr);
        match &result {
            Ok(()) => span.record_result(true),
            Err(err) => span.record_error(err.errno().desc()),
        }
        result
    }

    pub fn disconnect(&self) -> SockResult<()> {
        let mut guard = self.lock();
        self.backend.disconnect(&mut guard)
    }

    /// Returns the number of bytes written to `optval`
    pub fn getsockopt(&self, level: i32, name: i32, optval: &mut [u8]) -> SockResult<usize> {
        let mut guard = self.lock();
        self.backend.getsockopt(&mut guard, level, name, optval)
    }

    pub fn setsockopt(&self, level: i32, name: i32, optval: &[u8]) -> SockResult<()> {
        let mut guard = self.lock();
        self.backend.setsockopt(&mut guard, level, name, optval)
    }

    /// Local address; unbound sockets report the family's unnamed or wildcard form
    pub fn getsockname(&self, out: &mut AddrBuf<'_>) -> SockResult<()> {
        let guard = self.lock();
        let local = guard
            .local_addr
            .clone()
            .unwrap_or_else(|| PalSocketAddr::wildcard(self.family.pal_domain(), 0));
        out.fill(&addr::encode(&local));
        Ok(())
    }

    pub fn getpeername(&self, out: &mut AddrBuf<'_>) -> SockResult<()> {
        let guard = self.lock();
        match &guard.peer_addr {
            Some(peer) => {
                out.fill(&addr::encode(peer));
                Ok(())
            }
            None => Err(SockError::posix(Errno::ENOTCONN, "no peer")),
        }
    }

    /// Release the transport object; the lock goes with the handle
    pub fn close(self) -> SockResult<()> {
        let result = match self.transport.swap(None) {
            Some(transport) => transport.close().map_err(SockError::from),
            None => Ok(()),
        };
        trace!(family = %self.family, ok = result.is_ok(), "socket closed");
        result
    }

    /// Detach for a checkpoint: drops the backend and the lock, keeps the
    /// transport object and cached attributes
    pub fn checkout(self) -> DetachedSock {
        let transport = self.transport.swap(None);
        let state = std::mem::take(&mut *self.state.lock());
        let record = SockRecord {
            domain: self.family.as_raw(),
            sock_type: self.sock_type,
            protocol: self.protocol,
            nonblocking: self.cached_nonblocking(),
            state,
            transport_tag: transport.as_ref().map(|t| t.checkpoint_tag()),
        };
        trace!(family = %self.family, tag = ?record.transport_tag, "socket checked out");

        DetachedSock {
            record,
            substrate: Arc::clone(&self.substrate),
            transport,
        }
    }
}

impl Drop for SockHandle {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.swap(None) {
            transport.release();
        }
    }
}

impl fmt::Debug for SockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SockHandle")
            .field("family", &self.family)
            .field("sock_type", &self.sock_type)
            .field("protocol", &self.protocol)
            .field("backend", &self.backend)
            .field("nonblocking", &self.cached_nonblocking())
            .field("transport", &self.transport().map(|t| t.id()))
            .finish_non_exhaustive()
    }
}

/// Proof that the handle lock is held
///
/// Dereferences to the guarded [`SockState`].
pub struct SockGuard<'a> {
    sock: &'a SockHandle,
    state: MutexGuard<'a, SockState>,
}

impl<'a> SockGuard<'a> {
    #[inline]
    pub fn sock(&self) -> &'a SockHandle {
        self.sock
    }

    #[inline]
    pub fn transport(&self) -> Option<Arc<PalHandle>> {
        self.sock.transport()
    }

    /// Publish a freshly created transport object
    ///
    /// The slot must be empty; backends create at most one object per socket.
    pub(crate) fn install_transport(&mut self, handle: PalHandle) -> Arc<PalHandle> {
        let transport = Arc::new(handle);
        let previous = self.sock.transport.swap(Some(Arc::clone(&transport)));
        if let Some(previous) = previous {
            warn!(id = previous.id(), "replacing live transport object");
            previous.release();
        }
        transport
    }

    /// Push the cached mode and socket options to a new transport object
    pub(crate) fn apply_attributes(&self, transport: &PalHandle) -> SockResult<()> {
        let mut attr = transport.attributes_query()?;
        let nonblocking = self.sock.cached_nonblocking();
        if attr.nonblocking != nonblocking || attr.socket != self.state.options {
            attr.nonblocking = nonblocking;
            attr.socket = self.state.options;
            transport.attributes_set(&attr)?;
        }
        Ok(())
    }
}

impl Deref for SockGuard<'_> {
    type Target = SockState;

    #[inline]
    fn deref(&self) -> &SockState {
        &self.state
    }
}

impl DerefMut for SockGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut SockState {
        &mut self.state
    }
}

/// Serializable part of a detached socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SockRecord {
    /// Raw `AF_*` value
    pub domain: i32,
    pub sock_type: SockType,
    pub protocol: i32,
    pub nonblocking: bool,
    pub state: SockState,
    /// Checkpoint tag of the transport object, if one was attached
    pub transport_tag: Option<u8>,
}

/// Socket between `checkout` and `checkin`
///
/// Carries no backend and no lock; only `checkin`, `encode` and `close`
/// are reachable from this state.
pub struct DetachedSock {
    record: SockRecord,
    substrate: Arc<dyn Substrate>,
    transport: Option<Arc<PalHandle>>,
}

impl DetachedSock {
    /// Rebuild a detached socket from an encoded record and the transport
    /// object restored by the substrate
    pub fn restore(
        bytes: &[u8],
        substrate: Arc<dyn Substrate>,
        transport: Option<PalHandle>,
    ) -> SockResult<Self> {
        let decoded: SockResult<(SockRecord, usize)> = bincode::from_slice_with_size(bytes)
            .map_err(|e| SockError::invalid(e.to_string()));
        let record = match decoded {
            Ok((record, _)) => record,
            Err(err) => {
                if let Some(transport) = &transport {
                    transport.release();
                }
                return Err(err);
            }
        };

        let tag = transport.as_ref().map(|t| t.checkpoint_tag());
        if tag != record.transport_tag {
            if let Some(transport) = &transport {
                transport.release();
            }
            return Err(PalError::Inconsistent.into());
        }

        Ok(Self {
            record,
            substrate,
            transport: transport.map(Arc::new),
        })
    }

    #[inline]
    pub fn record(&self) -> &SockRecord {
        &self.record
    }

    /// Size-prefixed bincode image of the record
    pub fn encode(&self) -> SockResult<Vec<u8>> {
        let span = span_operation("checkpoint_encode");
        let bytes = bincode::to_vec_with_size(&self.record)
            .map_err(|e| SockError::invalid(e.to_string()))?;
        span.record_bytes(bytes.len());
        span.record_result(true);
        Ok(bytes)
    }

    /// Reattach: select the backend from the stored family and create a new lock
    ///
    /// # Panics
    ///
    /// Panics if the stored family has no backend; such a record can only come
    /// from a corrupted checkpoint.
    pub fn checkin(mut self) -> SockResult<SockHandle> {
        let domain = self.record.domain;
        let family = match AddressFamily::from_raw(domain) {
            Some(family) => family,
            None => panic!("socket checkin with unknown address family {}", domain),
        };

        let handle = SockHandle {
            family,
            sock_type: self.record.sock_type,
            protocol: self.record.protocol,
            backend: Backend::for_family(family),
            substrate: Arc::clone(&self.substrate),
            nonblocking: AtomicBool::new(self.record.nonblocking),
            transport: ArcSwapOption::new(self.transport.take()),
            state: Mutex::new(std::mem::take(&mut self.record.state)),
        };
        trace!(family = %family, backend = ?handle.backend, "socket checked in");
        Ok(handle)
    }

    /// Release the transport object without reattaching
    pub fn close(mut self) -> SockResult<()> {
        match self.transport.take() {
            Some(transport) => transport.close().map_err(SockError::from),
            None => Ok(()),
        }
    }
}

impl Drop for DetachedSock {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.release();
        }
    }
}

impl fmt::Debug for DetachedSock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetachedSock")
            .field("record", &self.record)
            .field("transport", &self.transport.as_ref().map(|t| t.id()))
            .finish()
    }
}
