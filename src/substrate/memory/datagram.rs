/*!
 * In-Process Datagram Sockets
 * Connectionless message delivery between bound endpoints
 */

use super::network::{Endpoint, Network};
use super::{Counters, MemSubstrateConfig};
use crate::core::limits::MAX_DATAGRAM_SIZE;
use crate::substrate::errors::{PalError, PalResult};
use crate::substrate::traits::{Accepted, Transport};
use crate::substrate::types::*;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::io::{IoSlice, IoSliceMut};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

struct Datagram {
    payload: Vec<u8>,
    from: PalSocketAddr,
}

#[derive(Default)]
struct DatagramState {
    /// Registered address, possibly a wildcard
    local: Option<PalSocketAddr>,
    ephemeral: bool,
    /// Default destination and receive filter
    peer: Option<PalSocketAddr>,
    closed: bool,
}

/// Shared core of a datagram socket
pub(super) struct DatagramCore {
    domain: PalSocketDomain,
    network: Arc<Network>,
    counters: Arc<Counters>,
    config: Arc<MemSubstrateConfig>,
    attr: Mutex<StreamAttr>,
    state: Mutex<DatagramState>,
    inbox: Mutex<VecDeque<Datagram>>,
    readable: Condvar,
}

impl DatagramCore {
    pub(super) fn new(
        domain: PalSocketDomain,
        network: Arc<Network>,
        counters: Arc<Counters>,
        config: Arc<MemSubstrateConfig>,
        attr: StreamAttr,
    ) -> Arc<Self> {
        counters.sockets_created.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            domain,
            network,
            counters,
            config,
            attr: Mutex::new(attr),
            state: Mutex::new(DatagramState::default()),
            inbox: Mutex::new(VecDeque::new()),
            readable: Condvar::new(),
        })
    }

    fn bind_locked(
        self: &Arc<Self>,
        state: &mut DatagramState,
        addr: &mut PalSocketAddr,
    ) -> PalResult<()> {
        if state.closed {
            return Err(PalError::BadHandle);
        }
        if state.local.is_some() {
            return Err(PalError::Invalid);
        }

        let mut ephemeral = false;
        if addr.port() == 0 {
            let port = self.network.allocate_port()?;
            *addr = addr.with_port(port);
            ephemeral = true;
        }

        let registered = self.network.register(
            PalSocketKind::Datagram,
            addr.clone(),
            Endpoint::Datagram(Arc::downgrade(self)),
        );
        if let Err(err) = registered {
            if ephemeral {
                self.network.release_port(addr.port());
            }
            return Err(err);
        }

        trace!(addr = %addr, "datagram socket bound");
        state.local = Some(addr.clone());
        state.ephemeral = ephemeral;
        Ok(())
    }

    fn bind(self: &Arc<Self>, addr: &mut PalSocketAddr) -> PalResult<()> {
        if addr.domain() != Some(self.domain) || self.domain == PalSocketDomain::Unix {
            return Err(PalError::AfNotSupported);
        }
        let mut state = self.state.lock();
        self.bind_locked(&mut state, addr)
    }

    /// Local address, binding to an ephemeral wildcard port on first use
    fn ensure_bound(self: &Arc<Self>, state: &mut DatagramState) -> PalResult<PalSocketAddr> {
        if let Some(local) = &state.local {
            return Ok(local.clone());
        }
        let mut addr = PalSocketAddr::wildcard(self.domain, 0);
        self.bind_locked(state, &mut addr)?;
        Ok(addr)
    }

    /// Address a receiver sees as the source of our datagrams
    fn source_addr(&self, local: &PalSocketAddr) -> PalSocketAddr {
        if local.is_wildcard() {
            PalSocketAddr::loopback(self.domain, local.port())
        } else {
            local.clone()
        }
    }

    fn connect(self: &Arc<Self>, addr: &PalSocketAddr) -> PalResult<PalSocketAddr> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PalError::BadHandle);
        }

        if matches!(addr, PalSocketAddr::Unspec) {
            trace!("datagram association dissolved");
            state.peer = None;
            return Ok(state
                .local
                .clone()
                .unwrap_or_else(|| PalSocketAddr::wildcard(self.domain, 0)));
        }
        if addr.domain() != Some(self.domain) {
            return Err(PalError::AfNotSupported);
        }

        let local = self.ensure_bound(&mut state)?;
        state.peer = Some(addr.clone());
        trace!(peer = %addr, "datagram peer set");
        Ok(self.source_addr(&local))
    }

    fn deliver(&self, payload: Vec<u8>, from: PalSocketAddr) {
        {
            let state = self.state.lock();
            if state.closed {
                return;
            }
            if let Some(peer) = &state.peer {
                if *peer != from {
                    trace!(from = %from, "datagram from unconnected peer dropped");
                    return;
                }
            }
        }

        let mut inbox = self.inbox.lock();
        if inbox.len() >= self.config.max_datagram_queue {
            trace!(queued = inbox.len(), "datagram inbox full, dropping");
            return;
        }
        inbox.push_back(Datagram { payload, from });
        drop(inbox);
        self.readable.notify_one();
    }

    fn send(
        self: &Arc<Self>,
        iov: &[IoSlice<'_>],
        addr: Option<&PalSocketAddr>,
    ) -> PalResult<usize> {
        let (from, dest) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PalError::BadHandle);
            }
            let dest = match (addr, &state.peer) {
                (Some(addr), _) => addr.clone(),
                (None, Some(peer)) => peer.clone(),
                (None, None) => return Err(PalError::NotConnection),
            };
            if dest.domain() != Some(self.domain) {
                return Err(PalError::AfNotSupported);
            }
            let local = self.ensure_bound(&mut state)?;
            (self.source_addr(&local), dest)
        };

        let total: usize = iov.iter().map(|slice| slice.len()).sum();
        if total > MAX_DATAGRAM_SIZE {
            return Err(PalError::TooLong);
        }

        let mut payload = Vec::new();
        payload
            .try_reserve_exact(total)
            .map_err(|_| PalError::NoMemory)?;
        for slice in iov {
            payload.extend_from_slice(slice);
        }

        match self.network.lookup_datagram(&dest) {
            Some(target) => target.deliver(payload, from),
            None => trace!(dest = %dest, "no receiver, datagram dropped"),
        }
        Ok(total)
    }

    fn recv(
        &self,
        iov: &mut [IoSliceMut<'_>],
        force_nonblocking: bool,
    ) -> PalResult<(usize, Option<PalSocketAddr>)> {
        let attr = *self.attr.lock();
        let nonblocking = force_nonblocking || attr.nonblocking;
        let deadline = (attr.socket.receive_timeout_us > 0)
            .then(|| Instant::now() + Duration::from_micros(attr.socket.receive_timeout_us));

        let mut inbox = self.inbox.lock();
        let datagram = loop {
            if let Some(datagram) = inbox.pop_front() {
                break datagram;
            }
            if self.state.lock().closed {
                return Err(PalError::BadHandle);
            }
            if nonblocking {
                return Err(PalError::TryAgain);
            }
            match deadline {
                Some(deadline) => {
                    if self.readable.wait_until(&mut inbox, deadline).timed_out() {
                        return Err(PalError::TryAgain);
                    }
                }
                None => self.readable.wait(&mut inbox),
            }
        };
        drop(inbox);

        // Excess beyond the supplied buffers is discarded
        let mut copied = 0;
        for slice in iov.iter_mut() {
            let remaining = &datagram.payload[copied..];
            if remaining.is_empty() {
                break;
            }
            let n = remaining.len().min(slice.len());
            slice[..n].copy_from_slice(&remaining[..n]);
            copied += n;
        }
        if copied < datagram.payload.len() {
            trace!(
                size = datagram.payload.len(),
                copied,
                "datagram truncated"
            );
        }
        Ok((copied, Some(datagram.from)))
    }

    fn attributes(&self) -> StreamAttr {
        let mut attr = *self.attr.lock();
        attr.pending_size = self
            .inbox
            .lock()
            .front()
            .map_or(0, |datagram| datagram.payload.len() as u64);
        attr
    }

    fn set_attributes(&self, attr: &StreamAttr) {
        self.counters.attr_updates.fetch_add(1, Ordering::Relaxed);
        let mut current = self.attr.lock();
        current.nonblocking = attr.nonblocking;
        current.socket = attr.socket;
    }

    fn close(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(local) = state.local.take() {
            self.network
                .unregister(PalSocketKind::Datagram, &local, Arc::as_ptr(self));
            if state.ephemeral {
                self.network.release_port(local.port());
            }
        }
        drop(state);

        self.inbox.lock().clear();
        self.readable.notify_all();
        self.counters.sockets_closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Datagram transport object handed out by the in-process substrate
pub(super) struct MemDatagram(pub(super) Arc<DatagramCore>);

impl fmt::Debug for MemDatagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("MemDatagram")
            .field("domain", &self.0.domain)
            .field("local", &state.local)
            .field("peer", &state.peer)
            .field("closed", &state.closed)
            .finish()
    }
}

impl Transport for MemDatagram {
    fn domain(&self) -> PalSocketDomain {
        self.0.domain
    }

    fn kind(&self) -> PalSocketKind {
        PalSocketKind::Datagram
    }

    fn bind(&self, addr: &mut PalSocketAddr) -> PalResult<()> {
        self.0.bind(addr)
    }

    fn listen(&self, _backlog: u32) -> PalResult<()> {
        Err(PalError::NotSupported)
    }

    fn accept(&self, _options: StreamOptions) -> PalResult<Accepted> {
        Err(PalError::NotSupported)
    }

    fn connect(&self, addr: &PalSocketAddr) -> PalResult<PalSocketAddr> {
        self.0.connect(addr)
    }

    fn send(
        &self,
        iov: &[IoSlice<'_>],
        addr: Option<&PalSocketAddr>,
        _force_nonblocking: bool,
    ) -> PalResult<usize> {
        self.0.send(iov, addr)
    }

    fn recv(
        &self,
        iov: &mut [IoSliceMut<'_>],
        force_nonblocking: bool,
    ) -> PalResult<(usize, Option<PalSocketAddr>)> {
        self.0.recv(iov, force_nonblocking)
    }

    fn attributes_query(&self) -> PalResult<StreamAttr> {
        Ok(self.0.attributes())
    }

    fn attributes_set(&self, attr: &StreamAttr) -> PalResult<()> {
        self.0.set_attributes(attr);
        Ok(())
    }

    fn delete(&self, _mode: DeleteMode) -> PalResult<()> {
        Ok(())
    }

    fn close(&self) -> PalResult<()> {
        self.0.close();
        Ok(())
    }

    fn checkpoint_tag(&self) -> u8 {
        b'b'
    }
}
