/*!
 * In-Process Stream Sockets
 * Connection-oriented transport objects: listeners and connected pairs
 */

use super::channel::Channel;
use super::network::{Endpoint, Network};
use super::{Counters, MemSubstrateConfig};
use crate::substrate::errors::{PalError, PalResult};
use crate::substrate::traits::{Accepted, PalHandle, Transport};
use crate::substrate::types::*;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::io::{IoSlice, IoSliceMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

static NEXT_AUTOBIND: AtomicU64 = AtomicU64::new(1);

struct Connection {
    local: PalSocketAddr,
    peer: PalSocketAddr,
    rx: Arc<Channel>,
    tx: Arc<Channel>,
    /// Ephemeral port to give back on close
    ephemeral_port: Option<u16>,
}

enum StreamState {
    Fresh,
    Bound {
        local: PalSocketAddr,
        ephemeral: bool,
    },
    Listening {
        local: PalSocketAddr,
        ephemeral: bool,
        backlog: usize,
        pending: VecDeque<Arc<StreamCore>>,
    },
    /// Between dropping a bound registration and completing a connect
    Connecting,
    Connected(Connection),
    Closed,
}

impl StreamState {
    fn name(&self) -> &'static str {
        match self {
            StreamState::Fresh => "fresh",
            StreamState::Bound { .. } => "bound",
            StreamState::Listening { .. } => "listening",
            StreamState::Connecting => "connecting",
            StreamState::Connected(_) => "connected",
            StreamState::Closed => "closed",
        }
    }
}

/// Shared core of a stream socket
pub(super) struct StreamCore {
    domain: PalSocketDomain,
    network: Arc<Network>,
    counters: Arc<Counters>,
    config: Arc<MemSubstrateConfig>,
    attr: Mutex<StreamAttr>,
    state: Mutex<StreamState>,
    accept_ready: Condvar,
}

impl StreamCore {
    pub(super) fn new(
        domain: PalSocketDomain,
        network: Arc<Network>,
        counters: Arc<Counters>,
        config: Arc<MemSubstrateConfig>,
        attr: StreamAttr,
    ) -> Arc<Self> {
        Self::with_state(domain, network, counters, config, attr, StreamState::Fresh)
    }

    fn with_state(
        domain: PalSocketDomain,
        network: Arc<Network>,
        counters: Arc<Counters>,
        config: Arc<MemSubstrateConfig>,
        attr: StreamAttr,
        state: StreamState,
    ) -> Arc<Self> {
        counters.sockets_created.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            domain,
            network,
            counters,
            config,
            attr: Mutex::new(attr),
            state: Mutex::new(state),
            accept_ready: Condvar::new(),
        })
    }

    fn io_mode(&self, force_nonblocking: bool) -> (bool, StreamAttr) {
        let attr = *self.attr.lock();
        (force_nonblocking || attr.nonblocking, attr)
    }

    fn bind(self: &Arc<Self>, addr: &mut PalSocketAddr) -> PalResult<()> {
        if addr.domain() != Some(self.domain) {
            return Err(PalError::AfNotSupported);
        }

        let mut state = self.state.lock();
        if !matches!(*state, StreamState::Fresh) {
            return Err(PalError::Invalid);
        }

        let mut ephemeral = false;
        if let PalSocketAddr::Unix(path) = addr {
            if path.is_empty() {
                // Autobind: abstract name unique within the process
                let id = NEXT_AUTOBIND.fetch_add(1, Ordering::Relaxed);
                *path = format!("\0{:05x}", id).into_bytes();
            }
        } else if addr.port() == 0 {
            let port = self.network.allocate_port()?;
            *addr = addr.with_port(port);
            ephemeral = true;
        }

        let registered = self.network.register(
            PalSocketKind::Stream,
            addr.clone(),
            Endpoint::Stream(Arc::downgrade(self)),
        );
        if let Err(err) = registered {
            if ephemeral {
                self.network.release_port(addr.port());
            }
            return Err(err);
        }

        trace!(addr = %addr, "stream bound");
        *state = StreamState::Bound {
            local: addr.clone(),
            ephemeral,
        };
        Ok(())
    }

    fn listen(&self, backlog: u32) -> PalResult<()> {
        let backlog = (backlog as usize).max(1);
        let mut state = self.state.lock();
        let next = match std::mem::replace(&mut *state, StreamState::Closed) {
            StreamState::Bound { local, ephemeral } => {
                debug!(addr = %local, backlog, "stream listening");
                StreamState::Listening {
                    local,
                    ephemeral,
                    backlog,
                    pending: VecDeque::new(),
                }
            }
            StreamState::Listening {
                local,
                ephemeral,
                pending,
                ..
            } => StreamState::Listening {
                local,
                ephemeral,
                backlog,
                pending,
            },
            other => {
                *state = other;
                return Err(PalError::Invalid);
            }
        };
        *state = next;
        Ok(())
    }

    /// Queue a new server-side connection for `client`; called by the connector
    fn enqueue(
        self: &Arc<Self>,
        target: &PalSocketAddr,
        client: &PalSocketAddr,
    ) -> PalResult<(PalSocketAddr, Arc<Channel>, Arc<Channel>)> {
        let mut state = self.state.lock();
        let StreamState::Listening {
            local,
            backlog,
            pending,
            ..
        } = &mut *state
        else {
            return Err(PalError::ConnRefused);
        };

        if pending.len() >= *backlog {
            trace!(addr = %local, backlog = *backlog, "accept queue full");
            return Err(PalError::ConnRefused);
        }

        let attr = *self.attr.lock();
        let capacity = self.config.stream_capacity(attr.socket.send_buf_size);
        let to_server = Arc::new(Channel::new(capacity));
        let to_client = Arc::new(Channel::new(capacity));

        let server_local = if local.is_wildcard() {
            target.clone()
        } else {
            local.clone()
        };

        let server = StreamCore::with_state(
            self.domain,
            Arc::clone(&self.network),
            Arc::clone(&self.counters),
            Arc::clone(&self.config),
            StreamAttr {
                nonblocking: false,
                pending_size: 0,
                socket: attr.socket,
            },
            StreamState::Connected(Connection {
                local: server_local.clone(),
                peer: client.clone(),
                rx: Arc::clone(&to_server),
                tx: Arc::clone(&to_client),
                ephemeral_port: None,
            }),
        );
        pending.push_back(server);
        drop(state);

        self.accept_ready.notify_one();
        Ok((server_local, to_client, to_server))
    }

    fn accept(&self, options: StreamOptions) -> PalResult<Accepted> {
        let (nonblocking, attr) = self.io_mode(false);
        let deadline = (attr.socket.receive_timeout_us > 0)
            .then(|| Instant::now() + Duration::from_micros(attr.socket.receive_timeout_us));

        // Single dequeue point: concurrent acceptors serialize on this lock
        let mut state = self.state.lock();
        let server = loop {
            match &mut *state {
                StreamState::Listening { pending, .. } => {
                    if let Some(server) = pending.pop_front() {
                        break server;
                    }
                }
                _ => return Err(PalError::NotServer),
            }
            if nonblocking {
                return Err(PalError::TryAgain);
            }
            match deadline {
                Some(deadline) => {
                    if self.accept_ready.wait_until(&mut state, deadline).timed_out() {
                        return Err(PalError::TryAgain);
                    }
                }
                None => self.accept_ready.wait(&mut state),
            }
        };
        drop(state);

        server.attr.lock().nonblocking = options.nonblocking;
        let (local, peer) = match &*server.state.lock() {
            StreamState::Connected(conn) => (conn.local.clone(), conn.peer.clone()),
            _ => return Err(PalError::Inconsistent),
        };
        self.counters.connections_accepted.fetch_add(1, Ordering::Relaxed);

        Ok(Accepted {
            handle: PalHandle::new(MemStream(server)),
            local,
            peer,
        })
    }

    fn connect(self: &Arc<Self>, addr: &PalSocketAddr) -> PalResult<PalSocketAddr> {
        if addr.domain() != Some(self.domain) {
            return Err(PalError::AfNotSupported);
        }

        // Resolve the local address, then release our lock before touching the
        // listener's so that two sockets connecting to each other cannot deadlock.
        let (local, ephemeral_port, was_bound) = {
            let mut state = self.state.lock();
            let resolved = match &*state {
                StreamState::Fresh => match self.domain {
                    PalSocketDomain::Unix => (PalSocketAddr::Unix(Vec::new()), None, false),
                    domain => {
                        let port = self.network.allocate_port()?;
                        (PalSocketAddr::loopback(domain, port), Some(port), false)
                    }
                },
                StreamState::Bound { local, ephemeral } => {
                    let port = ephemeral.then(|| local.port());
                    let local = if local.is_wildcard() {
                        PalSocketAddr::loopback(self.domain, local.port())
                    } else {
                        local.clone()
                    };
                    (local, port, true)
                }
                StreamState::Closed => return Err(PalError::BadHandle),
                _ => return Err(PalError::Invalid),
            };
            *state = StreamState::Connecting;
            resolved
        };

        let outcome = match self.network.lookup_stream(addr) {
            Some(target) if Arc::ptr_eq(&target, self) => Err(PalError::ConnRefused),
            Some(target) => target.enqueue(addr, &local),
            None => Err(PalError::ConnRefused),
        };

        let mut state = self.state.lock();
        match outcome {
            Ok((server_local, rx, tx)) => {
                trace!(local = %local, peer = %server_local, "stream connected");
                *state = StreamState::Connected(Connection {
                    local: local.clone(),
                    peer: server_local,
                    rx,
                    tx,
                    ephemeral_port,
                });
                Ok(local)
            }
            Err(err) => {
                *state = if was_bound {
                    StreamState::Bound {
                        local,
                        ephemeral: ephemeral_port.is_some(),
                    }
                } else {
                    if let Some(port) = ephemeral_port {
                        self.network.release_port(port);
                    }
                    StreamState::Fresh
                };
                Err(err)
            }
        }
    }

    fn connection<R>(&self, f: impl FnOnce(&Connection) -> R) -> PalResult<R> {
        match &*self.state.lock() {
            StreamState::Connected(conn) => Ok(f(conn)),
            StreamState::Closed => Err(PalError::BadHandle),
            _ => Err(PalError::NotConnection),
        }
    }

    fn send(&self, iov: &[IoSlice<'_>], force_nonblocking: bool) -> PalResult<usize> {
        let tx = self.connection(|conn| Arc::clone(&conn.tx))?;
        let (nonblocking, attr) = self.io_mode(force_nonblocking);
        tx.write(iov, nonblocking, attr.socket.send_timeout_us)
    }

    fn recv(
        &self,
        iov: &mut [IoSliceMut<'_>],
        force_nonblocking: bool,
    ) -> PalResult<(usize, Option<PalSocketAddr>)> {
        let (rx, peer) = self.connection(|conn| (Arc::clone(&conn.rx), conn.peer.clone()))?;
        let (nonblocking, attr) = self.io_mode(force_nonblocking);
        let size = rx.read(iov, nonblocking, attr.socket.receive_timeout_us)?;
        Ok((size, Some(peer)))
    }

    fn attributes(&self) -> StreamAttr {
        let mut attr = *self.attr.lock();
        attr.pending_size = self
            .connection(|conn| conn.rx.pending() as u64)
            .unwrap_or(0);
        attr
    }

    fn set_attributes(&self, attr: &StreamAttr) {
        self.counters.attr_updates.fetch_add(1, Ordering::Relaxed);
        let mut current = self.attr.lock();
        current.nonblocking = attr.nonblocking;
        current.socket = attr.socket;
    }

    fn delete(&self, mode: DeleteMode) -> PalResult<()> {
        self.connection(|conn| match mode {
            DeleteMode::Read => conn.rx.close_read(),
            DeleteMode::Write => conn.tx.close_write(),
            DeleteMode::All => {
                conn.rx.close_read();
                conn.tx.close_write();
            }
        })
    }

    /// Tear down the connection of a server socket that was never accepted
    fn abort(&self) {
        let prev = std::mem::replace(&mut *self.state.lock(), StreamState::Closed);
        if let StreamState::Connected(conn) = prev {
            conn.rx.close_read();
            conn.tx.close_write();
            self.counters.sockets_closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn close(self: &Arc<Self>) {
        let prev = std::mem::replace(&mut *self.state.lock(), StreamState::Closed);
        let owner = Arc::as_ptr(self);
        match prev {
            StreamState::Closed => return,
            StreamState::Fresh | StreamState::Connecting => {}
            StreamState::Bound { local, ephemeral } => {
                self.network.unregister(PalSocketKind::Stream, &local, owner);
                if ephemeral {
                    self.network.release_port(local.port());
                }
            }
            StreamState::Listening {
                local,
                ephemeral,
                pending,
                ..
            } => {
                self.network.unregister(PalSocketKind::Stream, &local, owner);
                if ephemeral {
                    self.network.release_port(local.port());
                }
                for server in pending {
                    server.abort();
                }
            }
            StreamState::Connected(conn) => {
                conn.rx.close_read();
                conn.tx.close_write();
                self.network.unregister(PalSocketKind::Stream, &conn.local, owner);
                if let Some(port) = conn.ephemeral_port {
                    self.network.release_port(port);
                }
            }
        }
        self.accept_ready.notify_all();
        self.counters.sockets_closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Stream transport object handed out by the in-process substrate
pub(super) struct MemStream(pub(super) Arc<StreamCore>);

impl fmt::Debug for MemStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemStream")
            .field("domain", &self.0.domain)
            .field("state", &self.0.state.lock().name())
            .finish()
    }
}

impl Transport for MemStream {
    fn domain(&self) -> PalSocketDomain {
        self.0.domain
    }

    fn kind(&self) -> PalSocketKind {
        PalSocketKind::Stream
    }

    fn bind(&self, addr: &mut PalSocketAddr) -> PalResult<()> {
        self.0.bind(addr)
    }

    fn listen(&self, backlog: u32) -> PalResult<()> {
        self.0.listen(backlog)
    }

    fn accept(&self, options: StreamOptions) -> PalResult<Accepted> {
        self.0.accept(options)
    }

    fn connect(&self, addr: &PalSocketAddr) -> PalResult<PalSocketAddr> {
        self.0.connect(addr)
    }

    fn send(
        &self,
        iov: &[IoSlice<'_>],
        _addr: Option<&PalSocketAddr>,
        force_nonblocking: bool,
    ) -> PalResult<usize> {
        self.0.send(iov, force_nonblocking)
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

    fn delete(&self, mode: DeleteMode) -> PalResult<()> {
        self.0.delete(mode)
    }

    fn close(&self) -> PalResult<()> {
        self.0.close();
        Ok(())
    }

    fn checkpoint_tag(&self) -> u8 {
        b'a'
    }
}
