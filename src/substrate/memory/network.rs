/*!
 * In-Process Network
 * Endpoint registry and ephemeral port allocation
 */

use super::datagram::DatagramCore;
use super::stream::StreamCore;
use crate::substrate::errors::{PalError, PalResult};
use crate::substrate::types::{PalSocketAddr, PalSocketKind};
use ahash::RandomState;
use crossbeam_queue::SegQueue;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Registered receiver of connections or datagrams
#[derive(Debug)]
pub(super) enum Endpoint {
    Stream(Weak<StreamCore>),
    Datagram(Weak<DatagramCore>),
}

impl Endpoint {
    fn is_alive(&self) -> bool {
        match self {
            Endpoint::Stream(weak) => weak.strong_count() > 0,
            Endpoint::Datagram(weak) => weak.strong_count() > 0,
        }
    }

    fn owner(&self) -> *const () {
        match self {
            Endpoint::Stream(weak) => weak.as_ptr() as *const (),
            Endpoint::Datagram(weak) => weak.as_ptr() as *const (),
        }
    }
}

type EndpointKey = (PalSocketKind, PalSocketAddr);

/// Shared state of one in-process network
///
/// # Design
/// - Endpoints are keyed by (kind, address), so stream and datagram sockets
///   have separate port spaces
/// - Entries hold weak references; a dead entry counts as vacant
/// - Ephemeral ports are recycled through a lock-free queue
#[derive(Debug)]
pub(super) struct Network {
    endpoints: DashMap<EndpointKey, Endpoint, RandomState>,
    next_port: AtomicU32,
    free_ports: SegQueue<u16>,
}

impl Network {
    pub(super) fn new(ephemeral_port_start: u16) -> Self {
        Self {
            endpoints: DashMap::with_hasher(RandomState::new()),
            next_port: AtomicU32::new(u32::from(ephemeral_port_start)),
            free_ports: SegQueue::new(),
        }
    }

    /// Claim `addr` for `endpoint`
    pub(super) fn register(
        &self,
        kind: PalSocketKind,
        addr: PalSocketAddr,
        endpoint: Endpoint,
    ) -> PalResult<()> {
        match self.endpoints.entry((kind, addr)) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_alive() {
                    return Err(PalError::AddrInUse);
                }
                occupied.insert(endpoint);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(endpoint);
            }
        }
        Ok(())
    }

    /// Drop the registration of `addr` if it still belongs to `owner`
    pub(super) fn unregister<T>(&self, kind: PalSocketKind, addr: &PalSocketAddr, owner: *const T) {
        let key = (kind, addr.clone());
        self.endpoints
            .remove_if(&key, |_, endpoint| endpoint.owner() == owner as *const ());
    }

    fn lookup(&self, kind: PalSocketKind, addr: &PalSocketAddr) -> Option<Endpoint> {
        let exact = (kind, addr.clone());
        let found = self.endpoints.get(&exact).map(|entry| match entry.value() {
            Endpoint::Stream(weak) => Endpoint::Stream(weak.clone()),
            Endpoint::Datagram(weak) => Endpoint::Datagram(weak.clone()),
        });
        if found.is_some() {
            return found;
        }

        let domain = addr.domain()?;
        if addr.is_wildcard() || addr.port() == 0 {
            return None;
        }
        let wildcard = (kind, PalSocketAddr::wildcard(domain, addr.port()));
        self.endpoints.get(&wildcard).map(|entry| match entry.value() {
            Endpoint::Stream(weak) => Endpoint::Stream(weak.clone()),
            Endpoint::Datagram(weak) => Endpoint::Datagram(weak.clone()),
        })
    }

    /// Resolve a listening (or bound) stream socket
    pub(super) fn lookup_stream(&self, addr: &PalSocketAddr) -> Option<Arc<StreamCore>> {
        match self.lookup(PalSocketKind::Stream, addr)? {
            Endpoint::Stream(weak) => weak.upgrade(),
            Endpoint::Datagram(_) => None,
        }
    }

    /// Resolve a bound datagram socket
    pub(super) fn lookup_datagram(&self, addr: &PalSocketAddr) -> Option<Arc<DatagramCore>> {
        match self.lookup(PalSocketKind::Datagram, addr)? {
            Endpoint::Datagram(weak) => weak.upgrade(),
            Endpoint::Stream(_) => None,
        }
    }

    /// Allocate an ephemeral port (recycled first, then fresh)
    pub(super) fn allocate_port(&self) -> PalResult<u16> {
        if let Some(port) = self.free_ports.pop() {
            trace!(port, "recycled ephemeral port");
            return Ok(port);
        }
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        u16::try_from(port).map_err(|_| PalError::AddrNotExist)
    }

    /// Return an ephemeral port for reuse
    pub(super) fn release_port(&self, port: u16) {
        self.free_ports.push(port);
        trace!(port, "released ephemeral port");
    }

    #[cfg(test)]
    pub(super) fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::types::PalSocketDomain;

    #[test]
    fn test_port_recycling() {
        let network = Network::new(50_000);
        let first = network.allocate_port().unwrap();
        let second = network.allocate_port().unwrap();
        assert_eq!(first, 50_000);
        assert_eq!(second, 50_001);

        network.release_port(first);
        assert_eq!(network.allocate_port().unwrap(), first);
    }

    #[test]
    fn test_port_exhaustion() {
        let network = Network::new(u16::MAX);
        assert_eq!(network.allocate_port().unwrap(), u16::MAX);
        assert_eq!(network.allocate_port(), Err(PalError::AddrNotExist));
    }

    #[test]
    fn test_dead_entries_are_vacant() {
        let network = Network::new(50_000);
        let addr = PalSocketAddr::loopback(PalSocketDomain::Ipv4, 7);
        network
            .register(PalSocketKind::Stream, addr.clone(), Endpoint::Stream(Weak::new()))
            .unwrap();
        assert_eq!(network.endpoint_count(), 1);
        assert!(network.lookup_stream(&addr).is_none());

        // A dead registration does not block a new one
        network
            .register(PalSocketKind::Stream, addr, Endpoint::Stream(Weak::new()))
            .unwrap();
    }
}
