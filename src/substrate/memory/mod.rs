/*!
 * In-Process Substrate
 * Loopback-only substrate: sockets created here can reach each other and
 * nothing else
 */

mod channel;
mod config;
mod datagram;
mod network;
mod stream;

pub use config::MemSubstrateConfig;

use crate::substrate::errors::{PalError, PalResult};
use crate::substrate::traits::{PalHandle, Substrate};
use crate::substrate::types::{PalSocketDomain, PalSocketKind, SocketAttr, StreamAttr, StreamOptions};
use datagram::{DatagramCore, MemDatagram};
use network::Network;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stream::{MemStream, StreamCore};
use tracing::debug;

/// Lifetime counters shared by every object of one substrate
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) sockets_created: AtomicU64,
    pub(crate) sockets_closed: AtomicU64,
    pub(crate) attr_updates: AtomicU64,
    pub(crate) connections_accepted: AtomicU64,
}

/// Snapshot of substrate activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstrateStats {
    pub sockets_created: u64,
    pub sockets_closed: u64,
    /// Calls to `attributes_set` across all objects
    pub attr_updates: u64,
    pub connections_accepted: u64,
}

impl SubstrateStats {
    /// Objects created and not yet closed
    #[inline]
    pub fn open_sockets(&self) -> u64 {
        self.sockets_created.saturating_sub(self.sockets_closed)
    }
}

/// In-process substrate
///
/// Cloning yields another handle to the same network.
#[derive(Debug, Clone)]
pub struct MemSubstrate {
    config: Arc<MemSubstrateConfig>,
    network: Arc<Network>,
    counters: Arc<Counters>,
}

impl MemSubstrate {
    pub fn new() -> Self {
        Self::with_config(MemSubstrateConfig::default())
    }

    pub fn with_config(config: MemSubstrateConfig) -> Self {
        debug!(
            buf_size = config.default_buf_size,
            datagram_queue = config.max_datagram_queue,
            "in-process substrate created"
        );
        Self {
            network: Arc::new(Network::new(config.ephemeral_port_start)),
            config: Arc::new(config),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn stats(&self) -> SubstrateStats {
        SubstrateStats {
            sockets_created: self.counters.sockets_created.load(Ordering::Relaxed),
            sockets_closed: self.counters.sockets_closed.load(Ordering::Relaxed),
            attr_updates: self.counters.attr_updates.load(Ordering::Relaxed),
            connections_accepted: self.counters.connections_accepted.load(Ordering::Relaxed),
        }
    }

    fn initial_attr(&self, options: StreamOptions) -> StreamAttr {
        StreamAttr {
            nonblocking: options.nonblocking,
            pending_size: 0,
            socket: SocketAttr {
                recv_buf_size: self.config.default_buf_size,
                send_buf_size: self.config.default_buf_size,
                ..SocketAttr::default()
            },
        }
    }
}

impl Default for MemSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl Substrate for MemSubstrate {
    fn name(&self) -> &str {
        "memory"
    }

    fn socket_create(
        &self,
        domain: PalSocketDomain,
        kind: PalSocketKind,
        options: StreamOptions,
    ) -> PalResult<PalHandle> {
        let attr = self.initial_attr(options);
        let network = Arc::clone(&self.network);
        let counters = Arc::clone(&self.counters);
        let config = Arc::clone(&self.config);

        let handle = match (domain, kind) {
            (_, PalSocketKind::Stream) => PalHandle::new(MemStream(StreamCore::new(
                domain, network, counters, config, attr,
            ))),
            (PalSocketDomain::Unix, PalSocketKind::Datagram) => {
                return Err(PalError::NotSupported)
            }
            (_, PalSocketKind::Datagram) => PalHandle::new(MemDatagram(DatagramCore::new(
                domain, network, counters, config, attr,
            ))),
        };
        debug!(?domain, ?kind, id = handle.id(), "substrate object created");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::types::{DeleteMode, PalSocketAddr};
    use std::io::{IoSlice, IoSliceMut};

    fn stream(substrate: &MemSubstrate, domain: PalSocketDomain) -> PalHandle {
        substrate
            .socket_create(domain, PalSocketKind::Stream, StreamOptions::default())
            .unwrap()
    }

    #[test]
    fn test_stream_connect_accept_echo() {
        let substrate = MemSubstrate::new();
        let listener = stream(&substrate, PalSocketDomain::Ipv4);
        let mut addr = PalSocketAddr::loopback(PalSocketDomain::Ipv4, 0);
        listener.bind(&mut addr).unwrap();
        assert_ne!(addr.port(), 0);
        listener.listen(4).unwrap();

        let client = stream(&substrate, PalSocketDomain::Ipv4);
        let client_local = client.connect(&addr).unwrap();

        let accepted = listener.accept(StreamOptions::default()).unwrap();
        assert_eq!(accepted.peer, client_local);
        assert_eq!(accepted.local, addr);

        client.send(&[IoSlice::new(b"ping")], None, false).unwrap();
        let mut buf = [0u8; 8];
        let (n, from) = accepted
            .handle
            .recv(&mut [IoSliceMut::new(&mut buf)], false)
            .unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, Some(client_local));

        client.delete(DeleteMode::Write).unwrap();
        assert_eq!(
            accepted.handle.recv(&mut [IoSliceMut::new(&mut buf)], false),
            Ok((0, Some(accepted.peer.clone())))
        );
    }

    #[test]
    fn test_backlog_bounds_pending_connections() {
        let substrate = MemSubstrate::new();
        let listener = stream(&substrate, PalSocketDomain::Ipv6);
        let mut addr = PalSocketAddr::loopback(PalSocketDomain::Ipv6, 0);
        listener.bind(&mut addr).unwrap();
        listener.listen(1).unwrap();

        let first = stream(&substrate, PalSocketDomain::Ipv6);
        first.connect(&addr).unwrap();
        let second = stream(&substrate, PalSocketDomain::Ipv6);
        assert_eq!(second.connect(&addr), Err(PalError::ConnRefused));

        listener.accept(StreamOptions::default()).unwrap();
        second.connect(&addr).unwrap();
    }

    #[test]
    fn test_nonblocking_accept_on_empty_queue() {
        let substrate = MemSubstrate::new();
        let listener = substrate
            .socket_create(
                PalSocketDomain::Unix,
                PalSocketKind::Stream,
                StreamOptions::nonblocking(true),
            )
            .unwrap();
        let mut addr = PalSocketAddr::Unix(b"/run/test.sock".to_vec());
        listener.bind(&mut addr).unwrap();
        listener.listen(8).unwrap();
        assert_eq!(
            listener.accept(StreamOptions::default()).unwrap_err(),
            PalError::TryAgain
        );
    }

    #[test]
    fn test_address_in_use_until_close() {
        let substrate = MemSubstrate::new();
        let mut addr = PalSocketAddr::Unix(b"/run/busy.sock".to_vec());
        let first = stream(&substrate, PalSocketDomain::Unix);
        first.bind(&mut addr.clone()).unwrap();

        let second = stream(&substrate, PalSocketDomain::Unix);
        assert_eq!(second.bind(&mut addr.clone()), Err(PalError::AddrInUse));

        first.close().unwrap();
        second.bind(&mut addr).unwrap();
    }

    #[test]
    fn test_datagram_roundtrip_and_truncation() {
        let substrate = MemSubstrate::new();
        let receiver = substrate
            .socket_create(
                PalSocketDomain::Ipv4,
                PalSocketKind::Datagram,
                StreamOptions::default(),
            )
            .unwrap();
        let mut addr = PalSocketAddr::wildcard(PalSocketDomain::Ipv4, 0);
        receiver.bind(&mut addr).unwrap();
        let target = PalSocketAddr::loopback(PalSocketDomain::Ipv4, addr.port());

        let sender = substrate
            .socket_create(
                PalSocketDomain::Ipv4,
                PalSocketKind::Datagram,
                StreamOptions::default(),
            )
            .unwrap();
        let sent = sender
            .send(&[IoSlice::new(b"hello"), IoSlice::new(b"world")], Some(&target), false)
            .unwrap();
        assert_eq!(sent, 10);

        let mut buf = [0u8; 4];
        let (n, from) = receiver
            .recv(&mut [IoSliceMut::new(&mut buf)], false)
            .unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, b"hell");
        assert!(matches!(from, Some(PalSocketAddr::Ipv4(_))));

        assert_eq!(
            receiver.recv(&mut [IoSliceMut::new(&mut buf)], true).unwrap_err(),
            PalError::TryAgain
        );
    }

    #[test]
    fn test_unix_datagram_rejected() {
        let substrate = MemSubstrate::new();
        let result = substrate.socket_create(
            PalSocketDomain::Unix,
            PalSocketKind::Datagram,
            StreamOptions::default(),
        );
        assert_eq!(result.unwrap_err(), PalError::NotSupported);
    }

    #[test]
    fn test_stats_track_lifecycle() {
        let substrate = MemSubstrate::new();
        let handle = stream(&substrate, PalSocketDomain::Ipv4);
        let mut attr = handle.attributes_query().unwrap();
        attr.nonblocking = true;
        handle.attributes_set(&attr).unwrap();
        handle.close().unwrap();

        let stats = substrate.stats();
        assert_eq!(stats.sockets_created, 1);
        assert_eq!(stats.sockets_closed, 1);
        assert_eq!(stats.attr_updates, 1);
        assert_eq!(stats.open_sockets(), 0);
    }
}
