/*!
 * Substrate Types
 * Addresses, attributes, and options exchanged with the I/O substrate
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};

/// Socket domain understood by the substrate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PalSocketDomain {
    Unix,
    Ipv4,
    Ipv6,
}

/// Transfer semantics of a substrate socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PalSocketKind {
    /// Connection-oriented byte stream
    Stream,
    /// Connectionless, message-preserving
    Datagram,
}

/// Options applied when a substrate object is created or accepted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamOptions {
    pub nonblocking: bool,
}

impl StreamOptions {
    #[inline]
    pub const fn nonblocking(nonblocking: bool) -> Self {
        Self { nonblocking }
    }
}

/// Socket address in the substrate's own representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PalSocketAddr {
    /// No address; used to dissolve a datagram association
    Unspec,
    Ipv4(SocketAddrV4),
    Ipv6(SocketAddrV6),
    /// Raw `sun_path` bytes: empty for unnamed sockets, leading NUL for abstract names
    Unix(Vec<u8>),
}

impl PalSocketAddr {
    /// Domain of this address, `None` for `Unspec`
    #[inline]
    pub fn domain(&self) -> Option<PalSocketDomain> {
        match self {
            PalSocketAddr::Unspec => None,
            PalSocketAddr::Ipv4(_) => Some(PalSocketDomain::Ipv4),
            PalSocketAddr::Ipv6(_) => Some(PalSocketDomain::Ipv6),
            PalSocketAddr::Unix(_) => Some(PalSocketDomain::Unix),
        }
    }

    /// Port of an IP address, 0 for everything else
    #[inline]
    pub fn port(&self) -> u16 {
        match self {
            PalSocketAddr::Ipv4(addr) => addr.port(),
            PalSocketAddr::Ipv6(addr) => addr.port(),
            _ => 0,
        }
    }

    /// Replace the port of an IP address; other addresses are returned unchanged
    #[must_use]
    pub fn with_port(&self, port: u16) -> Self {
        match self {
            PalSocketAddr::Ipv4(addr) => PalSocketAddr::Ipv4(SocketAddrV4::new(*addr.ip(), port)),
            PalSocketAddr::Ipv6(addr) => PalSocketAddr::Ipv6(SocketAddrV6::new(
                *addr.ip(),
                port,
                addr.flowinfo(),
                addr.scope_id(),
            )),
            other => other.clone(),
        }
    }

    /// Whether the IP part is the unspecified (wildcard) address
    #[inline]
    pub fn is_wildcard(&self) -> bool {
        match self {
            PalSocketAddr::Ipv4(addr) => addr.ip().is_unspecified(),
            PalSocketAddr::Ipv6(addr) => addr.ip().is_unspecified(),
            _ => false,
        }
    }

    /// Wildcard address of a domain with the given port
    pub fn wildcard(domain: PalSocketDomain, port: u16) -> Self {
        match domain {
            PalSocketDomain::Ipv4 => {
                PalSocketAddr::Ipv4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
            }
            PalSocketDomain::Ipv6 => {
                PalSocketAddr::Ipv6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0))
            }
            PalSocketDomain::Unix => PalSocketAddr::Unix(Vec::new()),
        }
    }

    /// Loopback address of a domain with the given port
    pub fn loopback(domain: PalSocketDomain, port: u16) -> Self {
        match domain {
            PalSocketDomain::Ipv4 => {
                PalSocketAddr::Ipv4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
            }
            PalSocketDomain::Ipv6 => {
                PalSocketAddr::Ipv6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, port, 0, 0))
            }
            PalSocketDomain::Unix => PalSocketAddr::Unix(Vec::new()),
        }
    }
}

impl fmt::Display for PalSocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PalSocketAddr::Unspec => write!(f, "unspec"),
            PalSocketAddr::Ipv4(addr) => write!(f, "{}", addr),
            PalSocketAddr::Ipv6(addr) => write!(f, "{}", addr),
            PalSocketAddr::Unix(path) if path.is_empty() => write!(f, "unix:<unnamed>"),
            PalSocketAddr::Unix(path) if path[0] == 0 => {
                write!(f, "unix:@{}", String::from_utf8_lossy(&path[1..]))
            }
            PalSocketAddr::Unix(path) => write!(f, "unix:{}", String::from_utf8_lossy(path)),
        }
    }
}

/// Socket-level attributes stored by the substrate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketAttr {
    /// Linger timeout in seconds, 0 when lingering is off
    pub linger: u64,
    pub recv_buf_size: usize,
    pub send_buf_size: usize,
    pub receive_timeout_us: u64,
    pub send_timeout_us: u64,
    pub reuseaddr: bool,
    pub keepalive: bool,
    pub tcp_cork: bool,
    pub tcp_nodelay: bool,
    pub ipv6_v6only: bool,
}

/// Attribute record of a substrate stream object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAttr {
    pub nonblocking: bool,
    /// Bytes ready to be received; informational only
    pub pending_size: u64,
    pub socket: SocketAttr,
}

/// Directions torn down by [`Transport::delete`](super::Transport::delete)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    All,
    Read,
    Write,
}
