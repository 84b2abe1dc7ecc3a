/*!
 * Socket Types
 * Families, socket types and connection states
 */

use crate::core::errors::{SockError, SockResult};
use crate::substrate::{PalSocketDomain, PalSocketKind};
use nix::errno::Errno;
use nix::libc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address family of a socket; immutable after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFamily {
    Unix,
    Inet,
    Inet6,
}

impl AddressFamily {
    /// Parse a raw `AF_*` value; `None` for families without a backend
    #[inline]
    pub const fn from_raw(domain: i32) -> Option<Self> {
        match domain {
            libc::AF_UNIX => Some(AddressFamily::Unix),
            libc::AF_INET => Some(AddressFamily::Inet),
            libc::AF_INET6 => Some(AddressFamily::Inet6),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_raw(self) -> i32 {
        match self {
            AddressFamily::Unix => libc::AF_UNIX,
            AddressFamily::Inet => libc::AF_INET,
            AddressFamily::Inet6 => libc::AF_INET6,
        }
    }

    #[inline]
    pub const fn pal_domain(self) -> PalSocketDomain {
        match self {
            AddressFamily::Unix => PalSocketDomain::Unix,
            AddressFamily::Inet => PalSocketDomain::Ipv4,
            AddressFamily::Inet6 => PalSocketDomain::Ipv6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Unix => write!(f, "AF_UNIX"),
            AddressFamily::Inet => write!(f, "AF_INET"),
            AddressFamily::Inet6 => write!(f, "AF_INET6"),
        }
    }
}

/// Socket type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SockType {
    Stream,
    Datagram,
}

impl SockType {
    /// Parse the `type` argument of `socket(2)`
    ///
    /// Returns the type and whether `SOCK_NONBLOCK` was requested.
    /// `SOCK_CLOEXEC` is accepted and left to the descriptor table.
    pub fn parse(raw: i32) -> SockResult<(Self, bool)> {
        let flags = libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC;
        let sock_type = match raw & !flags {
            libc::SOCK_STREAM => SockType::Stream,
            libc::SOCK_DGRAM => SockType::Datagram,
            other => {
                return Err(SockError::invalid(format!("unsupported socket type {}", other)))
            }
        };
        Ok((sock_type, raw & libc::SOCK_NONBLOCK != 0))
    }

    #[inline]
    pub const fn as_raw(self) -> i32 {
        match self {
            SockType::Stream => libc::SOCK_STREAM,
            SockType::Datagram => libc::SOCK_DGRAM,
        }
    }

    #[inline]
    pub const fn pal_kind(self) -> PalSocketKind {
        match self {
            SockType::Stream => PalSocketKind::Stream,
            SockType::Datagram => PalSocketKind::Datagram,
        }
    }
}

/// Connection state owned by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnState {
    #[default]
    New,
    Bound,
    Listening,
    Connected,
    /// Stream connection shut down by `disconnect`
    Disconnected,
}

impl ConnState {
    /// Error for a connect attempt in this state, if any
    pub(crate) fn connect_error(self) -> Option<SockError> {
        match self {
            ConnState::Connected => Some(SockError::posix(Errno::EISCONN, "already connected")),
            ConnState::Listening => Some(SockError::invalid("socket is listening")),
            _ => None,
        }
    }
}
