/*!
 * Socket Address Codec
 * Conversion between Linux `sockaddr` layouts and substrate addresses
 *
 * Layouts:
 * - sockaddr_un: family (2) + sun_path (up to 108), pathname/abstract/unnamed
 * - sockaddr_in: family (2) + port (2, BE) + addr (4) + zero (8) = 16
 * - sockaddr_in6: family (2) + port (2, BE) + flowinfo (4, BE) + addr (16)
 *   + scope_id (4) = 28
 */

use super::types::AddressFamily;
use crate::core::errors::{SockError, SockResult};
use crate::core::limits::{SOCKADDR_FAMILY_LEN, UNIX_PATH_MAX};
use crate::substrate::PalSocketAddr;
use nix::errno::Errno;
use nix::libc;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};

pub const SOCKADDR_IN_LEN: usize = 16;
pub const SOCKADDR_IN6_LEN: usize = 28;
/// Shortest accepted `sockaddr_in6` (RFC 2133 layout without scope id)
const SOCKADDR_IN6_MIN_LEN: usize = 24;

/// Raw family field of an encoded address
#[inline]
pub fn raw_family(bytes: &[u8]) -> SockResult<i32> {
    match bytes.get(..SOCKADDR_FAMILY_LEN) {
        Some(&[lo, hi]) => Ok(i32::from(u16::from_ne_bytes([lo, hi]))),
        _ => Err(SockError::invalid("address shorter than family field")),
    }
}

/// Decode a caller-supplied address for a socket of `family`
///
/// `AF_UNSPEC` decodes to [`PalSocketAddr::Unspec`].
pub fn decode(family: AddressFamily, bytes: &[u8]) -> SockResult<PalSocketAddr> {
    let raw = raw_family(bytes)?;
    if raw == libc::AF_UNSPEC {
        return Ok(PalSocketAddr::Unspec);
    }
    if raw != family.as_raw() {
        return Err(SockError::posix(
            Errno::EAFNOSUPPORT,
            format!("address family {} on {} socket", raw, family),
        ));
    }

    let body = &bytes[SOCKADDR_FAMILY_LEN..];
    match family {
        AddressFamily::Unix => decode_unix(body),
        AddressFamily::Inet => {
            if bytes.len() < SOCKADDR_IN_LEN {
                return Err(SockError::invalid("sockaddr_in too short"));
            }
            let port = u16::from_be_bytes([body[0], body[1]]);
            let ip = Ipv4Addr::new(body[2], body[3], body[4], body[5]);
            Ok(PalSocketAddr::Ipv4(SocketAddrV4::new(ip, port)))
        }
        AddressFamily::Inet6 => {
            if bytes.len() < SOCKADDR_IN6_MIN_LEN {
                return Err(SockError::invalid("sockaddr_in6 too short"));
            }
            let port = u16::from_be_bytes([body[0], body[1]]);
            let flowinfo = u32::from_be_bytes([body[2], body[3], body[4], body[5]]);
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&body[6..22]);
            let scope_id = match body.get(22..26) {
                Some(&[a, b, c, d]) => u32::from_ne_bytes([a, b, c, d]),
                _ => 0,
            };
            Ok(PalSocketAddr::Ipv6(SocketAddrV6::new(
                Ipv6Addr::from(octets),
                port,
                flowinfo,
                scope_id,
            )))
        }
    }
}

fn decode_unix(path: &[u8]) -> SockResult<PalSocketAddr> {
    if path.len() > UNIX_PATH_MAX {
        return Err(SockError::invalid("sun_path too long"));
    }
    match path.first() {
        None => Ok(PalSocketAddr::Unix(Vec::new())),
        // Abstract names are raw bytes, NULs included
        Some(0) => Ok(PalSocketAddr::Unix(path.to_vec())),
        Some(_) => {
            let end = path.iter().position(|&b| b == 0).unwrap_or(path.len());
            Ok(PalSocketAddr::Unix(path[..end].to_vec()))
        }
    }
}

/// Encode a substrate address into its full Linux layout
pub fn encode(addr: &PalSocketAddr) -> Vec<u8> {
    match addr {
        PalSocketAddr::Unspec => (libc::AF_UNSPEC as u16).to_ne_bytes().to_vec(),
        PalSocketAddr::Unix(path) => {
            let mut out = Vec::with_capacity(SOCKADDR_FAMILY_LEN + path.len() + 1);
            out.extend_from_slice(&(libc::AF_UNIX as u16).to_ne_bytes());
            out.extend_from_slice(path);
            // Pathname addresses carry their terminating NUL
            if path.first().is_some_and(|&b| b != 0) {
                out.push(0);
            }
            out
        }
        PalSocketAddr::Ipv4(v4) => {
            let mut out = vec![0u8; SOCKADDR_IN_LEN];
            out[..2].copy_from_slice(&(libc::AF_INET as u16).to_ne_bytes());
            out[2..4].copy_from_slice(&v4.port().to_be_bytes());
            out[4..8].copy_from_slice(&v4.ip().octets());
            out
        }
        PalSocketAddr::Ipv6(v6) => {
            let mut out = vec![0u8; SOCKADDR_IN6_LEN];
            out[..2].copy_from_slice(&(libc::AF_INET6 as u16).to_ne_bytes());
            out[2..4].copy_from_slice(&v6.port().to_be_bytes());
            out[4..8].copy_from_slice(&v6.flowinfo().to_be_bytes());
            out[8..24].copy_from_slice(&v6.ip().octets());
            out[24..28].copy_from_slice(&v6.scope_id().to_ne_bytes());
            out
        }
    }
}
