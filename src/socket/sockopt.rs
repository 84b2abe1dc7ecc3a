/*!
 * Socket Options
 * `SOL_SOCKET` options shared by every backend, plus value codecs
 *
 * Option values live in the guarded backend state and are mirrored into the
 * substrate attribute record whenever a transport object exists.
 */

use super::handle::SockGuard;
use super::types::ConnState;
use crate::core::errors::{SockError, SockResult};
use crate::core::limits::MIN_SOCK_BUF_SIZE;
use nix::errno::Errno;
use nix::libc;
use tracing::trace;

const INT_LEN: usize = std::mem::size_of::<i32>();
const LINGER_LEN: usize = 2 * INT_LEN;
const TIMEVAL_LEN: usize = 2 * std::mem::size_of::<i64>();

pub(crate) fn unknown_option(level: i32, name: i32) -> SockError {
    SockError::posix(
        Errno::ENOPROTOOPT,
        format!("option {} at level {}", name, level),
    )
}

/// Decode an `int` option value
pub(crate) fn read_int(optval: &[u8]) -> SockResult<i32> {
    match optval.get(..INT_LEN) {
        Some(&[a, b, c, d]) => Ok(i32::from_ne_bytes([a, b, c, d])),
        _ => Err(SockError::invalid("option value shorter than int")),
    }
}

/// Encode as much of `bytes` as `optval` holds; returns the length written
pub(crate) fn write_bytes(optval: &mut [u8], bytes: &[u8]) -> usize {
    let n = bytes.len().min(optval.len());
    optval[..n].copy_from_slice(&bytes[..n]);
    n
}

#[inline]
pub(crate) fn write_int(optval: &mut [u8], value: i32) -> usize {
    write_bytes(optval, &value.to_ne_bytes())
}

#[inline]
fn bool_int(value: bool) -> i32 {
    i32::from(value)
}

fn saturating_int(value: impl TryInto<i32>) -> i32 {
    value.try_into().unwrap_or(i32::MAX)
}

/// Kernel-side buffer size: the request is doubled, then floored
fn buffer_size(requested: i32) -> usize {
    usize::try_from(requested)
        .unwrap_or(0)
        .saturating_mul(2)
        .max(MIN_SOCK_BUF_SIZE)
}

fn read_timeval_us(optval: &[u8]) -> SockResult<u64> {
    let Some(bytes) = optval.get(..TIMEVAL_LEN) else {
        return Err(SockError::invalid("option value shorter than timeval"));
    };
    let mut sec = [0u8; 8];
    let mut usec = [0u8; 8];
    sec.copy_from_slice(&bytes[..8]);
    usec.copy_from_slice(&bytes[8..]);
    let sec = i64::from_ne_bytes(sec);
    let usec = i64::from_ne_bytes(usec);

    if !(0..1_000_000).contains(&usec) {
        return Err(SockError::posix(Errno::EDOM, "timeval microseconds out of range"));
    }
    let sec = u64::try_from(sec).unwrap_or(0);
    Ok(sec.saturating_mul(1_000_000).saturating_add(usec as u64))
}

fn timeval_bytes(us: u64) -> [u8; TIMEVAL_LEN] {
    let sec = i64::try_from(us / 1_000_000).unwrap_or(i64::MAX);
    let usec = (us % 1_000_000) as i64;
    let mut out = [0u8; TIMEVAL_LEN];
    out[..8].copy_from_slice(&sec.to_ne_bytes());
    out[8..].copy_from_slice(&usec.to_ne_bytes());
    out
}

/// Read a `SOL_SOCKET` option
pub(crate) fn get_socket_option(
    guard: &SockGuard<'_>,
    name: i32,
    optval: &mut [u8],
) -> SockResult<usize> {
    let sock = guard.sock();
    let options = &guard.options;

    let value = match name {
        libc::SO_TYPE => sock.sock_type().as_raw(),
        libc::SO_DOMAIN => sock.family().as_raw(),
        libc::SO_PROTOCOL => sock.protocol(),
        libc::SO_ACCEPTCONN => bool_int(guard.conn == ConnState::Listening),
        // Errors are reported synchronously, so none is ever pending
        libc::SO_ERROR => 0,
        libc::SO_REUSEADDR => bool_int(options.reuseaddr),
        libc::SO_KEEPALIVE => bool_int(options.keepalive),
        libc::SO_RCVBUF => saturating_int(options.recv_buf_size),
        libc::SO_SNDBUF => saturating_int(options.send_buf_size),
        libc::SO_LINGER => {
            let mut linger = [0u8; LINGER_LEN];
            linger[..INT_LEN].copy_from_slice(&bool_int(options.linger > 0).to_ne_bytes());
            linger[INT_LEN..].copy_from_slice(&saturating_int(options.linger).to_ne_bytes());
            return Ok(write_bytes(optval, &linger));
        }
        libc::SO_RCVTIMEO => {
            return Ok(write_bytes(optval, &timeval_bytes(options.receive_timeout_us)))
        }
        libc::SO_SNDTIMEO => {
            return Ok(write_bytes(optval, &timeval_bytes(options.send_timeout_us)))
        }
        _ => return Err(unknown_option(libc::SOL_SOCKET, name)),
    };
    Ok(write_int(optval, value))
}

/// Update a `SOL_SOCKET` option
pub(crate) fn set_socket_option(
    guard: &mut SockGuard<'_>,
    name: i32,
    optval: &[u8],
) -> SockResult<()> {
    match name {
        libc::SO_TYPE | libc::SO_DOMAIN | libc::SO_PROTOCOL | libc::SO_ACCEPTCONN
        | libc::SO_ERROR => {
            return Err(SockError::posix(Errno::ENOPROTOOPT, "read-only socket option"))
        }
        libc::SO_REUSEADDR => guard.options.reuseaddr = read_int(optval)? != 0,
        libc::SO_KEEPALIVE => guard.options.keepalive = read_int(optval)? != 0,
        libc::SO_RCVBUF => guard.options.recv_buf_size = buffer_size(read_int(optval)?),
        libc::SO_SNDBUF => guard.options.send_buf_size = buffer_size(read_int(optval)?),
        libc::SO_LINGER => {
            if optval.len() < LINGER_LEN {
                return Err(SockError::invalid("option value shorter than linger"));
            }
            let onoff = read_int(optval)?;
            let seconds = read_int(&optval[INT_LEN..])?;
            guard.options.linger = if onoff != 0 {
                u64::try_from(seconds).unwrap_or(0)
            } else {
                0
            };
        }
        libc::SO_RCVTIMEO => guard.options.receive_timeout_us = read_timeval_us(optval)?,
        libc::SO_SNDTIMEO => guard.options.send_timeout_us = read_timeval_us(optval)?,
        _ => return Err(unknown_option(libc::SOL_SOCKET, name)),
    }
    trace!(name, "socket option updated");
    push_options(guard)
}

/// Mirror the option record into the substrate, if attached
pub(crate) fn push_options(guard: &SockGuard<'_>) -> SockResult<()> {
    let Some(transport) = guard.transport() else {
        return Ok(());
    };
    let mut attr = transport.attributes_query()?;
    if attr.socket != guard.options {
        attr.socket = guard.options;
        transport.attributes_set(&attr)?;
    }
    Ok(())
}
