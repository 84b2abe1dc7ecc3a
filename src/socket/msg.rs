/*!
 * Message Multiplexer
 * Single choke point for every scalar and vectored transfer
 */

use super::handle::SockHandle;
use crate::core::errors::{SockError, SockResult};
use crate::core::limits::{MAX_SOCKADDR_LEN, SOCKADDR_FAMILY_LEN, UIO_MAXIOV};
use nix::errno::Errno;
use nix::sys::socket::MsgFlags;
use std::io::{IoSlice, IoSliceMut};
use tracing::{debug, trace};

/// Caller-provided buffer for a returned socket address
///
/// `len` starts as the declared capacity and is replaced with the full length
/// of the address written; a result larger than the capacity means the address
/// was truncated.
#[derive(Debug)]
pub struct AddrBuf<'a> {
    buf: &'a mut [u8],
    capacity: usize,
    len: usize,
}

impl<'a> AddrBuf<'a> {
    /// Use the whole of `buf`
    pub fn new(buf: &'a mut [u8]) -> Self {
        let capacity = buf.len();
        Self::with_capacity(buf, capacity)
    }

    /// Declare a capacity independently of the backing buffer, as a raw
    /// `msg_namelen` would; checked before any transfer
    pub fn with_capacity(buf: &'a mut [u8], capacity: usize) -> Self {
        Self {
            buf,
            capacity,
            len: capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Full length of the last address written
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.len > self.capacity
    }

    /// Bytes actually stored
    pub fn as_bytes(&self) -> &[u8] {
        let stored = self.len.min(self.capacity).min(self.buf.len());
        &self.buf[..stored]
    }

    fn is_valid(&self) -> bool {
        self.capacity <= self.buf.len()
    }

    pub(crate) fn fill(&mut self, encoded: &[u8]) {
        let n = encoded.len().min(self.capacity).min(self.buf.len());
        self.buf[..n].copy_from_slice(&encoded[..n]);
        self.len = encoded.len();
    }
}

/// Flags honoured by the multiplexer
const SUPPORTED_FLAGS: MsgFlags = MsgFlags::MSG_DONTWAIT.union(MsgFlags::MSG_NOSIGNAL);

fn check_flags(flags: MsgFlags) -> SockResult<()> {
    let unsupported = flags.difference(SUPPORTED_FLAGS);
    if unsupported.is_empty() {
        Ok(())
    } else {
        Err(SockError::posix(
            Errno::EOPNOTSUPP,
            format!("message flags {:#x}", unsupported.bits()),
        ))
    }
}

fn check_iov_shape(lengths: impl ExactSizeIterator<Item = usize>) -> SockResult<()> {
    if lengths.len() > UIO_MAXIOV {
        return Err(SockError::invalid("too many iovec entries"));
    }
    let mut total: usize = 0;
    for len in lengths {
        total = total
            .checked_add(len)
            .filter(|&t| t <= isize::MAX as usize)
            .ok_or_else(|| SockError::invalid("iovec total length overflows"))?;
    }
    Ok(())
}

/// Receive one message into `iov`
///
/// The source address, when requested, is written to `addr`; a length above
/// its capacity signals truncation. Returns the byte count; 0 on a stream
/// means end of file.
pub fn recv_msg(
    sock: &SockHandle,
    iov: &mut [IoSliceMut<'_>],
    addr: Option<&mut AddrBuf<'_>>,
    flags: MsgFlags,
) -> SockResult<usize> {
    check_flags(flags)?;
    check_iov_shape(iov.iter().map(|slice| slice.len()))?;
    if let Some(addr) = &addr {
        if !addr.is_valid() {
            return Err(SockError::invalid("address capacity exceeds its buffer"));
        }
    }

    let force_nonblocking = flags.contains(MsgFlags::MSG_DONTWAIT);
    let size = sock
        .backend()
        .recv(sock, iov, addr, force_nonblocking)?;
    trace!(size, "recv_msg");
    Ok(size)
}

/// Send `iov` as one message, to `addr` if given
///
/// Short transfers are returned as-is.
pub fn send_msg(
    sock: &SockHandle,
    iov: &[IoSlice<'_>],
    addr: Option<&[u8]>,
    flags: MsgFlags,
) -> SockResult<usize> {
    check_flags(flags)?;
    check_iov_shape(iov.iter().map(|slice| slice.len()))?;
    if let Some(addr) = addr {
        if !(SOCKADDR_FAMILY_LEN..=MAX_SOCKADDR_LEN).contains(&addr.len()) {
            return Err(SockError::invalid("bad destination address length"));
        }
    }

    let force_nonblocking = flags.contains(MsgFlags::MSG_DONTWAIT);
    match sock.backend().send(sock, iov, addr, force_nonblocking) {
        Ok(size) => {
            trace!(size, "send_msg");
            Ok(size)
        }
        Err(err) => {
            if err.errno() == Errno::EPIPE && !flags.contains(MsgFlags::MSG_NOSIGNAL) {
                debug!("broken pipe; SIGPIPE is due to the caller");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_buf_truncation() {
        let mut backing = [0u8; 16];
        let mut buf = AddrBuf::new(&mut backing);
        buf.fill(&[7u8; 28]);
        assert_eq!(buf.len(), 28);
        assert!(buf.is_truncated());
        assert_eq!(buf.as_bytes(), &[7u8; 16]);
    }

    #[test]
    fn test_addr_buf_declared_capacity() {
        let mut backing = [0u8; 8];
        assert!(!AddrBuf::with_capacity(&mut backing, 16).is_valid());

        let mut buf = AddrBuf::with_capacity(&mut backing, 4);
        buf.fill(&[1, 2, 3]);
        assert!(!buf.is_truncated());
        assert_eq!(buf.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_flag_validation() {
        assert!(check_flags(MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_NOSIGNAL).is_ok());
        let err = check_flags(MsgFlags::MSG_OOB).unwrap_err();
        assert_eq!(err.errno(), Errno::EOPNOTSUPP);
    }

    #[test]
    fn test_iov_shape() {
        assert!(check_iov_shape([1usize, 2, 3].into_iter()).is_ok());
        assert!(check_iov_shape(vec![1usize; UIO_MAXIOV + 1].into_iter()).is_err());
        assert!(check_iov_shape([usize::MAX / 2, usize::MAX / 2].into_iter()).is_err());
    }
}
