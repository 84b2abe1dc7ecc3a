/*!
 * Socket Filesystem
 * Generic file operations for socket handles, registered as "socket"
 *
 * Scalar I/O is funneled through the message multiplexer with a
 * one-element vector; `stat` never reaches the substrate.
 */

use super::traits::{BuiltinFs, FsOps};
use super::types::{FileType, Permissions, Stat};
use crate::core::errors::{SockError, SockResult};
use crate::core::limits::PAGE_SIZE;
use crate::socket::{recv_msg, send_msg, DetachedSock, SockHandle};
use nix::libc;
use nix::sys::socket::MsgFlags;
use std::io::{IoSlice, IoSliceMut};
use tracing::{trace, warn};

/// Operation table for socket handles
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketFs;

/// Registration entry for the socket filesystem
pub static SOCKET_BUILTIN_FS: BuiltinFs<SocketFs> = BuiltinFs {
    name: "socket",
    fs_ops: SocketFs,
};

impl FsOps for SocketFs {
    type Handle = SockHandle;
    type Detached = DetachedSock;

    fn close(&self, handle: SockHandle) -> SockResult<()> {
        handle.close()
    }

    fn read(&self, handle: &SockHandle, buf: &mut [u8]) -> SockResult<usize> {
        recv_msg(handle, &mut [IoSliceMut::new(buf)], None, MsgFlags::empty())
    }

    fn write(&self, handle: &SockHandle, buf: &[u8]) -> SockResult<usize> {
        send_msg(handle, &[IoSlice::new(buf)], None, MsgFlags::empty())
    }

    fn readv(&self, handle: &SockHandle, iov: &mut [IoSliceMut<'_>]) -> SockResult<usize> {
        recv_msg(handle, iov, None, MsgFlags::empty())
    }

    fn writev(&self, handle: &SockHandle, iov: &[IoSlice<'_>]) -> SockResult<usize> {
        send_msg(handle, iov, None, MsgFlags::empty())
    }

    fn hstat(&self, _handle: &SockHandle) -> SockResult<Stat> {
        Ok(Stat {
            st_dev: 0,
            st_ino: 0,
            st_mode: FileType::Socket.mode_bits() | Permissions::all().mode,
            st_nlink: 1,
            st_size: 0,
            st_blksize: PAGE_SIZE,
        })
    }

    /// Only `O_NONBLOCK` is settable; the substrate attribute is written only
    /// when it changes
    fn setflags(&self, handle: &SockHandle, flags: i32) -> SockResult<()> {
        if flags & !libc::O_NONBLOCK != 0 {
            return Err(SockError::invalid(format!(
                "unsupported status flags {:#o}",
                flags & !libc::O_NONBLOCK
            )));
        }
        let nonblocking = flags & libc::O_NONBLOCK != 0;

        let guard = handle.lock();
        let Some(transport) = guard.transport() else {
            warn!(
                family = %handle.family(),
                "setflags on a socket without a transport object"
            );
            return Err(SockError::NotSupported(
                "setflags before the transport object exists".into(),
            ));
        };

        let mut attr = transport.attributes_query()?;
        if attr.nonblocking != nonblocking {
            attr.nonblocking = nonblocking;
            transport.attributes_set(&attr)?;
            trace!(id = transport.id(), nonblocking, "non-blocking mode updated");
        }
        handle.store_nonblocking(nonblocking);
        Ok(())
    }

    fn checkout(&self, handle: SockHandle) -> DetachedSock {
        handle.checkout()
    }

    fn checkin(&self, detached: DetachedSock) -> SockResult<SockHandle> {
        detached.checkin()
    }
}

/// Byte count or negated errno, as returned to the syscall layer
pub fn syscall_ret(result: SockResult<usize>) -> isize {
    match result {
        Ok(size) => isize::try_from(size).unwrap_or(isize::MAX),
        Err(err) => -(err.errno() as isize),
    }
}

/// Zero or negated errno
pub fn syscall_status(result: SockResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => -(err.errno() as i32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::PalError;
    use nix::errno::Errno;

    #[test]
    fn test_registration_name() {
        assert_eq!(SOCKET_BUILTIN_FS.name(), "socket");
    }

    #[test]
    fn test_syscall_ret() {
        assert_eq!(syscall_ret(Ok(12)), 12);
        assert_eq!(
            syscall_ret(Err(PalError::TryAgain.into())),
            -(Errno::EAGAIN as isize)
        );
        assert_eq!(syscall_status(Ok(())), 0);
        assert_eq!(
            syscall_status(Err(SockError::NotSupported("x".into()))),
            -libc::EINVAL
        );
    }

    #[test]
    fn test_setflags_and_setsockopt_do_not_lose_updates() {
        use crate::substrate::{MemSubstrate, Substrate};
        use std::sync::Arc;
        use std::thread;

        let substrate: Arc<dyn Substrate> = Arc::new(MemSubstrate::new());
        let sock = Arc::new(
            SockHandle::create(substrate, libc::AF_INET, libc::SOCK_STREAM, 0).unwrap(),
        );
        let fs = SOCKET_BUILTIN_FS.ops();

        let flags = {
            let sock = Arc::clone(&sock);
            thread::spawn(move || {
                for round in 0..200 {
                    let flags = if round % 2 == 0 { libc::O_NONBLOCK } else { 0 };
                    fs.setflags(&sock, flags).unwrap();
                }
                fs.setflags(&sock, libc::O_NONBLOCK).unwrap();
            })
        };
        let options = {
            let sock = Arc::clone(&sock);
            thread::spawn(move || {
                for round in 0..200 {
                    let value = (round % 2) as i32;
                    sock.setsockopt(libc::SOL_SOCKET, libc::SO_KEEPALIVE, &value.to_ne_bytes())
                        .unwrap();
                }
                sock.setsockopt(libc::SOL_SOCKET, libc::SO_KEEPALIVE, &1i32.to_ne_bytes())
                    .unwrap();
            })
        };
        flags.join().unwrap();
        options.join().unwrap();

        let attr = sock.transport().unwrap().attributes_query().unwrap();
        assert!(attr.nonblocking);
        assert!(attr.socket.keepalive);
        assert_eq!(attr.socket, sock.lock().options);
    }
}
