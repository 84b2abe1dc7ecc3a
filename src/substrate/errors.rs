/*!
 * Substrate Error Types
 * Native error domain of the I/O substrate and its POSIX translation
 */

use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Substrate operation result
pub type PalResult<T> = Result<T, PalError>;

/// Errors reported by the I/O substrate
///
/// These never leave the socket layer untranslated: every path that returns
/// to the VFS layer goes through [`pal_to_errno`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PalError {
    #[error("Function not implemented")]
    NotImplemented,

    #[error("Operation not supported")]
    NotSupported,

    #[error("Invalid argument")]
    Invalid,

    #[error("Name too long")]
    TooLong,

    #[error("Operation denied")]
    Denied,

    #[error("Handle corrupted")]
    BadHandle,

    #[error("Stream already exists")]
    StreamExists,

    #[error("Stream does not exist")]
    StreamNotExists,

    #[error("Operation interrupted")]
    Interrupted,

    #[error("Buffer overflowed")]
    Overflow,

    #[error("Invalid address")]
    BadAddress,

    #[error("Not enough memory")]
    NoMemory,

    #[error("Inconsistent system state")]
    Inconsistent,

    #[error("Try again")]
    TryAgain,

    #[error("Not a server")]
    NotServer,

    #[error("Not a connection")]
    NotConnection,

    #[error("Connection failed")]
    ConnFailed,

    #[error("Connection failed (broken pipe)")]
    ConnFailedPipe,

    #[error("Connection refused")]
    ConnRefused,

    #[error("Address already in use")]
    AddrInUse,

    #[error("Address does not exist")]
    AddrNotExist,

    #[error("Address family not supported")]
    AfNotSupported,
}

/// Translate a substrate error into the POSIX error domain
///
/// Single translation point between the two domains.
pub const fn pal_to_errno(err: PalError) -> Errno {
    match err {
        PalError::NotImplemented => Errno::ENOSYS,
        PalError::NotSupported | PalError::Denied => Errno::EACCES,
        PalError::Invalid | PalError::NotServer => Errno::EINVAL,
        PalError::TooLong => Errno::ENAMETOOLONG,
        PalError::BadHandle => Errno::EBADF,
        PalError::StreamExists => Errno::EEXIST,
        PalError::StreamNotExists => Errno::ENOENT,
        PalError::Interrupted => Errno::EINTR,
        PalError::Overflow | PalError::BadAddress | PalError::Inconsistent => Errno::EFAULT,
        PalError::NoMemory => Errno::ENOMEM,
        PalError::TryAgain => Errno::EAGAIN,
        PalError::NotConnection => Errno::ENOTCONN,
        PalError::ConnFailed => Errno::ECONNRESET,
        PalError::ConnFailedPipe => Errno::EPIPE,
        PalError::ConnRefused => Errno::ECONNREFUSED,
        PalError::AddrInUse => Errno::EADDRINUSE,
        PalError::AddrNotExist => Errno::EADDRNOTAVAIL,
        PalError::AfNotSupported => Errno::EAFNOSUPPORT,
    }
}
