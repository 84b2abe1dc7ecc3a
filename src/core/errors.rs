/*!
 * Error Types
 * Socket-layer errors with thiserror and miette diagnostics, and their
 * POSIX error codes
 */

use crate::core::data_structures::InlineString;
use crate::substrate::{pal_to_errno, PalError};
use miette::Diagnostic;
use nix::errno::Errno;
use thiserror::Error;

/// Errors raised by the socket layer
///
/// Every variant maps to exactly one POSIX error code through
/// [`SockError::errno`]; that code is what the VFS boundary returns.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum SockError {
    #[error("Invalid argument: {0}")]
    #[diagnostic(
        code(socket::invalid_argument),
        help("Check flag bits, iovec shape and address buffer sizes.")
    )]
    InvalidArgument(InlineString),

    #[error("Operation not supported: {0}")]
    #[diagnostic(
        code(socket::not_supported),
        help("The socket is not in a state that allows this operation.")
    )]
    NotSupported(InlineString),

    #[error("Out of memory: {0}")]
    #[diagnostic(
        code(socket::out_of_memory),
        help("An allocation for socket state failed. Free resources and retry.")
    )]
    OutOfMemory(InlineString),

    #[error("Substrate error: {0}")]
    #[diagnostic(
        code(socket::substrate),
        help("The I/O substrate rejected the operation.")
    )]
    Substrate(#[from] PalError),

    #[error("{context}: {errno}")]
    #[diagnostic(code(socket::posix))]
    Posix {
        errno: Errno,
        context: InlineString,
    },
}

impl SockError {
    /// Error carrying an explicit POSIX code
    #[inline]
    pub fn posix(errno: Errno, context: impl Into<InlineString>) -> Self {
        SockError::Posix {
            errno,
            context: context.into(),
        }
    }

    #[inline]
    pub fn invalid(context: impl Into<InlineString>) -> Self {
        SockError::InvalidArgument(context.into())
    }

    /// POSIX code reported to the caller
    pub fn errno(&self) -> Errno {
        match self {
            SockError::InvalidArgument(_) | SockError::NotSupported(_) => Errno::EINVAL,
            SockError::OutOfMemory(_) => Errno::ENOMEM,
            SockError::Substrate(err) => pal_to_errno(*err),
            SockError::Posix { errno, .. } => *errno,
        }
    }
}

impl From<std::collections::TryReserveError> for SockError {
    fn from(err: std::collections::TryReserveError) -> Self {
        SockError::OutOfMemory(err.to_string().into())
    }
}

/// Result type for socket-layer operations
pub type SockResult<T> = std::result::Result<T, SockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(SockError::invalid("flags").errno(), Errno::EINVAL);
        assert_eq!(
            SockError::NotSupported("no transport".into()).errno(),
            Errno::EINVAL
        );
        assert_eq!(SockError::OutOfMemory("lock".into()).errno(), Errno::ENOMEM);
        assert_eq!(SockError::from(PalError::TryAgain).errno(), Errno::EAGAIN);
        assert_eq!(
            SockError::posix(Errno::EISCONN, "connect").errno(),
            Errno::EISCONN
        );
    }

    #[test]
    fn test_display() {
        let error = SockError::posix(Errno::ENOTCONN, "getpeername");
        assert!(error.to_string().starts_with("getpeername: ENOTCONN"));

        let error: SockError = PalError::ConnRefused.into();
        assert_eq!(error.to_string(), "Substrate error: Connection refused");
    }

    #[test]
    fn test_try_reserve_failure_is_out_of_memory() {
        let mut buf: Vec<u8> = Vec::new();
        let err = buf.try_reserve(usize::MAX).unwrap_err();
        assert_eq!(SockError::from(err).errno(), Errno::ENOMEM);
    }
}
