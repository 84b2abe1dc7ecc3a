/*!
 * VFS Traits
 * Handle-based filesystem operation table
 */

use super::types::Stat;
use crate::core::errors::SockResult;
use std::io::{IoSlice, IoSliceMut};

/// Generic operations the VFS invokes on an open handle
///
/// The handle type is owned by the filesystem. `close` and `checkout`
/// consume it; everything else borrows it and may run concurrently.
pub trait FsOps: Send + Sync {
    /// Attached handle
    type Handle;

    /// Handle form that survives a checkpoint
    type Detached;

    /// Final release of the handle
    fn close(&self, handle: Self::Handle) -> SockResult<()>;

    fn read(&self, handle: &Self::Handle, buf: &mut [u8]) -> SockResult<usize>;

    fn write(&self, handle: &Self::Handle, buf: &[u8]) -> SockResult<usize>;

    fn readv(&self, handle: &Self::Handle, iov: &mut [IoSliceMut<'_>]) -> SockResult<usize>;

    fn writev(&self, handle: &Self::Handle, iov: &[IoSlice<'_>]) -> SockResult<usize>;

    fn hstat(&self, handle: &Self::Handle) -> SockResult<Stat>;

    /// Apply `fcntl(F_SETFL)` status flags
    fn setflags(&self, handle: &Self::Handle, flags: i32) -> SockResult<()>;

    fn checkout(&self, handle: Self::Handle) -> Self::Detached;

    fn checkin(&self, detached: Self::Detached) -> SockResult<Self::Handle>;
}

/// Filesystem registered under a fixed name
#[derive(Debug, Clone, Copy)]
pub struct BuiltinFs<F: FsOps> {
    pub name: &'static str,
    pub fs_ops: F,
}

impl<F: FsOps> BuiltinFs<F> {
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn ops(&self) -> &F {
        &self.fs_ops
    }
}
