/*!
 * Library OS Socket Layer
 * Generic socket handles, family backends and the socket filesystem
 */

pub mod core;
pub mod monitoring;
pub mod socket;
pub mod substrate;
pub mod vfs;

// Re-exports
pub use crate::core::{SockError, SockResult};
pub use monitoring::{init_tracing, span_operation, OperationSpan};
pub use socket::{
    recv_msg, send_msg, AddrBuf, AddressFamily, Backend, ConnState, DetachedSock, SockGuard,
    SockHandle, SockRecord, SockState, SockType,
};
pub use substrate::{
    pal_to_errno, MemSubstrate, MemSubstrateConfig, PalError, Substrate, SubstrateStats,
};
pub use vfs::{
    syscall_ret, syscall_status, BuiltinFs, FsOps, SocketFs, Stat, SOCKET_BUILTIN_FS,
};
