/*!
 * Virtual File System Module
 * Handle-based filesystem registration for sockets
 */

pub mod socket_fs;
pub mod traits;
pub mod types;

// Re-exports
pub use socket_fs::{syscall_ret, syscall_status, SocketFs, SOCKET_BUILTIN_FS};
pub use traits::{BuiltinFs, FsOps};
pub use types::{FileType, Permissions, Stat};
