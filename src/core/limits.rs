/*!
 * System Limits and Constants
 *
 * Centralized location for socket-layer limits, thresholds, and magic numbers.
 * Organized by domain for maintainability and discoverability.
 *
 * - Performance-critical constants are marked with [PERF]
 * - Linux-compatible values are marked with [LINUX-COMPAT]
 */

// =============================================================================
// SOCKET LIMITS
// =============================================================================

/// Maximum pending connections queued per listening socket (4096)
/// Shared by every backend: requested backlogs are clamped to this value
pub const SHIM_SOCK_MAX_CONNS: u32 = 4096;

/// Maximum iovec entries accepted by a single transfer
/// [LINUX-COMPAT] Matches UIO_MAXIOV
pub const UIO_MAXIOV: usize = 1024;

/// Largest socket address accepted from callers
/// [LINUX-COMPAT] sizeof(struct sockaddr_storage)
pub const MAX_SOCKADDR_LEN: usize = 128;

/// Size of the `sa_family` header prefixing every socket address
pub const SOCKADDR_FAMILY_LEN: usize = 2;

/// Maximum `sun_path` length of a Unix-domain address
/// [LINUX-COMPAT] sizeof(((struct sockaddr_un*)0)->sun_path)
pub const UNIX_PATH_MAX: usize = 108;

// =============================================================================
// FILE ATTRIBUTES
// =============================================================================

/// Block size reported by `stat` on socket handles
/// [PERF] Aligned with common page size
pub const PAGE_SIZE: u64 = 4096;

/// Permission bits reported for every socket (rwxrwxrwx)
pub const PERM_RWXRWXRWX: u32 = 0o777;

// =============================================================================
// SUBSTRATE DEFAULTS
// =============================================================================

/// Default send/receive buffer size for in-process streams (64KB)
/// [LINUX-COMPAT] Close to the Linux default socket buffer
pub const DEFAULT_SOCK_BUF_SIZE: usize = 64 * 1024;

/// Minimum stream buffer size (4KB)
/// Smaller values are raised to this floor
pub const MIN_SOCK_BUF_SIZE: usize = 4 * 1024;

/// Maximum datagrams queued on one datagram socket before new ones are dropped
pub const MAX_DATAGRAM_QUEUE: usize = 256;

/// Largest datagram payload accepted by the in-process substrate
/// [LINUX-COMPAT] Maximum UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// First ephemeral port handed out by automatic binds
/// [LINUX-COMPAT] IANA dynamic port range start
pub const EPHEMERAL_PORT_START: u16 = 49_152;
