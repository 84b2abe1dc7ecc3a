/*!
 * Socket Layer
 * Generic socket handles with dispatch into family backends
 *
 * ## Components
 *
 * - **handle**: per-socket state, lock guard, checkout/checkin
 * - **ops**: backend operation table and family dispatch
 * - **msg**: the send/receive multiplexer
 * - **unix** / **ip**: the two family backends
 */

pub mod addr;
pub mod handle;
pub mod msg;
pub mod ops;
pub mod types;

mod ip;
mod sockopt;
mod unix;

pub use handle::{DetachedSock, SockGuard, SockHandle, SockRecord, SockState};
pub use msg::{recv_msg, send_msg, AddrBuf};
pub use ops::Backend;
pub use types::{AddressFamily, ConnState, SockType};
