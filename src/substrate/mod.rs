/*!
 * Substrate Module
 * Interface to the I/O substrate beneath the socket layer, plus an
 * in-process implementation
 */

pub mod errors;
pub mod memory;
pub mod traits;
pub mod types;

// Re-exports
pub use errors::{pal_to_errno, PalError, PalResult};
pub use memory::{MemSubstrate, MemSubstrateConfig, SubstrateStats};
pub use traits::{Accepted, PalHandle, Substrate, Transport};
pub use types::{
    DeleteMode, PalSocketAddr, PalSocketDomain, PalSocketKind, SocketAttr, StreamAttr,
    StreamOptions,
};
