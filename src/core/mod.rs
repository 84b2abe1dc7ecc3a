/*!
 * Core Module
 * Shared limits, error types and serialization helpers
 */

pub mod bincode;
pub mod data_structures;
pub mod errors;
pub mod limits;

// Re-export for convenience
pub use errors::{SockError, SockResult};
