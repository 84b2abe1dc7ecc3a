/*!
 * In-Process Substrate Configuration
 *
 * Runtime sizing for buffers, queues, and port allocation
 */

use crate::core::limits::{
    DEFAULT_SOCK_BUF_SIZE, EPHEMERAL_PORT_START, MAX_DATAGRAM_QUEUE, MIN_SOCK_BUF_SIZE,
};
use serde::{Deserialize, Serialize};

/// Configuration of [`MemSubstrate`](super::MemSubstrate)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemSubstrateConfig {
    /// Send/receive buffer size given to new sockets
    pub default_buf_size: usize,
    /// Datagrams queued per socket before new arrivals are dropped
    pub max_datagram_queue: usize,
    /// First port handed out by automatic binds
    pub ephemeral_port_start: u16,
}

impl Default for MemSubstrateConfig {
    fn default() -> Self {
        Self {
            default_buf_size: DEFAULT_SOCK_BUF_SIZE,
            max_datagram_queue: MAX_DATAGRAM_QUEUE,
            ephemeral_port_start: EPHEMERAL_PORT_START,
        }
    }
}

impl MemSubstrateConfig {
    /// Small buffers and queues, for tests exercising back-pressure
    pub const fn low_memory() -> Self {
        Self {
            default_buf_size: MIN_SOCK_BUF_SIZE,
            max_datagram_queue: 16,
            ephemeral_port_start: EPHEMERAL_PORT_START,
        }
    }

    /// Large buffers for bulk transfer
    pub const fn high_throughput() -> Self {
        Self {
            default_buf_size: 1024 * 1024,
            max_datagram_queue: 4096,
            ephemeral_port_start: EPHEMERAL_PORT_START,
        }
    }

    /// Ring capacity for a stream connection given the requested buffer size
    #[inline]
    pub fn stream_capacity(&self, requested: usize) -> usize {
        let size = if requested == 0 {
            self.default_buf_size
        } else {
            requested
        };
        size.max(MIN_SOCK_BUF_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_capacity_floor() {
        let config = MemSubstrateConfig::default();
        assert_eq!(config.stream_capacity(0), DEFAULT_SOCK_BUF_SIZE);
        assert_eq!(config.stream_capacity(1), MIN_SOCK_BUF_SIZE);
        assert_eq!(config.stream_capacity(1 << 20), 1 << 20);
    }

    #[test]
    fn test_partial_config_deserialization() {
        let config: MemSubstrateConfig =
            serde_json::from_str(r#"{"default_buf_size": 8192}"#).unwrap();
        assert_eq!(config.default_buf_size, 8192);
        assert_eq!(config.ephemeral_port_start, EPHEMERAL_PORT_START);

        let unknown = serde_json::from_str::<MemSubstrateConfig>(r#"{"bogus": 1}"#);
        assert!(unknown.is_err());
    }
}
