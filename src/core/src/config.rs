use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::runs::{RetryPolicy, DEFAULT_FINALIZED_MEMORY, DEFAULT_MAX_TOOL_CALLS};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 127.0.0.1:9810).
    pub bind: SocketAddr,
    /// Interval between server→client pings.
    pub heartbeat_interval: Duration,
    /// Close the connection after this duration without any message.
    pub idle_timeout: Duration,
    /// Frames queued per connection before new events are dropped for it.
    pub outbound_capacity: usize,
    /// Tool-call entries kept per run.
    pub max_tool_calls: usize,
    /// Finalized runs remembered so late cancels still succeed over HTTP.
    pub finalized_memory: usize,
    pub retry: RetryPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9810),
            heartbeat_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(120),
            outbound_capacity: 256,
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
            finalized_memory: DEFAULT_FINALIZED_MEMORY,
            retry: RetryPolicy::default(),
        }
    }
}
