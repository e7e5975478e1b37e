use std::{default::Default, time::Duration};

use crate::constants::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_INCOMING_BUFFER_SIZE};

#[derive(Clone, Debug)]
/// Configuration options to tune context and socket behavior.
pub struct Config {
    /// Max number of simultaneous connections (outbound plus accepted).
    pub max_connections: u16,
    /// Max number of simultaneous listen sockets.
    pub max_listeners: u16,
    /// How long an outbound connect may stay pending before it fails.
    pub connect_timeout: Duration,
    /// Capacity of the per-connection receive ring in bytes.
    pub max_incoming_buffer_size: usize,
    /// Socket receive buffer size in bytes (SO_RCVBUF).
    pub socket_recv_buffer_size: usize,
    /// Socket send buffer size in bytes (SO_SNDBUF).
    pub socket_send_buffer_size: usize,
    /// Disable Nagle's algorithm on every socket (TCP_NODELAY).
    pub nodelay: bool,
    /// Backlog passed to `listen`.
    pub listen_backlog: i32,
    /// PEM certificates trusted when verifying TLS servers.
    /// Empty means outbound TLS connections skip certificate verification.
    pub trusted_certificates: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connections: 64,
            max_listeners: 4,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            max_incoming_buffer_size: DEFAULT_INCOMING_BUFFER_SIZE,
            socket_recv_buffer_size: 256 << 10,
            socket_send_buffer_size: 256 << 10,
            nodelay: true, // latency over throughput, game traffic is small
            listen_backlog: 1024,
            trusted_certificates: Vec::new(), // verification off by default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_buffer_sizes() {
        let config = Config::default();
        assert_eq!(config.max_incoming_buffer_size, 64 << 10);
        assert_eq!(config.socket_recv_buffer_size, 256 << 10);
        assert_eq!(config.socket_send_buffer_size, 256 << 10);
        assert!(config.nodelay);
    }

    #[test]
    fn default_connect_timeout() {
        let config = Config::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }
}
