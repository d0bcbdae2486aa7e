use std::time::Duration;

/// Tunables for the fan-out server.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Bound on the per-connection outbound queue and on each subscription's
    /// live buffer during replay. Exceeding it closes the connection with
    /// `BUFFER_OVERFLOW`.
    pub max_buffer_size: usize,
    /// How often the server sends a protocol `ping`.
    pub heartbeat_interval: Duration,
    /// Close the connection when no client frame arrives for this long.
    pub heartbeat_timeout: Duration,
    /// Events per store read while streaming a replay slice.
    pub replay_chunk_size: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        FanoutConfig {
            max_buffer_size: 1024,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            replay_chunk_size: 256,
        }
    }
}
