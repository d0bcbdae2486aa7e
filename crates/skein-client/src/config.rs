use std::time::Duration;

/// Tunables for the subscriber client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Reconnect after a dropped connection. When false, any disconnect ends
    /// every subscription.
    pub reconnect: bool,
    /// First reconnect delay; doubles per attempt.
    pub base_delay: Duration,
    /// Backoff ceiling (jitter is added on top).
    pub max_delay: Duration,
    /// Give up after this many consecutive failed attempts. `None` = retry
    /// forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Close the socket when nothing arrives for this long; reconnection
    /// takes over from there.
    pub heartbeat_timeout: Duration,
    /// Bound of each subscription's item queue. A consumer that stops
    /// pulling eventually backpressures the read loop.
    pub subscription_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            reconnect: true,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_reconnect_attempts: None,
            heartbeat_timeout: Duration::from_secs(45),
            subscription_buffer: 256,
        }
    }
}

/// Options for [`crate::SubscriberClient::subscribe`].
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Start after this seq; 0 = from the beginning of the stream.
    pub after_seq: u64,
}
