use thiserror::Error;

/// Minimal frame alphabet the connection driver needs from a transport.
///
/// Text carries protocol JSON; Ping/Pong are transport-level keepalives (the
/// protocol also has its own `ping`/`pong` messages for peers whose
/// transports don't surface control frames).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Transport failure as seen by the driver: read, write, or close errors.
#[derive(Debug, Error)]
#[error("transport: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(err: impl std::fmt::Display) -> Self {
        TransportError(err.to_string())
    }
}
