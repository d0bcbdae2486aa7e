//! Fan-out server: multiplexes per-stream subscriptions over text-frame
//! connections with a replay-then-live handover.
//!
//! The [`FanoutHub`] holds the per-stream broadcast registry and a shared
//! event store handle; producers push appended batches through
//! [`FanoutHub::broadcast`]. Each connection runs [`serve_connection`], which
//! is generic over any text-frame transport; [`serve_axum_socket`] adapts an
//! axum WebSocket onto it so embedders keep ownership of upgrade handling.
//!
//! Delivery contract per subscription: the replay slice
//! `(after_seq, head_at_subscribe]`, exactly one `replay-end`, then live
//! events in strictly increasing seq order. No gaps, no duplicates.

mod axum_ws;
mod config;
mod connection;
mod frame;
mod hub;
mod tungstenite_ws;

pub use axum_ws::{serve_axum_socket, ws_handler};
pub use config::FanoutConfig;
pub use connection::serve_connection;
pub use frame::{Frame, TransportError};
pub use hub::FanoutHub;
pub use tungstenite_ws::{serve_tungstenite_socket, FanoutListener};
