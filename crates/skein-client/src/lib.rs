//! Resilient subscriber client.
//!
//! [`SubscriberClient`] owns a driver task running the connect state machine:
//! connect, hello handshake, resubscribe, read loop, reconnect with
//! exponential backoff and jitter. Each [`Subscription`] is a lazy sequence
//! of events; on reconnect the client resumes from the subscription's last
//! confirmed seq and dedups across the promotion window, so a consumer sees
//! every seq at most once, in order.

mod backoff;
mod client;
mod config;
mod subscription;

pub use client::{ClientError, SubscriberClient};
pub use config::{ClientConfig, SubscribeOptions};
pub use subscription::{Subscription, SubscriptionItem};
