use skein_protocol::WireEvent;
use tokio::sync::mpsc;

/// One item of a subscription's lazy sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionItem {
    /// A stored event, replayed or live, in strictly increasing seq order.
    Event(WireEvent),
    /// The replay -> live promotion for the current connection. Appears once
    /// per (re)connection, after the replay slice.
    Promoted {
        stream_id: String,
        last_replay_seq: u64,
    },
}

pub(crate) enum Command {
    Subscribe {
        stream_id: String,
        after_seq: u64,
        reply: tokio::sync::oneshot::Sender<Subscription>,
    },
    Cancel {
        stream_id: String,
    },
    Close,
}

/// A lazy sequence of subscription items.
///
/// Ends (yields `None`) when the subscription is cancelled, the client is
/// closed, or reconnection is exhausted; the reason is observable on the
/// client's error channel. Dropping the subscription cancels it.
pub struct Subscription {
    stream_id: String,
    items: mpsc::Receiver<SubscriptionItem>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub(crate) fn new(
        stream_id: String,
        items: mpsc::Receiver<SubscriptionItem>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Subscription {
            stream_id,
            items,
            commands,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Next item, waiting until one arrives or the sequence ends.
    pub async fn next(&mut self) -> Option<SubscriptionItem> {
        self.items.recv().await
    }

    /// Cancel this subscription; an `unsubscribe` goes out if the handshake
    /// is up. The sequence drains anything already queued, then ends.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel {
            stream_id: self.stream_id.clone(),
        });
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Cancel {
            stream_id: self.stream_id.clone(),
        });
    }
}
