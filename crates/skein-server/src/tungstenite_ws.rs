use crate::connection::serve_connection;
use crate::frame::{Frame, TransportError};
use crate::hub::FanoutHub;
use futures_util::{future, SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::debug;

/// Standalone WebSocket listener over plain TCP, for embedders that do not
/// bring their own HTTP stack (and for tests that need to drop connections
/// by aborting the accept loop).
pub struct FanoutListener {
    listener: TcpListener,
    hub: FanoutHub,
}

impl FanoutListener {
    /// Bind on `addr` (use `127.0.0.1:0` for an OS-assigned port).
    pub async fn bind(addr: &str, hub: FanoutHub) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(FanoutListener { listener, hub })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Connection tasks live in a `JoinSet` owned by this
    /// future, so dropping (or aborting) it tears every connection down.
    pub async fn run(self) {
        let mut connections = JoinSet::new();
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepting subscriber connection");
                    let hub = self.hub.clone();
                    connections.spawn(async move {
                        if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                            serve_tungstenite_socket(ws, hub).await;
                        }
                    });
                }
                Err(_) => break,
            }
        }
    }
}

/// Adapt an accepted tokio-tungstenite WebSocket onto the connection driver.
pub async fn serve_tungstenite_socket(
    socket: tokio_tungstenite::WebSocketStream<TcpStream>,
    hub: FanoutHub,
) {
    use tokio_tungstenite::tungstenite::protocol::Message;

    let (sink, stream) = socket.split();

    let reader = stream.filter_map(|result| {
        future::ready(match result {
            Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.to_string()))),
            Ok(Message::Ping(data)) => Some(Ok(Frame::Ping(data.to_vec()))),
            Ok(Message::Pong(data)) => Some(Ok(Frame::Pong(data.to_vec()))),
            Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
            Ok(_) => None,
            Err(e) => Some(Err(TransportError::new(e))),
        })
    });

    let writer = sink.sink_map_err(TransportError::new).with(|frame: Frame| {
        future::ready(Ok::<Message, TransportError>(match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close => Message::Close(None),
        }))
    });

    serve_connection(reader, writer, hub).await;
}
