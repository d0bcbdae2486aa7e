use crate::connection::serve_connection;
use crate::frame::{Frame, TransportError};
use crate::hub::FanoutHub;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{future, SinkExt, StreamExt};

/// Ready-made axum route handler. Embedders that need their own auth or
/// routing can upgrade themselves and call [`serve_axum_socket`].
///
/// ```ignore
/// let app = Router::new()
///     .route("/ws/v1/subscribe", get(ws_handler))
///     .with_state(hub);
/// ```
pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<FanoutHub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_axum_socket(socket, hub))
}

/// Adapt an upgraded axum WebSocket onto the generic connection driver.
pub async fn serve_axum_socket(socket: WebSocket, hub: FanoutHub) {
    let (sink, stream) = socket.split();

    let reader = stream.filter_map(|result| {
        future::ready(match result {
            Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.to_string()))),
            Ok(Message::Ping(data)) => Some(Ok(Frame::Ping(data.to_vec()))),
            Ok(Message::Pong(data)) => Some(Ok(Frame::Pong(data.to_vec()))),
            Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
            // The protocol is JSON text frames; binary is silently ignored.
            Ok(Message::Binary(_)) => None,
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
